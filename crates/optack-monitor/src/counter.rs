use optack_abstract::{CounterError, CounterSource, Flow};
use std::path::{Path, PathBuf};
use tracing::debug;

const DEFAULT_TABLE: &str = "/proc/net/dev";

/// Reads received-byte counters from `/proc/net/dev`-formatted tables.
///
/// Each flow may point at its own table (for example `/proc/<pid>/net/dev`
/// of a process living in the host's network namespace); flows without one
/// use the default table.
#[derive(Debug, Clone)]
pub struct ProcNetDevSource {
    default_table: PathBuf,
}

impl Default for ProcNetDevSource {
    fn default() -> Self {
        Self::new(DEFAULT_TABLE)
    }
}

impl ProcNetDevSource {
    pub fn new(default_table: impl Into<PathBuf>) -> Self {
        Self {
            default_table: default_table.into(),
        }
    }

    fn table_for<'a>(&'a self, flow: &'a Flow) -> &'a Path {
        flow.counter_table
            .as_deref()
            .unwrap_or(self.default_table.as_path())
    }
}

impl CounterSource for ProcNetDevSource {
    async fn rx_bytes(&self, flow: &Flow) -> Result<u64, CounterError> {
        let table = self.table_for(flow);
        let text = tokio::fs::read_to_string(table)
            .await
            .map_err(|source| CounterError::Table {
                table: table.to_path_buf(),
                source,
            })?;
        let bytes = parse_rx_bytes(&text, &flow.interface, table)?;
        debug!("{} rx_bytes={}", flow.interface, bytes);
        Ok(bytes)
    }
}

/// Extract the cumulative received-byte field for `interface` from a
/// `/proc/net/dev` table. The field is the first number after `iface:`.
pub fn parse_rx_bytes(text: &str, interface: &str, table: &Path) -> Result<u64, CounterError> {
    for line in text.lines() {
        let Some((name, fields)) = line.split_once(':') else {
            continue;
        };
        if name.trim() != interface {
            continue;
        }
        return fields
            .split_whitespace()
            .next()
            .and_then(|field| field.parse::<u64>().ok())
            .ok_or_else(|| CounterError::Malformed {
                interface: interface.to_string(),
                row: line.to_string(),
            });
    }
    Err(CounterError::MissingInterface {
        interface: interface.to_string(),
        table: table.to_path_buf(),
    })
}
