use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::flow::Flow;

/// Reasons a cumulative byte counter could not be read. Every variant means
/// the counter is unavailable for this sample; none of them is zero traffic.
#[derive(Debug, Error)]
pub enum CounterError {
    #[error("failed to read counter table {table}: {source}")]
    Table {
        table: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("interface {interface} not present in {table}")]
    MissingInterface { interface: String, table: PathBuf },
    #[error("malformed counter row for {interface}: {row:?}")]
    Malformed { interface: String, row: String },
    #[error("counter read for {interface} timed out after {timeout:?}")]
    Timeout { interface: String, timeout: Duration },
}

/// Supplies the cumulative received-byte counter of a flow's interface.
///
/// Implementations must not treat a missing interface as zero bytes.
pub trait CounterSource: Send + Sync {
    fn rx_bytes(&self, flow: &Flow) -> impl Future<Output = Result<u64, CounterError>> + Send;
}

impl<S: CounterSource> CounterSource for std::sync::Arc<S> {
    fn rx_bytes(&self, flow: &Flow) -> impl Future<Output = Result<u64, CounterError>> + Send {
        (**self).rx_bytes(flow)
    }
}
