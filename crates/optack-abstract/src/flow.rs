use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Which side of the bottleneck a measured flow belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowRole {
    Target,
    Attacker,
}

impl fmt::Display for FlowRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowRole::Target => f.write_str("target"),
            FlowRole::Attacker => f.write_str("attacker"),
        }
    }
}

/// One measured traffic direction, identified by the receiving interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Flow {
    pub name: String,
    pub interface: String,
    pub role: FlowRole,
    /// Counter table the interface is read from. `None` means the host's own
    /// `/proc/net/dev`.
    pub counter_table: Option<PathBuf>,
}

impl Flow {
    pub fn new(name: impl Into<String>, interface: impl Into<String>, role: FlowRole) -> Self {
        Self {
            name: name.into(),
            interface: interface.into(),
            role,
            counter_table: None,
        }
    }

    pub fn with_counter_table(mut self, table: impl Into<PathBuf>) -> Self {
        self.counter_table = Some(table.into());
        self
    }
}

impl fmt::Display for Flow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, {})", self.name, self.interface, self.role)
    }
}
