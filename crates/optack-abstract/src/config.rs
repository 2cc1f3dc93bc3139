use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::flow::{Flow, FlowRole};

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("monitor.interval_secs must be positive, got {0}")]
    Interval(f64),
    #[error("monitor.duration_secs must be at least one interval ({interval}s), got {duration}")]
    Duration { duration: f64, interval: f64 },
    #[error("monitor.counter_timeout_ms must be positive")]
    CounterTimeout,
    #[error("monitor.attack_start_offset_secs must not be negative, got {0}")]
    AttackOffset(f64),
    #[error("attack.chunk_size must be positive")]
    ChunkSize,
    #[error("attack.port must be non-zero")]
    Port,
    #[error("attack.progress_interval_secs must be positive, got {0}")]
    ProgressInterval(f64),
}

const TICK_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub interval_secs: f64,
    pub duration_secs: f64,
    pub attack_start_offset_secs: f64,
    pub counter_timeout_ms: u64,
    pub log_path: PathBuf,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: 1.0,
            duration_secs: 15.0,
            attack_start_offset_secs: 5.0,
            counter_timeout_ms: 500,
            log_path: PathBuf::from("data/throughput_log.csv"),
        }
    }
}

impl MonitorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(self.interval_secs)
    }

    pub fn counter_timeout(&self) -> Duration {
        Duration::from_millis(self.counter_timeout_ms)
    }

    pub fn attack_start_offset(&self) -> Duration {
        Duration::from_secs_f64(self.attack_start_offset_secs)
    }

    /// Number of sample ticks in a full run: `⌊duration / interval⌋`,
    /// tolerant of decimal cadences that divide to just under a whole number.
    pub fn tick_budget(&self) -> u64 {
        (self.duration_secs / self.interval_secs + TICK_EPSILON).floor() as u64
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowConfig {
    pub name: String,
    pub interface: String,
    #[serde(default)]
    pub counter_table: Option<PathBuf>,
}

impl FlowConfig {
    pub fn to_flow(&self, role: FlowRole) -> Flow {
        let flow = Flow::new(self.name.clone(), self.interface.clone(), role);
        match &self.counter_table {
            Some(table) => flow.with_counter_table(table.clone()),
            None => flow,
        }
    }

    fn default_target() -> Self {
        Self {
            name: "ts".to_string(),
            interface: "ts-eth0".to_string(),
            counter_table: None,
        }
    }

    fn default_attacker() -> Self {
        Self {
            name: "ats".to_string(),
            interface: "ats-eth0".to_string(),
            counter_table: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AttackConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    /// Bytes per genuine payload chunk, close to one MTU.
    pub chunk_size: usize,
    pub amplification_factor: u32,
    /// Fabricated acknowledgments sent after every payload chunk.
    pub ack_burst: u32,
    pub ack_interval_us: u64,
    pub initial_recv_timeout_ms: u64,
    pub recv_buffer: usize,
    pub progress_interval_secs: f64,
}

impl Default for AttackConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "10.0.4.2".to_string(),
            port: 5001,
            chunk_size: 1460,
            amplification_factor: 100,
            ack_burst: 20,
            ack_interval_us: 100,
            initial_recv_timeout_ms: 2000,
            recv_buffer: 65535,
            progress_interval_secs: 5.0,
        }
    }
}

impl AttackConfig {
    pub fn ack_interval(&self) -> Duration {
        Duration::from_micros(self.ack_interval_us)
    }

    pub fn initial_recv_timeout(&self) -> Duration {
        Duration::from_millis(self.initial_recv_timeout_ms)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_secs_f64(self.progress_interval_secs)
    }

    pub fn victim(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub path: PathBuf,
    pub json_path: Option<PathBuf>,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/attack_report.txt"),
            json_path: None,
        }
    }
}

/// When a supervised load generator is launched during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GeneratorStart {
    /// Before sampling begins, as background traffic.
    #[default]
    Baseline,
    /// Together with the attack client.
    Attack,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadGeneratorConfig {
    pub name: String,
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub start: GeneratorStart,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    pub monitor: MonitorConfig,
    pub target: FlowConfig,
    pub attacker: FlowConfig,
    pub attack: AttackConfig,
    pub report: ReportConfig,
    pub traffic: Vec<LoadGeneratorConfig>,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            monitor: MonitorConfig::default(),
            target: FlowConfig::default_target(),
            attacker: FlowConfig::default_attacker(),
            attack: AttackConfig::default(),
            report: ReportConfig::default(),
            traffic: Vec::new(),
        }
    }
}

impl ExperimentConfig {
    pub fn target_flow(&self) -> Flow {
        self.target.to_flow(FlowRole::Target)
    }

    pub fn attacker_flow(&self) -> Flow {
        self.attacker.to_flow(FlowRole::Attacker)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let m = &self.monitor;
        if !positive(m.interval_secs) {
            return Err(ConfigError::Interval(m.interval_secs));
        }
        if !m.duration_secs.is_finite() || m.duration_secs < m.interval_secs {
            return Err(ConfigError::Duration {
                duration: m.duration_secs,
                interval: m.interval_secs,
            });
        }
        if m.counter_timeout_ms == 0 {
            return Err(ConfigError::CounterTimeout);
        }
        if !m.attack_start_offset_secs.is_finite() || m.attack_start_offset_secs < 0.0 {
            return Err(ConfigError::AttackOffset(m.attack_start_offset_secs));
        }
        let a = &self.attack;
        if a.chunk_size == 0 {
            return Err(ConfigError::ChunkSize);
        }
        if a.port == 0 {
            return Err(ConfigError::Port);
        }
        if !positive(a.progress_interval_secs) {
            return Err(ConfigError::ProgressInterval(a.progress_interval_secs));
        }
        Ok(())
    }
}

fn positive(v: f64) -> bool {
    v.is_finite() && v > 0.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_experiment() {
        let config = ExperimentConfig::default();
        assert_eq!(config.monitor.tick_budget(), 15);
        assert_eq!(config.attack.victim(), "10.0.4.2:5001");
        assert_eq!(config.target_flow().interface, "ts-eth0");
        assert_eq!(config.attacker_flow().role, FlowRole::Attacker);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn tick_budget_floors() {
        let monitor = MonitorConfig {
            interval_secs: 0.4,
            duration_secs: 1.0,
            ..Default::default()
        };
        assert_eq!(monitor.tick_budget(), 2);
    }

    #[test]
    fn tick_budget_survives_decimal_cadence() {
        let budget = |duration_secs, interval_secs| {
            MonitorConfig {
                interval_secs,
                duration_secs,
                ..Default::default()
            }
            .tick_budget()
        };
        assert_eq!(budget(0.6, 0.1), 6);
        assert_eq!(budget(0.3, 0.1), 3);
        assert_eq!(budget(0.7, 0.1), 7);
        assert_eq!(budget(1.5, 0.5), 3);
        assert_eq!(budget(0.65, 0.1), 6);
    }

    #[test]
    fn rejects_zero_counter_timeout() {
        let mut config = ExperimentConfig::default();
        config.monitor.counter_timeout_ms = 0;
        assert_eq!(config.validate(), Err(ConfigError::CounterTimeout));
    }

    #[test]
    fn rejects_bad_cadence() {
        let mut config = ExperimentConfig::default();
        config.monitor.interval_secs = 0.0;
        assert_eq!(config.validate(), Err(ConfigError::Interval(0.0)));

        let mut config = ExperimentConfig::default();
        config.monitor.duration_secs = 0.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Duration { .. })
        ));

        let mut config = ExperimentConfig::default();
        config.attack.port = 0;
        assert_eq!(config.validate(), Err(ConfigError::Port));
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config: ExperimentConfig = toml::from_str(
            r#"
            [monitor]
            duration_secs = 30.0

            [attacker]
            name = "ats"
            interface = "ats-eth0"
            counter_table = "/proc/4242/net/dev"

            [[traffic]]
            name = "ts_server"
            program = "iperf"
            args = ["-s"]
            "#,
        )
        .unwrap();
        assert_eq!(config.monitor.duration_secs, 30.0);
        assert_eq!(config.monitor.interval_secs, 1.0);
        assert_eq!(
            config.attacker_flow().counter_table,
            Some(PathBuf::from("/proc/4242/net/dev"))
        );
        assert_eq!(config.traffic[0].start, GeneratorStart::Baseline);
    }
}
