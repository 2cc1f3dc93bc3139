pub mod config;
pub mod counter;
pub mod flow;
pub mod record;
pub mod scenario;

pub use config::{
    AttackConfig, ConfigError, ExperimentConfig, FlowConfig, GeneratorStart, LoadGeneratorConfig,
    MonitorConfig, ReportConfig,
};
pub use counter::{CounterError, CounterSource};
pub use flow::{Flow, FlowRole};
pub use record::{Phase, ThroughputRecord};
pub use scenario::{AttackOverride, MonitorOverride, ScenarioOverride};
