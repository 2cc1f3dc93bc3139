use crate::config::{ExperimentConfig, FlowConfig, LoadGeneratorConfig};
use serde::Deserialize;
use std::path::PathBuf;

/// An experiment scenario loaded from TOML. Every field is optional and is
/// layered over [`ExperimentConfig::default`].
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct ScenarioOverride {
    pub name: Option<String>,
    pub description: Option<String>,
    pub monitor: MonitorOverride,
    pub attack: AttackOverride,
    pub target: Option<FlowConfig>,
    pub attacker: Option<FlowConfig>,
    pub report_path: Option<PathBuf>,
    pub report_json_path: Option<PathBuf>,
    pub traffic: Option<Vec<LoadGeneratorConfig>>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct MonitorOverride {
    pub interval_secs: Option<f64>,
    pub duration_secs: Option<f64>,
    pub attack_start_offset_secs: Option<f64>,
    pub counter_timeout_ms: Option<u64>,
    pub log_path: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct AttackOverride {
    pub enabled: Option<bool>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub chunk_size: Option<usize>,
    pub amplification_factor: Option<u32>,
    pub ack_burst: Option<u32>,
    pub ack_interval_us: Option<u64>,
    pub initial_recv_timeout_ms: Option<u64>,
    pub recv_buffer: Option<usize>,
    pub progress_interval_secs: Option<f64>,
}

impl ScenarioOverride {
    /// `name: description` for start-up logging, when the file names itself.
    pub fn label(&self) -> Option<String> {
        match (&self.name, &self.description) {
            (Some(name), Some(description)) => Some(format!("{}: {}", name, description)),
            (Some(name), None) => Some(name.clone()),
            (None, Some(description)) => Some(description.clone()),
            (None, None) => None,
        }
    }

    pub fn apply_to(&self, config: &mut ExperimentConfig) {
        self.monitor.apply_to(config);
        self.attack.apply_to(config);
        if let Some(v) = &self.target {
            config.target = v.clone();
        }
        if let Some(v) = &self.attacker {
            config.attacker = v.clone();
        }
        if let Some(v) = &self.report_path {
            config.report.path = v.clone();
        }
        if let Some(v) = &self.report_json_path {
            config.report.json_path = Some(v.clone());
        }
        if let Some(v) = &self.traffic {
            config.traffic = v.clone();
        }
    }
}

impl MonitorOverride {
    pub fn apply_to(&self, config: &mut ExperimentConfig) {
        let m = &mut config.monitor;
        if let Some(v) = self.interval_secs {
            m.interval_secs = v;
        }
        if let Some(v) = self.duration_secs {
            m.duration_secs = v;
        }
        if let Some(v) = self.attack_start_offset_secs {
            m.attack_start_offset_secs = v;
        }
        if let Some(v) = self.counter_timeout_ms {
            m.counter_timeout_ms = v;
        }
        if let Some(v) = &self.log_path {
            m.log_path = v.clone();
        }
    }
}

impl AttackOverride {
    pub fn apply_to(&self, config: &mut ExperimentConfig) {
        let a = &mut config.attack;
        if let Some(v) = self.enabled {
            a.enabled = v;
        }
        if let Some(v) = &self.host {
            a.host = v.clone();
        }
        if let Some(v) = self.port {
            a.port = v;
        }
        if let Some(v) = self.chunk_size {
            a.chunk_size = v;
        }
        if let Some(v) = self.amplification_factor {
            a.amplification_factor = v;
        }
        if let Some(v) = self.ack_burst {
            a.ack_burst = v;
        }
        if let Some(v) = self.ack_interval_us {
            a.ack_interval_us = v;
        }
        if let Some(v) = self.initial_recv_timeout_ms {
            a.initial_recv_timeout_ms = v;
        }
        if let Some(v) = self.recv_buffer {
            a.recv_buffer = v;
        }
        if let Some(v) = self.progress_interval_secs {
            a.progress_interval_secs = v;
        }
    }
}
