use serde::{Deserialize, Serialize};
use std::fmt;

/// Which side of the attack boundary a record was taken on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    BeforeAttack,
    DuringAttack,
}

impl Phase {
    /// Label a point in time relative to a fixed attack start offset.
    pub fn at(elapsed_secs: f64, attack_start_offset_secs: f64) -> Self {
        if elapsed_secs < attack_start_offset_secs {
            Phase::BeforeAttack
        } else {
            Phase::DuringAttack
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::BeforeAttack => f.write_str("BEFORE ATTACK"),
            Phase::DuringAttack => f.write_str("DURING ATTACK"),
        }
    }
}

/// One throughput sample tick covering both measured flows.
///
/// A flow whose counter could not be read is a gap (`None`), never zero
/// traffic. The total exists only when both flows were measured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThroughputRecord {
    pub elapsed_secs: f64,
    pub target_mbps: Option<f64>,
    pub attacker_mbps: Option<f64>,
    pub total_mbps: Option<f64>,
    pub phase: Phase,
    /// At least one flow's counter went backwards during the tick.
    pub counter_reset: bool,
}

impl ThroughputRecord {
    /// Build a record where both flows were measured.
    pub fn new(elapsed_secs: f64, target_mbps: f64, attacker_mbps: f64, phase: Phase) -> Self {
        Self::sampled(elapsed_secs, Some(target_mbps), Some(attacker_mbps), phase)
    }

    /// Build a record that may carry gaps for either flow.
    pub fn sampled(
        elapsed_secs: f64,
        target_mbps: Option<f64>,
        attacker_mbps: Option<f64>,
        phase: Phase,
    ) -> Self {
        Self {
            elapsed_secs,
            target_mbps,
            attacker_mbps,
            total_mbps: target_mbps.zip(attacker_mbps).map(|(t, a)| t + a),
            phase,
            counter_reset: false,
        }
    }

    pub fn with_counter_reset(mut self, reset: bool) -> Self {
        self.counter_reset = reset;
        self
    }

    /// At least one flow is a gap.
    pub fn is_degraded(&self) -> bool {
        self.target_mbps.is_none() || self.attacker_mbps.is_none()
    }

    pub fn is_clean(&self) -> bool {
        !self.counter_reset && !self.is_degraded()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_is_sum_of_flows() {
        let record = ThroughputRecord::new(3.0, 0.1, 0.2, Phase::BeforeAttack);
        assert_eq!(record.total_mbps, Some(0.1 + 0.2));
        assert!(record.is_clean());
    }

    #[test]
    fn gap_leaves_total_undefined() {
        let record = ThroughputRecord::sampled(3.0, Some(4.0), None, Phase::DuringAttack);
        assert!(record.is_degraded());
        assert!(!record.is_clean());
        assert_eq!(record.target_mbps, Some(4.0));
        assert_eq!(record.total_mbps, None);
    }

    #[test]
    fn phase_boundary_belongs_to_attack() {
        assert_eq!(Phase::at(4.9, 5.0), Phase::BeforeAttack);
        assert_eq!(Phase::at(5.0, 5.0), Phase::DuringAttack);
        assert_eq!(Phase::at(0.0, 0.0), Phase::DuringAttack);
    }
}
