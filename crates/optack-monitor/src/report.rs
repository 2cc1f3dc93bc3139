use optack_abstract::ThroughputRecord;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReportError {
    /// One side of the attack boundary has no measured target sample.
    #[error(
        "insufficient data: {before} measured target sample(s) before and {during} during the attack; both phases are required"
    )]
    InsufficientData { before: usize, during: usize },
}

/// Before/during-attack statistics derived from a finished time series.
///
/// Means cover measured values only; gaps are counted but never averaged.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExperimentReport {
    pub attack_start_offset_secs: f64,
    pub pre_attack_samples: usize,
    pub post_attack_samples: usize,
    pub pre_attack_gaps: usize,
    pub post_attack_gaps: usize,
    pub pre_attack_target_mbps: f64,
    pub post_attack_target_mbps: f64,
    /// `None` when the target carried no traffic before the attack.
    pub throughput_reduction_pct: Option<f64>,
    pub pre_attack_attacker_mbps: Option<f64>,
    pub post_attack_attacker_mbps: Option<f64>,
    pub pre_attack_total_mbps: Option<f64>,
    pub post_attack_total_mbps: Option<f64>,
}

#[derive(Default)]
struct Mean {
    sum: f64,
    count: usize,
}

impl Mean {
    fn add(&mut self, value: Option<f64>) {
        if let Some(v) = value {
            self.sum += v;
            self.count += 1;
        }
    }

    fn value(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }
}

#[derive(Default)]
struct Partition {
    records: usize,
    gaps: usize,
    target: Mean,
    attacker: Mean,
    total: Mean,
}

impl Partition {
    fn add(&mut self, r: &ThroughputRecord) {
        self.records += 1;
        if r.is_degraded() {
            self.gaps += 1;
        }
        self.target.add(r.target_mbps);
        self.attacker.add(r.attacker_mbps);
        self.total.add(r.total_mbps);
    }
}

/// Partition `records` at `attack_start_offset_secs` and compute per-phase
/// means. Records with `elapsed < offset` are "before", the rest "during".
pub fn synthesize(
    records: &[ThroughputRecord],
    attack_start_offset_secs: f64,
) -> Result<ExperimentReport, ReportError> {
    let mut pre = Partition::default();
    let mut post = Partition::default();
    for record in records {
        if record.elapsed_secs < attack_start_offset_secs {
            pre.add(record);
        } else {
            post.add(record);
        }
    }

    let (Some(pre_target), Some(post_target)) = (pre.target.value(), post.target.value()) else {
        return Err(ReportError::InsufficientData {
            before: pre.target.count,
            during: post.target.count,
        });
    };
    let throughput_reduction_pct =
        (pre_target != 0.0).then(|| (1.0 - post_target / pre_target) * 100.0);

    Ok(ExperimentReport {
        attack_start_offset_secs,
        pre_attack_samples: pre.records,
        post_attack_samples: post.records,
        pre_attack_gaps: pre.gaps,
        post_attack_gaps: post.gaps,
        pre_attack_target_mbps: pre_target,
        post_attack_target_mbps: post_target,
        throughput_reduction_pct,
        pre_attack_attacker_mbps: pre.attacker.value(),
        post_attack_attacker_mbps: post.attacker.value(),
        pre_attack_total_mbps: pre.total.value(),
        post_attack_total_mbps: post.total.value(),
    })
}

struct Mbps(Option<f64>);

impl fmt::Display for Mbps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(v) => write!(f, "{:.2} Mbps", v),
            None => f.write_str("unavailable (no measured samples)"),
        }
    }
}

impl fmt::Display for ExperimentReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Optimistic ACKing Attack Report")?;
        writeln!(f, "==============================")?;
        writeln!(f)?;
        writeln!(
            f,
            "Target Traffic (Before Attack): {:.2} Mbps",
            self.pre_attack_target_mbps
        )?;
        writeln!(
            f,
            "Target Traffic (During Attack): {:.2} Mbps",
            self.post_attack_target_mbps
        )?;
        match self.throughput_reduction_pct {
            Some(pct) => writeln!(f, "Throughput Reduction: {:.2}%", pct)?,
            None => writeln!(
                f,
                "Throughput Reduction: undefined (no target traffic before attack)"
            )?,
        }
        writeln!(f)?;
        writeln!(
            f,
            "Attacker Traffic (Before Attack): {}",
            Mbps(self.pre_attack_attacker_mbps)
        )?;
        writeln!(
            f,
            "Attacker Traffic (During Attack): {}",
            Mbps(self.post_attack_attacker_mbps)
        )?;
        writeln!(f)?;
        writeln!(f, "Total Traffic:")?;
        writeln!(f, "  Before Attack: {}", Mbps(self.pre_attack_total_mbps))?;
        writeln!(f, "  During Attack: {}", Mbps(self.post_attack_total_mbps))?;
        if self.pre_attack_gaps + self.post_attack_gaps > 0 {
            writeln!(f)?;
            writeln!(
                f,
                "Gaps: {} before, {} during attack (excluded from averages)",
                self.pre_attack_gaps, self.post_attack_gaps
            )?;
        }
        Ok(())
    }
}
