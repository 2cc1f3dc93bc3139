use anyhow::{Context, Result};
use optack_abstract::{ExperimentConfig, GeneratorStart};
use optack_attack::{AttackClient, AttackExit, AttackOutcome, AttackTotals};
use optack_monitor::{
    ExperimentReport, ProcNetDevSource, ReportError, RunDisposition, ThroughputLog,
    ThroughputSampler, TimeSeriesRecorder, synthesize,
};
use serde::Serialize;
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, timeout};
use tracing::{error, info, warn};

use crate::traffic::TrafficSupervisor;

/// How long a stopped attack may take to notice before it is aborted.
const ATTACK_STOP_GRACE: Duration = Duration::from_secs(5);

pub fn build_recorder(config: &ExperimentConfig) -> TimeSeriesRecorder<ProcNetDevSource> {
    let sampler = ThroughputSampler::new(
        ProcNetDevSource::default(),
        config.monitor.counter_timeout(),
    );
    TimeSeriesRecorder::new(
        sampler,
        config.target_flow(),
        config.attacker_flow(),
        &config.monitor,
    )
}

/// What became of the attack client during a run.
#[derive(Debug)]
pub enum AttackDisposition {
    Disabled,
    /// The run was cancelled before the attack delay elapsed.
    NotStarted,
    Finished(AttackOutcome),
    /// Ignored the stop signal for the whole grace period and was aborted.
    Unresponsive,
    Panicked,
}

impl AttackDisposition {
    pub fn totals(&self) -> Option<AttackTotals> {
        match self {
            AttackDisposition::Finished(outcome) => Some(outcome.totals()),
            _ => None,
        }
    }
}

impl fmt::Display for AttackDisposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttackDisposition::Disabled => write!(f, "disabled"),
            AttackDisposition::NotStarted => {
                write!(f, "not started (cancelled before the attack offset)")
            }
            AttackDisposition::Unresponsive => write!(f, "aborted after ignoring the stop signal"),
            AttackDisposition::Panicked => write!(f, "task panicked"),
            AttackDisposition::Finished(outcome) => {
                match outcome.exit() {
                    AttackExit::Cancelled => write!(f, "cancelled")?,
                    AttackExit::PeerClosed => write!(f, "ended, victim closed the connection")?,
                    AttackExit::Failed(e) => write!(f, "aborted: {}", e)?,
                }
                let totals = outcome.totals();
                write!(
                    f,
                    " ({:.2} MB in {:.1}s, {} fabricated ACKs)",
                    totals.megabytes_sent(),
                    totals.elapsed.as_secs_f64(),
                    totals.fabricated_acks
                )
            }
        }
    }
}

pub fn describe_recording(disposition: &RunDisposition) -> String {
    match disposition {
        RunDisposition::Completed { ticks } => format!("completed ({} ticks)", ticks),
        RunDisposition::Cancelled { ticks, budget } => {
            format!("cancelled after {} of {} ticks", ticks, budget)
        }
    }
}

/// Explicit end state of every part of a run.
#[derive(Debug)]
pub struct RunSummary {
    pub recording: RunDisposition,
    pub attack: AttackDisposition,
    pub report: Result<ExperimentReport, ReportError>,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Recording: {}", describe_recording(&self.recording))?;
        writeln!(f, "Attack: {}", self.attack)?;
        match &self.report {
            Ok(_) => write!(f, "Report: produced"),
            Err(e) => write!(f, "Report: unavailable, {}", e),
        }
    }
}

#[derive(Serialize)]
struct ReportDocument<'a> {
    report: &'a ExperimentReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    attack: Option<AttackTotals>,
    config: &'a ExperimentConfig,
}

/// Write the text report, plus the JSON form when `report.json_path` is set.
pub fn write_report(
    config: &ExperimentConfig,
    report: &ExperimentReport,
    attack: Option<AttackTotals>,
) -> Result<()> {
    write_file(&config.report.path, &report.to_string())?;
    info!("Report saved to {}", config.report.path.display());

    if let Some(path) = &config.report.json_path {
        let document = ReportDocument {
            report,
            attack,
            config,
        };
        write_file(path, &serde_json::to_string_pretty(&document)?)?;
        info!("JSON report saved to {}", path.display());
    }
    Ok(())
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    fs::write(path, contents).with_context(|| format!("Failed to write {}", path.display()))
}

/// Sleep for `delay` unless `cancel` turns true first. Returns whether the
/// run was cancelled.
async fn wait_unless_cancelled(delay: Duration, cancel: &mut watch::Receiver<bool>) -> bool {
    let deadline = sleep(delay);
    tokio::pin!(deadline);
    loop {
        if *cancel.borrow_and_update() {
            return true;
        }
        tokio::select! {
            _ = &mut deadline => return false,
            changed = cancel.changed() => {
                if changed.is_err() {
                    // Nobody can cancel any more.
                    (&mut deadline).await;
                    return false;
                }
            }
        }
    }
}

enum AttackTask {
    Disabled,
    NotStarted,
    Running(JoinHandle<AttackOutcome>),
}

/// Run one experiment to completion (or cancellation).
///
/// `cancel` stops the recorder at its next tick boundary and, if it fires
/// before the attack offset, keeps the attack from starting. The attack is
/// always stopped once recording ends.
pub async fn run_experiment(
    config: &ExperimentConfig,
    cancel: watch::Receiver<bool>,
) -> Result<RunSummary> {
    config.validate()?;

    let log_dir = config
        .monitor
        .log_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let mut traffic = TrafficSupervisor::new(log_dir);
    traffic.start_phase(&config.traffic, GeneratorStart::Baseline)?;
    traffic.settle().await;

    let mut log = ThroughputLog::create(&config.monitor.log_path).with_context(|| {
        format!(
            "Failed to create throughput log {}",
            config.monitor.log_path.display()
        )
    })?;
    info!("Logging throughput to {}", config.monitor.log_path.display());

    let mut recorder = build_recorder(config);
    let mut recorder_cancel = cancel.clone();
    let started = Instant::now();
    let recording = tokio::spawn(async move {
        let disposition = recorder.run(&mut log, &mut recorder_cancel).await;
        (disposition, recorder.into_records())
    });

    let (stop_attack, attack_stop) = watch::channel(false);
    let mut delay_cancel = cancel;
    let cancelled =
        wait_unless_cancelled(config.monitor.attack_start_offset(), &mut delay_cancel).await;
    let attack = if cancelled {
        info!("Cancelled before the attack offset, attack not started");
        AttackTask::NotStarted
    } else {
        if let Err(e) = traffic.start_phase(&config.traffic, GeneratorStart::Attack) {
            warn!("Attack-phase traffic: {:#}", e);
        }
        let task = if config.attack.enabled {
            let client = AttackClient::new(config.attack.clone());
            let mut stop = attack_stop;
            info!(
                "Attack starting {:.2}s into recording (offset {:.2}s)",
                started.elapsed().as_secs_f64(),
                config.monitor.attack_start_offset_secs
            );
            AttackTask::Running(tokio::spawn(async move { client.run(&mut stop).await }))
        } else {
            info!("Attack disabled, recording only");
            AttackTask::Disabled
        };
        traffic.settle().await;
        task
    };

    let recorded = recording.await;
    stop_attack.send_replace(true);

    let attack = match attack {
        AttackTask::Disabled => AttackDisposition::Disabled,
        AttackTask::NotStarted => AttackDisposition::NotStarted,
        AttackTask::Running(mut handle) => match timeout(ATTACK_STOP_GRACE, &mut handle).await {
            Ok(Ok(outcome)) => AttackDisposition::Finished(outcome),
            Ok(Err(e)) => {
                error!("Attack task failed: {}", e);
                AttackDisposition::Panicked
            }
            Err(_) => {
                warn!("Attack did not stop within {:?}, aborting", ATTACK_STOP_GRACE);
                handle.abort();
                AttackDisposition::Unresponsive
            }
        },
    };
    traffic.stop_all().await;

    let (recording, records) = recorded.context("Recorder task failed")?;
    let report = synthesize(&records, config.monitor.attack_start_offset_secs);
    match &report {
        Ok(report) => write_report(config, report, attack.totals())?,
        Err(e) => warn!("No report: {}", e),
    }

    Ok(RunSummary {
        recording,
        attack,
        report,
    })
}
