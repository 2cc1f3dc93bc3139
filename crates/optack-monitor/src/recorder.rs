use optack_abstract::{CounterError, CounterSource, Flow, MonitorConfig, Phase, ThroughputRecord};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::log::RecordSink;
use crate::sampler::{FlowRate, PairSample, ThroughputSampler};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    Idle,
    Running,
    Completed,
}

/// How a recorder run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunDisposition {
    /// Every tick in the budget produced a record.
    Completed { ticks: u64 },
    /// Cancellation was observed at a tick boundary.
    Cancelled { ticks: u64, budget: u64 },
}

impl RunDisposition {
    pub fn ticks(&self) -> u64 {
        match self {
            RunDisposition::Completed { ticks } | RunDisposition::Cancelled { ticks, .. } => *ticks,
        }
    }
}

/// Samples the target and attacker flows on a fixed cadence and keeps the
/// resulting time series, persisting each record as soon as it exists.
pub struct TimeSeriesRecorder<S> {
    sampler: ThroughputSampler<S>,
    target: Flow,
    attacker: Flow,
    interval: Duration,
    tick_budget: u64,
    attack_start_offset_secs: f64,
    state: RecorderState,
    disposition: Option<RunDisposition>,
    records: Vec<ThroughputRecord>,
}

impl<S: CounterSource> TimeSeriesRecorder<S> {
    pub fn new(
        sampler: ThroughputSampler<S>,
        target: Flow,
        attacker: Flow,
        config: &MonitorConfig,
    ) -> Self {
        Self {
            sampler,
            target,
            attacker,
            interval: config.interval(),
            tick_budget: config.tick_budget(),
            attack_start_offset_secs: config.attack_start_offset_secs,
            state: RecorderState::Idle,
            disposition: None,
            records: Vec::new(),
        }
    }

    pub fn state(&self) -> RecorderState {
        self.state
    }

    pub fn records(&self) -> &[ThroughputRecord] {
        &self.records
    }

    /// Hand the finished series over, e.g. to the report synthesizer.
    pub fn into_records(self) -> Vec<ThroughputRecord> {
        self.records
    }

    /// Run the tick loop until the budget is spent or `cancel` turns true.
    ///
    /// Cancellation is checked only between ticks. Calling `run` again after
    /// completion returns the original disposition without sampling.
    pub async fn run<K: RecordSink>(
        &mut self,
        sink: &mut K,
        cancel: &mut watch::Receiver<bool>,
    ) -> RunDisposition {
        if let Some(disposition) = self.disposition {
            return disposition;
        }

        self.state = RecorderState::Running;
        info!(
            "Recording {} ticks of {:?} for {} and {}",
            self.tick_budget, self.interval, self.target, self.attacker
        );

        let start = Instant::now();
        let mut disposition = RunDisposition::Completed {
            ticks: self.tick_budget,
        };

        for tick in 0..self.tick_budget {
            if *cancel.borrow_and_update() {
                info!("Recorder cancelled after {} of {} ticks", tick, self.tick_budget);
                disposition = RunDisposition::Cancelled {
                    ticks: tick,
                    budget: self.tick_budget,
                };
                break;
            }

            let elapsed_secs = start.elapsed().as_secs_f64();
            let sample = self
                .sampler
                .sample_pair(&self.target, &self.attacker, self.interval)
                .await;
            let record = build_record(
                elapsed_secs,
                Phase::at(elapsed_secs, self.attack_start_offset_secs),
                sample,
            );

            info!(
                "[{:.1}s] {}: Target: {}, Attacker: {}, Total: {}",
                record.elapsed_secs,
                record.phase,
                fmt_rate(record.target_mbps),
                fmt_rate(record.attacker_mbps),
                fmt_rate(record.total_mbps)
            );
            if let Err(e) = sink.append(&record) {
                warn!("Failed to persist record at {:.1}s: {}", record.elapsed_secs, e);
            }
            self.records.push(record);
        }

        self.state = RecorderState::Completed;
        self.disposition = Some(disposition);
        disposition
    }
}

fn build_record(elapsed_secs: f64, phase: Phase, sample: PairSample) -> ThroughputRecord {
    let mut counter_reset = false;
    let mut mbps = |rate: Result<FlowRate, CounterError>| {
        rate.ok().map(|r| {
            counter_reset |= r.counter_reset;
            r.mbps
        })
    };
    let target = mbps(sample.target);
    let attacker = mbps(sample.attacker);

    if counter_reset {
        warn!("Counter reset detected at {:.1}s, delta clamped to zero", elapsed_secs);
    }
    let record = ThroughputRecord::sampled(elapsed_secs, target, attacker, phase)
        .with_counter_reset(counter_reset);
    if record.is_degraded() {
        warn!("Sample at {:.1}s has a gap, excluded from averages", elapsed_secs);
    }
    record
}

fn fmt_rate(mbps: Option<f64>) -> String {
    match mbps {
        Some(v) => format!("{:.2} Mbps", v),
        None => "n/a".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::ThroughputLog;
    use crate::test_util::{RampSource, ScriptedSource, attacker, target};
    use std::io;

    fn monitor(interval_secs: f64, duration_secs: f64) -> MonitorConfig {
        MonitorConfig {
            interval_secs,
            duration_secs,
            attack_start_offset_secs: 5.0,
            ..Default::default()
        }
    }

    fn recorder<S: CounterSource>(source: S, config: &MonitorConfig) -> TimeSeriesRecorder<S> {
        TimeSeriesRecorder::new(
            ThroughputSampler::new(source, Duration::from_millis(500)),
            target(),
            attacker(),
            config,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn fifteen_second_run_yields_fifteen_ordered_records() {
        let source = RampSource::new(&[("ts-eth0", 1_250_000), ("ats-eth0", 250_000)]);
        let mut recorder = recorder(source, &monitor(1.0, 15.0));
        let mut log = ThroughputLog::new(Vec::new()).unwrap();
        let (_tx, mut rx) = watch::channel(false);

        assert_eq!(recorder.state(), RecorderState::Idle);
        let disposition = recorder.run(&mut log, &mut rx).await;
        assert_eq!(disposition, RunDisposition::Completed { ticks: 15 });
        assert_eq!(recorder.state(), RecorderState::Completed);

        let records = recorder.records();
        assert_eq!(records.len(), 15);
        for pair in records.windows(2) {
            let gap = pair[1].elapsed_secs - pair[0].elapsed_secs;
            assert!(gap > 0.0 && gap <= 2.0, "gap {gap} out of tolerance");
        }
        for record in records {
            let (target, attacker) = (record.target_mbps.unwrap(), record.attacker_mbps.unwrap());
            assert_eq!(record.total_mbps, Some(target + attacker));
            assert!((target - 10.0).abs() < 1e-6);
            assert!((attacker - 2.0).abs() < 1e-6);
            assert!(record.is_clean());
        }
        assert_eq!(records[4].phase, Phase::BeforeAttack);
        assert_eq!(records[5].phase, Phase::DuringAttack);

        let text = String::from_utf8(log.into_inner()).unwrap();
        assert_eq!(text.lines().count(), 16);
        assert_eq!(text.lines().nth(1), Some("0.0,10.00,2.00,12.00"));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_at_tick_boundary_and_keeps_records() {
        let source = RampSource::new(&[("ts-eth0", 1_000), ("ats-eth0", 1_000)]);
        let mut recorder = recorder(source, &monitor(1.0, 15.0));
        let (tx, mut rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut log = ThroughputLog::new(Vec::new()).unwrap();
            let disposition = recorder.run(&mut log, &mut rx).await;
            (recorder, disposition)
        });

        tokio::time::sleep(Duration::from_millis(3500)).await;
        tx.send(true).unwrap();
        let (recorder, disposition) = handle.await.unwrap();

        assert_eq!(
            disposition,
            RunDisposition::Cancelled {
                ticks: 4,
                budget: 15
            }
        );
        assert_eq!(recorder.state(), RecorderState::Completed);
        assert_eq!(recorder.into_records().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn unreadable_counter_leaves_gap_without_aborting() {
        let source = ScriptedSource::default()
            .with("ts-eth0", &[Some(0), Some(125_000), Some(125_000), Some(250_000)])
            .with("ats-eth0", &[None]);
        let mut recorder = recorder(source, &monitor(1.0, 2.0));
        let mut log = ThroughputLog::new(Vec::new()).unwrap();
        let (_tx, mut rx) = watch::channel(false);

        let disposition = recorder.run(&mut log, &mut rx).await;
        assert_eq!(disposition.ticks(), 2);
        for record in recorder.records() {
            assert!(record.is_degraded());
            assert_eq!(record.attacker_mbps, None);
            assert_eq!(record.total_mbps, None);
            assert!((record.target_mbps.unwrap() - 1.0).abs() < 1e-9);
        }

        let text = String::from_utf8(log.into_inner()).unwrap();
        assert_eq!(text.lines().nth(1), Some("0.0,1.00,,"));
    }

    #[tokio::test(start_paused = true)]
    async fn counter_reset_is_flagged_on_record() {
        let source = ScriptedSource::default()
            .with("ts-eth0", &[Some(500_000), Some(20)])
            .with("ats-eth0", &[Some(0), Some(125_000)]);
        let mut recorder = recorder(source, &monitor(1.0, 1.0));
        let mut log = ThroughputLog::new(Vec::new()).unwrap();
        let (_tx, mut rx) = watch::channel(false);

        recorder.run(&mut log, &mut rx).await;
        let record = &recorder.records()[0];
        assert!(record.counter_reset);
        assert!(!record.is_degraded());
        assert_eq!(record.target_mbps, Some(0.0));
        assert_eq!(record.total_mbps, record.attacker_mbps);
    }

    struct BrokenSink;

    impl RecordSink for BrokenSink {
        fn append(&mut self, _record: &ThroughputRecord) -> io::Result<()> {
            Err(io::Error::other("disk full"))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn persistence_failure_does_not_stop_recording() {
        let source = RampSource::new(&[("ts-eth0", 1_000), ("ats-eth0", 1_000)]);
        let mut recorder = recorder(source, &monitor(0.5, 1.5));
        let (_tx, mut rx) = watch::channel(false);

        let disposition = recorder.run(&mut BrokenSink, &mut rx).await;
        assert_eq!(disposition, RunDisposition::Completed { ticks: 3 });
        assert_eq!(recorder.records().len(), 3);

        // A second run replays the disposition instead of sampling again.
        assert_eq!(recorder.run(&mut BrokenSink, &mut rx).await, disposition);
        assert_eq!(recorder.records().len(), 3);
    }
}
