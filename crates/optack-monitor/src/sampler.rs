use optack_abstract::{CounterError, CounterSource, Flow};
use std::time::Duration;
use tokio::time::{Instant, sleep, timeout};
use tracing::warn;

/// Bitrate of one flow over one sampling window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlowRate {
    pub mbps: f64,
    pub delta_bytes: u64,
    /// Actual time between the two counter reads.
    pub elapsed: Duration,
    /// The counter went backwards; the delta was clamped to zero.
    pub counter_reset: bool,
}

impl FlowRate {
    /// Convert two counter readings into a bitrate using the measured
    /// elapsed time. A decreasing counter yields zero and sets `counter_reset`.
    pub fn between(c0: u64, c1: u64, elapsed: Duration) -> Self {
        let counter_reset = c1 < c0;
        let delta_bytes = c1.saturating_sub(c0);
        let secs = elapsed.as_secs_f64();
        let mbps = if secs > 0.0 {
            delta_bytes as f64 * 8.0 / secs / 1_000_000.0
        } else {
            0.0
        };
        Self {
            mbps,
            delta_bytes,
            elapsed,
            counter_reset,
        }
    }
}

/// Target and attacker rates measured over one shared window.
#[derive(Debug)]
pub struct PairSample {
    pub target: Result<FlowRate, CounterError>,
    pub attacker: Result<FlowRate, CounterError>,
}

#[derive(Debug, Clone, Copy)]
struct Reading {
    at: Instant,
    bytes: u64,
}

pub struct ThroughputSampler<S> {
    source: S,
    read_timeout: Duration,
}

impl<S: CounterSource> ThroughputSampler<S> {
    pub fn new(source: S, read_timeout: Duration) -> Self {
        Self {
            source,
            read_timeout,
        }
    }

    /// Measure one flow: read, wait `interval`, read again.
    pub async fn sample(&self, flow: &Flow, interval: Duration) -> Result<FlowRate, CounterError> {
        let before = self.read(flow).await;
        sleep(interval).await;
        let before = before?;
        let after = self.read(flow).await?;
        Ok(rate(before, after))
    }

    /// Measure both flows over the same window. The two reads on each side
    /// of the wait run concurrently so both rates cover the same interval.
    pub async fn sample_pair(
        &self,
        target: &Flow,
        attacker: &Flow,
        interval: Duration,
    ) -> PairSample {
        let (t0, a0) = tokio::join!(self.read(target), self.read(attacker));
        sleep(interval).await;
        let (target, attacker) = tokio::join!(self.finish(t0, target), self.finish(a0, attacker));
        PairSample { target, attacker }
    }

    async fn finish(
        &self,
        before: Result<Reading, CounterError>,
        flow: &Flow,
    ) -> Result<FlowRate, CounterError> {
        let before = before?;
        let after = self.read(flow).await?;
        Ok(rate(before, after))
    }

    async fn read(&self, flow: &Flow) -> Result<Reading, CounterError> {
        let bytes = match timeout(self.read_timeout, self.source.rx_bytes(flow)).await {
            Ok(result) => result,
            Err(_) => Err(CounterError::Timeout {
                interface: flow.interface.clone(),
                timeout: self.read_timeout,
            }),
        };
        match bytes {
            Ok(bytes) => Ok(Reading {
                at: Instant::now(),
                bytes,
            }),
            Err(e) => {
                warn!("counter unavailable for {}: {}", flow, e);
                Err(e)
            }
        }
    }
}

fn rate(before: Reading, after: Reading) -> FlowRate {
    FlowRate::between(before.bytes, after.bytes, after.at.duration_since(before.at))
}
