use optack_abstract::{CounterError, CounterSource, Flow, FlowRole};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use tokio::time::Instant;

pub fn target() -> Flow {
    Flow::new("ts", "ts-eth0", FlowRole::Target)
}

pub fn attacker() -> Flow {
    Flow::new("ats", "ats-eth0", FlowRole::Attacker)
}

/// Counters that grow linearly with the tokio clock at a fixed byte rate per
/// interface, so a paused runtime yields exact bitrates.
pub struct RampSource {
    start: Instant,
    bytes_per_sec: HashMap<String, u64>,
}

impl RampSource {
    pub fn new(rates: &[(&str, u64)]) -> Self {
        Self {
            start: Instant::now(),
            bytes_per_sec: rates
                .iter()
                .map(|(iface, rate)| (iface.to_string(), *rate))
                .collect(),
        }
    }
}

impl CounterSource for RampSource {
    async fn rx_bytes(&self, flow: &Flow) -> Result<u64, CounterError> {
        let rate = self.bytes_per_sec.get(&flow.interface).copied().ok_or_else(|| {
            CounterError::MissingInterface {
                interface: flow.interface.clone(),
                table: "ramp".into(),
            }
        })?;
        let secs = self.start.elapsed().as_secs_f64();
        Ok((secs * rate as f64).round() as u64)
    }
}

/// Replays a fixed sequence of readings per interface. `None` entries fail
/// as a missing interface; an exhausted script repeats its last reading.
#[derive(Default)]
pub struct ScriptedSource {
    scripts: Mutex<HashMap<String, VecDeque<Option<u64>>>>,
    last: Mutex<HashMap<String, Option<u64>>>,
}

impl ScriptedSource {
    pub fn with(self, interface: &str, readings: &[Option<u64>]) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(interface.to_string(), readings.iter().copied().collect());
        self
    }
}

impl CounterSource for ScriptedSource {
    async fn rx_bytes(&self, flow: &Flow) -> Result<u64, CounterError> {
        let next = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&flow.interface)
            .and_then(|queue| queue.pop_front());
        let reading = match next {
            Some(reading) => {
                self.last
                    .lock()
                    .unwrap()
                    .insert(flow.interface.clone(), reading);
                reading
            }
            None => self.last.lock().unwrap().get(&flow.interface).copied().flatten(),
        };
        reading.ok_or_else(|| CounterError::MissingInterface {
            interface: flow.interface.clone(),
            table: "script".into(),
        })
    }
}
