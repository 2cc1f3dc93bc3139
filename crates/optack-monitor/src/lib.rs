pub mod counter;
pub mod log;
pub mod recorder;
pub mod report;
pub mod sampler;

#[cfg(test)]
mod test_util;

pub use counter::{ProcNetDevSource, parse_rx_bytes};
pub use log::{LogError, RecordSink, ThroughputLog, read_records};
pub use recorder::{RecorderState, RunDisposition, TimeSeriesRecorder};
pub use report::{ExperimentReport, ReportError, synthesize};
pub use sampler::{FlowRate, PairSample, ThroughputSampler};
