use optack_abstract::{Phase, ThroughputRecord};
use std::fs::{self, File};
use std::io::{self, BufRead, LineWriter, Write};
use std::path::Path;
use thiserror::Error;

pub const HEADER: &str =
    "Time,Target_Throughput_Mbps,Attacker_Throughput_Mbps,Total_Throughput_Mbps";

#[derive(Debug, Error)]
pub enum LogError {
    #[error("failed to access throughput log: {0}")]
    Io(#[from] io::Error),
    #[error("unexpected throughput log header {0:?}")]
    Header(String),
    #[error("line {line}: {reason}")]
    Row { line: usize, reason: String },
}

/// Destination for records as the recorder produces them.
pub trait RecordSink {
    fn append(&mut self, record: &ThroughputRecord) -> io::Result<()>;
}

/// Append-only CSV log of throughput records, one line per tick. A flow gap
/// is written as an empty field, and so is the total of a degraded tick.
pub struct ThroughputLog<W: Write> {
    writer: W,
}

impl ThroughputLog<LineWriter<File>> {
    /// Create (or truncate) the log at `path`, creating parent directories.
    pub fn create(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        Self::new(LineWriter::new(File::create(path)?))
    }
}

impl<W: Write> ThroughputLog<W> {
    /// Wrap a writer and emit the header line.
    pub fn new(mut writer: W) -> io::Result<Self> {
        writeln!(writer, "{HEADER}")?;
        writer.flush()?;
        Ok(Self { writer })
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> RecordSink for ThroughputLog<W> {
    fn append(&mut self, record: &ThroughputRecord) -> io::Result<()> {
        writeln!(
            self.writer,
            "{:.1},{},{},{}",
            record.elapsed_secs,
            field(record.target_mbps),
            field(record.attacker_mbps),
            field(record.total_mbps)
        )?;
        self.writer.flush()
    }
}

fn field(mbps: Option<f64>) -> String {
    mbps.map(|v| format!("{:.2}", v)).unwrap_or_default()
}

/// Parse a throughput log back into records, labelling phases against
/// `attack_start_offset_secs`. Empty flow fields are gaps; totals are
/// recomputed from the two flows.
pub fn read_records<R: BufRead>(
    reader: R,
    attack_start_offset_secs: f64,
) -> Result<Vec<ThroughputRecord>, LogError> {
    let mut lines = reader.lines();
    match lines.next() {
        Some(header) => {
            let header = header?;
            if header.trim() != HEADER {
                return Err(LogError::Header(header));
            }
        }
        None => return Ok(Vec::new()),
    }

    let mut records = Vec::new();
    for (idx, line) in lines.enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let line_no = idx + 2;
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        if fields.len() != 4 {
            return Err(LogError::Row {
                line: line_no,
                reason: format!("expected 4 fields, found {}", fields.len()),
            });
        }
        let parse = |i: usize| {
            fields[i].parse::<f64>().map_err(|e| LogError::Row {
                line: line_no,
                reason: format!("field {} ({:?}): {}", i + 1, fields[i], e),
            })
        };
        let gap_or = |i: usize| match fields[i] {
            "" => Ok(None),
            _ => parse(i).map(Some),
        };
        let elapsed = parse(0)?;
        let target = gap_or(1)?;
        let attacker = gap_or(2)?;
        records.push(ThroughputRecord::sampled(
            elapsed,
            target,
            attacker,
            Phase::at(elapsed, attack_start_offset_secs),
        ));
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_header_and_fixed_precision_rows() {
        let mut log = ThroughputLog::new(Vec::new()).unwrap();
        log.append(&ThroughputRecord::new(0.04, 9.876, 0.0, Phase::BeforeAttack))
            .unwrap();
        log.append(&ThroughputRecord::new(5.012, 3.5, 6.25, Phase::DuringAttack))
            .unwrap();
        let text = String::from_utf8(log.into_inner()).unwrap();
        assert_eq!(
            text,
            "Time,Target_Throughput_Mbps,Attacker_Throughput_Mbps,Total_Throughput_Mbps\n\
             0.0,9.88,0.00,9.88\n\
             5.0,3.50,6.25,9.75\n"
        );
    }

    #[test]
    fn reads_log_and_relabels_phases() {
        let text = format!("{HEADER}\n0.0,10.00,0.00,10.00\n\n5.0,4.00,8.00,12.00\n");
        let records = read_records(text.as_bytes(), 5.0).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].phase, Phase::BeforeAttack);
        assert_eq!(records[1].phase, Phase::DuringAttack);
        assert_eq!(records[1].total_mbps, Some(12.0));
    }

    #[test]
    fn gaps_survive_write_and_read() {
        let mut log = ThroughputLog::new(Vec::new()).unwrap();
        log.append(&ThroughputRecord::sampled(
            1.0,
            None,
            Some(2.5),
            Phase::BeforeAttack,
        ))
        .unwrap();
        let text = String::from_utf8(log.into_inner()).unwrap();
        assert_eq!(text.lines().nth(1), Some("1.0,,2.50,"));

        let records = read_records(text.as_bytes(), 5.0).unwrap();
        assert_eq!(records[0].target_mbps, None);
        assert_eq!(records[0].attacker_mbps, Some(2.5));
        assert_eq!(records[0].total_mbps, None);
        assert!(records[0].is_degraded());
    }

    #[test]
    fn elapsed_field_may_not_be_empty() {
        let text = format!("{HEADER}\n,10.00,0.00,10.00\n");
        assert!(matches!(
            read_records(text.as_bytes(), 5.0),
            Err(LogError::Row { line: 2, .. })
        ));
    }

    #[test]
    fn empty_log_has_no_records() {
        assert!(read_records(&b""[..], 5.0).unwrap().is_empty());
    }

    #[test]
    fn rejects_foreign_header() {
        let err = read_records(&b"a,b,c,d\n"[..], 5.0).unwrap_err();
        assert!(matches!(err, LogError::Header(_)));
    }

    #[test]
    fn reports_bad_row_with_line_number() {
        let text = format!("{HEADER}\n0.0,10.00,0.00,10.00\n1.0,ten,0.00,10.00\n");
        match read_records(text.as_bytes(), 5.0).unwrap_err() {
            LogError::Row { line, .. } => assert_eq!(line, 3),
            other => panic!("unexpected error {other:?}"),
        }
    }
}
