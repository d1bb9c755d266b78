//! Append-only CSV persistence for the aligned dataset and the per-flow
//! iperf extracts.
//!
//! `analysis.csv` grows across invocations: the header is written once
//! when the file is created, and the timestamps already present seed the
//! per-second parser's dedup set so re-analyzing the same logs adds
//! nothing. The send/receive extracts are rebuilt from scratch every
//! invocation.

use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result};
use rustc_hash::FxHashSet;
use serde::Serialize;

use crate::normalize::NormalizedRecord;
use crate::parse::iperf::{StreamSample, SumSample};

pub const ANALYSIS_FILE: &str = "analysis.csv";
pub const SEND_FILE: &str = "analysis_send.csv";
pub const REC_FILE: &str = "analysis_rec.csv";

/// One `analysis_send.csv` row: sender-side iperf interval sample.
#[derive(Debug, Serialize)]
pub struct SendRow {
    pub experiment_id: String,
    pub host: String,
    pub start: f64,
    pub end: f64,
    pub seconds: f64,
    pub bytes: u64,
    pub bits_per_second: f64,
    pub retransmits: Option<u64>,
    pub snd_cwnd: Option<u64>,
    pub rtt: Option<u64>,
    pub rttvar: Option<u64>,
}

impl SendRow {
    pub fn from_sample(experiment_id: &str, host: &str, s: &StreamSample) -> Self {
        Self {
            experiment_id: experiment_id.to_string(),
            host: host.to_string(),
            start: s.start,
            end: s.end,
            seconds: s.seconds,
            bytes: s.bytes,
            bits_per_second: s.bits_per_second,
            retransmits: s.retransmits,
            snd_cwnd: s.snd_cwnd,
            rtt: s.rtt,
            rttvar: s.rttvar,
        }
    }
}

/// One `analysis_rec.csv` row: receiver-side iperf interval sum.
#[derive(Debug, Serialize)]
pub struct RecRow {
    pub experiment_id: String,
    pub host: String,
    pub start: f64,
    pub end: f64,
    pub seconds: f64,
    pub bytes: u64,
    pub bits_per_second: f64,
}

impl RecRow {
    pub fn from_sample(experiment_id: &str, host: &str, s: &SumSample) -> Self {
        Self {
            experiment_id: experiment_id.to_string(),
            host: host.to_string(),
            start: s.start,
            end: s.end,
            seconds: s.seconds,
            bytes: s.bytes,
            bits_per_second: s.bits_per_second,
        }
    }
}

/// Read the timestamps already present in an export, as raw strings, to
/// seed the per-second parser. A missing file seeds nothing.
pub fn load_seen_timestamps(path: &Path) -> Result<FxHashSet<String>> {
    let mut seen = FxHashSet::default();
    if !path.exists() {
        return Ok(seen);
    }

    let mut reader =
        csv::Reader::from_path(path).with_context(|| format!("open {}", path.display()))?;
    let headers = reader.headers().context("read csv header")?;
    let ts_col = headers
        .iter()
        .position(|h| h == "timestamp")
        .context("export has no timestamp column")?;

    for record in reader.records() {
        let record = record.context("read csv record")?;
        if let Some(ts) = record.get(ts_col) {
            seen.insert(ts.to_string());
        }
    }
    Ok(seen)
}

/// Append rows to `path`, writing the header only if the file is new.
pub fn append_rows<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    let is_new = !path.exists();
    let file = File::options()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open {}", path.display()))?;

    let mut writer = csv::WriterBuilder::new()
        .has_headers(is_new)
        .from_writer(file);
    for row in rows {
        writer.serialize(row).context("write csv row")?;
    }
    writer.flush().context("flush csv")?;
    Ok(())
}

/// Rewrite `path` from scratch with a header and the given rows.
pub fn write_rows<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    let mut writer =
        csv::Writer::from_path(path).with_context(|| format!("create {}", path.display()))?;
    for row in rows {
        writer.serialize(row).context("write csv row")?;
    }
    writer.flush().context("flush csv")?;
    Ok(())
}

/// Append normalized records to the main analysis export.
pub fn append_records(path: &Path, records: &[NormalizedRecord]) -> Result<()> {
    append_rows(path, records)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(ts: i64, host: &str) -> NormalizedRecord {
        NormalizedRecord {
            experiment_id: "exp".to_string(),
            timestamp: ts,
            host: host.to_string(),
            in_num: 25.08,
            in_unit: "Mb/s".to_string(),
            out_num: 24.85,
            out_unit: "Mb/s".to_string(),
            in_pac_num: Some(2088.0),
            in_pac_unit: Some("p/s".to_string()),
            out_pac_num: None,
            out_pac_unit: None,
        }
    }

    #[test]
    fn test_header_written_once_across_appends() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(ANALYSIS_FILE);

        append_records(&path, &[record(1, "total")]).expect("first append");
        append_records(&path, &[record(2, "total")]).expect("second append");

        let contents = std::fs::read_to_string(&path).expect("read");
        let headers: Vec<&str> = contents
            .lines()
            .filter(|l| l.starts_with("experiment_id"))
            .collect();
        assert_eq!(headers.len(), 1, "header must appear exactly once");
        assert_eq!(contents.lines().count(), 3);
    }

    #[test]
    fn test_optional_fields_serialize_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(ANALYSIS_FILE);
        append_records(&path, &[record(1, "total")]).expect("append");

        let contents = std::fs::read_to_string(&path).expect("read");
        let data_line = contents.lines().nth(1).expect("data line");
        assert!(data_line.ends_with(",,"), "missing pps fields must be empty: {data_line}");
    }

    #[test]
    fn test_seen_timestamps_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(ANALYSIS_FILE);

        append_records(&path, &[record(1648366318, "total"), record(182789, "eth0")])
            .expect("append");

        let seen = load_seen_timestamps(&path).expect("load");
        assert!(seen.contains("1648366318"));
        assert!(seen.contains("182789"));
        assert_eq!(seen.len(), 2);
    }

    #[test]
    fn test_missing_export_seeds_nothing() {
        let seen = load_seen_timestamps(Path::new("/nonexistent/analysis.csv")).expect("load");
        assert!(seen.is_empty());
    }
}
