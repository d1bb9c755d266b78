//! Parser for iperf3 `--json` logs.
//!
//! One JSON document per flow side. Sender logs carry per-interval stream
//! samples with congestion state (cwnd, rtt, retransmits); receiver logs
//! carry per-interval sums, with the leading idle intervals (zero rate
//! before the client connected) trimmed off.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct IperfLog {
    pub start: IperfStart,
    #[serde(default)]
    pub intervals: Vec<IperfInterval>,
}

#[derive(Debug, Deserialize)]
pub struct IperfStart {
    pub timestamp: IperfTimestamp,
}

#[derive(Debug, Deserialize)]
pub struct IperfTimestamp {
    /// Unix epoch seconds at test start.
    pub timesecs: i64,
}

#[derive(Debug, Deserialize)]
pub struct IperfInterval {
    #[serde(default)]
    pub streams: Vec<StreamSample>,
    pub sum: SumSample,
}

/// One stream's interval sample. Congestion fields are only present on
/// the sending side.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamSample {
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

/// Interval sum across streams.
#[derive(Debug, Clone, Deserialize)]
pub struct SumSample {
    pub start: f64,
    pub end: f64,
    pub seconds: f64,
    pub bytes: u64,
    pub bits_per_second: f64,
}

impl IperfLog {
    pub fn parse_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("read {}", path.display()))?;
        Self::parse_str(&data)
    }

    pub fn parse_str(input: &str) -> Result<Self> {
        serde_json::from_str(input).context("parse iperf3 JSON")
    }

    /// Sender view: the first stream of every interval.
    pub fn sender_samples(&self) -> Vec<&StreamSample> {
        self.intervals
            .iter()
            .filter_map(|i| i.streams.first())
            .collect()
    }

    /// Receiver view: interval sums with leading zero-rate intervals
    /// (before the client connected) trimmed.
    pub fn receiver_samples(&self) -> Vec<&SumSample> {
        self.intervals
            .iter()
            .map(|i| &i.sum)
            .skip_while(|s| s.bits_per_second == 0.0)
            .collect()
    }
}
