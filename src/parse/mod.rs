//! Counter-log parsing: two structurally different formats, one output
//! shape.
//!
//! [`ethstats`] reads one-second aggregate snapshots, [`ifstat`] reads
//! 0.1-second per-interface snapshots; both produce [`RawCounterSample`]s
//! for the timeline normalizer. [`iperf`] reads the per-flow iperf3 JSON
//! logs, which feed the send/receive exports directly.

use thiserror::Error;

pub mod ethstats;
pub mod ifstat;
pub mod iperf;

/// Timestamp as the source log reports it, before normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawTimestamp {
    /// Unix epoch seconds (per-second format).
    EpochSecs(i64),
    /// Seconds since midnight (sub-second format). Wraps at midnight —
    /// runs must stay well under 24h.
    SecondOfDay(u32),
}

/// One parsed counter-log line. Never mutated after creation.
#[derive(Debug, Clone, PartialEq)]
pub struct RawCounterSample {
    pub timestamp: RawTimestamp,
    /// Host or interface label, trailing colon stripped.
    pub host: String,
    pub in_num: f64,
    pub in_unit: String,
    pub out_num: f64,
    pub out_unit: String,
    pub in_pac_num: Option<f64>,
    pub in_pac_unit: Option<String>,
    pub out_pac_num: Option<f64>,
    pub out_pac_unit: Option<String>,
}

/// A malformed counter-log line. The line is skipped and parsing
/// continues; a missing log file is zero records, not an error.
#[derive(Debug, Error)]
#[error("line {line_no}: {reason}")]
pub struct ParseError {
    pub line_no: usize,
    pub reason: String,
}

impl ParseError {
    pub(crate) fn new(line_no: usize, reason: impl Into<String>) -> Self {
        Self {
            line_no,
            reason: reason.into(),
        }
    }
}
