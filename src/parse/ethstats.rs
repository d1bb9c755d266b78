//! Parser for the per-second aggregate counter log (`ethstats.log`).
//!
//! Line layout: the first line of each one-second block carries a leading
//! Unix-timestamp token that the block's remaining lines omit, so the
//! parser carries the last-seen timestamp forward:
//!
//! ```text
//!    1648366318    total:    25.08 Mb/s In    24.85 Mb/s Out -   2088.0 p/s In    2161.0 p/s Out
//!                s1-eth1:     8.24 Mb/s In     0.18 Mb/s Out -    360.0 p/s In     344.0 p/s Out
//! ```
//!
//! The parser owns a seen-timestamp set keyed on the raw timestamp
//! string, scoped to one output target: blocks whose timestamp was
//! already ingested — in this pass or a previous one the set was seeded
//! from — are skipped wholesale, making repeated ingestion idempotent.

use std::path::Path;

use anyhow::{Context, Result};
use rustc_hash::FxHashSet;
use tracing::warn;

use super::{ParseError, RawCounterSample, RawTimestamp};

/// Token count of a block-opening line (with timestamp) and of a
/// continuation line.
const TOKENS_WITH_TS: usize = 15;
const TOKENS_WITHOUT_TS: usize = 14;

#[derive(Debug, Default)]
pub struct EthstatsParser {
    seen: FxHashSet<String>,
}

impl EthstatsParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parser seeded with timestamps ingested by earlier invocations
    /// (e.g. loaded from an existing export).
    pub fn with_seen(seen: FxHashSet<String>) -> Self {
        Self { seen }
    }

    /// Timestamps ingested so far (including the seed).
    pub fn seen(&self) -> &FxHashSet<String> {
        &self.seen
    }

    /// Parse a whole log file. A missing file yields zero records.
    pub fn parse_file(&mut self, path: &Path) -> Result<Vec<RawCounterSample>> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("read {}", path.display()))?;
        Ok(self.parse_str(&data))
    }

    /// Parse log text. Malformed lines are skipped with a warning.
    pub fn parse_str(&mut self, input: &str) -> Vec<RawCounterSample> {
        let mut samples = Vec::new();
        // Skip/ingest decision for the current block; None until the
        // first timestamped line has been seen.
        let mut block: Option<(String, bool)> = None;

        for (idx, line) in input.lines().enumerate() {
            let line_no = idx + 1;
            let tokens: Vec<&str> = line.split_whitespace().collect();
            if tokens.is_empty() {
                continue;
            }

            let fields = match tokens.len() {
                TOKENS_WITH_TS => {
                    let ts = tokens[0].to_string();
                    let ingest = self.seen.insert(ts.clone());
                    block = Some((ts, ingest));
                    &tokens[1..]
                }
                TOKENS_WITHOUT_TS => &tokens[..],
                n => {
                    warn!(
                        error = %ParseError::new(line_no, format!("expected 14 or 15 tokens, got {n}")),
                        "skipping ethstats line"
                    );
                    continue;
                }
            };

            let Some((timestamp, ingest)) = &block else {
                warn!(
                    error = %ParseError::new(line_no, "continuation line before any timestamp"),
                    "skipping ethstats line"
                );
                continue;
            };
            if !ingest {
                continue;
            }

            match parse_fields(timestamp, fields) {
                Ok(sample) => samples.push(sample),
                Err(reason) => warn!(
                    error = %ParseError::new(line_no, reason),
                    "skipping ethstats line"
                ),
            }
        }

        samples
    }
}

/// Decode the 14 fixed-offset tokens following the (carried) timestamp.
fn parse_fields(timestamp: &str, fields: &[&str]) -> Result<RawCounterSample, String> {
    let epoch: i64 = timestamp
        .parse()
        .map_err(|_| format!("bad timestamp '{timestamp}'"))?;

    let num = |i: usize| -> Result<f64, String> {
        fields[i]
            .parse()
            .map_err(|_| format!("bad number '{}' at field {i}", fields[i]))
    };

    Ok(RawCounterSample {
        timestamp: RawTimestamp::EpochSecs(epoch),
        host: fields[0].trim_end_matches(':').to_string(),
        in_num: num(1)?,
        in_unit: fields[2].to_string(),
        out_num: num(4)?,
        out_unit: fields[5].to_string(),
        in_pac_num: Some(num(8)?),
        in_pac_unit: Some(fields[9].to_string()),
        out_pac_num: Some(num(11)?),
        out_pac_unit: Some(fields[12].to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLOCK: &str = "\
   1648366318    total:    25.08 Mb/s In    24.85 Mb/s Out -   2088.0 p/s In    2161.0 p/s Out
              s1-eth1:     8.24 Mb/s In     0.18 Mb/s Out -    360.0 p/s In     344.0 p/s Out
";

    #[test]
    fn test_block_with_carried_timestamp() {
        let mut parser = EthstatsParser::new();
        let samples = parser.parse_str(BLOCK);
        assert_eq!(samples.len(), 2);

        assert_eq!(samples[0].host, "total");
        assert_eq!(samples[0].timestamp, RawTimestamp::EpochSecs(1648366318));
        assert_eq!(samples[0].in_num, 25.08);
        assert_eq!(samples[0].in_unit, "Mb/s");
        assert_eq!(samples[0].out_num, 24.85);
        assert_eq!(samples[0].in_pac_num, Some(2088.0));
        assert_eq!(samples[0].out_pac_num, Some(2161.0));

        assert_eq!(samples[1].host, "s1-eth1");
        assert_eq!(samples[1].timestamp, RawTimestamp::EpochSecs(1648366318));
        assert_eq!(samples[1].in_num, 8.24);
        assert_eq!(samples[1].out_num, 0.18);
        assert_eq!(samples[1].in_pac_unit.as_deref(), Some("p/s"));
    }

    #[test]
    fn test_reparse_is_idempotent() {
        let mut parser = EthstatsParser::new();
        let first = parser.parse_str(BLOCK);
        assert_eq!(first.len(), 2);
        let second = parser.parse_str(BLOCK);
        assert!(second.is_empty(), "re-ingestion must drop seen blocks");
    }

    #[test]
    fn test_seeded_parser_skips_known_timestamps() {
        let mut seed = FxHashSet::default();
        seed.insert("1648366318".to_string());
        let mut parser = EthstatsParser::with_seen(seed);
        assert!(parser.parse_str(BLOCK).is_empty());
    }

    #[test]
    fn test_distinct_seconds_all_ingested() {
        let two_blocks = format!("{BLOCK}{}", BLOCK.replace("1648366318", "1648366319"));
        let mut parser = EthstatsParser::new();
        let samples = parser.parse_str(&two_blocks);
        assert_eq!(samples.len(), 4);
        assert_eq!(samples[2].timestamp, RawTimestamp::EpochSecs(1648366319));
    }

    #[test]
    fn test_malformed_lines_skipped() {
        let noisy = format!("garbage line\n{BLOCK}not enough tokens here\n");
        let mut parser = EthstatsParser::new();
        let samples = parser.parse_str(&noisy);
        assert_eq!(samples.len(), 2);
    }

    #[test]
    fn test_missing_file_is_zero_records() {
        let mut parser = EthstatsParser::new();
        let samples = parser
            .parse_file(Path::new("/nonexistent/ethstats.log"))
            .expect("missing file is not an error");
        assert!(samples.is_empty());
    }
}
