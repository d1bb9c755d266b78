//! Parser for the sub-second per-interface counter log (`ifstat.log`).
//!
//! Layout: a header line naming the interface groups, a sub-header naming
//! each group's in/out columns (and carrying the unit), then data lines
//! starting with a time-of-day string:
//!
//! ```text
//!   Time           eth0                s1-eth1
//! HH:MM:SS   KB/s in  KB/s out   KB/s in  KB/s out
//! 05:04:38      28.29     28.29     13.09     23.84
//! ```
//!
//! `n/a` means the counter was unavailable and is coerced to zero. The
//! time-of-day is converted to an integer second-of-day, which wraps at
//! midnight — a documented limitation, not corrected here.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::warn;

use super::{ParseError, RawCounterSample, RawTimestamp};

/// Unit assumed when the sub-header does not carry one.
const DEFAULT_UNIT: &str = "KB/s";

/// Parse a whole log file. A missing file yields zero records.
pub fn parse_file(path: &Path) -> Result<Vec<RawCounterSample>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let data =
        std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    Ok(parse_str(&data))
}

/// Parse log text. Malformed lines are skipped with a warning.
pub fn parse_str(input: &str) -> Vec<RawCounterSample> {
    let mut samples = Vec::new();
    let mut hosts: Vec<String> = Vec::new();
    let mut unit = DEFAULT_UNIT.to_string();

    for (idx, line) in input.lines().enumerate() {
        let line_no = idx + 1;
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.is_empty() {
            continue;
        }

        // Tool-startup sentinel, e.g. "ifstat: interface statistics ..."
        if tokens[0].starts_with("ifstat") {
            continue;
        }

        if hosts.is_empty() {
            // First header: group labels; a leading "Time" column is not
            // an interface.
            hosts = tokens
                .iter()
                .skip_while(|&&t| t == "Time")
                .map(|t| t.to_string())
                .collect();
            continue;
        }

        if tokens[0] == "HH:MM:SS" {
            // Sub-header: per-group in/out labels, first token is the
            // time column placeholder. Pick the unit off the first label.
            if let Some(u) = tokens.iter().skip(1).find(|t| t.contains('/')) {
                unit = u.to_string();
            }
            continue;
        }

        let Some(second) = parse_second_of_day(tokens[0]) else {
            warn!(
                error = %ParseError::new(line_no, format!("bad time-of-day '{}'", tokens[0])),
                "skipping ifstat line"
            );
            continue;
        };

        let values = &tokens[1..];
        if values.len() != hosts.len() * 2 {
            warn!(
                error = %ParseError::new(
                    line_no,
                    format!("expected {} values, got {}", hosts.len() * 2, values.len()),
                ),
                "skipping ifstat line"
            );
            continue;
        }

        for (host, pair) in hosts.iter().zip(values.chunks(2)) {
            samples.push(RawCounterSample {
                timestamp: RawTimestamp::SecondOfDay(second),
                host: host.clone(),
                in_num: coerce(pair[0]),
                in_unit: unit.clone(),
                out_num: coerce(pair[1]),
                out_unit: unit.clone(),
                in_pac_num: None,
                in_pac_unit: None,
                out_pac_num: None,
                out_pac_unit: None,
            });
        }
    }

    samples
}

/// `HH:MM:SS` → seconds since midnight. Wraps at midnight.
fn parse_second_of_day(s: &str) -> Option<u32> {
    let mut parts = s.split(':');
    let h: u32 = parts.next()?.parse().ok()?;
    let m: u32 = parts.next()?.parse().ok()?;
    let sec: u32 = parts.next()?.parse().ok()?;
    if parts.next().is_some() || h > 23 || m > 59 || sec > 59 {
        return None;
    }
    Some(h * 3600 + m * 60 + sec)
}

/// `n/a` (counter unavailable) reads as zero.
fn coerce(token: &str) -> f64 {
    if token == "n/a" {
        0.0
    } else {
        token.parse().unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOG: &str = "\
  Time           eth0                s1-eth1
HH:MM:SS   KB/s in  KB/s out   KB/s in  KB/s out
05:04:38      28.29     28.29     13.09     23.84
05:04:38      30.00     29.50       n/a      0.00
05:04:39      31.00     30.10     14.00     24.00
";

    #[test]
    fn test_parses_hosts_and_values() {
        let samples = parse_str(LOG);
        assert_eq!(samples.len(), 6);

        assert_eq!(samples[0].host, "eth0");
        assert_eq!(samples[0].timestamp, RawTimestamp::SecondOfDay(18278));
        assert_eq!(samples[0].in_num, 28.29);
        assert_eq!(samples[0].out_num, 28.29);
        assert_eq!(samples[0].in_unit, "KB/s");

        assert_eq!(samples[1].host, "s1-eth1");
        assert_eq!(samples[1].in_num, 13.09);
        assert_eq!(samples[1].out_num, 23.84);
    }

    #[test]
    fn test_na_coerced_to_zero() {
        let samples = parse_str(LOG);
        // Second tick, s1-eth1
        assert_eq!(samples[3].host, "s1-eth1");
        assert_eq!(samples[3].in_num, 0.0);
    }

    #[test]
    fn test_second_of_day_conversion() {
        assert_eq!(parse_second_of_day("05:04:38"), Some(18278));
        assert_eq!(parse_second_of_day("00:00:00"), Some(0));
        assert_eq!(parse_second_of_day("23:59:59"), Some(86399));
        assert_eq!(parse_second_of_day("24:00:00"), None);
        assert_eq!(parse_second_of_day("5:4"), None);
        assert_eq!(parse_second_of_day("garbage"), None);
    }

    #[test]
    fn test_sentinel_and_malformed_lines_skipped() {
        let noisy = format!("ifstat: driver wrapper started\n{LOG}05:04:40  1.0\n");
        let samples = parse_str(&noisy);
        assert_eq!(samples.len(), 6);
    }

    #[test]
    fn test_missing_file_is_zero_records() {
        let samples =
            parse_file(Path::new("/nonexistent/ifstat.log")).expect("missing file tolerated");
        assert!(samples.is_empty());
    }
}
