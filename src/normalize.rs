//! Timeline normalization: one de-duplicated, strictly ordered record
//! stream out of the two counter-log formats.
//!
//! Per-second samples keep their epoch timestamp. Sub-second samples only
//! report a whole second, so each tick within a second gets a synthetic
//! timestamp: the first tick observed for second `s` gets
//! `(s+1)*10 - 1`, the next `(s+1)*10 - 2`, and so on — strictly
//! decreasing inside a second, strictly increasing across seconds.

use serde::Serialize;

use crate::parse::{RawCounterSample, RawTimestamp};

/// Sub-division factor: ifstat samples every 0.1s, ten slots per second.
pub const SUBSECOND_FACTOR: i64 = 10;

/// One row of the aligned dataset, keyed by `(experiment, host, timestamp)`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedRecord {
    pub experiment_id: String,
    pub timestamp: i64,
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

/// Normalize raw samples into records grouped by host (hosts in
/// first-seen order, each host's records in emission order).
pub fn normalize(experiment_id: &str, samples: &[RawCounterSample]) -> Vec<NormalizedRecord> {
    let mut hosts: Vec<&str> = Vec::new();
    for s in samples {
        if !hosts.contains(&s.host.as_str()) {
            hosts.push(&s.host);
        }
    }

    let mut records = Vec::with_capacity(samples.len());
    for host in hosts {
        // Ordinal slot tracking for sub-second ticks of this host.
        let mut current_second: Option<u32> = None;
        let mut slot: i64 = 0;

        for s in samples.iter().filter(|s| s.host == host) {
            let timestamp = match s.timestamp {
                RawTimestamp::EpochSecs(secs) => secs,
                RawTimestamp::SecondOfDay(second) => {
                    if current_second == Some(second) {
                        slot += 1;
                    } else {
                        current_second = Some(second);
                        slot = 0;
                    }
                    (second as i64 + 1) * SUBSECOND_FACTOR - 1 - slot
                }
            };

            records.push(NormalizedRecord {
                experiment_id: experiment_id.to_string(),
                timestamp,
                host: s.host.clone(),
                in_num: s.in_num,
                in_unit: s.in_unit.clone(),
                out_num: s.out_num,
                out_unit: s.out_unit.clone(),
                in_pac_num: s.in_pac_num,
                in_pac_unit: s.in_pac_unit.clone(),
                out_pac_num: s.out_pac_num,
                out_pac_unit: s.out_pac_unit.clone(),
            });
        }
    }

    records
}

/// Fold every `window` consecutive records per host into one by averaging
/// the in/out rates; the group's first record supplies every other field.
/// `window <= 1` is the identity. A trailing partial group is averaged
/// over its actual length.
pub fn aggregate(records: &[NormalizedRecord], window: usize) -> Vec<NormalizedRecord> {
    if window <= 1 {
        return records.to_vec();
    }

    let mut hosts: Vec<&str> = Vec::new();
    for r in records {
        if !hosts.contains(&r.host.as_str()) {
            hosts.push(&r.host);
        }
    }

    let mut out = Vec::new();
    for host in hosts {
        let group: Vec<&NormalizedRecord> =
            records.iter().filter(|r| r.host == host).collect();
        for chunk in group.chunks(window) {
            let mut folded = chunk[0].clone();
            folded.in_num = chunk.iter().map(|r| r.in_num).sum::<f64>() / chunk.len() as f64;
            folded.out_num = chunk.iter().map(|r| r.out_num).sum::<f64>() / chunk.len() as f64;
            out.push(folded);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eth_sample(ts: i64, host: &str, in_num: f64) -> RawCounterSample {
        RawCounterSample {
            timestamp: RawTimestamp::EpochSecs(ts),
            host: host.to_string(),
            in_num,
            in_unit: "Mb/s".to_string(),
            out_num: in_num / 2.0,
            out_unit: "Mb/s".to_string(),
            in_pac_num: Some(100.0),
            in_pac_unit: Some("p/s".to_string()),
            out_pac_num: Some(90.0),
            out_pac_unit: Some("p/s".to_string()),
        }
    }

    fn tick(second: u32, host: &str, in_num: f64) -> RawCounterSample {
        RawCounterSample {
            timestamp: RawTimestamp::SecondOfDay(second),
            host: host.to_string(),
            in_num,
            in_unit: "KB/s".to_string(),
            out_num: in_num,
            out_unit: "KB/s".to_string(),
            in_pac_num: None,
            in_pac_unit: None,
            out_pac_num: None,
            out_pac_unit: None,
        }
    }

    #[test]
    fn test_epoch_timestamps_pass_through() {
        let samples = vec![eth_sample(1648366318, "total", 25.08)];
        let records = normalize("exp", &samples);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].timestamp, 1648366318);
        assert_eq!(records[0].in_num, 25.08);
    }

    #[test]
    fn test_synthetic_timestamps_within_one_second() {
        // Three ticks for second 18278: slots fill top-down.
        let samples = vec![
            tick(18278, "eth0", 1.0),
            tick(18278, "eth0", 2.0),
            tick(18278, "eth0", 3.0),
        ];
        let records = normalize("exp", &samples);
        let ts: Vec<i64> = records.iter().map(|r| r.timestamp).collect();
        assert_eq!(ts, [182789, 182788, 182787]);
    }

    #[test]
    fn test_synthetic_timestamps_across_seconds() {
        let samples = vec![
            tick(18278, "eth0", 1.0),
            tick(18278, "eth0", 2.0),
            tick(18279, "eth0", 3.0),
        ];
        let records = normalize("exp", &samples);
        // Strictly decreasing within a second, increasing across seconds
        assert_eq!(records[0].timestamp, 182789);
        assert_eq!(records[1].timestamp, 182788);
        assert_eq!(records[2].timestamp, 182799);
        assert!(records[2].timestamp > records[0].timestamp);
    }

    #[test]
    fn test_single_tick_matches_contract() {
        let records = normalize("exp", &[tick(18278, "eth0", 28.29)]);
        assert_eq!(records[0].timestamp, 182789);
        assert_eq!(records[0].in_num, 28.29);
        assert_eq!(records[0].out_num, 28.29);
    }

    #[test]
    fn test_grouped_by_host_first_seen_order() {
        let samples = vec![
            tick(10, "eth0", 1.0),
            tick(10, "s1-eth1", 2.0),
            tick(11, "eth0", 3.0),
        ];
        let records = normalize("exp", &samples);
        let hosts: Vec<&str> = records.iter().map(|r| r.host.as_str()).collect();
        assert_eq!(hosts, ["eth0", "eth0", "s1-eth1"]);
        // Per-host slot counters are independent
        assert_eq!(records[2].timestamp, 109);
    }

    #[test]
    fn test_aggregate_window_one_is_identity() {
        let records = normalize(
            "exp",
            &[eth_sample(1, "total", 10.0), eth_sample(2, "total", 20.0)],
        );
        assert_eq!(aggregate(&records, 1), records);
        assert_eq!(aggregate(&records, 0), records);
    }

    #[test]
    fn test_aggregate_window_three_over_six() {
        let samples: Vec<RawCounterSample> = (0..6)
            .map(|i| eth_sample(100 + i, "total", (i + 1) as f64))
            .collect();
        let records = normalize("exp", &samples);
        let folded = aggregate(&records, 3);

        assert_eq!(folded.len(), 2);
        // Means of 1,2,3 and 4,5,6
        assert_eq!(folded[0].in_num, 2.0);
        assert_eq!(folded[1].in_num, 5.0);
        // First record of each group supplies the rest
        assert_eq!(folded[0].timestamp, 100);
        assert_eq!(folded[1].timestamp, 103);
        assert_eq!(folded[0].in_pac_num, Some(100.0));
    }

    #[test]
    fn test_aggregate_partial_trailing_group() {
        let samples: Vec<RawCounterSample> = (0..5)
            .map(|i| eth_sample(100 + i, "total", (i + 1) as f64))
            .collect();
        let folded = aggregate(&normalize("exp", &samples), 3);
        assert_eq!(folded.len(), 2);
        // Trailing group is 4,5 → mean 4.5
        assert_eq!(folded[1].in_num, 4.5);
    }
}
