//! The `analyze` step: walk every run directory under the logs root and
//! rebuild the CSV exports.
//!
//! Each directory name is the experiment id. Counter logs feed the
//! append-only `analysis.csv` (idempotent across invocations); iperf
//! logs are re-extracted into `analysis_send.csv`/`analysis_rec.csv`
//! from scratch, as the original datasets are cheap to rebuild.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::export::{
    ANALYSIS_FILE, REC_FILE, RecRow, SEND_FILE, SendRow, append_records, load_seen_timestamps,
    write_rows,
};
use crate::normalize::{aggregate, normalize};
use crate::parse::ethstats::EthstatsParser;
use crate::parse::iperf::IperfLog;
use crate::parse::ifstat;
use crate::run::RunManifest;
use crate::topo::HostRole;

/// What one `analyze` invocation produced.
#[derive(Debug, Default)]
pub struct AnalyzeReport {
    pub experiments: usize,
    pub counter_records: usize,
    pub send_rows: usize,
    pub rec_rows: usize,
}

/// Analyze with no aggregation (window 1).
pub fn analyze(logs_root: &Path, out_dir: &Path) -> Result<AnalyzeReport> {
    analyze_with_window(logs_root, out_dir, 1)
}

/// Analyze, folding every `window` consecutive counter records per host
/// into their mean before export.
pub fn analyze_with_window(
    logs_root: &Path,
    out_dir: &Path,
    window: usize,
) -> Result<AnalyzeReport> {
    let analysis_path = out_dir.join(ANALYSIS_FILE);
    let seed = load_seen_timestamps(&analysis_path)?;
    // The parser mutates its copy as it ingests; the original seed keeps
    // deciding what the sub-second source already exported.
    let mut parser = EthstatsParser::with_seen(seed.clone());

    let mut report = AnalyzeReport::default();
    let mut send_rows: Vec<SendRow> = Vec::new();
    let mut rec_rows: Vec<RecRow> = Vec::new();

    for run_dir in run_dirs(logs_root)? {
        let experiment_id = match run_dir.file_name().and_then(|n| n.to_str()) {
            Some(name) => name.to_string(),
            None => continue,
        };
        debug!(%experiment_id, "analyzing run directory");
        report.experiments += 1;

        // Counter logs → analysis.csv
        let mut records = Vec::new();
        let eth_samples = parser.parse_file(&run_dir.join("ethstats.log"))?;
        records.extend(normalize(&experiment_id, &eth_samples));

        let if_samples = ifstat::parse_file(&run_dir.join("ifstat.log"))?;
        records.extend(
            normalize(&experiment_id, &if_samples)
                .into_iter()
                .filter(|r| !seed.contains(&r.timestamp.to_string())),
        );

        let records = aggregate(&records, window);
        report.counter_records += records.len();
        append_records(&analysis_path, &records)?;

        // iperf logs → send/rec extracts
        let manifest = RunManifest::load(&run_dir).ok();
        for (host, path) in iperf_logs(&run_dir, manifest.as_ref(), HostRole::Sender) {
            match IperfLog::parse_file(&path) {
                Ok(log) => send_rows.extend(
                    log.sender_samples()
                        .into_iter()
                        .map(|s| SendRow::from_sample(&experiment_id, &host, s)),
                ),
                Err(err) => warn!(%experiment_id, host, error = %format!("{err:#}"), "bad sender log"),
            }
        }
        for (host, path) in iperf_logs(&run_dir, manifest.as_ref(), HostRole::Receiver) {
            match IperfLog::parse_file(&path) {
                Ok(log) => rec_rows.extend(
                    log.receiver_samples()
                        .into_iter()
                        .map(|s| RecRow::from_sample(&experiment_id, &host, s)),
                ),
                Err(err) => warn!(%experiment_id, host, error = %format!("{err:#}"), "bad receiver log"),
            }
        }
    }

    report.send_rows = send_rows.len();
    report.rec_rows = rec_rows.len();
    write_rows(&out_dir.join(SEND_FILE), &send_rows)?;
    write_rows(&out_dir.join(REC_FILE), &rec_rows)?;

    info!(
        experiments = report.experiments,
        counter_records = report.counter_records,
        send_rows = report.send_rows,
        rec_rows = report.rec_rows,
        "analysis complete"
    );
    Ok(report)
}

/// Run directories in name order (scratch dirs named `trash` excluded).
fn run_dirs(logs_root: &Path) -> Result<Vec<PathBuf>> {
    if !logs_root.exists() {
        return Ok(Vec::new());
    }
    let mut dirs: Vec<PathBuf> = std::fs::read_dir(logs_root)
        .with_context(|| format!("read {}", logs_root.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|p| p.is_dir())
        .filter(|p| p.file_name().and_then(|n| n.to_str()) != Some("trash"))
        .collect();
    dirs.sort();
    Ok(dirs)
}

/// The iperf logs for hosts of `role` in this run.
///
/// Host roles come from the run manifest; without one (foreign or
/// pre-manifest directories) the `hs`/`hr` name prefixes decide.
fn iperf_logs(
    run_dir: &Path,
    manifest: Option<&RunManifest>,
    role: HostRole,
) -> Vec<(String, PathBuf)> {
    let hosts: Vec<String> = match manifest {
        Some(m) => m
            .hosts
            .iter()
            .filter(|h| h.role == role)
            .map(|h| h.name.clone())
            .collect(),
        None => {
            let prefix = match role {
                HostRole::Sender => "hs",
                HostRole::Receiver => "hr",
                HostRole::Aggregator => return Vec::new(),
            };
            std::fs::read_dir(run_dir)
                .into_iter()
                .flatten()
                .filter_map(|e| e.ok())
                .filter_map(|e| e.file_name().into_string().ok())
                .filter(|name| name.starts_with(prefix) && name.ends_with("_iperf.log"))
                .filter_map(|name| name.split('_').next().map(str::to_string))
                .collect()
        }
    };

    hosts
        .into_iter()
        .map(|host| {
            let path = run_dir.join(format!("{host}_iperf.log"));
            (host, path)
        })
        .filter(|(_, path)| path.exists())
        .collect()
}
