//! Passive counter collection on the observation point.
//!
//! Two collectors, both backgrounded for the run's lifetime: `ethstats`
//! snapshots aggregate per-interface rates once a second, `ifstat` samples
//! every 0.1s. Nothing in-process consumes their output — the contract is
//! that `ethstats.log` / `ifstat.log` exist in the run directory with the
//! formats the parsers expect.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use net_emu::HostProcess;

use crate::topo::Aggregator;

/// Extra monitor lifetime past the nominal flow duration, so trailing
/// samples are not lost.
pub const SLACK: Duration = Duration::from_secs(5);

/// Sub-second sampling interval; 0.1s gives the sub-division factor 10
/// the normalizer assumes.
const IFSTAT_INTERVAL: &str = "0.1";

/// Which counter collectors to run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MonitorMode {
    /// One-second aggregate snapshots (`ethstats.log`).
    #[default]
    PerSecond,
    /// 0.1-second per-interface snapshots (`ifstat.log`).
    SubSecond,
    /// Both collectors.
    Both,
}

impl MonitorMode {
    const fn per_second(self) -> bool {
        matches!(self, MonitorMode::PerSecond | MonitorMode::Both)
    }

    const fn sub_second(self) -> bool {
        matches!(self, MonitorMode::SubSecond | MonitorMode::Both)
    }
}

impl fmt::Display for MonitorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitorMode::PerSecond => write!(f, "per-second"),
            MonitorMode::SubSecond => write!(f, "sub-second"),
            MonitorMode::Both => write!(f, "both"),
        }
    }
}

impl std::str::FromStr for MonitorMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "per-second" => Ok(MonitorMode::PerSecond),
            "sub-second" => Ok(MonitorMode::SubSecond),
            "both" => Ok(MonitorMode::Both),
            _ => Err(format!(
                "invalid monitor mode '{s}': use per-second, sub-second, or both"
            )),
        }
    }
}

impl clap::ValueEnum for MonitorMode {
    fn value_variants<'a>() -> &'a [Self] {
        &[MonitorMode::PerSecond, MonitorMode::SubSecond, MonitorMode::Both]
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        Some(clap::builder::PossibleValue::new(match self {
            MonitorMode::PerSecond => "per-second",
            MonitorMode::SubSecond => "sub-second",
            MonitorMode::Both => "both",
        }))
    }
}

/// Start the configured collectors on `agg` for `duration` + slack.
///
/// Returns the spawned handles for the coordinator to reap. Collectors
/// are given a sample count rather than killed on time, so they exit on
/// their own once the run is over.
pub fn start(
    agg: &Aggregator,
    run_dir: &Path,
    duration: Duration,
    mode: MonitorMode,
) -> Result<Vec<HostProcess>> {
    let lifetime_secs = (duration + SLACK).as_secs();
    let mut handles = Vec::new();

    if mode.per_second() {
        let samples = lifetime_secs.to_string();
        let log = run_dir.join("ethstats.log");
        let p = HostProcess::spawn(
            &agg.ns,
            "ethstats",
            &["-t", "-n", "1", "-c", &samples],
            Some(&log),
        )
        .context("start ethstats collector")?;
        handles.push(p);
    }

    if mode.sub_second() {
        let ifaces = agg.ports.join(",");
        let ticks = (lifetime_secs * 10).to_string();
        let log = run_dir.join("ifstat.log");
        let p = HostProcess::spawn(
            &agg.ns,
            "ifstat",
            &["-t", "-i", &ifaces, IFSTAT_INTERVAL, &ticks],
            Some(&log),
        )
        .context("start ifstat collector")?;
        handles.push(p);
    }

    tracing::info!(point = agg.name, %mode, lifetime_secs, "monitors started");
    Ok(handles)
}
