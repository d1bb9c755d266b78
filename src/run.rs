//! Run coordination: topology up, monitors and flows started, bounded
//! wait, teardown.
//!
//! One coordinating thread per run. Flows and monitors are background OS
//! processes; the coordinator polls their handles until everything has
//! exited, with `duration + stagger×pairs + slack` as the hard upper
//! bound. Callers must size `duration` so flows finish inside that bound,
//! otherwise collectors get killed mid-sample.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::flow::{FlowEnv, FlowSpec, Transport};
use crate::monitor::{self, MonitorMode};
use crate::topo::{self, HostRole, TopologySpec, fmt_delay};

/// Lets tests (or a signal handler) trigger teardown before the deadline.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Everything one experiment run needs.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Transport per sender/receiver pair, in pair-index order.
    pub transports: Vec<Transport>,
    pub bw_mbit: u64,
    pub delay: Duration,
    pub jitter: Option<Duration>,
    pub loss_percent: f32,
    pub split: bool,
    /// Per-flow traffic duration.
    pub duration: Duration,
    /// Gap between successive flow starts.
    pub stagger: Duration,
    pub monitor: MonitorMode,
    /// Remove the run directory after the run (ephemeral/debug runs).
    pub discard: bool,
    /// Root under which per-run directories are created.
    pub logs_root: PathBuf,
    pub generic_cc_dir: PathBuf,
    pub copa_delta: f64,
}

impl RunConfig {
    pub fn pairs(&self) -> usize {
        self.transports.len()
    }

    fn topology_spec(&self) -> TopologySpec {
        TopologySpec {
            pairs: self.pairs(),
            bw_mbit: self.bw_mbit,
            delay: self.delay,
            jitter: self.jitter,
            loss_percent: self.loss_percent,
            split: self.split,
        }
    }

    fn flow_specs(&self) -> Vec<FlowSpec> {
        self.transports
            .iter()
            .enumerate()
            .map(|(i, &transport)| FlowSpec {
                index: i + 1,
                transport,
                duration: self.duration,
                stagger: self.stagger,
            })
            .collect()
    }

    /// Canonical parameter string, the second half of the run directory
    /// name. Uniform runs: `cubic_2hosts_delay=10ms_loss=3_bw=10_duration=60`;
    /// mixed runs run-length encode the transports: `copa1_cubic1_...`.
    pub fn param_string(&self) -> String {
        let tail = format!(
            "delay={}_loss={}_bw={}_duration={}",
            fmt_delay(self.delay),
            self.loss_percent,
            self.bw_mbit,
            self.duration.as_secs()
        );

        let mut groups: Vec<(Transport, usize)> = Vec::new();
        for &t in &self.transports {
            match groups.last_mut() {
                Some((prev, count)) if *prev == t => *count += 1,
                _ => groups.push((t, 1)),
            }
        }

        match groups.as_slice() {
            [(t, n)] => format!("{t}_{n}hosts_{tail}"),
            _ => {
                let mix: Vec<String> =
                    groups.iter().map(|(t, n)| format!("{t}{n}")).collect();
                format!("{}_{tail}", mix.join("_"))
            }
        }
    }

    /// Globally unique experiment id: local-time prefix + parameter string.
    pub fn experiment_id(&self) -> String {
        let stamp = chrono::Local::now().format("%Y-%m-%d-%H-%M-%S");
        format!("{stamp}_{}", self.param_string())
    }

    fn validate(&self) -> Result<(), topo::ConfigError> {
        if self.duration.is_zero() {
            return Err(topo::ConfigError::ZeroDuration);
        }
        self.topology_spec().validate()
    }
}

/// Per-run metadata written to `<run dir>/manifest.json`.
///
/// Records each host's role so the analyzer classifies logs from the
/// manifest instead of re-deriving roles from name prefixes.
#[derive(Debug, Serialize, Deserialize)]
pub struct RunManifest {
    pub experiment_id: String,
    pub transports: Vec<String>,
    pub pairs: usize,
    pub bw_mbit: u64,
    pub delay: String,
    pub jitter: Option<String>,
    pub loss_percent: f32,
    pub split: bool,
    pub duration_secs: u64,
    pub stagger_secs: f64,
    pub hosts: Vec<HostEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HostEntry {
    pub name: String,
    pub role: HostRole,
}

pub const MANIFEST_FILE: &str = "manifest.json";

impl RunManifest {
    pub fn load(run_dir: &Path) -> Result<Self> {
        let path = run_dir.join(MANIFEST_FILE);
        let data = std::fs::read_to_string(&path)
            .with_context(|| format!("read {}", path.display()))?;
        serde_json::from_str(&data).with_context(|| format!("parse {}", path.display()))
    }

    fn save(&self, run_dir: &Path) -> Result<()> {
        let path = run_dir.join(MANIFEST_FILE);
        let json = serde_json::to_string_pretty(self).context("serialize manifest")?;
        std::fs::write(&path, json).with_context(|| format!("write {}", path.display()))
    }
}

/// Execute one run end to end. Returns the run directory (left on disk
/// unless `discard` is set).
pub fn execute(config: &RunConfig, cancel: &CancelToken) -> Result<PathBuf> {
    config.validate()?;

    let experiment_id = config.experiment_id();
    info!(%experiment_id, "starting run");

    // Topology first: fail before any directory or process exists.
    let topology = topo::build(&config.topology_spec())?;

    let run_dir = config.logs_root.join(&experiment_id);
    std::fs::create_dir_all(&run_dir)
        .with_context(|| format!("create run dir {}", run_dir.display()))?;

    let manifest = RunManifest {
        experiment_id: experiment_id.clone(),
        transports: config.transports.iter().map(Transport::to_string).collect(),
        pairs: config.pairs(),
        bw_mbit: config.bw_mbit,
        delay: fmt_delay(config.delay),
        jitter: config.jitter.map(fmt_delay),
        loss_percent: config.loss_percent,
        split: config.split,
        duration_secs: config.duration.as_secs(),
        stagger_secs: config.stagger.as_secs_f64(),
        hosts: topology
            .senders
            .iter()
            .chain(&topology.receivers)
            .map(|h| HostEntry {
                name: h.name.clone(),
                role: h.role,
            })
            .chain(topology.aggregators.iter().map(|a| HostEntry {
                name: a.name.clone(),
                role: HostRole::Aggregator,
            }))
            .collect(),
    };
    manifest.save(&run_dir)?;

    // The deadline is measured from before monitors and flows start, so it
    // upper-bounds the whole staggered sequence.
    let deadline =
        Instant::now() + config.duration + config.stagger * config.pairs() as u32 + monitor::SLACK;

    let mut handles =
        monitor::start(topology.observation_point(), &run_dir, config.duration, config.monitor)?;

    let env = FlowEnv {
        run_dir: run_dir.clone(),
        generic_cc_dir: config.generic_cc_dir.clone(),
        copa_delta: config.copa_delta,
    };
    handles.extend(crate::flow::start_flows(&config.flow_specs(), &topology, &env));

    wait_for_handles(&mut handles, deadline, cancel);

    // Teardown: reap anything still alive, then drop the topology.
    let leftovers = handles
        .iter_mut()
        .map(|h| h.is_alive())
        .filter(|&alive| alive)
        .count();
    if leftovers > 0 {
        warn!(leftovers, "killing processes still alive at teardown");
    }
    drop(handles);
    drop(topology);

    if config.discard {
        std::fs::remove_dir_all(&run_dir)
            .with_context(|| format!("discard run dir {}", run_dir.display()))?;
        info!(%experiment_id, "run complete, logs discarded");
    } else {
        info!(%experiment_id, dir = %run_dir.display(), "run complete");
    }

    Ok(run_dir)
}

/// Poll until every handle has exited, the deadline passes, or the token
/// fires. The deadline is the safety net, not the primary mechanism.
fn wait_for_handles(
    handles: &mut [net_emu::HostProcess],
    deadline: Instant,
    cancel: &CancelToken,
) {
    loop {
        if cancel.is_cancelled() {
            info!("run cancelled, tearing down early");
            return;
        }
        if handles.iter_mut().all(|h| h.has_exited()) {
            return;
        }
        if Instant::now() >= deadline {
            warn!("run deadline reached with processes still running");
            return;
        }
        std::thread::sleep(Duration::from_millis(200));
    }
}
