//! Per-pair traffic flows and their staggered, fire-and-forget launch.
//!
//! Each flow is one sender→receiver transport session. Kernel-backed
//! transports run iperf3 with an explicit congestion-control algorithm;
//! Copa runs the genericCC sender/receiver pair. Every flow writes its
//! samples under the run directory as `<hostname>_<strategy>.log` — the
//! naming the telemetry pipeline keys on.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use net_emu::HostProcess;
use thiserror::Error;
use tracing::{debug, warn};

use crate::topo::Topology;

/// Well-known iperf3 port used by every kernel-strategy receiver.
const IPERF_PORT: u16 = 5201;

/// Transport backend for one flow.
///
/// A closed set: adding a congestion-control backend means adding a
/// variant here and handling it in [`start_flow`], checked at compile
/// time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Transport {
    /// Kernel CUBIC via iperf3 (the kernel default on most distros).
    #[default]
    Cubic,
    /// Kernel BBR via iperf3.
    Bbr,
    /// Kernel BBRplus via iperf3 (requires the out-of-tree module).
    BbrPlus,
    /// Kernel Reno via iperf3.
    Reno,
    /// User-space delay-based Copa via genericCC's sender/receiver.
    Copa,
}

impl Transport {
    /// Kernel congestion-control algorithm name, or `None` for the
    /// user-space scheme.
    pub const fn kernel_algorithm(self) -> Option<&'static str> {
        match self {
            Transport::Cubic => Some("cubic"),
            Transport::Bbr => Some("bbr"),
            Transport::BbrPlus => Some("bbrplus"),
            Transport::Reno => Some("reno"),
            Transport::Copa => None,
        }
    }

    /// Strategy suffix in the per-host log naming convention.
    pub const fn log_suffix(self) -> &'static str {
        match self {
            Transport::Copa => "copa",
            _ => "iperf",
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Cubic => write!(f, "cubic"),
            Transport::Bbr => write!(f, "bbr"),
            Transport::BbrPlus => write!(f, "bbrplus"),
            Transport::Reno => write!(f, "reno"),
            Transport::Copa => write!(f, "copa"),
        }
    }
}

impl std::str::FromStr for Transport {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cubic" => Ok(Transport::Cubic),
            "bbr" => Ok(Transport::Bbr),
            "bbrplus" => Ok(Transport::BbrPlus),
            "reno" => Ok(Transport::Reno),
            "copa" => Ok(Transport::Copa),
            _ => Err(format!(
                "unknown transport '{s}': use cubic, bbr, bbrplus, reno, or copa"
            )),
        }
    }
}

impl clap::ValueEnum for Transport {
    fn value_variants<'a>() -> &'a [Self] {
        &[
            Transport::Cubic,
            Transport::Bbr,
            Transport::BbrPlus,
            Transport::Reno,
            Transport::Copa,
        ]
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        Some(clap::builder::PossibleValue::new(match self {
            Transport::Cubic => "cubic",
            Transport::Bbr => "bbr",
            Transport::BbrPlus => "bbrplus",
            Transport::Reno => "reno",
            Transport::Copa => "copa",
        }))
    }
}

/// One flow to launch: pair index, transport, timing.
///
/// Created at run start, immutable, discarded once the run's process
/// handles are reaped.
#[derive(Debug, Clone)]
pub struct FlowSpec {
    /// 1-based sender/receiver pair index.
    pub index: usize,
    pub transport: Transport,
    pub duration: Duration,
    /// Gap between this flow's start and the next one's.
    pub stagger: Duration,
}

/// A flow that failed to start. Siblings are unaffected.
#[derive(Debug, Error)]
#[error("flow {index} ({transport}) failed to start")]
pub struct TransportStartError {
    pub index: usize,
    pub transport: Transport,
    #[source]
    pub source: anyhow::Error,
}

/// Paths the flow strategies need besides the topology.
#[derive(Debug, Clone)]
pub struct FlowEnv {
    pub run_dir: PathBuf,
    /// Directory holding genericCC's `sender`/`receiver` binaries.
    pub generic_cc_dir: PathBuf,
    /// Copa delta tuning parameter (`delta_conf=do_ss:auto:<delta>`).
    pub copa_delta: f64,
}

/// Start all flows in index order, sleeping each flow's stagger before
/// starting the next.
///
/// Flows are fire-and-forget: this blocks only for the stagger sequence,
/// never for flow completion. A flow that fails to start is logged and
/// skipped; the spawned handles of every flow that did start are returned
/// for the coordinator to reap.
pub fn start_flows(
    flows: &[FlowSpec],
    topo: &Topology,
    env: &FlowEnv,
) -> Vec<HostProcess> {
    let mut handles = Vec::with_capacity(flows.len() * 2);

    for flow in flows {
        // Flow i starts i × stagger after the scheduler was invoked, so
        // successive flows ramp up instead of thundering in together.
        std::thread::sleep(flow.stagger);
        match start_flow(flow, topo, env) {
            Ok(mut spawned) => handles.append(&mut spawned),
            Err(err) => {
                let (index, transport) = (err.index, err.transport);
                let chain = format!("{:#}", anyhow::Error::from(err));
                warn!(index, %transport, error = %chain, "flow skipped");
            }
        }
    }

    handles
}

/// Start one flow: receiver first, then sender. Returns both handles.
fn start_flow(
    flow: &FlowSpec,
    topo: &Topology,
    env: &FlowEnv,
) -> Result<Vec<HostProcess>, TransportStartError> {
    let wrap = |source: anyhow::Error| TransportStartError {
        index: flow.index,
        transport: flow.transport,
        source,
    };

    let (sender, receiver) = topo.pair(flow.index);
    debug!(
        index = flow.index,
        transport = %flow.transport,
        sender = sender.name,
        receiver = receiver.name,
        "starting flow"
    );

    match flow.transport.kernel_algorithm() {
        Some(algo) => start_kernel_flow(flow, algo, topo, env).map_err(wrap),
        None => start_copa_flow(flow, topo, env).map_err(wrap),
    }
}

/// Kernel strategy: an iperf3 server on the receiver, an iperf3 client on
/// the sender pinned to `algo` via `-C`, both emitting one-second JSON
/// interval samples to their per-host logs.
fn start_kernel_flow(
    flow: &FlowSpec,
    algo: &str,
    topo: &Topology,
    env: &FlowEnv,
) -> Result<Vec<HostProcess>> {
    let (sender, receiver) = topo.pair(flow.index);
    let port = IPERF_PORT.to_string();
    let secs = flow.duration.as_secs().to_string();

    let recv_log = host_log(&env.run_dir, &receiver.name, flow.transport);
    let recv = HostProcess::spawn(
        &receiver.ns,
        "iperf3",
        &["-s", "--json", "-1", "-p", &port],
        Some(&recv_log),
    )
    .context("start iperf3 server")?;

    let send_log = host_log(&env.run_dir, &sender.name, flow.transport);
    let send = HostProcess::spawn(
        &sender.ns,
        "iperf3",
        &[
            "-c", &receiver.ip, "-p", &port, "-i", "1", "-t", &secs, "-C", algo, "--json",
        ],
        Some(&send_log),
    )
    .context("start iperf3 client")?;

    Ok(vec![recv, send])
}

/// Delay-based strategy: genericCC receiver, then a sender switched on for
/// the flow duration with the configured delta.
fn start_copa_flow(
    flow: &FlowSpec,
    topo: &Topology,
    env: &FlowEnv,
) -> Result<Vec<HostProcess>> {
    let (sender, receiver) = topo.pair(flow.index);

    let recv_bin = env.generic_cc_dir.join("receiver");
    let recv = HostProcess::spawn(&receiver.ns, &recv_bin.to_string_lossy(), &[], None)
        .context("start genericCC receiver")?;

    let send_bin = env.generic_cc_dir.join("sender");
    let server_arg = format!("serverip={}", receiver.ip);
    let onduration_arg = format!("onduration={}", flow.duration.as_millis());
    let delta_arg = format!("delta_conf=do_ss:auto:{}", env.copa_delta);

    let send_log = host_log(&env.run_dir, &sender.name, flow.transport);
    let send = HostProcess::spawn(
        &sender.ns,
        &send_bin.to_string_lossy(),
        &[
            &server_arg,
            &onduration_arg,
            "cctype=markovian",
            &delta_arg,
            "traffic_params=deterministic,num_cycles=1",
        ],
        Some(&send_log),
    )
    .context("start genericCC sender")?;

    Ok(vec![recv, send])
}

/// `<run_dir>/<hostname>_<strategy>.log`.
fn host_log(run_dir: &Path, host: &str, transport: Transport) -> PathBuf {
    run_dir.join(format!("{host}_{}.log", transport.log_suffix()))
}
