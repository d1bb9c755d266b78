//! Topology construction: sender/receiver hosts around one or two
//! aggregation points, with shaped access links.
//!
//! Host naming is a contract shared with the telemetry pipeline: senders
//! are `hs1..hsN`, receivers `hr1..hrN`, aggregation points `s1` (or
//! `sa1`/`sb1` in the split variant), and the aggregation-side port for
//! host `k` is `<switch>-eth<k>` — the label that later shows up in the
//! counter logs.

use std::time::Duration;

use anyhow::{Context, Result};
use net_emu::{LinkShape, Namespace, apply_shape};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Invalid topology/flow parameters. Raised by validation before any
/// namespace or process is created.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("need at least one sender/receiver pair (got {0})")]
    NoPairs(usize),
    #[error("invalid duration '{0}': expected a number with a time suffix (us/ms/s)")]
    BadDuration(String),
    #[error("loss must be within 0..=100 (got {0})")]
    BadLoss(f32),
    #[error("bandwidth must be at least 1 Mbit/s (got {0})")]
    BadBandwidth(u64),
    #[error("test duration must be non-zero")]
    ZeroDuration,
}

/// Parse a tc-style duration string (`10ms`, `200us`, `1s`).
///
/// A bare number is rejected: shaping parameters must be explicit about
/// their unit.
pub fn parse_delay(s: &str) -> Result<Duration, ConfigError> {
    let s = s.trim();
    let (num, unit) = match s.find(|c: char| c.is_ascii_alphabetic()) {
        Some(idx) => s.split_at(idx),
        None => return Err(ConfigError::BadDuration(s.to_string())),
    };
    let value: f64 = num
        .parse()
        .map_err(|_| ConfigError::BadDuration(s.to_string()))?;
    if value < 0.0 {
        return Err(ConfigError::BadDuration(s.to_string()));
    }
    let micros = match unit {
        "us" => value,
        "ms" => value * 1_000.0,
        "s" => value * 1_000_000.0,
        _ => return Err(ConfigError::BadDuration(s.to_string())),
    };
    Ok(Duration::from_micros(micros.round() as u64))
}

/// Format a delay the way the run-directory naming contract spells it
/// (`10ms`, sub-millisecond values fall back to microseconds).
pub fn fmt_delay(d: Duration) -> String {
    let us = d.as_micros();
    if us % 1000 == 0 {
        format!("{}ms", us / 1000)
    } else {
        format!("{us}us")
    }
}

/// Declarative description of the emulated network.
#[derive(Debug, Clone)]
pub struct TopologySpec {
    /// Number of sender/receiver pairs.
    pub pairs: usize,
    /// Access link bandwidth in Mbit/s.
    pub bw_mbit: u64,
    /// One-way propagation delay per link.
    pub delay: Duration,
    /// Optional delay jitter.
    pub jitter: Option<Duration>,
    /// Random loss probability (%).
    pub loss_percent: f32,
    /// Split-path variant: two aggregation points joined by a trunk that
    /// absorbs the loss/jitter budget, access links get half the delay.
    pub split: bool,
}

impl TopologySpec {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pairs < 1 {
            return Err(ConfigError::NoPairs(self.pairs));
        }
        if !(0.0..=100.0).contains(&self.loss_percent) {
            return Err(ConfigError::BadLoss(self.loss_percent));
        }
        if self.bw_mbit < 1 {
            return Err(ConfigError::BadBandwidth(self.bw_mbit));
        }
        Ok(())
    }

    /// Shape applied to both ends of each access link.
    fn access_shape(&self) -> LinkShape {
        if self.split {
            LinkShape {
                rate_kbit: Some(self.bw_mbit * 1000),
                delay: Some(self.delay / 2),
                jitter: None,
                loss_percent: None,
            }
        } else {
            LinkShape {
                rate_kbit: Some(self.bw_mbit * 1000),
                delay: Some(self.delay),
                jitter: self.jitter,
                loss_percent: (self.loss_percent > 0.0).then_some(self.loss_percent),
            }
        }
    }

    /// Shape for the inter-aggregation trunk (split variant only): a fixed
    /// short delay plus the full loss/jitter budget, bandwidth unshaped so
    /// the core carries every flow.
    fn trunk_shape(&self) -> LinkShape {
        LinkShape {
            rate_kbit: None,
            delay: Some(TRUNK_DELAY),
            jitter: self.jitter,
            loss_percent: (self.loss_percent > 0.0).then_some(self.loss_percent),
        }
    }
}

/// Fixed trunk delay in the split-path variant.
const TRUNK_DELAY: Duration = Duration::from_millis(1);

/// Role of a host, attached at build time and recorded in the run
/// manifest so the analyzer never re-derives it from name prefixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostRole {
    Sender,
    Receiver,
    Aggregator,
}

/// An end host: its own namespace, one addressed interface.
pub struct Host {
    pub name: String,
    pub role: HostRole,
    pub ns: Namespace,
    /// Address without prefix length, e.g. `10.0.0.1`.
    pub ip: String,
    /// Host-side interface name.
    pub iface: String,
}

/// An aggregation point: a namespace with a bridge and one port per
/// attached link.
pub struct Aggregator {
    pub name: String,
    pub ns: Namespace,
    /// Bridge port names in attach order (`<name>-eth1`, ...).
    pub ports: Vec<String>,
}

/// A live emulated network. Dropping it tears every namespace down.
pub struct Topology {
    pub senders: Vec<Host>,
    pub receivers: Vec<Host>,
    pub aggregators: Vec<Aggregator>,
}

impl Topology {
    /// The switch all flows converge on — where passive counters attach.
    pub fn observation_point(&self) -> &Aggregator {
        &self.aggregators[0]
    }

    /// Sender/receiver pair for 1-based flow index `i`.
    pub fn pair(&self, i: usize) -> (&Host, &Host) {
        (&self.senders[i - 1], &self.receivers[i - 1])
    }
}

/// Build a live topology from `spec`.
///
/// Star variant: every host hangs off one bridge (`s1`). Split variant:
/// senders on `sa1`, receivers on `sb1`, trunk in between. Construction
/// either fully succeeds or fully fails — an error drops every namespace
/// created so far.
pub fn build(spec: &TopologySpec) -> Result<Topology> {
    spec.validate()?;

    if spec.split {
        build_split(spec)
    } else {
        build_star(spec)
    }
}

fn build_star(spec: &TopologySpec) -> Result<Topology> {
    let mut agg = new_aggregator("s1")?;
    let mut senders = Vec::with_capacity(spec.pairs);
    let mut receivers = Vec::with_capacity(spec.pairs);
    let shape = spec.access_shape();

    for i in 1..=spec.pairs {
        senders.push(attach_host(
            &mut agg,
            &format!("hs{i}"),
            HostRole::Sender,
            &format!("10.0.0.{i}"),
            &shape,
        )?);
    }
    for i in 1..=spec.pairs {
        receivers.push(attach_host(
            &mut agg,
            &format!("hr{i}"),
            HostRole::Receiver,
            &format!("10.0.0.{}", spec.pairs + i),
            &shape,
        )?);
    }

    tracing::info!(
        pairs = spec.pairs,
        bw_mbit = spec.bw_mbit,
        delay = %fmt_delay(spec.delay),
        loss = f64::from(spec.loss_percent),
        "topology up"
    );

    Ok(Topology {
        senders,
        receivers,
        aggregators: vec![agg],
    })
}

fn build_split(spec: &TopologySpec) -> Result<Topology> {
    let mut left = new_aggregator("sa1")?;
    let mut right = new_aggregator("sb1")?;

    // Trunk first: sa1-eth0 <-> sb1-eth0, both ends shaped with the full
    // loss/jitter budget.
    let (l_port, r_port) = ("sa1-eth0".to_string(), "sb1-eth0".to_string());
    left.ns
        .add_veth_link(&right.ns, &l_port, &r_port, None, None)
        .context("create trunk link")?;
    left.ns.attach_to_bridge(&l_port)?;
    right.ns.attach_to_bridge(&r_port)?;
    let trunk = spec.trunk_shape();
    apply_shape(&left.ns, &l_port, &trunk)?;
    apply_shape(&right.ns, &r_port, &trunk)?;

    let shape = spec.access_shape();
    let mut senders = Vec::with_capacity(spec.pairs);
    let mut receivers = Vec::with_capacity(spec.pairs);
    for i in 1..=spec.pairs {
        senders.push(attach_host(
            &mut left,
            &format!("hs{i}"),
            HostRole::Sender,
            &format!("10.0.0.{i}"),
            &shape,
        )?);
    }
    for i in 1..=spec.pairs {
        receivers.push(attach_host(
            &mut right,
            &format!("hr{i}"),
            HostRole::Receiver,
            &format!("10.0.0.{}", spec.pairs + i),
            &shape,
        )?);
    }

    tracing::info!(pairs = spec.pairs, "split-path topology up");

    Ok(Topology {
        senders,
        receivers,
        aggregators: vec![left, right],
    })
}

fn new_aggregator(name: &str) -> Result<Aggregator> {
    let ns = Namespace::new(name)?;
    ns.enable_bridge()
        .with_context(|| format!("bridge on {name}"))?;
    Ok(Aggregator {
        name: name.to_string(),
        ns,
        ports: Vec::new(),
    })
}

/// Create a host namespace, link it to the aggregator's bridge, and shape
/// both ends of the access link.
fn attach_host(
    agg: &mut Aggregator,
    name: &str,
    role: HostRole,
    ip: &str,
    shape: &LinkShape,
) -> Result<Host> {
    let ns = Namespace::new(name)?;
    let iface = format!("{name}-eth0");
    let port = format!("{}-eth{}", agg.name, agg.ports.len() + 1);

    ns.add_veth_link(&agg.ns, &iface, &port, Some(&format!("{ip}/24")), None)
        .with_context(|| format!("link {name} to {}", agg.name))?;
    agg.ns.attach_to_bridge(&port)?;

    apply_shape(&ns, &iface, shape).with_context(|| format!("shape {iface}"))?;
    apply_shape(&agg.ns, &port, shape).with_context(|| format!("shape {port}"))?;

    agg.ports.push(port);

    Ok(Host {
        name: name.to_string(),
        role,
        ns,
        ip: ip.to_string(),
        iface,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_delay_accepts_suffixed_values() {
        assert_eq!(parse_delay("10ms").unwrap(), Duration::from_millis(10));
        assert_eq!(parse_delay("200us").unwrap(), Duration::from_micros(200));
        assert_eq!(parse_delay("1s").unwrap(), Duration::from_secs(1));
        assert_eq!(parse_delay("0ms").unwrap(), Duration::ZERO);
        assert_eq!(parse_delay("1.5ms").unwrap(), Duration::from_micros(1500));
    }

    #[test]
    fn parse_delay_rejects_bare_numbers_and_junk() {
        assert!(parse_delay("10").is_err());
        assert!(parse_delay("ms").is_err());
        assert!(parse_delay("-5ms").is_err());
        assert!(parse_delay("10min").is_err());
    }

    #[test]
    fn fmt_delay_round_trips_the_naming_contract() {
        assert_eq!(fmt_delay(Duration::from_millis(10)), "10ms");
        assert_eq!(fmt_delay(Duration::ZERO), "0ms");
        assert_eq!(fmt_delay(Duration::from_micros(1500)), "1500us");
    }

    fn spec(pairs: usize) -> TopologySpec {
        TopologySpec {
            pairs,
            bw_mbit: 10,
            delay: Duration::from_millis(10),
            jitter: None,
            loss_percent: 3.0,
            split: false,
        }
    }

    #[test]
    fn validate_rejects_zero_pairs() {
        assert!(matches!(
            spec(0).validate(),
            Err(ConfigError::NoPairs(0))
        ));
        assert!(spec(1).validate().is_ok());
    }

    #[test]
    fn validate_rejects_bad_loss() {
        let mut s = spec(2);
        s.loss_percent = 120.0;
        assert!(matches!(s.validate(), Err(ConfigError::BadLoss(_))));
    }

    #[test]
    fn access_shape_carries_spec_parameters() {
        let s = spec(2);
        let shape = s.access_shape();
        assert_eq!(shape.rate_kbit, Some(10_000));
        assert_eq!(shape.delay, Some(Duration::from_millis(10)));
        assert_eq!(shape.loss_percent, Some(3.0));
    }

    #[test]
    fn split_halves_delay_and_moves_loss_to_trunk() {
        let mut s = spec(2);
        s.split = true;
        s.jitter = Some(Duration::from_millis(2));

        let access = s.access_shape();
        assert_eq!(access.delay, Some(Duration::from_millis(5)));
        assert_eq!(access.loss_percent, None);
        assert_eq!(access.jitter, None);

        let trunk = s.trunk_shape();
        assert_eq!(trunk.delay, Some(TRUNK_DELAY));
        assert_eq!(trunk.loss_percent, Some(3.0));
        assert_eq!(trunk.jitter, Some(Duration::from_millis(2)));
        assert_eq!(trunk.rate_kbit, None);
    }

    #[test]
    fn test_build_star_topology() {
        if !net_emu::check_privileges() {
            eprintln!("Skipping: insufficient privileges");
            return;
        }

        let topo = build(&spec(2)).expect("build topology");
        assert_eq!(topo.senders.len(), 2);
        assert_eq!(topo.receivers.len(), 2);
        assert_eq!(topo.aggregators.len(), 1);
        assert_eq!(
            topo.observation_point().ports,
            ["s1-eth1", "s1-eth2", "s1-eth3", "s1-eth4"]
        );

        let (hs1, hr1) = topo.pair(1);
        assert_eq!(hs1.name, "hs1");
        assert_eq!(hs1.role, HostRole::Sender);
        assert_eq!(hr1.ip, "10.0.0.3");

        // Sender can reach its receiver across the bridge
        let out = hs1
            .ns
            .exec("ping", &["-c", "1", "-W", "2", &hr1.ip])
            .expect("ping");
        assert!(out.status.success(), "hs1 cannot reach hr1");
    }
}
