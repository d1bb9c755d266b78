use std::time::Duration;

use anyhow::{Result, bail};

use crate::namespace::Namespace;

/// Traffic shaping applied to one interface via `tc netem` (and `tbf`).
///
/// All fields default to `None`. Set only the parameters the experiment
/// varies; omitted parameters are not passed to `tc`. An all-`None` shape
/// clears any existing qdisc on the interface.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinkShape {
    /// Link bandwidth, enforced by a TBF root qdisc.
    pub rate_kbit: Option<u64>,
    /// One-way propagation delay.
    pub delay: Option<Duration>,
    /// Delay jitter (only meaningful together with `delay`).
    pub jitter: Option<Duration>,
    /// Random packet loss probability (%).
    pub loss_percent: Option<f32>,
}

impl LinkShape {
    /// True if no shaping parameters are set (shape would be a no-op).
    fn is_empty(&self) -> bool {
        self.rate_kbit.is_none() && self.delay.is_none() && self.loss_percent.is_none()
    }

    /// True if any netem-specific parameter (delay/loss) is set.
    fn has_netem_params(&self) -> bool {
        self.delay.is_some() || self.loss_percent.is_some()
    }

    /// Build the netem parameter list (delay, jitter, loss).
    fn netem_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if let Some(delay) = self.delay {
            args.push("delay".into());
            args.push(format_us(delay));
            if let Some(jitter) = self.jitter
                && !jitter.is_zero()
            {
                args.push(format_us(jitter));
            }
        }

        if let Some(loss) = self.loss_percent
            && loss > 0.0
        {
            args.push("loss".into());
            args.push(format!("{loss}%"));
        }

        args
    }
}

/// Format a duration as integer microseconds for `tc` (e.g. `1500us`).
fn format_us(d: Duration) -> String {
    format!("{}us", d.as_micros())
}

/// Apply `shape` to `iface` inside `ns`.
///
/// Always removes the existing root qdisc first (clean slate). A rate limit
/// installs TBF as root with netem chained as a child; without a rate,
/// netem is the root qdisc.
pub fn apply_shape(ns: &Namespace, iface: &str, shape: &LinkShape) -> Result<()> {
    // Always start clean
    let _ = ns.exec("tc", &["qdisc", "del", "dev", iface, "root"]);

    if shape.is_empty() {
        return Ok(());
    }

    if shape.rate_kbit.is_some() {
        apply_tbf_with_netem(ns, iface, shape)
    } else {
        apply_netem_root(ns, iface, shape)
    }
}

/// TBF as root (bandwidth enforcement) + netem as child (delay/loss).
fn apply_tbf_with_netem(ns: &Namespace, iface: &str, shape: &LinkShape) -> Result<()> {
    let rate = shape.rate_kbit.expect("checked by caller");

    // burst = max(rate_bytes/10, one MTU)
    let rate_bytes_per_sec = rate * 1000 / 8;
    let burst = rate_bytes_per_sec.max(15400) / 10;
    let rate_arg = format!("{rate}kbit");
    let burst_arg = burst.to_string();

    tc_checked(
        ns,
        &[
            "qdisc", "add", "dev", iface, "root", "handle", "1:", "tbf", "rate", &rate_arg,
            "burst", &burst_arg, "latency", "1s",
        ],
        "apply TBF qdisc",
    )?;

    if shape.has_netem_params() {
        let netem_params = shape.netem_args();
        let mut args = vec![
            "qdisc", "add", "dev", iface, "parent", "1:1", "handle", "10:", "netem",
        ];
        let netem_strs: Vec<&str> = netem_params.iter().map(|s| s.as_str()).collect();
        args.extend_from_slice(&netem_strs);
        tc_checked(ns, &args, "apply netem child qdisc")?;
    }

    Ok(())
}

/// Netem as root qdisc (no bandwidth enforcement).
fn apply_netem_root(ns: &Namespace, iface: &str, shape: &LinkShape) -> Result<()> {
    let netem_params = shape.netem_args();
    let mut args = vec!["qdisc", "add", "dev", iface, "root", "netem"];
    let netem_strs: Vec<&str> = netem_params.iter().map(|s| s.as_str()).collect();
    args.extend_from_slice(&netem_strs);
    tc_checked(ns, &args, "apply netem qdisc")?;
    Ok(())
}

/// Run `tc` inside `ns`, bailing with stderr + the full command on failure.
fn tc_checked(ns: &Namespace, args: &[&str], ctx: &str) -> Result<()> {
    let output = ns.exec("tc", args)?;
    if !output.status.success() {
        bail!(
            "{ctx}: tc {}\n{}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{check_privileges, unique_name};

    #[test]
    fn netem_args_delay_jitter_loss() {
        let shape = LinkShape {
            delay: Some(Duration::from_millis(10)),
            jitter: Some(Duration::from_millis(2)),
            loss_percent: Some(3.0),
            ..Default::default()
        };
        assert_eq!(shape.netem_args(), ["delay", "10000us", "2000us", "loss", "3%"]);
    }

    #[test]
    fn netem_args_omit_unset() {
        let shape = LinkShape {
            delay: Some(Duration::from_micros(1500)),
            ..Default::default()
        };
        assert_eq!(shape.netem_args(), ["delay", "1500us"]);
        assert!(!LinkShape::default().has_netem_params());
        assert!(LinkShape::default().is_empty());
    }

    fn parse_ping_rtt(output: &str) -> Option<f32> {
        output.lines().find_map(|line| {
            let rest = line.split("time=").nth(1)?;
            let num = rest.split_whitespace().next()?;
            num.parse().ok()
        })
    }

    #[test]
    fn test_shaped_link_delay() {
        if !check_privileges() {
            eprintln!("Skipping: insufficient privileges");
            return;
        }

        let ns1 = Namespace::new(&unique_name("shp_a")).expect("create ns1");
        let ns2 = Namespace::new(&unique_name("shp_b")).expect("create ns2");

        ns1.add_veth_link(
            &ns2,
            "veth_sa",
            "veth_sb",
            Some("10.202.1.1/24"),
            Some("10.202.1.2/24"),
        )
        .expect("add veth link");

        let shape = LinkShape {
            rate_kbit: Some(10_000),
            delay: Some(Duration::from_millis(100)),
            jitter: Some(Duration::from_millis(10)),
            ..Default::default()
        };

        if let Err(err) = apply_shape(&ns1, "veth_sa", &shape) {
            if err.to_string().contains("qdisc kind is unknown") {
                eprintln!("Skipping: netem not available");
                return;
            }
            panic!("apply_shape: {err}");
        }

        let out = ns1
            .exec("ping", &["-c", "4", "-i", "0.2", "10.202.1.2"])
            .expect("ping");
        assert!(out.status.success(), "ping failed");

        let stdout = String::from_utf8_lossy(&out.stdout);
        let rtt = parse_ping_rtt(&stdout).expect("parse ping RTT");
        assert!(rtt >= 95.0, "RTT {rtt}ms < expected 100ms delay");
    }
}
