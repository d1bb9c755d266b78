use std::process::{Command, Output};

use anyhow::{Context, Result, bail};
use tracing::debug;

/// Name of the bridge device created inside aggregation namespaces.
pub const BRIDGE: &str = "br0";

/// A Linux network namespace with RAII cleanup.
///
/// Creates the namespace on construction, brings up loopback, and deletes
/// it on drop. All commands inside the namespace run via `sudo ip netns exec`.
pub struct Namespace {
    pub name: String,
}

impl Namespace {
    pub fn new(name: &str) -> Result<Self> {
        // Clean up stale namespace with same name (idempotent)
        let _ = sudo(&["ip", "netns", "del", name]);

        sudo_checked(&["ip", "netns", "add", name])
            .with_context(|| format!("create netns '{name}'"))?;

        debug!(ns = name, "created network namespace");

        // Loopback — best-effort, failure is non-fatal
        let _ = sudo(&["ip", "netns", "exec", name, "ip", "link", "set", "lo", "up"]);

        Ok(Self {
            name: name.to_string(),
        })
    }

    /// Run a command inside this namespace, returning raw output.
    pub fn exec(&self, cmd: &str, args: &[&str]) -> Result<Output> {
        let mut full_args = vec!["ip", "netns", "exec", &self.name, cmd];
        full_args.extend_from_slice(args);
        sudo(&full_args).with_context(|| format!("exec '{cmd}' in ns '{}'", self.name))
    }

    /// Run a command inside this namespace, failing if it exits non-zero.
    pub fn exec_checked(&self, cmd: &str, args: &[&str]) -> Result<Output> {
        let mut full_args = vec!["ip", "netns", "exec", &self.name, cmd];
        full_args.extend_from_slice(args);
        sudo_checked(&full_args).with_context(|| format!("exec '{cmd}' in ns '{}'", self.name))
    }

    /// Create a bridge device inside this namespace and bring it up.
    ///
    /// Turns the namespace into a switch: veth ends moved here can be
    /// enslaved to the bridge with [`Namespace::attach_to_bridge`].
    pub fn enable_bridge(&self) -> Result<()> {
        self.exec_checked("ip", &["link", "add", BRIDGE, "type", "bridge"])
            .context("create bridge")?;
        self.exec_checked("ip", &["link", "set", BRIDGE, "up"])
            .context("bring bridge up")?;
        debug!(ns = self.name, "bridge enabled");
        Ok(())
    }

    /// Enslave an interface in this namespace to the bridge.
    pub fn attach_to_bridge(&self, iface: &str) -> Result<()> {
        self.exec_checked("ip", &["link", "set", iface, "master", BRIDGE])
            .with_context(|| format!("attach '{iface}' to bridge"))?;
        Ok(())
    }

    /// Create a veth pair connecting this namespace to `peer`.
    ///
    /// Ends with a `Some` address get the IP assigned; `None` ends are left
    /// unaddressed (bridge ports). Both ends are brought up.
    /// Interface names must be <= 15 chars (Linux limit).
    pub fn add_veth_link(
        &self,
        peer: &Namespace,
        local_iface: &str,
        peer_iface: &str,
        local_ip: Option<&str>,
        peer_ip: Option<&str>,
    ) -> Result<()> {
        // Clean up stale veth (idempotent)
        let _ = sudo(&["ip", "link", "del", local_iface]);

        // Create pair in host namespace
        sudo_checked(&[
            "ip",
            "link",
            "add",
            local_iface,
            "type",
            "veth",
            "peer",
            "name",
            peer_iface,
        ])
        .context("create veth pair")?;

        debug!(local = local_iface, peer = peer_iface, "created veth pair");

        // Move each end into its namespace
        sudo_checked(&["ip", "link", "set", local_iface, "netns", &self.name])
            .context("move local veth")?;
        sudo_checked(&["ip", "link", "set", peer_iface, "netns", &peer.name])
            .context("move peer veth")?;

        // Configure local end
        if let Some(ip) = local_ip {
            self.exec_checked("ip", &["addr", "add", ip, "dev", local_iface])
                .context("set local IP")?;
        }
        self.exec_checked("ip", &["link", "set", local_iface, "up"])
            .context("bring local link up")?;

        // Configure peer end
        if let Some(ip) = peer_ip {
            peer.exec_checked("ip", &["addr", "add", ip, "dev", peer_iface])
                .context("set peer IP")?;
        }
        peer.exec_checked("ip", &["link", "set", peer_iface, "up"])
            .context("bring peer link up")?;

        debug!(
            ns_local = self.name,
            ns_peer = peer.name,
            local_iface,
            peer_iface,
            "veth link configured"
        );

        Ok(())
    }
}

impl Drop for Namespace {
    fn drop(&mut self) {
        debug!(ns = self.name, "deleting network namespace");
        let _ = sudo(&["ip", "netns", "del", &self.name]);
    }
}

// -- helpers --

/// Run `sudo <args>`, returning raw output.
fn sudo(args: &[&str]) -> Result<Output> {
    Command::new("sudo")
        .args(args)
        .output()
        .with_context(|| format!("sudo {}", args.join(" ")))
}

/// Run `sudo <args>`, returning output on success or bailing with stderr.
fn sudo_checked(args: &[&str]) -> Result<Output> {
    let output = sudo(args)?;
    if !output.status.success() {
        bail!(
            "command failed: sudo {}\n{}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(output)
}
