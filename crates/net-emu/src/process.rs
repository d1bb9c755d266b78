//! Managed background processes inside network namespaces.
//!
//! Traffic generators and counter collectors are fire-and-forget children;
//! the run coordinator keeps the [`HostProcess`] handles and reaps them at
//! teardown. Output goes straight to the per-host log file named by the
//! caller — the log file, not the pipe, is the data product.

use std::fs::File;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use anyhow::{Context, Result};

/// A child process running inside a network namespace.
///
/// Sends TERM (then KILL) to the process group on drop.
pub struct HostProcess {
    child: Child,
    label: String,
}

impl HostProcess {
    /// Spawn `binary args...` inside `ns` via `sudo ip netns exec`.
    ///
    /// With `log`, stdout and stderr are appended to that file; without,
    /// output is discarded.
    pub fn spawn(
        ns: &crate::Namespace,
        binary: &str,
        args: &[&str],
        log: Option<&Path>,
    ) -> Result<Self> {
        let label = format!("{binary} in ns:{}", ns.name);

        let (stdout, stderr) = match log {
            Some(path) => {
                let file = File::options()
                    .create(true)
                    .append(true)
                    .open(path)
                    .with_context(|| format!("open log file {}", path.display()))?;
                let err = file.try_clone().context("clone log file handle")?;
                (Stdio::from(file), Stdio::from(err))
            }
            None => (Stdio::null(), Stdio::null()),
        };

        let mut cmd = Command::new("sudo");
        cmd.args(["ip", "netns", "exec", &ns.name])
            .arg(binary)
            .args(args)
            .stdout(stdout)
            .stderr(stderr);

        let child = cmd.spawn().with_context(|| format!("spawn {label}"))?;

        tracing::debug!(%label, pid = child.id(), "spawned host process");
        Ok(Self { child, label })
    }

    /// Human-readable label (`binary in ns:name`).
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Check if the process is still running.
    pub fn is_alive(&mut self) -> bool {
        self.child.try_wait().ok().flatten().is_none()
    }

    /// True once the process has exited (reaped via `try_wait`).
    pub fn has_exited(&mut self) -> bool {
        !self.is_alive()
    }

    /// Send SIGTERM, wait briefly, then SIGKILL if needed.
    ///
    /// Signals the entire process group (negative PID) so the inner process
    /// receives the signal even when wrapped by `sudo ip netns exec`.
    pub fn kill(&mut self) {
        let pid = self.child.id();
        let _ = Command::new("sudo")
            .args(["kill", "-TERM", "--", &format!("-{pid}")])
            .output();

        if self.child.try_wait().ok().flatten().is_none() {
            // Wait up to 2s for graceful exit
            std::thread::sleep(Duration::from_secs(2));
            if self.child.try_wait().ok().flatten().is_some() {
                return;
            }
            // Force kill the process group
            let _ = Command::new("sudo")
                .args(["kill", "-9", "--", &format!("-{pid}")])
                .output();
        }
        let _ = self.child.wait();
    }
}

impl Drop for HostProcess {
    fn drop(&mut self) {
        self.kill();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Namespace;
    use crate::test_util::{check_privileges, unique_name};

    #[test]
    fn test_process_writes_log_and_exits() {
        if !check_privileges() {
            eprintln!("Skipping: insufficient privileges");
            return;
        }

        let ns = Namespace::new(&unique_name("prc_a")).expect("create ns");
        let dir = tempfile::tempdir().expect("tempdir");
        let log = dir.path().join("echo.log");

        let mut p =
            HostProcess::spawn(&ns, "echo", &["hello"], Some(&log)).expect("spawn echo");

        // echo exits on its own almost immediately
        for _ in 0..50 {
            if p.has_exited() {
                break;
            }
            std::thread::sleep(Duration::from_millis(100));
        }
        assert!(p.has_exited(), "echo did not exit");

        let contents = std::fs::read_to_string(&log).expect("read log");
        assert!(contents.contains("hello"), "log missing output: {contents}");
    }

    #[test]
    fn test_kill_stops_long_running_process() {
        if !check_privileges() {
            eprintln!("Skipping: insufficient privileges");
            return;
        }

        let ns = Namespace::new(&unique_name("prc_b")).expect("create ns");
        let mut p = HostProcess::spawn(&ns, "sleep", &["60"], None).expect("spawn sleep");
        assert!(p.is_alive(), "sleep should be running");
        p.kill();
        assert!(p.has_exited(), "sleep still alive after kill");
    }
}
