//! Shared utilities for integration tests.
#![allow(dead_code)]

use net_emu::{check_binary, check_privileges};

/// Reason why integration tests must be skipped.
#[derive(Debug)]
pub enum SkipReason {
    NotRoot,
    MissingTool(String),
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::NotRoot => write!(f, "requires root / passwordless sudo"),
            SkipReason::MissingTool(t) => write!(f, "system tool '{t}' not found"),
        }
    }
}

/// Check everything an end-to-end run needs: privileges, the emulation
/// tools, and the traffic/counter binaries.
pub fn check_run_deps() -> Result<(), SkipReason> {
    if !check_privileges() {
        return Err(SkipReason::NotRoot);
    }
    for tool in ["ip", "tc", "iperf3", "ethstats"] {
        if check_binary(tool).is_none() {
            return Err(SkipReason::MissingTool(tool.to_string()));
        }
    }
    Ok(())
}

/// Returns `true` if tests should be skipped (prints the reason to
/// stderr). Use at the top of every test.
pub fn skip_without_run_deps() -> bool {
    match check_run_deps() {
        Ok(()) => false,
        Err(reason) => {
            eprintln!("Skipping: {reason}");
            true
        }
    }
}
