//! cctestbed — congestion-control experiment driver and telemetry
//! pipeline.
//!
//! The driver side builds an emulated topology (via the `net-emu` crate),
//! launches staggered traffic flows with kernel or user-space congestion
//! control, and runs passive counter collectors for the experiment's
//! lifetime. The telemetry side parses the resulting counter and iperf
//! logs into one de-duplicated, timestamp-aligned CSV dataset.

// Use mimalloc as the global allocator for tests (non-Windows only)
#[cfg(not(windows))]
#[cfg(test)]
#[global_allocator]
static ALLOC: mimalloc::MiMalloc = mimalloc::MiMalloc;

pub mod analyze;
pub mod export;
pub mod flow;
pub mod monitor;
pub mod normalize;
pub mod parse;
pub mod run;
pub mod sweep;
pub mod topo;

// Re-export commonly used items
pub use flow::{FlowSpec, Transport};
pub use monitor::MonitorMode;
pub use run::{CancelToken, RunConfig};
pub use topo::{HostRole, TopologySpec};
