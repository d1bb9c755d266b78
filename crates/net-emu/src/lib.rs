//! Network emulation layer for congestion-control experiments.
//!
//! Uses Linux network namespaces, veth pairs, and in-namespace bridges to
//! build isolated virtual networks, with `tc netem`/`tbf` supplying
//! configurable delay, jitter, loss, and bandwidth on each link.
//!
//! # Modules
//!
//! - [`namespace`]: Namespace, veth link, and bridge management (RAII
//!   cleanup on drop)
//! - [`shaping`]: Per-interface `tc netem`/`tbf` configuration
//! - [`process`]: Managed background processes inside namespaces, with
//!   output redirected to per-host log files
//! - [`test_util`]: Privilege checks and unique name generation for tests

pub mod namespace;
pub mod process;
pub mod shaping;
pub mod test_util;

pub use namespace::Namespace;
pub use process::HostProcess;
pub use shaping::{LinkShape, apply_shape};
pub use test_util::{check_binary, check_privileges, unique_name};
