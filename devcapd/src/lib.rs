//! # Device Capability Host
//!
//! Boots the simulated kernel, runs device distribution once and reports
//! what every service received.
//!
//! ## Philosophy
//!
//! - **Host owns I/O**: The authority and the kernel never print
//! - **One pass**: Distribution runs exactly once per boot
//! - **Fail closed**: A missing rule set, an unreachable decision point or a
//!   broken audit trail never results in a grant
//!
//! ## Responsibilities
//!
//! The host:
//! - Loads and validates the boot configuration
//! - Spawns the boot authority and the configured services
//! - Drives the distribution authority against an audit sink
//! - Optionally probes each grant by mapping its first page

pub mod args;
pub mod runtime;

pub use args::{HostArgs, HostArgsError};
pub use runtime::{HostReport, HostRuntime, HostRuntimeError, ProbeOutcome};
