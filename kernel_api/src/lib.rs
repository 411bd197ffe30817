//! # Kernel API
//!
//! This crate defines the interface between user-space services and the
//! kernel for device capabilities.
//!
//! ## Philosophy
//!
//! The kernel provides **mechanisms**, not policies:
//! - Capability minting from a trusted device table (not from user-supplied ranges)
//! - Capability transfer (explicit, by move)
//! - Page mapping of device windows (bounded, never executable)
//!
//! Which service receives which device is decided in userspace by the
//! distribution authority and the policy decision point.
//!
//! ## Design Goals
//!
//! 1. **Testability**: The entire API can be simulated and tested
//! 2. **Distinguishable failures**: every rejection has its own [`ErrorKind`]
//! 3. **Type safety**: Addresses, handles and capability kinds are distinct types

pub mod error;
pub mod kernel;
pub mod syscalls;
pub mod time;

pub use error::{ErrorKind, KernelError};
pub use kernel::{CapQuery, KernelApi, MmioMapRequest, TaskDescriptor, TaskHandle};
pub use syscalls::{
    RawSyscall, Syscall, SyscallReturn, SyscallValue, SYSCALL_CAP_CLOSE, SYSCALL_CAP_QUERY,
    SYSCALL_CAP_TRANSFER_TO, SYSCALL_DEVICE_CAP_CREATE, SYSCALL_MMIO_MAP,
};
pub use time::{Duration, Instant};
