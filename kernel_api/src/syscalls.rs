//! Syscall ABI for the device capability surface.
//!
//! Raw syscalls are a number plus four 64-bit argument registers. This
//! module decodes them into typed [`Syscall`] values and encodes results
//! back into a status code plus up to three value registers.
//!
//! Argument layout:
//!
//! | number | args |
//! |---|---|
//! | `SYSCALL_CAP_CLOSE` (20) | `handle` |
//! | `SYSCALL_MMIO_MAP` (27) | `handle, va, offset, prot` |
//! | `SYSCALL_CAP_QUERY` (28) | `handle` |
//! | `SYSCALL_DEVICE_CAP_CREATE` (30) | `base, len` |
//! | `SYSCALL_CAP_TRANSFER_TO` (31) | `handle, target_hi, target_lo` |

use crate::{CapQuery, ErrorKind, KernelError, MmioMapRequest};
use core_types::{CapHandle, PageFlags, PhysAddr, TaskId, VirtAddr};
use serde::{Deserialize, Serialize};

/// Drops a capability slot owned by the caller.
pub const SYSCALL_CAP_CLOSE: u64 = 20;
/// Maps one page of a device MMIO window (USER|RW, never EXEC).
pub const SYSCALL_MMIO_MAP: u64 = 27;
/// Writes `(kind_tag, base, len)` for a capability slot.
pub const SYSCALL_CAP_QUERY: u64 = 28;
/// Mints a DeviceMmio capability into the caller's table (boot authority only).
pub const SYSCALL_DEVICE_CAP_CREATE: u64 = 30;
/// Moves a capability into another task's table.
pub const SYSCALL_CAP_TRANSFER_TO: u64 = 31;

/// A syscall as it arrives at the trap boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawSyscall {
    pub number: u64,
    pub args: [u64; 4],
}

impl RawSyscall {
    pub fn new(number: u64, args: [u64; 4]) -> Self {
        Self { number, args }
    }
}

/// Typed syscall requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Syscall {
    MmioMap(MmioMapRequest),
    CapQuery { handle: CapHandle },
    CapClose { handle: CapHandle },
    DeviceCapCreate { base: PhysAddr, len: u64 },
    CapTransfer { handle: CapHandle, target: TaskId },
}

impl Syscall {
    /// Decodes a raw syscall; unknown numbers and out-of-range handles are rejected
    pub fn decode(raw: &RawSyscall) -> Result<Self, KernelError> {
        let [a0, a1, a2, a3] = raw.args;
        match raw.number {
            SYSCALL_MMIO_MAP => Ok(Syscall::MmioMap(MmioMapRequest {
                handle: decode_handle(a0)?,
                va_hint: VirtAddr::new(a1),
                offset: a2,
                prot: decode_prot(a3)?,
            })),
            SYSCALL_CAP_QUERY => Ok(Syscall::CapQuery {
                handle: decode_handle(a0)?,
            }),
            SYSCALL_CAP_CLOSE => Ok(Syscall::CapClose {
                handle: decode_handle(a0)?,
            }),
            SYSCALL_DEVICE_CAP_CREATE => Ok(Syscall::DeviceCapCreate {
                base: PhysAddr::new(a0),
                len: a1,
            }),
            SYSCALL_CAP_TRANSFER_TO => Ok(Syscall::CapTransfer {
                handle: decode_handle(a0)?,
                target: TaskId::from_u128(((a1 as u128) << 64) | a2 as u128),
            }),
            other => Err(KernelError::InvalidSyscall(other)),
        }
    }

    /// Encodes this syscall into its raw register form
    pub fn encode(&self) -> RawSyscall {
        match *self {
            Syscall::MmioMap(req) => RawSyscall::new(
                SYSCALL_MMIO_MAP,
                [
                    req.handle.slot() as u64,
                    req.va_hint.as_u64(),
                    req.offset,
                    req.prot.bits() as u64,
                ],
            ),
            Syscall::CapQuery { handle } => {
                RawSyscall::new(SYSCALL_CAP_QUERY, [handle.slot() as u64, 0, 0, 0])
            }
            Syscall::CapClose { handle } => {
                RawSyscall::new(SYSCALL_CAP_CLOSE, [handle.slot() as u64, 0, 0, 0])
            }
            Syscall::DeviceCapCreate { base, len } => {
                RawSyscall::new(SYSCALL_DEVICE_CAP_CREATE, [base.as_u64(), len, 0, 0])
            }
            Syscall::CapTransfer { handle, target } => {
                let bits = target.as_u128();
                RawSyscall::new(
                    SYSCALL_CAP_TRANSFER_TO,
                    [handle.slot() as u64, (bits >> 64) as u64, bits as u64, 0],
                )
            }
        }
    }

    /// Name used in syscall audit events
    pub fn name(&self) -> &'static str {
        match self {
            Syscall::MmioMap(_) => "mmio_map",
            Syscall::CapQuery { .. } => "cap_query",
            Syscall::CapClose { .. } => "cap_close",
            Syscall::DeviceCapCreate { .. } => "device_cap_create",
            Syscall::CapTransfer { .. } => "cap_transfer",
        }
    }
}

fn decode_handle(raw: u64) -> Result<CapHandle, KernelError> {
    u32::try_from(raw)
        .map(CapHandle::new)
        .map_err(|_| KernelError::InvalidArgument(format!("handle {raw:#x} exceeds 32 bits")))
}

fn decode_prot(raw: u64) -> Result<PageFlags, KernelError> {
    u8::try_from(raw)
        .ok()
        .and_then(PageFlags::from_bits)
        .ok_or_else(|| KernelError::InvalidArgument(format!("unknown protection bits {raw:#x}")))
}

/// Successful syscall values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyscallValue {
    Unit,
    Handle(CapHandle),
    Address(VirtAddr),
    Query(CapQuery),
}

/// Register-level syscall result: `status == 0` on success, else an [`ErrorKind`] code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyscallReturn {
    pub status: u32,
    pub values: [u64; 3],
}

impl SyscallReturn {
    pub fn from_result(result: &Result<SyscallValue, KernelError>) -> Self {
        match result {
            Ok(value) => {
                let values = match *value {
                    SyscallValue::Unit => [0, 0, 0],
                    SyscallValue::Handle(handle) => [handle.slot() as u64, 0, 0],
                    SyscallValue::Address(va) => [va.as_u64(), 0, 0],
                    SyscallValue::Query(q) => [q.kind_tag as u64, q.base, q.len],
                };
                Self { status: 0, values }
            }
            Err(err) => Self {
                status: err.kind().code(),
                values: [0, 0, 0],
            },
        }
    }

    /// Client-side view of the result
    pub fn into_result(self) -> Result<[u64; 3], ErrorKind> {
        if self.status == 0 {
            return Ok(self.values);
        }
        Err(ErrorKind::from_code(self.status).unwrap_or(ErrorKind::InvalidSyscall))
    }
}
