//! Kernel error types
//!
//! [`KernelError`] carries the context of a failure; [`ErrorKind`] is the flat
//! taxonomy returned across the syscall boundary. Every kind is distinct and
//! none of them is ever reported as success.

use core_types::{CapHandle, Rights, TaskId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Flat error taxonomy of the device capability subsystem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Handle does not resolve to any entry
    NoCapability,
    /// Entry exists but is not a `DeviceMmio` capability
    WrongCapabilityKind,
    /// Entry lacks a required right
    InsufficientRights,
    /// Requested offset lies outside `[0, len)`
    OutOfWindow,
    /// Caller asked for an executable mapping
    ExecuteDenied,
    /// Per-task capability table is full
    ResourceExhausted,
    /// Argument rejected (unregistered window, misalignment, VA conflict)
    InvalidArgument,
    /// Task id does not name a live task
    NoSuchTask,
    /// Unknown syscall number
    InvalidSyscall,
}

impl ErrorKind {
    /// Wire code of this kind (0 is reserved for success)
    pub const fn code(&self) -> u32 {
        match self {
            ErrorKind::NoCapability => 1,
            ErrorKind::WrongCapabilityKind => 2,
            ErrorKind::InsufficientRights => 3,
            ErrorKind::OutOfWindow => 4,
            ErrorKind::ExecuteDenied => 5,
            ErrorKind::ResourceExhausted => 6,
            ErrorKind::InvalidArgument => 7,
            ErrorKind::NoSuchTask => 8,
            ErrorKind::InvalidSyscall => 9,
        }
    }

    /// Decodes a wire code; `None` for 0 and for unknown codes
    pub const fn from_code(code: u32) -> Option<ErrorKind> {
        match code {
            1 => Some(ErrorKind::NoCapability),
            2 => Some(ErrorKind::WrongCapabilityKind),
            3 => Some(ErrorKind::InsufficientRights),
            4 => Some(ErrorKind::OutOfWindow),
            5 => Some(ErrorKind::ExecuteDenied),
            6 => Some(ErrorKind::ResourceExhausted),
            7 => Some(ErrorKind::InvalidArgument),
            8 => Some(ErrorKind::NoSuchTask),
            9 => Some(ErrorKind::InvalidSyscall),
            _ => None,
        }
    }
}

/// Errors that can occur when interacting with the kernel
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KernelError {
    #[error("No capability at {0}")]
    NoCapability(CapHandle),

    #[error("Capability {handle} is {actual}, expected {expected}")]
    WrongCapabilityKind {
        handle: CapHandle,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Capability {handle} holds {held:?}, requires {required:?}")]
    InsufficientRights {
        handle: CapHandle,
        held: Rights,
        required: Rights,
    },

    #[error("{0} is not the boot authority")]
    NotBootAuthority(TaskId),

    #[error("Offset {offset:#x} outside window of length {len:#x}")]
    OutOfWindow { offset: u64, len: u64 },

    #[error("Executable device mappings are never permitted")]
    ExecuteDenied,

    #[error("Capability table full ({capacity} slots)")]
    ResourceExhausted { capacity: usize },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("No such task: {0}")]
    NoSuchTask(TaskId),

    #[error("Invalid syscall number: {0}")]
    InvalidSyscall(u64),
}

impl KernelError {
    /// Returns the flat kind reported across the syscall boundary
    pub fn kind(&self) -> ErrorKind {
        match self {
            KernelError::NoCapability(_) => ErrorKind::NoCapability,
            KernelError::WrongCapabilityKind { .. } => ErrorKind::WrongCapabilityKind,
            KernelError::InsufficientRights { .. } | KernelError::NotBootAuthority(_) => {
                ErrorKind::InsufficientRights
            }
            KernelError::OutOfWindow { .. } => ErrorKind::OutOfWindow,
            KernelError::ExecuteDenied => ErrorKind::ExecuteDenied,
            KernelError::ResourceExhausted { .. } => ErrorKind::ResourceExhausted,
            KernelError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            KernelError::NoSuchTask(_) => ErrorKind::NoSuchTask,
            KernelError::InvalidSyscall(_) => ErrorKind::InvalidSyscall,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [ErrorKind; 9] = [
        ErrorKind::NoCapability,
        ErrorKind::WrongCapabilityKind,
        ErrorKind::InsufficientRights,
        ErrorKind::OutOfWindow,
        ErrorKind::ExecuteDenied,
        ErrorKind::ResourceExhausted,
        ErrorKind::InvalidArgument,
        ErrorKind::NoSuchTask,
        ErrorKind::InvalidSyscall,
    ];

    #[test]
    fn test_codes_are_distinct_and_nonzero() {
        for (i, a) in ALL.iter().enumerate() {
            assert_ne!(a.code(), 0);
            for b in &ALL[i + 1..] {
                assert_ne!(a.code(), b.code());
            }
        }
    }

    #[test]
    fn test_code_decoding() {
        for kind in ALL {
            assert_eq!(ErrorKind::from_code(kind.code()), Some(kind));
        }
        assert_eq!(ErrorKind::from_code(0), None);
        assert_eq!(ErrorKind::from_code(42), None);
    }

    #[test]
    fn test_kind_mapping() {
        let handle = CapHandle::new(3);
        assert_eq!(
            KernelError::NoCapability(handle).kind(),
            ErrorKind::NoCapability
        );
        assert_eq!(
            KernelError::NotBootAuthority(TaskId::new()).kind(),
            ErrorKind::InsufficientRights
        );
        assert_eq!(
            KernelError::OutOfWindow {
                offset: 0x1000,
                len: 0x1000
            }
            .kind(),
            ErrorKind::OutOfWindow
        );
        assert_eq!(KernelError::ExecuteDenied.kind(), ErrorKind::ExecuteDenied);
    }

    #[test]
    fn test_error_messages() {
        let err = KernelError::OutOfWindow {
            offset: 0x1000,
            len: 0x1000,
        };
        assert_eq!(
            err.to_string(),
            "Offset 0x1000 outside window of length 0x1000"
        );
    }
}
