//! Capability system types
//!
//! This module defines the capability model used at the kernel boundary.
//!
//! ## Design Principles
//!
//! 1. **Unforgeable**: A `DeviceMmio` capability can only be minted by the
//!    kernel's issuer from a registered device window
//! 2. **Typed**: [`CapabilityKind`] is a sum type; each kind carries only its own fields
//! 3. **Moved, not aliased**: Transfer empties the source slot
//! 4. **Testable**: The entire system works under `cargo test`
//!
//! ## Example
//!
//! ```
//! use core_types::{CapabilityKind, PhysAddr, Rights};
//!
//! let kind = CapabilityKind::DeviceMmio { base: PhysAddr::new(0x1000_0000), len: 0x1000 };
//! assert_eq!(kind.tag(), 2);
//! assert!(Rights::MAP.contains(Rights::MAP));
//! ```

use crate::ids::TaskId;
use crate::memory::PhysAddr;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

bitflags! {
    /// Rights associated with a capability handle
    ///
    /// Each right is a single dedicated bit. There is no execute right:
    /// executability of device memory is not something a capability can grant.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct Rights: u32 {
        const SEND = 1 << 0;
        const RECV = 1 << 1;
        const MAP = 1 << 2;
        const MANAGE = 1 << 3;
    }
}

/// Capability kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CapabilityKind {
    /// Kernel message endpoint
    Endpoint(u32),
    /// Virtual memory object
    Vmo { base: PhysAddr, len: u64 },
    /// Device MMIO window, mappable only through the MMIO mapping syscall
    DeviceMmio { base: PhysAddr, len: u64 },
    /// Interrupt line binding
    Irq(u32),
}

impl CapabilityKind {
    /// Stable kind tag reported by the capability query syscall
    pub fn tag(&self) -> u32 {
        match self {
            CapabilityKind::Vmo { .. } => 1,
            CapabilityKind::DeviceMmio { .. } => 2,
            CapabilityKind::Endpoint(_) => 3,
            CapabilityKind::Irq(_) => 4,
        }
    }

    /// Short kind name for audit output
    pub fn name(&self) -> &'static str {
        match self {
            CapabilityKind::Endpoint(_) => "Endpoint",
            CapabilityKind::Vmo { .. } => "Vmo",
            CapabilityKind::DeviceMmio { .. } => "DeviceMmio",
            CapabilityKind::Irq(_) => "Irq",
        }
    }

    /// Physical window covered by this kind, if it has one
    pub fn window(&self) -> Option<(PhysAddr, u64)> {
        match *self {
            CapabilityKind::Vmo { base, len } | CapabilityKind::DeviceMmio { base, len } => {
                Some((base, len))
            }
            CapabilityKind::Endpoint(_) | CapabilityKind::Irq(_) => None,
        }
    }
}

/// A capability instance held in exactly one task's capability table
///
/// Two tasks holding "the same" device window hold two independent values;
/// there is no shared mutable capability object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capability {
    pub kind: CapabilityKind,
    pub rights: Rights,
    pub owner: TaskId,
}

impl Capability {
    /// Creates a capability value
    ///
    /// `DeviceMmio` capabilities should only be created by the kernel's issuer;
    /// this constructor exists for the other kinds and for tests.
    pub fn new(kind: CapabilityKind, rights: Rights, owner: TaskId) -> Self {
        Self {
            kind,
            rights,
            owner,
        }
    }

    pub fn has_rights(&self, rights: Rights) -> bool {
        self.rights.contains(rights)
    }

    /// Returns the same capability re-owned by `owner`
    pub fn reowned(self, owner: TaskId) -> Self {
        Self { owner, ..self }
    }
}

/// Task-local capability slot index
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapHandle(u32);

impl CapHandle {
    pub const fn new(slot: u32) -> Self {
        Self(slot)
    }

    pub const fn slot(&self) -> u32 {
        self.0
    }

    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for CapHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cap#{}", self.0)
    }
}

/// Errors related to capability values themselves
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CapabilityError {
    /// Transfer target is the current owner
    #[error("Capability is already owned by {0}")]
    SelfTransfer(TaskId),
}

/// Capability lifecycle events recorded by the kernel's audit trail
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CapabilityEvent {
    /// Kernel issuer minted a capability into a task's table
    Issued {
        owner: TaskId,
        handle: CapHandle,
        kind: CapabilityKind,
    },
    /// Capability moved from one task's table to another's
    Transferred {
        from_task: TaskId,
        from_handle: CapHandle,
        to_task: TaskId,
        to_handle: CapHandle,
    },
    /// Capability derived with reduced rights
    Derived {
        owner: TaskId,
        parent: CapHandle,
        child: CapHandle,
        rights: Rights,
    },
    /// Owner closed its own handle
    Closed { owner: TaskId, handle: CapHandle },
    /// Kernel revoked the handle
    Revoked { owner: TaskId, handle: CapHandle },
    /// Owner terminated; all of its capabilities were destroyed
    Destroyed { owner: TaskId, count: usize },
    /// A syscall presented a handle that did not resolve
    InvalidUseAttempt {
        task: TaskId,
        handle: CapHandle,
        operation: String,
    },
}

impl CapabilityEvent {
    /// Task the event concerns (the sender for transfers)
    pub fn task(&self) -> TaskId {
        match self {
            CapabilityEvent::Issued { owner, .. }
            | CapabilityEvent::Derived { owner, .. }
            | CapabilityEvent::Closed { owner, .. }
            | CapabilityEvent::Revoked { owner, .. }
            | CapabilityEvent::Destroyed { owner, .. } => *owner,
            CapabilityEvent::Transferred { from_task, .. } => *from_task,
            CapabilityEvent::InvalidUseAttempt { task, .. } => *task,
        }
    }
}

/// A capability in flight between two tasks
///
/// Unlike cloning, transfer moves ownership: the value is taken out of the
/// sender's table before this is built, and `complete` re-owns it for the
/// receiver.
#[derive(Debug)]
pub struct CapabilityTransfer {
    capability: Capability,
    from_task: TaskId,
    to_task: TaskId,
}

impl CapabilityTransfer {
    /// Creates a new transfer; fails if `to_task` already owns the capability
    pub fn new(capability: Capability, to_task: TaskId) -> Result<Self, CapabilityError> {
        if capability.owner == to_task {
            return Err(CapabilityError::SelfTransfer(to_task));
        }
        Ok(Self {
            from_task: capability.owner,
            capability,
            to_task,
        })
    }

    /// Returns the source task ID
    pub fn from_task(&self) -> TaskId {
        self.from_task
    }

    /// Returns the destination task ID
    pub fn to_task(&self) -> TaskId {
        self.to_task
    }

    /// Completes the transfer and returns the capability owned by the receiver
    pub fn complete(self) -> Capability {
        self.capability.reowned(self.to_task)
    }

    /// Aborts the transfer and returns the capability unchanged
    pub fn abort(self) -> Capability {
        self.capability
    }
}
