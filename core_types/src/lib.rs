//! # Core Types
//!
//! This crate defines the fundamental types shared by the kernel simulation,
//! the policy decision point, the audit sink and the distribution authority.
//!
//! ## Philosophy
//!
//! Core types are designed with these principles:
//! - **Explicit over implicit**: Capability kinds are a tagged union and cannot be confused.
//! - **Type safety first**: Physical and virtual addresses are distinct types.
//! - **No ambient authority**: Device access requires a capability minted from a
//!   registered device window.
//!
//! ## Key Types
//!
//! - [`Capability`]: A typed grant (`kind` + `rights` + owner)
//! - [`CapabilityKind`]: Tagged variant over capability kinds (`DeviceMmio`, `Vmo`, ...)
//! - [`Rights`]: Rights bitset; `MAP` is a dedicated bit
//! - [`CapHandle`]: Task-local slot index
//! - [`DeviceWindow`]: A registered `(class, base, len)` device register block
//! - [`ServiceId`] / [`TaskId`]: Identifiers for services and tasks

pub mod capability;
pub mod device;
pub mod ids;
pub mod memory;

pub use capability::{
    CapHandle, Capability, CapabilityError, CapabilityEvent, CapabilityKind, CapabilityTransfer,
    Rights,
};
pub use device::{DeviceClass, DeviceWindow};
pub use ids::{ServiceId, TaskId};
pub use memory::{is_page_aligned, PageFlags, PhysAddr, VirtAddr, PAGE_SIZE};
