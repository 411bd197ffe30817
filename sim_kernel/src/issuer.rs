//! MMIO capability issuer
//!
//! The only code path that constructs a `DeviceMmio` capability. It does not
//! decide whether a task should receive a device; it only guarantees that
//! whatever is issued matches a registered window exactly.

use crate::device_registry::DeviceWindowRegistry;
use core_types::{Capability, CapabilityKind, DeviceWindow, PhysAddr, Rights, TaskId};
use kernel_api::KernelError;

/// Rights every issued device capability carries.
pub const DEVICE_MMIO_RIGHTS: Rights = Rights::MAP;

#[derive(Debug, Clone)]
pub struct MmioIssuer {
    registry: DeviceWindowRegistry,
}

impl MmioIssuer {
    pub fn new(registry: DeviceWindowRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &DeviceWindowRegistry {
        &self.registry
    }

    /// Mints a `DeviceMmio` capability for `[base, base + len)`
    ///
    /// Fails with `InvalidArgument` unless the range is exactly one
    /// registered window; sub-ranges, super-ranges and shifted ranges are
    /// all refused.
    pub fn issue(
        &self,
        base: PhysAddr,
        len: u64,
        owner: TaskId,
    ) -> Result<Capability, KernelError> {
        let window = self.registry.find_exact(base, len).ok_or_else(|| {
            KernelError::InvalidArgument(format!(
                "{base}+{len:#x} is not a registered device window"
            ))
        })?;
        Ok(Self::mint(window, owner))
    }

    /// Mints a capability for a window value, which must also be registered
    /// under the same class
    pub fn issue_window(
        &self,
        window: &DeviceWindow,
        owner: TaskId,
    ) -> Result<Capability, KernelError> {
        let cap = self.issue(window.base, window.len, owner)?;
        match self.registry.find_exact(window.base, window.len) {
            Some(registered) if registered.class == window.class => Ok(cap),
            _ => Err(KernelError::InvalidArgument(format!(
                "{window} does not match the registered device class"
            ))),
        }
    }

    fn mint(window: &DeviceWindow, owner: TaskId) -> Capability {
        Capability::new(
            CapabilityKind::DeviceMmio {
                base: window.base,
                len: window.len,
            },
            DEVICE_MMIO_RIGHTS,
            owner,
        )
    }
}
