//! Test utilities for kernel and distribution tests
//!
//! Fixtures shared by unit tests here and by the integration tests of the
//! crates built on top of the simulated kernel.

use crate::{DeviceWindowRegistry, SimulatedKernel};
use core_types::{CapHandle, DeviceClass, DeviceWindow, PhysAddr, ServiceId, TaskId};
use kernel_api::{KernelApi, TaskDescriptor};

/// Base of the test network window
pub const NET_BASE: u64 = 0x1000_0000;
/// Length of the test network window
pub const NET_LEN: u64 = 0x1000;
/// Base of the two-page test block window
pub const BLK_BASE: u64 = 0x1000_1000;
pub const BLK_LEN: u64 = 0x2000;
pub const RNG_BASE: u64 = 0x1000_3000;
pub const RNG_LEN: u64 = 0x1000;

/// Registry with one net, one blk and one rng window
pub fn test_registry() -> DeviceWindowRegistry {
    let windows = [
        DeviceWindow::new(DeviceClass::Net, NET_BASE, NET_LEN),
        DeviceWindow::new(DeviceClass::Blk, BLK_BASE, BLK_LEN),
        DeviceWindow::new(DeviceClass::Rng, RNG_BASE, RNG_LEN),
    ];
    match DeviceWindowRegistry::from_windows(windows) {
        Ok(registry) => registry,
        Err(err) => panic!("test registry rejected: {err}"),
    }
}

/// A kernel over [`test_registry`] with a boot authority already spawned
pub fn booted_kernel() -> (SimulatedKernel, TaskId) {
    let mut kernel = SimulatedKernel::with_registry(test_registry());
    match kernel.spawn_boot_authority(TaskDescriptor::new("init")) {
        Ok(handle) => (kernel, handle.task_id),
        Err(err) => panic!("spawn_boot_authority failed during setup: {err}"),
    }
}

/// Spawns a task for `service`
///
/// Panics if the spawn fails; only meant for test setup.
pub fn spawn_service(kernel: &mut SimulatedKernel, service: &str) -> TaskId {
    match kernel.spawn_task(TaskDescriptor::for_service(ServiceId::new(service))) {
        Ok(handle) => handle.task_id,
        Err(err) => panic!("spawn_task({service}) failed during setup: {err}"),
    }
}

/// Mints the net window as `authority` and moves it to `target`
///
/// Panics if either step fails; only meant for test setup.
pub fn issue_to(kernel: &mut SimulatedKernel, authority: TaskId, target: TaskId) -> CapHandle {
    let handle = match kernel.device_cap_create(authority, PhysAddr::new(NET_BASE), NET_LEN) {
        Ok(handle) => handle,
        Err(err) => panic!("device_cap_create failed during setup: {err}"),
    };
    match kernel.cap_transfer(authority, handle, target) {
        Ok(handle) => handle,
        Err(err) => panic!("cap_transfer failed during setup: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_layout() {
        let registry = test_registry();
        assert_eq!(registry.len(), 3);
        assert!(registry
            .find_exact(PhysAddr::new(BLK_BASE), BLK_LEN)
            .is_some());
    }

    #[test]
    fn test_booted_kernel_has_authority() {
        let (kernel, authority) = booted_kernel();
        assert_eq!(kernel.boot_authority(), Some(authority));
        assert_eq!(kernel.task_count(), 1);
    }

    #[test]
    fn test_spawned_ids_are_live_tasks() {
        let (mut kernel, authority) = booted_kernel();
        let driver = spawn_service(&mut kernel, "netstackd");

        assert!(kernel.task_descriptor(authority).is_some());
        assert_eq!(
            kernel.task_by_service(&ServiceId::new("netstackd")),
            Some(driver)
        );
    }

    #[test]
    fn test_issue_to_leaves_authority_empty() {
        let (mut kernel, authority) = booted_kernel();
        let driver = spawn_service(&mut kernel, "netstackd");
        let handle = issue_to(&mut kernel, authority, driver);

        assert!(kernel.lookup(driver, handle).is_some());
        assert!(kernel.capabilities(authority).is_empty());
    }
}
