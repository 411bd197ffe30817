//! # Simulated Kernel
//!
//! This crate provides a simulated implementation of the kernel API for the
//! device capability subsystem.
//!
//! ## Purpose
//!
//! The simulated kernel allows testing device access control without hardware:
//! - Runs under `cargo test`
//! - Deterministic (controlled time, no real concurrency)
//! - Inspectable (capability tables and page mappings are accessible)
//!
//! ## Philosophy
//!
//! **The kernel is the only place a device capability is born.**
//!
//! The [`MmioIssuer`] mints `DeviceMmio` capabilities from the sealed
//! [`DeviceWindowRegistry`], and only the boot authority may ask it to. Every
//! other task receives device access by transfer, and turns it into memory
//! through the mapping syscall, which checks the capability every time.

pub mod address_space;
pub mod cap_table;
pub mod capability_audit;
pub mod device_registry;
pub mod issuer;
pub mod syscall_gate;
pub mod test_utils;

pub use address_space::{AddressSpace, Mapping, MMIO_VA_BASE};
pub use cap_table::{CapTable, DEFAULT_CAP_SLOTS};
pub use device_registry::{DeviceWindowRegistry, RegistryBuilder, RegistryError};
pub use issuer::MmioIssuer;
pub use syscall_gate::{SyscallAuditLog, SyscallEvent, SyscallGate};

use capability_audit::CapabilityAuditLog;
use core_types::{
    is_page_aligned, CapHandle, Capability, CapabilityEvent, CapabilityKind, CapabilityTransfer,
    PageFlags, PhysAddr, Rights, ServiceId, TaskId, VirtAddr,
};
use kernel_api::{
    CapQuery, Duration, Instant, KernelApi, KernelError, MmioMapRequest, TaskDescriptor,
    TaskHandle,
};
use std::collections::HashMap;

/// Simulated kernel state
///
/// Unlike a real kernel, this state is directly accessible for testing.
pub struct SimulatedKernel {
    /// Current simulated time
    current_time: Instant,
    /// Live tasks
    tasks: HashMap<TaskId, TaskInfo>,
    /// Sole minter of device capabilities
    issuer: MmioIssuer,
    /// Task allowed to call `device_cap_create`
    boot_authority: Option<TaskId>,
    /// Capability slots given to each new task
    cap_slots: usize,
    /// Audit log for capability operations (test-only)
    capability_audit: CapabilityAuditLog,
}

#[derive(Debug)]
struct TaskInfo {
    descriptor: TaskDescriptor,
    caps: CapTable,
    space: AddressSpace,
}

impl SimulatedKernel {
    /// Creates a kernel whose issuer draws from `registry`
    pub fn with_registry(registry: DeviceWindowRegistry) -> Self {
        Self {
            current_time: Instant::BOOT,
            tasks: HashMap::new(),
            issuer: MmioIssuer::new(registry),
            boot_authority: None,
            cap_slots: DEFAULT_CAP_SLOTS,
            capability_audit: CapabilityAuditLog::new(),
        }
    }

    /// Sets the capability table size of tasks spawned afterwards
    pub fn with_cap_slots(mut self, slots: usize) -> Self {
        self.cap_slots = slots;
        self
    }

    pub fn registry(&self) -> &DeviceWindowRegistry {
        self.issuer.registry()
    }

    /// Advances simulated time
    pub fn advance_time(&mut self, duration: Duration) {
        self.current_time = self.current_time + duration;
    }

    /// Spawns the single task allowed to mint device capabilities
    pub fn spawn_boot_authority(
        &mut self,
        descriptor: TaskDescriptor,
    ) -> Result<TaskHandle, KernelError> {
        if let Some(existing) = self.boot_authority {
            return Err(KernelError::InvalidArgument(format!(
                "boot authority already exists: {existing}"
            )));
        }
        let handle = self.spawn_task(descriptor)?;
        self.boot_authority = Some(handle.task_id);
        log::info!("boot authority is {}", handle.task_id);
        Ok(handle)
    }

    pub fn boot_authority(&self) -> Option<TaskId> {
        self.boot_authority
    }

    /// Returns the number of live tasks
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Finds the live task running `service`
    pub fn task_by_service(&self, service: &ServiceId) -> Option<TaskId> {
        self.tasks
            .iter()
            .find(|(_, info)| info.descriptor.service.as_ref() == Some(service))
            .map(|(id, _)| *id)
    }

    pub fn task_descriptor(&self, task: TaskId) -> Option<&TaskDescriptor> {
        self.tasks.get(&task).map(|info| &info.descriptor)
    }

    /// Returns a reference to the capability audit log
    pub fn audit_log(&self) -> &CapabilityAuditLog {
        &self.capability_audit
    }

    /// Resolves a handle in `task`'s table
    pub fn lookup(&self, task: TaskId, handle: CapHandle) -> Option<&Capability> {
        self.tasks.get(&task)?.caps.lookup(handle)
    }

    /// Snapshot of `task`'s capability table in handle order
    pub fn capabilities(&self, task: TaskId) -> Vec<(CapHandle, Capability)> {
        self.tasks
            .get(&task)
            .map(|info| info.caps.iter().map(|(h, c)| (h, *c)).collect())
            .unwrap_or_default()
    }

    /// Snapshot of `task`'s page mappings in address order
    pub fn mappings(&self, task: TaskId) -> Vec<Mapping> {
        self.tasks
            .get(&task)
            .map(|info| info.space.mappings().copied().collect())
            .unwrap_or_default()
    }

    /// Returns the mapping of the page containing `va` in `task`
    pub fn translate(&self, task: TaskId, va: VirtAddr) -> Option<Mapping> {
        self.tasks.get(&task)?.space.translate(va).copied()
    }

    fn task_mut(&mut self, task: TaskId) -> Result<&mut TaskInfo, KernelError> {
        self.tasks.get_mut(&task).ok_or(KernelError::NoSuchTask(task))
    }

    /// Mints a device capability directly into `task`'s table
    ///
    /// Kernel-internal path used at boot and by tests; user tasks reach the
    /// issuer only through `device_cap_create`.
    pub fn issue_device_capability(
        &mut self,
        task: TaskId,
        base: PhysAddr,
        len: u64,
    ) -> Result<CapHandle, KernelError> {
        let now = self.current_time;
        let cap = self.issuer.issue(base, len, task)?;
        let info = self.task_mut(task)?;
        let handle = info.caps.insert(cap)?;
        self.capability_audit.record_event(
            now,
            CapabilityEvent::Issued {
                owner: task,
                handle,
                kind: cap.kind,
            },
        );
        log::debug!("issued {} {handle} to {task}", cap.kind.name());
        Ok(handle)
    }

    /// Places a non-device capability into `task`'s table
    ///
    /// `DeviceMmio` is refused here; it can only come from the issuer.
    pub fn grant_capability(
        &mut self,
        task: TaskId,
        kind: CapabilityKind,
        rights: Rights,
    ) -> Result<CapHandle, KernelError> {
        if let CapabilityKind::DeviceMmio { .. } = kind {
            return Err(KernelError::InvalidArgument(
                "device capabilities are minted only by the issuer".to_string(),
            ));
        }
        let now = self.current_time;
        let handle = self
            .task_mut(task)?
            .caps
            .insert(Capability::new(kind, rights, task))?;
        self.capability_audit.record_event(
            now,
            CapabilityEvent::Issued {
                owner: task,
                handle,
                kind,
            },
        );
        Ok(handle)
    }

    /// Copies a capability within `task`'s table with fewer rights
    pub fn derive_capability(
        &mut self,
        task: TaskId,
        parent: CapHandle,
        rights: Rights,
    ) -> Result<CapHandle, KernelError> {
        let now = self.current_time;
        let child = self.task_mut(task)?.caps.derive(parent, rights)?;
        self.capability_audit.record_event(
            now,
            CapabilityEvent::Derived {
                owner: task,
                parent,
                child,
                rights,
            },
        );
        Ok(child)
    }

    /// Removes an entry from `task`'s table
    ///
    /// Takes effect synchronously: any later syscall presenting `handle`
    /// fails with `NoCapability`. Pages already mapped through the entry
    /// stay mapped.
    pub fn revoke_capability(
        &mut self,
        task: TaskId,
        handle: CapHandle,
    ) -> Result<Capability, KernelError> {
        let now = self.current_time;
        let cap = self
            .task_mut(task)?
            .caps
            .revoke(handle)
            .ok_or(KernelError::NoCapability(handle))?;
        self.capability_audit
            .record_event(now, CapabilityEvent::Revoked { owner: task, handle });
        log::info!("revoked {handle} from {task}");
        Ok(cap)
    }

    /// Moves a capability from `from`'s table into `to`'s table
    pub fn transfer_capability(
        &mut self,
        from: TaskId,
        handle: CapHandle,
        to: TaskId,
    ) -> Result<CapHandle, KernelError> {
        if !self.tasks.contains_key(&to) {
            return Err(KernelError::NoSuchTask(to));
        }
        let cap = self.resolve(from, handle, "cap_transfer")?;
        let transfer = CapabilityTransfer::new(cap, to)
            .map_err(|e| KernelError::InvalidArgument(e.to_string()))?;

        self.task_mut(from)?.caps.revoke(handle);
        let moved = transfer.complete();
        let to_handle = match self.task_mut(to)?.caps.insert(moved) {
            Ok(h) => h,
            Err(err) => {
                self.task_mut(from)?.caps.restore(handle, cap)?;
                return Err(err);
            }
        };

        self.capability_audit.record_event(
            self.current_time,
            CapabilityEvent::Transferred {
                from_task: from,
                from_handle: handle,
                to_task: to,
                to_handle,
            },
        );
        log::debug!("moved {handle} of {from} to {to_handle} of {to}");
        Ok(to_handle)
    }

    /// Looks up a handle for a syscall, recording unresolvable handles
    fn resolve(
        &mut self,
        task: TaskId,
        handle: CapHandle,
        operation: &str,
    ) -> Result<Capability, KernelError> {
        let now = self.current_time;
        let info = self.tasks.get(&task).ok_or(KernelError::NoSuchTask(task))?;
        match info.caps.lookup(handle) {
            Some(cap) => Ok(*cap),
            None => {
                self.capability_audit.record_event(
                    now,
                    CapabilityEvent::InvalidUseAttempt {
                        task,
                        handle,
                        operation: operation.to_string(),
                    },
                );
                Err(KernelError::NoCapability(handle))
            }
        }
    }
}

impl KernelApi for SimulatedKernel {
    fn spawn_task(&mut self, descriptor: TaskDescriptor) -> Result<TaskHandle, KernelError> {
        let task_id = TaskId::new();
        log::debug!("spawned {} as {task_id}", descriptor.name);
        self.tasks.insert(
            task_id,
            TaskInfo {
                descriptor,
                caps: CapTable::with_capacity(self.cap_slots),
                space: AddressSpace::new(),
            },
        );
        Ok(TaskHandle::new(task_id))
    }

    fn terminate_task(&mut self, task: TaskId) -> Result<(), KernelError> {
        let mut info = self.tasks.remove(&task).ok_or(KernelError::NoSuchTask(task))?;
        let count = info.caps.clear();
        let unmapped = info.space.unmap_all();
        if self.boot_authority == Some(task) {
            self.boot_authority = None;
        }
        self.capability_audit
            .record_event(self.current_time, CapabilityEvent::Destroyed { owner: task, count });
        log::info!(
            "terminated {} ({task}): {count} capabilities destroyed, {unmapped} pages unmapped",
            info.descriptor.name
        );
        Ok(())
    }

    fn now(&self) -> Instant {
        self.current_time
    }

    fn device_cap_create(
        &mut self,
        caller: TaskId,
        base: PhysAddr,
        len: u64,
    ) -> Result<CapHandle, KernelError> {
        if !self.tasks.contains_key(&caller) {
            return Err(KernelError::NoSuchTask(caller));
        }
        if self.boot_authority != Some(caller) {
            return Err(KernelError::NotBootAuthority(caller));
        }
        self.issue_device_capability(caller, base, len)
    }

    fn cap_transfer(
        &mut self,
        caller: TaskId,
        handle: CapHandle,
        target: TaskId,
    ) -> Result<CapHandle, KernelError> {
        self.transfer_capability(caller, handle, target)
    }

    fn cap_query(&self, caller: TaskId, handle: CapHandle) -> Result<CapQuery, KernelError> {
        let cap = self
            .tasks
            .get(&caller)
            .ok_or(KernelError::NoSuchTask(caller))?
            .caps
            .lookup(handle)
            .ok_or(KernelError::NoCapability(handle))?;
        let (base, len) = cap
            .kind
            .window()
            .map(|(base, len)| (base.as_u64(), len))
            .unwrap_or((0, 0));
        Ok(CapQuery {
            kind_tag: cap.kind.tag(),
            base,
            len,
        })
    }

    fn cap_close(&mut self, caller: TaskId, handle: CapHandle) -> Result<(), KernelError> {
        self.resolve(caller, handle, "cap_close")?;
        self.task_mut(caller)?.caps.revoke(handle);
        self.capability_audit.record_event(
            self.current_time,
            CapabilityEvent::Closed {
                owner: caller,
                handle,
            },
        );
        Ok(())
    }

    fn mmio_map(
        &mut self,
        caller: TaskId,
        request: MmioMapRequest,
    ) -> Result<VirtAddr, KernelError> {
        let handle = request.handle;
        let cap = self.resolve(caller, handle, "mmio_map")?;

        let (base, len) = match cap.kind {
            CapabilityKind::DeviceMmio { base, len } => (base, len),
            other => {
                return Err(KernelError::WrongCapabilityKind {
                    handle,
                    expected: "DeviceMmio",
                    actual: other.name(),
                })
            }
        };
        if !cap.has_rights(Rights::MAP) {
            return Err(KernelError::InsufficientRights {
                handle,
                held: cap.rights,
                required: Rights::MAP,
            });
        }
        if request.prot.contains(PageFlags::EXECUTE) {
            return Err(KernelError::ExecuteDenied);
        }
        if request.offset >= len {
            return Err(KernelError::OutOfWindow {
                offset: request.offset,
                len,
            });
        }
        if !is_page_aligned(request.offset) {
            return Err(KernelError::InvalidArgument(format!(
                "offset {:#x} is not page-aligned",
                request.offset
            )));
        }

        let pa = base + request.offset;
        let va = self
            .task_mut(caller)?
            .space
            .map_page(request.va_hint, pa, PageFlags::DEVICE)?;
        log::debug!("{caller} mapped {pa} at {va} via {handle}");
        Ok(va)
    }
}
