//! Kernel API trait and task management types

use crate::{Instant, KernelError};
use core_types::{CapHandle, PageFlags, PhysAddr, ServiceId, TaskId, VirtAddr};
use serde::{Deserialize, Serialize};

/// Descriptor for creating a new task
///
/// Tasks are constructed, not forked: a new task starts with an empty
/// capability table and an empty address space.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDescriptor {
    /// Human-readable name for debugging
    pub name: String,
    /// Service this task runs, if any
    pub service: Option<ServiceId>,
}

impl TaskDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            service: None,
        }
    }

    /// Descriptor for a service task; the task name is the service name
    pub fn for_service(service: ServiceId) -> Self {
        Self {
            name: service.as_str().to_string(),
            service: Some(service),
        }
    }
}

/// Handle to a spawned task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskHandle {
    pub task_id: TaskId,
}

impl TaskHandle {
    pub fn new(task_id: TaskId) -> Self {
        Self { task_id }
    }
}

/// Arguments of the MMIO mapping syscall
///
/// `va_hint` of zero asks the kernel to choose the virtual address.
/// `prot` is the access the caller asks for; the resulting mapping is
/// always `USER | READ | WRITE` and any request containing `EXECUTE` is
/// rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MmioMapRequest {
    pub handle: CapHandle,
    pub va_hint: VirtAddr,
    pub offset: u64,
    pub prot: PageFlags,
}

impl MmioMapRequest {
    /// Read/write request at a kernel-chosen address
    pub fn new(handle: CapHandle, offset: u64) -> Self {
        Self {
            handle,
            va_hint: VirtAddr::new(0),
            offset,
            prot: PageFlags::READ | PageFlags::WRITE,
        }
    }

    /// Places the mapping at `va`
    pub fn at(mut self, va: VirtAddr) -> Self {
        self.va_hint = va;
        self
    }

    /// Asks for an executable mapping (always denied)
    pub fn executable(mut self) -> Self {
        self.prot |= PageFlags::EXECUTE;
        self
    }
}

/// Result of the capability query syscall
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapQuery {
    /// Kind tag (`1 = Vmo`, `2 = DeviceMmio`, `3 = Endpoint`, `4 = Irq`)
    pub kind_tag: u32,
    /// Physical base, zero for kinds without a window
    pub base: u64,
    /// Window length, zero for kinds without a window
    pub len: u64,
}

/// The kernel API trait
///
/// This is the surface userspace services use, with the calling task made
/// explicit. Multiple implementations are possible:
/// - Simulated kernel (for testing and the host daemon)
/// - Real kernel (syscalls)
///
/// # Design Principles
///
/// **Explicit caller**: every operation names the task on whose behalf it
/// runs; handles are resolved in that task's table only.
///
/// **No ambient device access**: device memory is reachable only through a
/// `DeviceMmio` capability and the mapping syscall.
///
/// **Move, don't share**: capability transfer empties the sender's slot.
///
/// # Example
///
/// ```
/// use kernel_api::{KernelApi, MmioMapRequest};
/// use core_types::{CapHandle, TaskId};
///
/// fn map_first_page<K: KernelApi>(kernel: &mut K, me: TaskId, cap: CapHandle) -> Result<u64, kernel_api::KernelError> {
///     let va = kernel.mmio_map(me, MmioMapRequest::new(cap, 0))?;
///     Ok(va.as_u64())
/// }
/// ```
pub trait KernelApi {
    /// Spawns a new task with an empty capability table
    fn spawn_task(&mut self, descriptor: TaskDescriptor) -> Result<TaskHandle, KernelError>;

    /// Terminates a task, destroying its capabilities and mappings
    fn terminate_task(&mut self, task: TaskId) -> Result<(), KernelError>;

    /// Returns the current kernel time
    fn now(&self) -> Instant;

    /// Mints a `DeviceMmio` capability for a registered window into the
    /// caller's table (boot authority only)
    fn device_cap_create(
        &mut self,
        caller: TaskId,
        base: PhysAddr,
        len: u64,
    ) -> Result<CapHandle, KernelError>;

    /// Moves a capability from the caller's table into `target`'s table
    ///
    /// Returns the handle in the target's table.
    fn cap_transfer(
        &mut self,
        caller: TaskId,
        handle: CapHandle,
        target: TaskId,
    ) -> Result<CapHandle, KernelError>;

    /// Describes a capability held by the caller
    fn cap_query(&self, caller: TaskId, handle: CapHandle) -> Result<CapQuery, KernelError>;

    /// Drops one of the caller's handles
    fn cap_close(&mut self, caller: TaskId, handle: CapHandle) -> Result<(), KernelError>;

    /// Maps one page of a device window into the caller's address space
    ///
    /// On success the page is `USER | READ | WRITE`, never executable, and
    /// lies within the capability's window.
    fn mmio_map(&mut self, caller: TaskId, request: MmioMapRequest)
        -> Result<VirtAddr, KernelError>;
}
