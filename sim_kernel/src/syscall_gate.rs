//! Syscall gate for the device capability surface.
//!
//! Every capability syscall a user task makes passes through this gate. It
//! decodes raw register arguments, dispatches to the [`KernelApi`], and keeps
//! an audit trail of invocations, completions and rejections.

use core_types::TaskId;
use kernel_api::{
    ErrorKind, KernelApi, KernelError, RawSyscall, Syscall, SyscallReturn, SyscallValue,
};
use serde::{Deserialize, Serialize};

/// Syscall audit event (for testing and verification).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyscallEvent {
    /// Syscall was invoked
    Invoked {
        caller: TaskId,
        syscall_name: String,
        timestamp_nanos: u64,
    },
    /// Syscall completed successfully
    Completed {
        caller: TaskId,
        syscall_name: String,
        timestamp_nanos: u64,
    },
    /// Syscall was rejected
    Rejected {
        caller: TaskId,
        syscall_name: String,
        kind: ErrorKind,
        timestamp_nanos: u64,
    },
}

/// Audit log for syscall operations.
#[derive(Debug, Clone, Default)]
pub struct SyscallAuditLog {
    events: Vec<SyscallEvent>,
}

impl SyscallAuditLog {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    pub fn record(&mut self, event: SyscallEvent) {
        self.events.push(event);
    }

    pub fn events(&self) -> &[SyscallEvent] {
        &self.events
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn has_event<F>(&self, predicate: F) -> bool
    where
        F: Fn(&SyscallEvent) -> bool,
    {
        self.events.iter().any(predicate)
    }

    pub fn count_events<F>(&self, predicate: F) -> usize
    where
        F: Fn(&SyscallEvent) -> bool,
    {
        self.events.iter().filter(|e| predicate(e)).count()
    }
}

/// Entry point from user space into the kernel's capability operations.
#[derive(Debug, Default)]
pub struct SyscallGate {
    audit_log: SyscallAuditLog,
}

impl SyscallGate {
    pub fn new() -> Self {
        Self {
            audit_log: SyscallAuditLog::new(),
        }
    }

    pub fn audit_log(&self) -> &SyscallAuditLog {
        &self.audit_log
    }

    pub fn clear_audit_log(&mut self) {
        self.audit_log.clear();
    }

    /// Executes a typed syscall on behalf of `caller`.
    pub fn execute(
        &mut self,
        kernel: &mut dyn KernelApi,
        caller: TaskId,
        syscall: Syscall,
    ) -> Result<SyscallValue, KernelError> {
        let syscall_name = syscall.name().to_string();
        let timestamp_nanos = kernel.now().as_nanos();

        self.audit_log.record(SyscallEvent::Invoked {
            caller,
            syscall_name: syscall_name.clone(),
            timestamp_nanos,
        });

        let result = match syscall {
            Syscall::MmioMap(request) => kernel
                .mmio_map(caller, request)
                .map(SyscallValue::Address),
            Syscall::CapQuery { handle } => {
                kernel.cap_query(caller, handle).map(SyscallValue::Query)
            }
            Syscall::CapClose { handle } => {
                kernel.cap_close(caller, handle).map(|_| SyscallValue::Unit)
            }
            Syscall::DeviceCapCreate { base, len } => kernel
                .device_cap_create(caller, base, len)
                .map(SyscallValue::Handle),
            Syscall::CapTransfer { handle, target } => kernel
                .cap_transfer(caller, handle, target)
                .map(SyscallValue::Handle),
        };

        match &result {
            Ok(_) => self.audit_log.record(SyscallEvent::Completed {
                caller,
                syscall_name,
                timestamp_nanos,
            }),
            Err(err) => {
                log::warn!("{syscall_name} from {caller} rejected: {err}");
                self.audit_log.record(SyscallEvent::Rejected {
                    caller,
                    syscall_name,
                    kind: err.kind(),
                    timestamp_nanos,
                });
            }
        }

        result
    }

    /// Decodes and executes a register-level syscall.
    ///
    /// Undecodable syscalls are recorded as rejected under the name `"invalid"`.
    pub fn execute_raw(
        &mut self,
        kernel: &mut dyn KernelApi,
        caller: TaskId,
        raw: RawSyscall,
    ) -> SyscallReturn {
        let result = match Syscall::decode(&raw) {
            Ok(syscall) => self.execute(kernel, caller, syscall),
            Err(err) => {
                self.audit_log.record(SyscallEvent::Rejected {
                    caller,
                    syscall_name: "invalid".to_string(),
                    kind: err.kind(),
                    timestamp_nanos: kernel.now().as_nanos(),
                });
                Err(err)
            }
        };
        SyscallReturn::from_result(&result)
    }
}
