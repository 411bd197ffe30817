//! Capability Audit Trail
//!
//! Audit logging for capability operations in simulation mode. Every issue,
//! transfer, revoke and rejected use is recorded in order so tests can assert
//! on security properties after the fact.
//!
//! ## Example
//!
//! ```
//! use sim_kernel::capability_audit::CapabilityAuditLog;
//! use core_types::{CapHandle, CapabilityEvent, TaskId};
//! use kernel_api::Instant;
//!
//! let mut audit_log = CapabilityAuditLog::new();
//! let task = TaskId::new();
//!
//! audit_log.record_event(
//!     Instant::from_nanos(1000),
//!     CapabilityEvent::Closed { owner: task, handle: CapHandle::new(0) },
//! );
//!
//! assert_eq!(audit_log.events_for_task(task).len(), 1);
//! ```

use core_types::{CapabilityEvent, TaskId};
use kernel_api::Instant;

/// A single audit event with timestamp
#[derive(Debug, Clone)]
pub struct CapabilityAuditEvent {
    /// Simulated time when the event occurred
    pub timestamp: Instant,
    /// The capability event that occurred
    pub event: CapabilityEvent,
}

/// Audit log for capability operations
#[derive(Debug, Default)]
pub struct CapabilityAuditLog {
    events: Vec<CapabilityAuditEvent>,
}

impl CapabilityAuditLog {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    /// Records a capability event at the specified time
    pub fn record_event(&mut self, timestamp: Instant, event: CapabilityEvent) {
        self.events.push(CapabilityAuditEvent { timestamp, event });
    }

    /// Returns all recorded events
    pub fn events(&self) -> &[CapabilityAuditEvent] {
        &self.events
    }

    /// Returns events concerning a task (as owner, sender or receiver)
    pub fn events_for_task(&self, task: TaskId) -> Vec<&CapabilityAuditEvent> {
        self.events
            .iter()
            .filter(|e| match &e.event {
                CapabilityEvent::Transferred {
                    from_task, to_task, ..
                } => *from_task == task || *to_task == task,
                other => other.task() == task,
            })
            .collect()
    }

    /// Counts events matching a predicate
    pub fn count_events<F>(&self, predicate: F) -> usize
    where
        F: Fn(&CapabilityEvent) -> bool,
    {
        self.events.iter().filter(|e| predicate(&e.event)).count()
    }

    /// Checks if any event matches the predicate
    pub fn has_event<F>(&self, predicate: F) -> bool
    where
        F: Fn(&CapabilityEvent) -> bool,
    {
        self.events.iter().any(|e| predicate(&e.event))
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::{CapHandle, CapabilityKind, PhysAddr};

    fn issued(owner: TaskId) -> CapabilityEvent {
        CapabilityEvent::Issued {
            owner,
            handle: CapHandle::new(0),
            kind: CapabilityKind::DeviceMmio {
                base: PhysAddr::new(0x1000_0000),
                len: 0x1000,
            },
        }
    }

    #[test]
    fn test_audit_log_creation() {
        let log = CapabilityAuditLog::new();
        assert!(log.is_empty());
    }

    #[test]
    fn test_events_for_task_includes_transfer_receiver() {
        let mut log = CapabilityAuditLog::new();
        let init = TaskId::new();
        let driver = TaskId::new();

        log.record_event(Instant::from_nanos(1), issued(init));
        log.record_event(
            Instant::from_nanos(2),
            CapabilityEvent::Transferred {
                from_task: init,
                from_handle: CapHandle::new(0),
                to_task: driver,
                to_handle: CapHandle::new(0),
            },
        );

        assert_eq!(log.events_for_task(init).len(), 2);
        assert_eq!(log.events_for_task(driver).len(), 1);
        assert_eq!(log.events_for_task(TaskId::new()).len(), 0);
    }

    #[test]
    fn test_count_and_has_event() {
        let mut log = CapabilityAuditLog::new();
        let task = TaskId::new();
        log.record_event(Instant::from_nanos(1), issued(task));
        log.record_event(
            Instant::from_nanos(2),
            CapabilityEvent::Revoked {
                owner: task,
                handle: CapHandle::new(0),
            },
        );

        assert_eq!(
            log.count_events(|e| matches!(e, CapabilityEvent::Issued { .. })),
            1
        );
        assert!(log.has_event(|e| matches!(e, CapabilityEvent::Revoked { .. })));
        assert!(!log.has_event(|e| matches!(e, CapabilityEvent::Destroyed { .. })));
        assert_eq!(log.events()[1].timestamp, Instant::from_nanos(2));
    }
}
