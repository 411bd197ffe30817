//! # Device Distribution Authority
//!
//! Decides at boot which single service receives each registered device
//! window, and drives the kernel to hand the capability over.
//!
//! ## Philosophy
//!
//! - The registry is passed in; there is no ambient device list.
//! - Owners come from the boot configuration, decisions from the policy
//!   decision point, capabilities from the kernel. This crate only connects them.
//! - Every consultation of the decision point leaves an audit record, and an
//!   `Allow` record is written only after the capability actually arrived.

pub mod config;

pub use config::{BootConfig, BootError, ConfigAddr, DeviceEntry, Owner, OwnerEntry, OwnerTable};

use core_types::{CapHandle, DeviceWindow, ServiceId, TaskId};
use kernel_api::{KernelApi, KernelError, TaskDescriptor};
use policy::{PolicyClient, PolicyDecision, PolicyRequest};
use serde::{Deserialize, Serialize};
use services_audit::{next_sequence, AuditError, AuditSink, DistributionRecord};
use sim_kernel::DeviceWindowRegistry;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeviceManagerError {
    #[error("Devices were already distributed")]
    AlreadyDistributed,

    #[error("Audit trail unavailable, distribution stopped: {0}")]
    Audit(#[from] AuditError),

    #[error("Kernel error: {0}")]
    Kernel(#[from] KernelError),
}

/// Why an allowed capability did not reach its owner
#[derive(Debug, Error)]
pub enum HandoffError {
    #[error("{0} is not running")]
    ServiceNotRunning(ServiceId),

    #[error(transparent)]
    Kernel(#[from] KernelError),
}

/// A capability that reached its owner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    pub window: DeviceWindow,
    pub service: ServiceId,
    pub task: TaskId,
    /// Handle in the owner's capability table
    pub handle: CapHandle,
}

/// A window that was not handed out
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Denial {
    pub window: DeviceWindow,
    pub service: ServiceId,
    pub reason: String,
}

/// Outcome of one distribution pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionReport {
    pub granted: Vec<Grant>,
    pub denied: Vec<Denial>,
    /// Windows with no configured owner; no policy was consulted for them
    pub skipped: Vec<DeviceWindow>,
}

impl DistributionReport {
    /// Grants received by `service`
    pub fn granted_to<'a>(&'a self, service: &'a ServiceId) -> impl Iterator<Item = &'a Grant> {
        self.granted.iter().filter(move |g| &g.service == service)
    }

    pub fn decisions(&self) -> usize {
        self.granted.len() + self.denied.len()
    }
}

/// Boot-time distribution authority
///
/// Runs inside the boot authority task; `authority` is that task's id and is
/// the only caller the kernel accepts for `device_cap_create`.
pub struct DistributionAuthority {
    authority: TaskId,
    registry: DeviceWindowRegistry,
    owners: OwnerTable,
    services: BTreeMap<ServiceId, TaskId>,
    distributed: bool,
}

impl DistributionAuthority {
    pub fn new(authority: TaskId, registry: DeviceWindowRegistry, owners: OwnerTable) -> Self {
        Self {
            authority,
            registry,
            owners,
            services: BTreeMap::new(),
            distributed: false,
        }
    }

    /// Records that `service` runs as `task`
    pub fn register_service(&mut self, service: ServiceId, task: TaskId) {
        self.services.insert(service, task);
    }

    /// Spawns each service and registers its task
    pub fn spawn_services(
        &mut self,
        kernel: &mut dyn KernelApi,
        services: &[ServiceId],
    ) -> Result<(), DeviceManagerError> {
        for service in services {
            let handle = kernel.spawn_task(TaskDescriptor::for_service(service.clone()))?;
            log::info!("started {service} as {}", handle.task_id);
            self.register_service(service.clone(), handle.task_id);
        }
        Ok(())
    }

    pub fn task_of(&self, service: &ServiceId) -> Option<TaskId> {
        self.services.get(service).copied()
    }

    /// Runs the distribution pass once
    ///
    /// Windows are visited in registry order. The decision point is consulted
    /// for each owned window; an unreachable decision point counts as `Deny`.
    /// Stops with an error if the audit sink refuses a record.
    pub fn distribute(
        &mut self,
        kernel: &mut dyn KernelApi,
        policy: &dyn PolicyClient,
        audit: &mut dyn AuditSink,
    ) -> Result<DistributionReport, DeviceManagerError> {
        if self.distributed {
            return Err(DeviceManagerError::AlreadyDistributed);
        }
        self.distributed = true;

        let mut last = audit.records()?.last().map(|r| r.sequence);
        let mut report = DistributionReport::default();
        let windows: Vec<DeviceWindow> = self.registry.iter().copied().collect();

        for window in windows {
            let Some(owner) = self.owners.owner_of(&window).cloned() else {
                log::info!("{window} has no configured owner; skipped");
                report.skipped.push(window);
                continue;
            };
            let sequence = next_sequence(last)?;
            if owner.bringup_exception {
                log::warn!("{window} -> {} under bring-up exception", owner.service);
            }

            let request = PolicyRequest::new(owner.service.clone(), window.class);
            let fingerprint = policy.fingerprint();
            let decision = policy.check(&request).unwrap_or_else(|err| {
                log::warn!("{request}: {err}; failing closed");
                PolicyDecision::deny(err.to_string())
            });

            let timestamp = kernel.now();
            let record = match decision {
                PolicyDecision::Allow => match self.hand_off(kernel, &window, &owner.service) {
                    Ok((task, handle)) => {
                        log::info!("{window} -> {} ({handle})", owner.service);
                        report.granted.push(Grant {
                            window,
                            service: owner.service.clone(),
                            task,
                            handle,
                        });
                        DistributionRecord::allow(sequence, timestamp, owner.service, window.class)
                    }
                    Err(err) => {
                        let reason = format!("handoff failed: {err}");
                        log::warn!("{window} -> {}: {reason}", owner.service);
                        report.denied.push(Denial {
                            window,
                            service: owner.service.clone(),
                            reason: reason.clone(),
                        });
                        DistributionRecord::deny(
                            sequence,
                            timestamp,
                            owner.service,
                            window.class,
                            reason,
                        )
                    }
                },
                PolicyDecision::Deny { reason } => {
                    log::info!("{window} denied to {}: {reason}", owner.service);
                    report.denied.push(Denial {
                        window,
                        service: owner.service.clone(),
                        reason: reason.clone(),
                    });
                    DistributionRecord::deny(sequence, timestamp, owner.service, window.class, reason)
                }
            };
            let record = match fingerprint {
                Some(fp) => record.with_policy(fp.version, fp.digest),
                None => record,
            };

            audit.append(record)?;
            last = Some(sequence);
        }

        Ok(report)
    }

    /// Mints the window into the authority's own table and moves it to the owner
    fn hand_off(
        &self,
        kernel: &mut dyn KernelApi,
        window: &DeviceWindow,
        service: &ServiceId,
    ) -> Result<(TaskId, CapHandle), HandoffError> {
        let task = self
            .task_of(service)
            .ok_or_else(|| HandoffError::ServiceNotRunning(service.clone()))?;
        let minted = kernel.device_cap_create(self.authority, window.base, window.len)?;
        match kernel.cap_transfer(self.authority, minted, task) {
            Ok(handle) => Ok((task, handle)),
            Err(err) => {
                if let Err(close_err) = kernel.cap_close(self.authority, minted) {
                    log::warn!("could not drop undelivered {minted}: {close_err}");
                }
                Err(err.into())
            }
        }
    }
}
