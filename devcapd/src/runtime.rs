//! # Host Runtime
//!
//! One boot: configuration, kernel, services, distribution, probes.

use crate::args::HostArgs;
use core_types::{DeviceWindow, ServiceId, VirtAddr};
use kernel_api::{KernelError, MmioMapRequest, Syscall, SyscallValue, TaskDescriptor};
use services_audit::{AuditError, AuditSink, JsonLinesAuditSink, MemoryAuditSink};
use services_device_manager::{
    BootConfig, BootError, DeviceManagerError, DistributionAuthority, DistributionReport,
};
use sim_kernel::{SimulatedKernel, SyscallGate};
use std::fs;
use thiserror::Error;

/// Layout used when no configuration file is given
const DEFAULT_CONFIG: &str = include_str!("../config/qemu_virt.json");

const AUTHORITY_NAME: &str = "devcap-authority";

#[derive(Debug, Error)]
pub enum HostRuntimeError {
    #[error("Cannot read configuration: {0}")]
    ConfigRead(String),

    #[error("Boot configuration error: {0}")]
    Boot(#[from] BootError),

    #[error("Audit error: {0}")]
    Audit(#[from] AuditError),

    #[error("Kernel error: {0}")]
    Kernel(#[from] KernelError),

    #[error("Distribution error: {0}")]
    Distribution(#[from] DeviceManagerError),
}

/// Result of mapping the first page of a granted window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub service: ServiceId,
    pub window: DeviceWindow,
    pub result: Result<VirtAddr, KernelError>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostReport {
    pub distribution: DistributionReport,
    pub probes: Vec<ProbeOutcome>,
}

impl HostReport {
    /// Human-readable summary, one line per window
    pub fn summary(&self) -> Vec<String> {
        let mut lines = Vec::new();
        for grant in &self.distribution.granted {
            lines.push(format!("granted {} -> {}", grant.window, grant.service));
        }
        for denial in &self.distribution.denied {
            lines.push(format!(
                "denied  {} -> {}: {}",
                denial.window, denial.service, denial.reason
            ));
        }
        for window in &self.distribution.skipped {
            lines.push(format!("skipped {window}: no owner"));
        }
        for probe in &self.probes {
            match &probe.result {
                Ok(va) => lines.push(format!("probe   {} mapped at {va}", probe.service)),
                Err(err) => lines.push(format!("probe   {} failed: {err}", probe.service)),
            }
        }
        lines
    }
}

pub struct HostRuntime {
    args: HostArgs,
    config: BootConfig,
    kernel: SimulatedKernel,
    gate: SyscallGate,
}

impl HostRuntime {
    /// Loads and validates the configuration named by `args`
    pub fn new(args: HostArgs) -> Result<Self, HostRuntimeError> {
        let text = match &args.config {
            Some(path) => fs::read_to_string(path)
                .map_err(|err| HostRuntimeError::ConfigRead(format!("{}: {err}", path.display())))?,
            None => DEFAULT_CONFIG.to_string(),
        };
        let config = BootConfig::from_json(&text)?;
        Self::with_config(args, config)
    }

    pub fn with_config(args: HostArgs, config: BootConfig) -> Result<Self, HostRuntimeError> {
        config.validate()?;
        let kernel = SimulatedKernel::with_registry(config.registry()?);
        Ok(Self {
            args,
            config,
            kernel,
            gate: SyscallGate::new(),
        })
    }

    pub fn kernel(&self) -> &SimulatedKernel {
        &self.kernel
    }

    pub fn gate(&self) -> &SyscallGate {
        &self.gate
    }

    /// Boots the authority and services, distributes, then probes if asked
    pub fn run(&mut self) -> Result<HostReport, HostRuntimeError> {
        let mut sink: Box<dyn AuditSink> = match &self.args.audit_out {
            Some(path) => Box::new(JsonLinesAuditSink::open(path)?),
            None => Box::new(MemoryAuditSink::new()),
        };

        let authority = self
            .kernel
            .spawn_boot_authority(TaskDescriptor::new(AUTHORITY_NAME))?
            .task_id;
        let registry = self.kernel.registry().clone();
        let owners = self.config.owner_table(&registry)?;
        let mut distributor = DistributionAuthority::new(authority, registry, owners);
        distributor.spawn_services(&mut self.kernel, &self.config.services)?;

        let policy = self.config.policy_client();
        let distribution = distributor.distribute(&mut self.kernel, &policy, sink.as_mut())?;
        log::info!(
            "distribution complete: {} granted, {} denied, {} skipped",
            distribution.granted.len(),
            distribution.denied.len(),
            distribution.skipped.len()
        );

        let probes = if self.args.probe {
            self.probe(&distribution)
        } else {
            Vec::new()
        };

        Ok(HostReport {
            distribution,
            probes,
        })
    }

    /// Maps offset zero of every grant through the syscall gate, as its owner
    fn probe(&mut self, distribution: &DistributionReport) -> Vec<ProbeOutcome> {
        distribution
            .granted
            .iter()
            .map(|grant| {
                let result = self
                    .gate
                    .execute(
                        &mut self.kernel,
                        grant.task,
                        Syscall::MmioMap(MmioMapRequest::new(grant.handle, 0)),
                    )
                    .and_then(|value| match value {
                        SyscallValue::Address(va) => Ok(va),
                        other => Err(KernelError::InvalidArgument(format!(
                            "unexpected mmio_map result {other:?}"
                        ))),
                    });
                ProbeOutcome {
                    service: grant.service.clone(),
                    window: grant.window,
                    result,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::DeviceClass;

    #[test]
    fn test_default_layout_grants_everything() {
        let mut runtime = HostRuntime::new(HostArgs::default()).unwrap();
        let report = runtime.run().unwrap();
        assert_eq!(report.distribution.granted.len(), 3);
        assert!(report.distribution.denied.is_empty());
        assert!(report.probes.is_empty());
    }

    #[test]
    fn test_probe_maps_each_grant() {
        let args = HostArgs {
            probe: true,
            ..HostArgs::default()
        };
        let mut runtime = HostRuntime::new(args).unwrap();
        let report = runtime.run().unwrap();

        assert_eq!(report.probes.len(), 3);
        for probe in &report.probes {
            let va = probe.result.clone().unwrap();
            let task = runtime
                .kernel()
                .task_by_service(&probe.service)
                .unwrap();
            let mapping = runtime.kernel().translate(task, va).unwrap();
            assert_eq!(mapping.pa, probe.window.base);
        }
        assert_eq!(runtime.gate().audit_log().events().len(), 6);
    }

    #[test]
    fn test_missing_policy_denies_everything() {
        let mut config = BootConfig::from_json(DEFAULT_CONFIG).unwrap();
        config.policy = None;
        let mut runtime = HostRuntime::with_config(HostArgs::default(), config).unwrap();
        let report = runtime.run().unwrap();

        assert!(report.distribution.granted.is_empty());
        assert_eq!(report.distribution.denied.len(), 3);
        let rng = report
            .distribution
            .denied
            .iter()
            .find(|d| d.window.class == DeviceClass::Rng)
            .unwrap();
        assert!(!rng.reason.is_empty());
    }

    #[test]
    fn test_summary_lines() {
        let mut runtime = HostRuntime::new(HostArgs::default()).unwrap();
        let report = runtime.run().unwrap();
        let summary = report.summary();
        assert_eq!(summary.len(), 3);
        assert!(summary[0].starts_with("granted"));
    }
}
