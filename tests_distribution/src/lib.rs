//! Distribution Test Utilities
//!
//! Shared fixtures for end-to-end tests of device distribution.
//!
//! ## Test Philosophy
//!
//! - **No fake success**: A grant is checked in the owner's table, not in a report
//! - **Every refusal tested alone**: Each mapping failure has its own case
//! - **Audit is evidence**: Decisions are checked through the audit trail

use core_types::{DeviceClass, ServiceId, TaskId};
use policy::{DevicePolicy, LocalPolicyClient, Rule, RuleLoadError, RuleSet};
use services_device_manager::{DistributionAuthority, OwnerEntry};
use sim_kernel::test_utils::{booted_kernel, test_registry};
use sim_kernel::SimulatedKernel;

/// Owner entry for `class` without a pinned base
pub fn owner(class: DeviceClass, service: &str) -> OwnerEntry {
    OwnerEntry {
        class,
        service: ServiceId::new(service),
        base: None,
        bringup_exception: false,
    }
}

/// Decision point allowing exactly `rules`
pub fn policy_with(
    version: u32,
    rules: &[(&str, DeviceClass)],
) -> Result<LocalPolicyClient, RuleLoadError> {
    let rules = rules
        .iter()
        .map(|(service, class)| Rule::new(*service, *class))
        .collect();
    let rule_set = RuleSet::new(version, rules)?;
    Ok(LocalPolicyClient::for_device_policy(
        DevicePolicy::from_rule_set(rule_set),
    ))
}

/// A booted kernel over the test registry plus an authority whose services
/// are already running
pub fn distribution_fixture(
    owners: &[OwnerEntry],
) -> (SimulatedKernel, TaskId, DistributionAuthority) {
    let (mut kernel, init) = booted_kernel();
    let registry = test_registry();
    let config = services_device_manager::BootConfig {
        owners: owners.to_vec(),
        ..Default::default()
    };
    let table = match config.owner_table(&registry) {
        Ok(table) => table,
        Err(err) => panic!("invalid fixture owners: {err}"),
    };
    let mut authority = DistributionAuthority::new(init, registry, table);

    let mut services: Vec<ServiceId> = owners.iter().map(|o| o.service.clone()).collect();
    services.sort();
    services.dedup();
    if let Err(err) = authority.spawn_services(&mut kernel, &services) {
        panic!("could not spawn fixture services: {err}");
    }
    (kernel, init, authority)
}
