//! End-to-End Distribution Scenarios
//!
//! One registered window, one legitimate driver, one service that should
//! never see the hardware.

use core_types::{CapHandle, CapabilityKind, DeviceClass, PageFlags, PhysAddr, ServiceId};
use kernel_api::{ErrorKind, KernelApi, MmioMapRequest};
use services_audit::{AuditDecision, AuditQuery, AuditSink, MemoryAuditSink};
use sim_kernel::test_utils::{NET_BASE, NET_LEN};
use tests_distribution::{distribution_fixture, owner, policy_with};

#[test]
fn test_driver_maps_its_window() {
    let (mut kernel, init, mut authority) =
        distribution_fixture(&[owner(DeviceClass::Net, "netstackd")]);
    let policy = policy_with(1, &[("netstackd", DeviceClass::Net)]).unwrap();
    let mut audit = MemoryAuditSink::new();

    let report = authority
        .distribute(&mut kernel, &policy, &mut audit)
        .unwrap();
    let grant = &report.granted[0];
    assert_eq!(grant.window.base, PhysAddr::new(NET_BASE));

    let cap = kernel.lookup(grant.task, grant.handle).unwrap();
    assert_eq!(
        cap.kind,
        CapabilityKind::DeviceMmio {
            base: PhysAddr::new(NET_BASE),
            len: NET_LEN
        }
    );
    assert!(kernel.capabilities(init).is_empty());

    let va = kernel
        .mmio_map(grant.task, MmioMapRequest::new(grant.handle, 0))
        .unwrap();
    let mapping = kernel.translate(grant.task, va).unwrap();
    assert_eq!(mapping.pa, PhysAddr::new(NET_BASE));
    assert_eq!(mapping.flags, PageFlags::USER | PageFlags::READ | PageFlags::WRITE);

    assert_eq!(audit.records().unwrap()[0].decision, AuditDecision::Allow);
}

#[test]
fn test_handle_never_received_is_no_capability() {
    let (mut kernel, _init, mut authority) = distribution_fixture(&[
        owner(DeviceClass::Net, "netstackd"),
        owner(DeviceClass::Blk, "evil"),
    ]);
    let policy = policy_with(1, &[("netstackd", DeviceClass::Net)]).unwrap();
    let mut audit = MemoryAuditSink::new();
    let report = authority
        .distribute(&mut kernel, &policy, &mut audit)
        .unwrap();

    let evil = authority.task_of(&ServiceId::new("evil")).unwrap();
    let stolen = report.granted[0].handle;

    let err = kernel
        .mmio_map(evil, MmioMapRequest::new(stolen, 0))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoCapability);
    for slot in 0..8 {
        let err = kernel
            .mmio_map(evil, MmioMapRequest::new(CapHandle::new(slot), 0))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoCapability);
    }
    assert!(kernel.mappings(evil).is_empty());
}

#[test]
fn test_missing_rule_denies_and_audits() {
    let (mut kernel, _init, mut authority) =
        distribution_fixture(&[owner(DeviceClass::Net, "evil")]);
    let policy = policy_with(1, &[("netstackd", DeviceClass::Net)]).unwrap();
    let mut audit = MemoryAuditSink::new();

    let report = authority
        .distribute(&mut kernel, &policy, &mut audit)
        .unwrap();
    assert!(report.granted.is_empty());

    let evil = authority.task_of(&ServiceId::new("evil")).unwrap();
    assert!(kernel.capabilities(evil).is_empty());

    let denies = audit
        .query(&AuditQuery::new().service("evil").decision(AuditDecision::Deny))
        .unwrap();
    assert_eq!(denies.len(), 1);
    assert_eq!(denies[0].device_class, DeviceClass::Net);
    assert!(!denies[0].reason.trim().is_empty());
}

#[test]
fn test_offset_at_window_end_is_out_of_window() {
    let (mut kernel, _init, mut authority) =
        distribution_fixture(&[owner(DeviceClass::Net, "netstackd")]);
    let policy = policy_with(1, &[("netstackd", DeviceClass::Net)]).unwrap();
    let report = authority
        .distribute(&mut kernel, &policy, &mut MemoryAuditSink::new())
        .unwrap();
    let grant = &report.granted[0];

    let err = kernel
        .mmio_map(grant.task, MmioMapRequest::new(grant.handle, NET_LEN))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::OutOfWindow);
    assert!(kernel.mappings(grant.task).is_empty());
}

#[test]
fn test_executable_request_denied_despite_map_right() {
    let (mut kernel, _init, mut authority) =
        distribution_fixture(&[owner(DeviceClass::Net, "netstackd")]);
    let policy = policy_with(1, &[("netstackd", DeviceClass::Net)]).unwrap();
    let report = authority
        .distribute(&mut kernel, &policy, &mut MemoryAuditSink::new())
        .unwrap();
    let grant = &report.granted[0];
    assert!(kernel
        .lookup(grant.task, grant.handle)
        .unwrap()
        .has_rights(core_types::Rights::MAP));

    let err = kernel
        .mmio_map(grant.task, MmioMapRequest::new(grant.handle, 0).executable())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ExecuteDenied);
    assert!(kernel.mappings(grant.task).is_empty());
}
