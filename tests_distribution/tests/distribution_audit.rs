//! Distribution Decision and Audit Tests
//!
//! Validates the decision point and the audit trail around it:
//! - Identical requests get identical answers
//! - Records are strictly ordered and written only after the outcome is known
//! - Failures of the decision point, the hand-off or the sink never grant

use core_types::{CapabilityKind, DeviceClass, Rights, ServiceId};
use kernel_api::{KernelApi, TaskDescriptor};
use policy::{DevicePolicy, PolicyClient, PolicyRequest, UnreachablePolicyClient};
use services_audit::{AuditDecision, AuditError, AuditSink, JsonLinesAuditSink, MemoryAuditSink};
use services_device_manager::{BootConfig, DeviceManagerError, DistributionAuthority};
use sim_kernel::test_utils::test_registry;
use sim_kernel::SimulatedKernel;
use tempfile::tempdir;
use tests_distribution::{distribution_fixture, owner, policy_with};

const RULES: &str = r#"{
    "version": 7,
    "rules": [
        {"service": "virtioblkd", "class": "blk"},
        {"service": "netstackd", "class": "net"}
    ]
}"#;

#[test]
fn test_decision_point_is_deterministic() {
    let first = DevicePolicy::from_json(RULES).unwrap();
    let second = DevicePolicy::from_json(RULES).unwrap();
    assert_eq!(
        first.rule_set().fingerprint(),
        second.rule_set().fingerprint()
    );

    let client = policy_with(7, &[("netstackd", DeviceClass::Net)]).unwrap();
    for service in ["netstackd", "evil", "virtioblkd"] {
        for class in [DeviceClass::Net, DeviceClass::Blk, DeviceClass::Rng] {
            let request = PolicyRequest::new(ServiceId::new(service), class);
            let a = client.check(&request).unwrap();
            let b = client.check(&request).unwrap();
            assert_eq!(a, b, "{request}");
        }
    }
}

#[test]
fn test_records_follow_registry_order() {
    let (mut kernel, _init, mut authority) = distribution_fixture(&[
        owner(DeviceClass::Rng, "rngd"),
        owner(DeviceClass::Blk, "virtioblkd"),
        owner(DeviceClass::Net, "netstackd"),
    ]);
    let policy = policy_with(
        2,
        &[
            ("netstackd", DeviceClass::Net),
            ("rngd", DeviceClass::Rng),
        ],
    )
    .unwrap();
    let mut audit = MemoryAuditSink::new();
    authority
        .distribute(&mut kernel, &policy, &mut audit)
        .unwrap();

    let records = audit.records().unwrap();
    let classes: Vec<DeviceClass> = records.iter().map(|r| r.device_class).collect();
    assert_eq!(
        classes,
        vec![DeviceClass::Net, DeviceClass::Blk, DeviceClass::Rng]
    );
    assert!(records.windows(2).all(|w| w[0].sequence < w[1].sequence));
    assert!(records.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    assert_eq!(records[1].decision, AuditDecision::Deny);
}

#[test]
fn test_sink_rejects_out_of_order_records() {
    let mut audit = MemoryAuditSink::new();
    let (mut kernel, _init, mut authority) =
        distribution_fixture(&[owner(DeviceClass::Net, "netstackd")]);
    let policy = policy_with(1, &[("netstackd", DeviceClass::Net)]).unwrap();
    authority
        .distribute(&mut kernel, &policy, &mut audit)
        .unwrap();

    let stale = audit.records().unwrap()[0].clone();
    assert!(matches!(
        audit.append(stale),
        Err(AuditError::OutOfOrder { last: 0, got: 0 })
    ));
}

#[test]
fn test_unreachable_decision_point_denies() {
    let (mut kernel, _init, mut authority) =
        distribution_fixture(&[owner(DeviceClass::Net, "netstackd")]);
    let mut audit = MemoryAuditSink::new();

    let report = authority
        .distribute(
            &mut kernel,
            &UnreachablePolicyClient::new("decision point offline"),
            &mut audit,
        )
        .unwrap();

    assert!(report.granted.is_empty());
    let netstackd = authority.task_of(&ServiceId::new("netstackd")).unwrap();
    assert!(kernel.capabilities(netstackd).is_empty());

    let record = &audit.records().unwrap()[0];
    assert_eq!(record.decision, AuditDecision::Deny);
    assert!(record.reason.contains("decision point offline"));
}

#[test]
fn test_failed_handoff_is_recorded_as_deny() {
    let mut kernel = SimulatedKernel::with_registry(test_registry()).with_cap_slots(1);
    let init = kernel
        .spawn_boot_authority(TaskDescriptor::new("init"))
        .unwrap()
        .task_id;
    let netstackd = kernel
        .spawn_task(TaskDescriptor::for_service(ServiceId::new("netstackd")))
        .unwrap()
        .task_id;
    // Fill the owner's only slot
    kernel
        .grant_capability(netstackd, CapabilityKind::Endpoint(1), Rights::SEND)
        .unwrap();

    let registry = test_registry();
    let config = BootConfig {
        owners: vec![owner(DeviceClass::Net, "netstackd")],
        ..BootConfig::default()
    };
    let owners = config.owner_table(&registry).unwrap();
    let mut authority = DistributionAuthority::new(init, registry, owners);
    authority.register_service(ServiceId::new("netstackd"), netstackd);

    let mut audit = MemoryAuditSink::new();
    let policy = policy_with(1, &[("netstackd", DeviceClass::Net)]).unwrap();
    let report = authority
        .distribute(&mut kernel, &policy, &mut audit)
        .unwrap();

    assert!(report.granted.is_empty());
    let record = &audit.records().unwrap()[0];
    assert_eq!(record.decision, AuditDecision::Deny);
    assert!(record.reason.starts_with("handoff failed"));
    // Neither side is left holding the window
    assert!(kernel.capabilities(init).is_empty());
    assert_eq!(kernel.capabilities(netstackd).len(), 1);
}

#[test]
fn test_full_sink_stops_distribution() {
    let (mut kernel, _init, mut authority) = distribution_fixture(&[
        owner(DeviceClass::Net, "netstackd"),
        owner(DeviceClass::Blk, "virtioblkd"),
        owner(DeviceClass::Rng, "rngd"),
    ]);
    let policy = policy_with(
        1,
        &[
            ("netstackd", DeviceClass::Net),
            ("virtioblkd", DeviceClass::Blk),
            ("rngd", DeviceClass::Rng),
        ],
    )
    .unwrap();
    let mut audit = MemoryAuditSink::with_capacity(1);

    let err = authority
        .distribute(&mut kernel, &policy, &mut audit)
        .unwrap_err();
    assert!(matches!(
        err,
        DeviceManagerError::Audit(AuditError::StorageUnavailable(_))
    ));
    assert_eq!(audit.len(), 1);

    // Windows after the failed record are never consulted
    let rngd = authority.task_of(&ServiceId::new("rngd")).unwrap();
    assert!(kernel.capabilities(rngd).is_empty());
    assert!(matches!(
        authority.distribute(&mut kernel, &policy, &mut audit),
        Err(DeviceManagerError::AlreadyDistributed)
    ));
}

#[test]
fn test_file_trail_matches_report() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("distribution.jsonl");
    let (mut kernel, _init, mut authority) = distribution_fixture(&[
        owner(DeviceClass::Net, "netstackd"),
        owner(DeviceClass::Blk, "evil"),
    ]);
    let policy = policy_with(4, &[("netstackd", DeviceClass::Net)]).unwrap();
    let fingerprint = policy.fingerprint().unwrap();

    let report = {
        let mut sink = JsonLinesAuditSink::open(&path).unwrap();
        authority
            .distribute(&mut kernel, &policy, &mut sink)
            .unwrap()
    };

    let records = JsonLinesAuditSink::open(&path)
        .unwrap()
        .records()
        .unwrap();
    assert_eq!(records.len(), report.decisions());
    for record in &records {
        assert_eq!(record.policy_version, Some(4));
        assert_eq!(record.policy_digest.as_deref(), Some(fingerprint.digest.as_str()));
    }
    assert_eq!(records[0].service, ServiceId::new("netstackd"));
    assert_eq!(records[1].service, ServiceId::new("evil"));
}

#[test]
fn test_bringup_exception_allows_two_windows() {
    let mut net = owner(DeviceClass::Net, "bringupd");
    net.bringup_exception = true;
    let blk = owner(DeviceClass::Blk, "bringupd");

    let (mut kernel, _init, mut authority) = distribution_fixture(&[net, blk]);
    let policy = policy_with(
        1,
        &[("bringupd", DeviceClass::Net), ("bringupd", DeviceClass::Blk)],
    )
    .unwrap();
    let report = authority
        .distribute(&mut kernel, &policy, &mut MemoryAuditSink::new())
        .unwrap();

    let bringupd = ServiceId::new("bringupd");
    assert_eq!(report.granted_to(&bringupd).count(), 2);
    let task = authority.task_of(&bringupd).unwrap();
    assert_eq!(kernel.capabilities(task).len(), 2);
}

#[test]
fn test_second_owner_without_exception_is_rejected() {
    let registry = test_registry();
    let config = BootConfig {
        owners: vec![
            owner(DeviceClass::Net, "greedy"),
            owner(DeviceClass::Blk, "greedy"),
        ],
        ..BootConfig::default()
    };
    assert!(config.owner_table(&registry).is_err());
}
