//! Integration tests for the devcapd host runtime

use devcapd::{HostArgs, HostRuntime, HostRuntimeError};
use services_audit::{AuditDecision, AuditSink, JsonLinesAuditSink};
use std::fs;
use tempfile::tempdir;

const SPLIT_CONFIG: &str = r#"{
    "owners": [
        {"class": "net", "service": "netstackd"},
        {"class": "blk", "service": "evil"}
    ],
    "policy": {"version": 3, "rules": [{"service": "netstackd", "class": "net"}]},
    "services": ["netstackd", "evil"]
}"#;

#[test]
fn test_audit_trail_written_to_file() {
    let dir = tempdir().unwrap();
    let config_path = dir.path().join("boot.json");
    let audit_path = dir.path().join("audit.jsonl");
    fs::write(&config_path, SPLIT_CONFIG).unwrap();

    let args = HostArgs {
        config: Some(config_path),
        audit_out: Some(audit_path.clone()),
        ..HostArgs::default()
    };
    let mut runtime = HostRuntime::new(args).unwrap();
    let report = runtime.run().unwrap();
    assert_eq!(report.distribution.granted.len(), 1);
    assert_eq!(report.distribution.denied.len(), 1);
    assert_eq!(report.distribution.skipped.len(), 1);

    let records = JsonLinesAuditSink::open(&audit_path)
        .unwrap()
        .records()
        .unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].decision, AuditDecision::Allow);
    assert_eq!(records[1].decision, AuditDecision::Deny);
    assert!(records.iter().all(|r| r.policy_version == Some(3)));
}

#[test]
fn test_second_boot_continues_audit_sequence() {
    let dir = tempdir().unwrap();
    let audit_path = dir.path().join("audit.jsonl");

    for _ in 0..2 {
        let args = HostArgs {
            audit_out: Some(audit_path.clone()),
            ..HostArgs::default()
        };
        HostRuntime::new(args).unwrap().run().unwrap();
    }

    let records = JsonLinesAuditSink::open(&audit_path)
        .unwrap()
        .records()
        .unwrap();
    let sequences: Vec<u64> = records.iter().map(|r| r.sequence).collect();
    assert_eq!(sequences, vec![0, 1, 2, 3, 4, 5]);
}

#[test]
fn test_unwritable_audit_trail_aborts() {
    let dir = tempdir().unwrap();
    let args = HostArgs {
        audit_out: Some(dir.path().join("missing").join("audit.jsonl")),
        ..HostArgs::default()
    };
    let mut runtime = HostRuntime::new(args).unwrap();
    assert!(matches!(runtime.run(), Err(HostRuntimeError::Audit(_))));
    assert!(runtime.kernel().audit_log().is_empty());
}

#[test]
fn test_missing_config_file() {
    let args = HostArgs {
        config: Some("/nonexistent/boot.json".into()),
        ..HostArgs::default()
    };
    assert!(matches!(
        HostRuntime::new(args),
        Err(HostRuntimeError::ConfigRead(_))
    ));
}

#[test]
fn test_invalid_config_rejected_before_boot() {
    let dir = tempdir().unwrap();
    let config_path = dir.path().join("boot.json");
    fs::write(
        &config_path,
        r#"{"owners": [
            {"class": "net", "service": "a"},
            {"class": "net", "service": "b"}
        ]}"#,
    )
    .unwrap();

    let args = HostArgs {
        config: Some(config_path),
        ..HostArgs::default()
    };
    assert!(matches!(
        HostRuntime::new(args),
        Err(HostRuntimeError::Boot(_))
    ));
}
