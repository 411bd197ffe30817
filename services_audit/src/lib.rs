//! # Audit Service
//!
//! Append-only record of device distribution decisions.
//!
//! ## Philosophy
//!
//! An audit entry is a positive claim that a decision happened. It is never
//! reported as written unless it was, so [`AuditSink::append`] surfaces every
//! storage failure to the caller instead of dropping the record.
//!
//! Records carry identities and decisions only. Register contents, keys and
//! similar material have no field to go into.

pub mod file;
pub mod query;

pub use file::JsonLinesAuditSink;
pub use query::AuditQuery;

use core_types::{DeviceClass, ServiceId};
use kernel_api::Instant;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Longest reason stored in a record, in bytes
pub const MAX_REASON_LEN: usize = 256;

/// Outcome recorded for one distribution decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuditDecision {
    Allow,
    Deny,
}

impl fmt::Display for AuditDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditDecision::Allow => write!(f, "Allow"),
            AuditDecision::Deny => write!(f, "Deny"),
        }
    }
}

/// One distribution decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionRecord {
    /// Position in decision order, strictly increasing within a sink
    pub sequence: u64,
    /// Kernel time of the decision
    pub timestamp: Instant,
    /// Service the window was (or would have been) given to
    pub service: ServiceId,
    pub device_class: DeviceClass,
    pub decision: AuditDecision,
    /// Why; required for `Deny`, a short note for `Allow`
    pub reason: String,
    /// Version of the rule set consulted, if one was reached
    pub policy_version: Option<u32>,
    /// Hex SHA-256 of that rule set
    pub policy_digest: Option<String>,
}

impl DistributionRecord {
    pub fn allow(
        sequence: u64,
        timestamp: Instant,
        service: ServiceId,
        device_class: DeviceClass,
    ) -> Self {
        Self {
            sequence,
            timestamp,
            service,
            device_class,
            decision: AuditDecision::Allow,
            reason: "allowed by policy".to_string(),
            policy_version: None,
            policy_digest: None,
        }
    }

    /// A deny record; the reason is truncated to [`MAX_REASON_LEN`] and never empty
    pub fn deny(
        sequence: u64,
        timestamp: Instant,
        service: ServiceId,
        device_class: DeviceClass,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            sequence,
            timestamp,
            service,
            device_class,
            decision: AuditDecision::Deny,
            reason: bounded_reason(reason.into()),
            policy_version: None,
            policy_digest: None,
        }
    }

    /// Stamps the rule set the decision was made against
    pub fn with_policy(mut self, version: u32, digest: impl Into<String>) -> Self {
        self.policy_version = Some(version);
        self.policy_digest = Some(digest.into());
        self
    }
}

fn bounded_reason(reason: String) -> String {
    let trimmed = reason.trim();
    if trimmed.is_empty() {
        return "denied".to_string();
    }
    if trimmed.len() <= MAX_REASON_LEN {
        return trimmed.to_string();
    }
    let mut cut = MAX_REASON_LEN;
    while !trimmed.is_char_boundary(cut) {
        cut -= 1;
    }
    trimmed[..cut].to_string()
}

/// Audit storage errors
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Audit storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Record {got} appended after record {last}")]
    OutOfOrder { last: u64, got: u64 },

    #[error("Audit trail ends at sequence {last}; no further records can follow")]
    SequenceExhausted { last: u64 },

    #[error("Failed to encode record: {0}")]
    Encode(String),

    #[error("Corrupt audit entry at line {line}: {reason}")]
    Corrupt { line: usize, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Append-only store of distribution records
pub trait AuditSink {
    /// Appends a record; `Ok` only once the record is stored
    fn append(&mut self, record: DistributionRecord) -> Result<(), AuditError>;

    /// All stored records in append order
    fn records(&self) -> Result<Vec<DistributionRecord>, AuditError>;

    /// Records matching `query`, in append order
    fn query(&self, query: &AuditQuery) -> Result<Vec<DistributionRecord>, AuditError> {
        Ok(self
            .records()?
            .into_iter()
            .filter(|r| query.matches(r))
            .collect())
    }
}

/// Rejects a record whose sequence does not follow `last`
/// Sequence number for the record following `last`
pub fn next_sequence(last: Option<u64>) -> Result<u64, AuditError> {
    match last {
        None => Ok(0),
        Some(last) => last
            .checked_add(1)
            .ok_or(AuditError::SequenceExhausted { last }),
    }
}

pub(crate) fn check_order(last: Option<u64>, record: &DistributionRecord) -> Result<(), AuditError> {
    match last {
        Some(last) if record.sequence <= last => Err(AuditError::OutOfOrder {
            last,
            got: record.sequence,
        }),
        _ => Ok(()),
    }
}

/// In-memory sink, optionally bounded
///
/// A bounded sink that is full reports `StorageUnavailable` rather than
/// evicting or dropping records.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    records: Vec<DistributionRecord>,
    capacity: Option<usize>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sink that holds at most `capacity` records
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: Vec::new(),
            capacity: Some(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl AuditSink for MemoryAuditSink {
    fn append(&mut self, record: DistributionRecord) -> Result<(), AuditError> {
        if let Some(capacity) = self.capacity {
            if self.records.len() >= capacity {
                return Err(AuditError::StorageUnavailable(format!(
                    "memory sink full ({capacity} records)"
                )));
            }
        }
        check_order(self.records.last().map(|r| r.sequence), &record)?;
        self.records.push(record);
        Ok(())
    }

    fn records(&self) -> Result<Vec<DistributionRecord>, AuditError> {
        Ok(self.records.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deny(sequence: u64, reason: &str) -> DistributionRecord {
        DistributionRecord::deny(
            sequence,
            Instant::from_nanos(sequence * 10),
            ServiceId::new("evil"),
            DeviceClass::Net,
            reason,
        )
    }

    #[test]
    fn test_append_and_read_back() {
        let mut sink = MemoryAuditSink::new();
        sink.append(deny(0, "no rule")).unwrap();
        sink.append(deny(1, "no rule")).unwrap();

        let records = sink.records().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].sequence, 0);
        assert_eq!(records[1].decision, AuditDecision::Deny);
    }

    #[test]
    fn test_full_sink_surfaces_failure() {
        let mut sink = MemoryAuditSink::with_capacity(1);
        sink.append(deny(0, "no rule")).unwrap();

        let err = sink.append(deny(1, "no rule")).unwrap_err();
        assert!(matches!(err, AuditError::StorageUnavailable(_)));
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn test_zero_capacity_never_pretends() {
        let mut sink = MemoryAuditSink::with_capacity(0);
        assert!(sink.append(deny(0, "no rule")).is_err());
        assert!(sink.records().unwrap().is_empty());
    }

    #[test]
    fn test_out_of_order_rejected() {
        let mut sink = MemoryAuditSink::new();
        sink.append(deny(5, "no rule")).unwrap();
        let err = sink.append(deny(5, "no rule")).unwrap_err();
        assert!(matches!(err, AuditError::OutOfOrder { last: 5, got: 5 }));
    }

    #[test]
    fn test_deny_reason_never_empty() {
        assert_eq!(deny(0, "   ").reason, "denied");
    }

    #[test]
    fn test_reason_is_bounded() {
        let long = "é".repeat(MAX_REASON_LEN);
        let record = deny(0, &long);
        assert!(record.reason.len() <= MAX_REASON_LEN);
        assert!(!record.reason.is_empty());
    }

    #[test]
    fn test_policy_stamp() {
        let record = DistributionRecord::allow(
            0,
            Instant::BOOT,
            ServiceId::new("netstackd"),
            DeviceClass::Net,
        )
        .with_policy(3, "ab".repeat(32));
        assert_eq!(record.policy_version, Some(3));
        assert_eq!(record.policy_digest.as_deref().map(str::len), Some(64));
    }

    #[test]
    fn test_next_sequence_stops_at_the_end() {
        assert_eq!(next_sequence(None).unwrap(), 0);
        assert_eq!(next_sequence(Some(41)).unwrap(), 42);
        assert!(matches!(
            next_sequence(Some(u64::MAX)),
            Err(AuditError::SequenceExhausted { last: u64::MAX })
        ));
    }
}
