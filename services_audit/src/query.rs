//! Audit query surface for operator tools

use crate::{AuditDecision, DistributionRecord};
use core_types::{DeviceClass, ServiceId};
use serde::{Deserialize, Serialize};

/// Filter over distribution records; unset fields match everything
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditQuery {
    pub service: Option<ServiceId>,
    pub device_class: Option<DeviceClass>,
    pub decision: Option<AuditDecision>,
    /// Only records with `sequence >= since`
    pub since: Option<u64>,
}

impl AuditQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(ServiceId::new(service));
        self
    }

    pub fn device_class(mut self, class: DeviceClass) -> Self {
        self.device_class = Some(class);
        self
    }

    pub fn decision(mut self, decision: AuditDecision) -> Self {
        self.decision = Some(decision);
        self
    }

    pub fn since(mut self, sequence: u64) -> Self {
        self.since = Some(sequence);
        self
    }

    pub fn matches(&self, record: &DistributionRecord) -> bool {
        self.service.as_ref().map_or(true, |s| *s == record.service)
            && self.device_class.map_or(true, |c| c == record.device_class)
            && self.decision.map_or(true, |d| d == record.decision)
            && self.since.map_or(true, |s| record.sequence >= s)
    }
}
