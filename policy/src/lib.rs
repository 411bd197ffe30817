//! # Device Policy Decision Point
//!
//! This crate decides whether a service may receive a device class.
//!
//! ## Philosophy
//!
//! - **Deny by default**: no matching allow rule means `Deny`, never an implicit `Allow`
//! - **Policy decides; the kernel enforces**: a decision never grants anything by itself
//! - **Pure**: a decision depends only on the request and the loaded rule set
//! - **Identified**: every rule set carries a version and a content digest, so a
//!   decision can be reproduced against the exact rules that made it
//!
//! ## Core Concepts
//!
//! - `PolicyEngine`: Trait for evaluating a `(service, device class)` request
//! - `RuleSet`: Versioned allow rules, loaded once at boot
//! - `DevicePolicy`: The deny-by-default engine over a `RuleSet`
//! - `PolicyClient`: How the distribution authority reaches the decision point;
//!   an unreachable decision point is an error, which callers treat as `Deny`
//!
//! ## Non-Goals
//!
//! This is NOT:
//! - A general permissions system
//! - An enforcement mechanism (that is the capability table)
//! - Time- or state-dependent in any way

#![cfg_attr(not(test), no_std)]

extern crate alloc;

use alloc::boxed::Box;
use alloc::collections::BTreeSet;
use alloc::format;
use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::fmt;
use core_types::{DeviceClass, ServiceId};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A request to the decision point
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PolicyRequest {
    /// Service that would receive the capability
    pub service: ServiceId,
    /// Class of the device window being distributed
    pub class: DeviceClass,
}

impl PolicyRequest {
    pub fn new(service: ServiceId, class: DeviceClass) -> Self {
        Self { service, class }
    }
}

impl fmt::Display for PolicyRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.service.as_str(), self.class)
    }
}

/// Policy decision returned by policy engines
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PolicyDecision {
    /// Distribution may proceed
    Allow,
    /// Distribution is refused with a specific, non-empty reason
    Deny { reason: String },
}

impl PolicyDecision {
    pub fn allow() -> Self {
        Self::Allow
    }

    /// Creates a Deny decision; an empty reason is replaced with a generic one
    pub fn deny(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self::Deny {
            reason: if reason.trim().is_empty() {
                "denied".to_string()
            } else {
                reason
            },
        }
    }

    pub fn is_allow(&self) -> bool {
        matches!(self, Self::Allow)
    }

    pub fn is_deny(&self) -> bool {
        matches!(self, Self::Deny { .. })
    }

    /// Returns the deny reason, if any
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Allow => None,
            Self::Deny { reason } => Some(reason),
        }
    }
}

impl fmt::Display for PolicyDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allow => write!(f, "Allow"),
            Self::Deny { reason } => write!(f, "Deny: {}", reason),
        }
    }
}

/// Policy engine trait
///
/// Engines must be deterministic and side-effect free.
pub trait PolicyEngine: Send + Sync {
    /// Evaluates a request
    ///
    /// Must be deterministic: same inputs always produce same outputs.
    fn evaluate(&self, request: &PolicyRequest) -> PolicyDecision;

    /// Returns the name of this policy engine (for logging/audit)
    fn name(&self) -> &str;
}

/// One allow rule: `service` may receive windows of `class`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Rule {
    pub service: ServiceId,
    pub class: DeviceClass,
}

impl Rule {
    pub fn new(service: impl Into<String>, class: DeviceClass) -> Self {
        Self {
            service: ServiceId::new(service),
            class,
        }
    }

    fn matches(&self, request: &PolicyRequest) -> bool {
        self.service == request.service && self.class == request.class
    }
}

/// Errors raised while loading a rule set
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleLoadError {
    /// The document is not a valid rule set
    Parse(String),
    /// Version 0 is reserved for "no rule set"
    ZeroVersion,
    /// The same rule appears twice
    DuplicateRule(Rule),
}

impl fmt::Display for RuleLoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse(msg) => write!(f, "invalid rule set: {}", msg),
            Self::ZeroVersion => write!(f, "rule set version must be at least 1"),
            Self::DuplicateRule(rule) => write!(
                f,
                "duplicate rule for {} / {}",
                rule.service.as_str(),
                rule.class
            ),
        }
    }
}

/// Identifies the exact rule set a decision was made against
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RuleSetFingerprint {
    pub version: u32,
    /// Hex-encoded SHA-256 of the canonical rule set
    pub digest: String,
}

/// Versioned set of allow rules
///
/// Loaded once at boot and never modified afterwards. Deserializing goes
/// through the same validation as [`RuleSet::new`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawRuleSet")]
pub struct RuleSet {
    version: u32,
    rules: Vec<Rule>,
}

#[derive(Deserialize)]
struct RawRuleSet {
    version: u32,
    #[serde(default)]
    rules: Vec<Rule>,
}

impl TryFrom<RawRuleSet> for RuleSet {
    type Error = RuleLoadError;

    fn try_from(raw: RawRuleSet) -> Result<Self, Self::Error> {
        Self::new(raw.version, raw.rules)
    }
}

impl RuleSet {
    /// Builds a rule set, rejecting version 0 and duplicate rules
    pub fn new(version: u32, rules: Vec<Rule>) -> Result<Self, RuleLoadError> {
        if version == 0 {
            return Err(RuleLoadError::ZeroVersion);
        }
        let mut seen = BTreeSet::new();
        for rule in &rules {
            if !seen.insert(rule) {
                return Err(RuleLoadError::DuplicateRule(rule.clone()));
            }
        }
        Ok(Self { version, rules })
    }

    /// Parses `{"version": N, "rules": [{"service": "...", "class": "net"}]}`
    pub fn from_json(json: &str) -> Result<Self, RuleLoadError> {
        let raw: RawRuleSet =
            serde_json::from_str(json).map_err(|e| RuleLoadError::Parse(e.to_string()))?;
        Self::try_from(raw)
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// SHA-256 over the version and the rules in sorted order
    ///
    /// Rule order in the source document does not affect the digest.
    pub fn digest(&self) -> [u8; 32] {
        let mut sorted: Vec<&Rule> = self.rules.iter().collect();
        sorted.sort();

        let mut hasher = Sha256::new();
        hasher.update(self.version.to_le_bytes());
        for rule in sorted {
            hasher.update(rule.service.as_str().as_bytes());
            hasher.update([0u8]);
            hasher.update(rule.class.as_str().as_bytes());
            hasher.update([0u8]);
        }
        hasher.finalize().into()
    }

    pub fn fingerprint(&self) -> RuleSetFingerprint {
        RuleSetFingerprint {
            version: self.version,
            digest: hex::encode(self.digest()),
        }
    }
}

/// Deny-by-default device distribution policy
#[derive(Debug, Clone)]
pub struct DevicePolicy {
    rules: RuleSet,
}

impl DevicePolicy {
    pub fn from_rule_set(rules: RuleSet) -> Self {
        Self { rules }
    }

    pub fn from_json(json: &str) -> Result<Self, RuleLoadError> {
        RuleSet::from_json(json).map(Self::from_rule_set)
    }

    pub fn rule_set(&self) -> &RuleSet {
        &self.rules
    }
}

impl PolicyEngine for DevicePolicy {
    fn evaluate(&self, request: &PolicyRequest) -> PolicyDecision {
        if self.rules.rules.iter().any(|rule| rule.matches(request)) {
            PolicyDecision::Allow
        } else {
            PolicyDecision::deny(format!(
                "no rule allows {} to receive {} (rule set v{})",
                request.service.as_str(),
                request.class,
                self.rules.version
            ))
        }
    }

    fn name(&self) -> &str {
        "DevicePolicy"
    }
}

/// Denies everything
///
/// Stands in when no rule set was configured.
#[derive(Debug, Clone)]
pub struct DenyAllPolicy;

impl PolicyEngine for DenyAllPolicy {
    fn evaluate(&self, _request: &PolicyRequest) -> PolicyDecision {
        PolicyDecision::deny("no policy rule set loaded")
    }

    fn name(&self) -> &str {
        "DenyAllPolicy"
    }
}

/// Composed policy engine
///
/// Evaluates multiple policies in order:
/// - First Deny wins
/// - Allow only if every policy allows
/// - An empty composition denies
pub struct ComposedPolicy {
    policies: Vec<Box<dyn PolicyEngine>>,
}

impl ComposedPolicy {
    pub fn new() -> Self {
        Self {
            policies: Vec::new(),
        }
    }

    /// Adds a policy to the composition
    pub fn add_policy(mut self, policy: Box<dyn PolicyEngine>) -> Self {
        self.policies.push(policy);
        self
    }

    /// Evaluates all policies, recording each decision
    pub fn evaluate_with_report(&self, request: &PolicyRequest) -> PolicyDecisionReport {
        let mut evaluated_policies = Vec::new();
        for policy in &self.policies {
            let decision = policy.evaluate(request);
            let deny = decision.is_deny();
            evaluated_policies.push(PolicyEvaluation {
                policy_name: policy.name().to_string(),
                decision: decision.clone(),
            });
            if deny {
                return PolicyDecisionReport {
                    decision,
                    evaluated_policies,
                };
            }
        }
        let decision = if evaluated_policies.is_empty() {
            PolicyDecision::deny("no policies configured")
        } else {
            PolicyDecision::Allow
        };
        PolicyDecisionReport {
            decision,
            evaluated_policies,
        }
    }
}

impl Default for ComposedPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl PolicyEngine for ComposedPolicy {
    fn evaluate(&self, request: &PolicyRequest) -> PolicyDecision {
        self.evaluate_with_report(request).decision
    }

    fn name(&self) -> &str {
        "ComposedPolicy"
    }
}

/// Policy decision with the evaluations that produced it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDecisionReport {
    pub decision: PolicyDecision,
    pub evaluated_policies: Vec<PolicyEvaluation>,
}

/// Single policy evaluation record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyEvaluation {
    pub policy_name: String,
    pub decision: PolicyDecision,
}

/// The decision point could not be consulted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyUnavailable {
    pub reason: String,
}

impl PolicyUnavailable {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl fmt::Display for PolicyUnavailable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "policy decision point unavailable: {}", self.reason)
    }
}

/// Channel from the distribution authority to a decision point
///
/// `Err` means no decision was obtained. Callers must treat it as `Deny`.
pub trait PolicyClient {
    fn check(&self, request: &PolicyRequest) -> Result<PolicyDecision, PolicyUnavailable>;

    /// Rule set the answers come from, if known
    fn fingerprint(&self) -> Option<RuleSetFingerprint>;
}

/// In-process client wrapping an engine
pub struct LocalPolicyClient {
    engine: Box<dyn PolicyEngine>,
    fingerprint: Option<RuleSetFingerprint>,
}

impl LocalPolicyClient {
    pub fn new(engine: Box<dyn PolicyEngine>) -> Self {
        Self {
            engine,
            fingerprint: None,
        }
    }

    /// Client over a rule-set policy, reporting its fingerprint
    pub fn for_device_policy(policy: DevicePolicy) -> Self {
        let fingerprint = Some(policy.rule_set().fingerprint());
        Self {
            engine: Box::new(policy),
            fingerprint,
        }
    }

    pub fn engine_name(&self) -> &str {
        self.engine.name()
    }
}

impl PolicyClient for LocalPolicyClient {
    fn check(&self, request: &PolicyRequest) -> Result<PolicyDecision, PolicyUnavailable> {
        Ok(self.engine.evaluate(request))
    }

    fn fingerprint(&self) -> Option<RuleSetFingerprint> {
        self.fingerprint.clone()
    }
}

/// A client whose decision point cannot be reached
#[derive(Debug, Clone)]
pub struct UnreachablePolicyClient {
    reason: String,
}

impl UnreachablePolicyClient {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl PolicyClient for UnreachablePolicyClient {
    fn check(&self, _request: &PolicyRequest) -> Result<PolicyDecision, PolicyUnavailable> {
        Err(PolicyUnavailable::new(self.reason.clone()))
    }

    fn fingerprint(&self) -> Option<RuleSetFingerprint> {
        None
    }
}
