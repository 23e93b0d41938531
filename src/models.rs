// Core data models for keyreach

use serde::{Deserialize, Serialize};
use std::fmt;

/// AWS access key pair under test.
///
/// The Debug impl masks the access key and never prints the secret, so the
/// struct can flow through tracing spans without leaking the credential.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub access_key: String,
    pub secret_key: String,
}

impl Credential {
    pub fn new(access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
        }
    }

    /// First four and last four characters of the access key.
    pub fn masked_access_key(&self) -> String {
        if self.access_key.len() >= 8 {
            format!(
                "{}...{}",
                &self.access_key[..4],
                &self.access_key[self.access_key.len() - 4..]
            )
        } else {
            "****".to_string()
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_key", &self.masked_access_key())
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

/// Who the credential authenticates as, per sts:GetCallerIdentity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub account_id: String,
    pub arn: String,
    pub user_id: String,
}

impl Identity {
    /// Short principal name: the ARN segment after the last '/', or "root"
    /// for account-root ARNs that carry no path.
    pub fn principal_name(&self) -> &str {
        match self.arn.rsplit_once('/') {
            Some((_, name)) => name,
            None => "root",
        }
    }
}

/// Whether an operation observes or mutates account state. Drives the base
/// probe timeout before any history exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationClass {
    Read,
    Write,
}

/// Priority tier a flow belongs to; also the CLI filter granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowPriority {
    Critical,
    High,
    Medium,
    Low,
}

impl FlowPriority {
    pub fn label(&self) -> &'static str {
        match self {
            FlowPriority::Critical => "critical",
            FlowPriority::High => "high",
            FlowPriority::Medium => "medium",
            FlowPriority::Low => "low",
        }
    }
}

impl fmt::Display for FlowPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Readiness of a flow after probing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlowStatus {
    /// Every required operation is accessible.
    Ready,
    /// Partially accessible, and a discovered role could close the gap.
    EscalationNeeded,
    /// Partially accessible and no discovered role matches the flow's markers.
    BlockedNoEscalation,
    /// None of the required operations are accessible.
    Blocked,
}

impl FlowStatus {
    pub fn label(&self) -> &'static str {
        match self {
            FlowStatus::Ready => "READY",
            FlowStatus::EscalationNeeded => "ESCALATION_NEEDED",
            FlowStatus::BlockedNoEscalation => "BLOCKED_NO_ESCALATION",
            FlowStatus::Blocked => "BLOCKED",
        }
    }
}

/// Final result of probing one operation, as cached and reported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeOutcome {
    pub operation_id: String,
    pub accessible: bool,
    pub score: u32,
    pub elapsed_ms: u64,
    pub attempts: u32,
    pub error_code: Option<String>,
}

/// IAM role surfaced by escalation discovery, ranked by the weight of the
/// managed policies attached to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredRole {
    pub role_name: String,
    pub arn: String,
    pub attached_policies: Vec<String>,
    pub weight: u32,
}
