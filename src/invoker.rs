// Invocation seam between the probe engine and the AWS wire
// Tests drive the engine through fakes implementing OperationInvoker

use crate::catalog::OperationSpec;
use crate::models::Credential;
use async_trait::async_trait;
use thiserror::Error;

/// Everything an invocation needs besides the operation itself. The
/// account id arrives after the identity gate and feeds `{account}`
/// placeholders in sentinel ARNs.
#[derive(Debug, Clone)]
pub struct ProbeContext {
    pub credential: Credential,
    pub region: String,
    pub account_id: Option<String>,
}

impl ProbeContext {
    pub fn new(credential: Credential, region: impl Into<String>) -> Self {
        Self {
            credential,
            region: region.into(),
            account_id: None,
        }
    }
}

/// How the service answered, after classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvokeOutcome {
    /// Succeeded outright, or failed on a validation error only an
    /// authorized caller can reach (missing sentinel resource, dry run).
    Authorized { code: Option<String> },
    /// The service refused the action for this principal. Terminal for
    /// the operation; never retried.
    Denied { code: String },
    /// Rate limited; retried with backoff.
    Throttled { code: String },
    /// The credential itself was rejected. Aborts the whole run.
    CredentialRejected { code: String },
    /// Anything that cannot be confidently classified. Terminal for the
    /// operation, counted as not accessible.
    Unclear { detail: String },
}

/// Attempt-level failure below classification: the request never produced
/// an AWS answer. Retryable.
#[derive(Error, Debug)]
pub enum InvokeError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("could not build request: {0}")]
    Build(String),
}

#[async_trait]
pub trait OperationInvoker: Send + Sync {
    async fn invoke(
        &self,
        op: &OperationSpec,
        ctx: &ProbeContext,
    ) -> Result<InvokeOutcome, InvokeError>;
}
