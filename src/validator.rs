// Credential gates
// Four ordered checks run before any probing; the first failure aborts
// the scan with no partial report

use crate::aws::{caller_identity_op, AwsInvoker, IdentityOutcome};
use crate::error::{Result, ScanError};
use crate::invoker::{InvokeOutcome, ProbeContext};
use crate::models::{Credential, Identity};
use crate::tracker::PerformanceTracker;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

const REACHABILITY_TIMEOUT: Duration = Duration::from_secs(3);
const LIVENESS_TIMEOUT: Duration = Duration::from_secs(2);
const RETRY_ATTEMPTS: u32 = 3;

pub const ACCESS_KEY_LEN: usize = 20;
pub const SECRET_KEY_LEN: usize = 40;
pub const ACCESS_KEY_PREFIX: &str = "AKIA";

/// Gate 1: offline shape check. Collects every violation rather than
/// stopping at the first so the operator sees the whole problem at once.
pub fn check_format(credential: &Credential) -> Result<()> {
    let mut violations = Vec::new();

    let access = &credential.access_key;
    if access.len() != ACCESS_KEY_LEN {
        violations.push(format!(
            "access key must be {} characters, got {}",
            ACCESS_KEY_LEN,
            access.len()
        ));
    }
    if !access.starts_with(ACCESS_KEY_PREFIX) {
        violations.push(format!("access key must start with {}", ACCESS_KEY_PREFIX));
    }
    if !access.chars().all(|c| c.is_ascii_alphanumeric()) {
        violations.push("access key must be alphanumeric".to_string());
    }

    let secret = &credential.secret_key;
    if secret.len() != SECRET_KEY_LEN {
        violations.push(format!(
            "secret key must be {} characters, got {}",
            SECRET_KEY_LEN,
            secret.len()
        ));
    }
    if !secret
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '/' | '='))
    {
        violations.push("secret key contains characters outside [A-Za-z0-9+/=]".to_string());
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(ScanError::MalformedCredential { violations })
    }
}

/// Gate 2: can we even open a TCP connection to the platform. Tries the
/// regional STS endpoint first, then the global STS and IAM hosts.
pub async fn check_reachability(region: &str) -> Result<String> {
    let hosts = [
        format!("sts.{}.amazonaws.com", region),
        "sts.amazonaws.com".to_string(),
        "iam.amazonaws.com".to_string(),
    ];
    for host in &hosts {
        match timeout(
            REACHABILITY_TIMEOUT,
            TcpStream::connect((host.as_str(), 443)),
        )
        .await
        {
            Ok(Ok(_)) => {
                debug!(host = %host, "platform reachable");
                return Ok(host.clone());
            }
            Ok(Err(e)) => debug!(host = %host, error = %e, "connect failed"),
            Err(_) => debug!(host = %host, "connect timed out"),
        }
    }
    Err(ScanError::PlatformUnreachable {
        tried: hosts.to_vec(),
    })
}

/// How a refused liveness call maps onto the gate decision. Throttling
/// still proves the key exists and signs correctly; any other refusal is
/// terminal but kept distinct from a rejected credential.
pub fn liveness_disposition(outcome: InvokeOutcome) -> Result<()> {
    match outcome {
        InvokeOutcome::Authorized { .. } | InvokeOutcome::Throttled { .. } => Ok(()),
        InvokeOutcome::CredentialRejected { code } => Err(ScanError::InvalidCredential { code }),
        InvokeOutcome::Denied { code } => {
            Err(ScanError::UnknownProbe(format!("identity call refused: {}", code)))
        }
        InvokeOutcome::Unclear { detail } => Err(ScanError::UnknownProbe(detail)),
    }
}

pub struct CredentialValidator {
    invoker: Arc<AwsInvoker>,
    tracker: PerformanceTracker,
}

impl CredentialValidator {
    pub fn new(invoker: Arc<AwsInvoker>, tracker: PerformanceTracker) -> Self {
        Self { invoker, tracker }
    }

    /// Gate 3: one cheap GetCallerIdentity attempt under a two second
    /// budget, just to learn whether the credential is alive.
    pub async fn check_liveness(&self, ctx: &ProbeContext) -> Result<()> {
        match timeout(LIVENESS_TIMEOUT, self.invoker.caller_identity(ctx)).await {
            Ok(Ok(IdentityOutcome::Resolved(_))) => Ok(()),
            Ok(Ok(IdentityOutcome::Refused(outcome))) => liveness_disposition(outcome),
            Ok(Err(e)) => Err(ScanError::UnknownProbe(e.to_string())),
            Err(_) => Err(ScanError::UnknownProbe(
                "liveness check timed out".to_string(),
            )),
        }
    }

    /// Gate 4: the full identity probe through the retry and adaptive
    /// timeout machinery. The tracker records the final attempt whether it
    /// succeeds or not, under the same key the engine would use.
    pub async fn resolve_identity(&self, ctx: &ProbeContext) -> Result<Identity> {
        let op = caller_identity_op();
        let mut last_failure = "identity probe exhausted retries".to_string();
        let mut last_elapsed = Duration::ZERO;

        for attempt in 1..=RETRY_ATTEMPTS {
            if attempt > 1 {
                tokio::time::sleep(self.tracker.backoff_delay(attempt - 1)).await;
            }
            let budget = self.tracker.adaptive_timeout(&op);
            let started = tokio::time::Instant::now();
            let result = timeout(budget, self.invoker.caller_identity(ctx)).await;
            last_elapsed = started.elapsed();

            match result {
                Ok(Ok(IdentityOutcome::Resolved(identity))) => {
                    self.tracker.record(&op.id, last_elapsed, true);
                    debug!(arn = %identity.arn, "identity resolved");
                    return Ok(identity);
                }
                Ok(Ok(IdentityOutcome::Refused(InvokeOutcome::Throttled { code }))) => {
                    last_failure = format!("throttled: {}", code);
                }
                Ok(Ok(IdentityOutcome::Refused(InvokeOutcome::CredentialRejected { code }))) => {
                    self.tracker.record(&op.id, last_elapsed, false);
                    return Err(ScanError::InvalidCredential { code });
                }
                Ok(Ok(IdentityOutcome::Refused(outcome))) => {
                    self.tracker.record(&op.id, last_elapsed, false);
                    return Err(ScanError::UnknownProbe(format!(
                        "identity probe refused: {:?}",
                        outcome
                    )));
                }
                Ok(Err(e)) => {
                    last_failure = e.to_string();
                }
                Err(_) => {
                    last_failure = format!("timed out after {:?}", budget);
                }
            }
        }

        self.tracker.record(&op.id, last_elapsed, false);
        Err(ScanError::UnknownProbe(last_failure))
    }

    /// Run all four gates in order. On success the context carries the
    /// account id for sentinel ARN substitution.
    pub async fn validate(&self, ctx: &mut ProbeContext) -> Result<Identity> {
        check_format(&ctx.credential)?;
        check_reachability(&ctx.region).await?;
        self.check_liveness(ctx).await?;
        let identity = self.resolve_identity(ctx).await?;
        ctx.account_id = Some(identity.account_id.clone());
        Ok(identity)
    }
}
