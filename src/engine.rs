// Concurrent probe engine
// Expands flows into an ordered plan, runs it through a bounded worker
// pool with adaptive timeouts and retries, and returns rows in plan order

use crate::cache::{ProbeCache, DEFAULT_TTL};
use crate::catalog::{Catalog, OperationSpec};
use crate::error::{Result, ScanError};
use crate::invoker::{InvokeOutcome, OperationInvoker, ProbeContext};
use crate::models::{FlowPriority, ProbeOutcome};
use crate::scoring;
use crate::tracker::PerformanceTracker;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub const DEFAULT_CONCURRENCY: usize = 4;
pub const MAX_CONCURRENCY: usize = 8;
const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Worker cap, clamped into 1..=MAX_CONCURRENCY at construction.
    pub concurrency: usize,
    pub retry_attempts: u32,
    pub cache_ttl: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            cache_ttl: DEFAULT_TTL,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PlannedProbe {
    pub sequence: usize,
    pub flow_id: String,
    pub op: Arc<OperationSpec>,
}

/// Expand the selected flows into an ordered plan: flows in catalog order,
/// operations in declared order. An operation shared by several flows
/// appears once per flow; the cache and per-key locks keep the wire cost
/// at one probe per TTL window.
pub fn build_plan(catalog: &Catalog, filter: Option<FlowPriority>) -> Vec<PlannedProbe> {
    let mut plan = Vec::new();
    for flow in catalog.flows_with_priority(filter) {
        for op_id in &flow.operations {
            if let Some(op) = catalog.operation(op_id) {
                plan.push(PlannedProbe {
                    sequence: plan.len(),
                    flow_id: flow.id.clone(),
                    op: Arc::new(op.clone()),
                });
            }
        }
    }
    plan
}

#[derive(Debug)]
pub struct EngineRun {
    /// Unique outcomes in plan order (first occurrence wins).
    pub rows: Vec<ProbeOutcome>,
    /// True when cancellation cut the plan short; rows cover only what
    /// finished.
    pub interrupted: bool,
}

enum TaskOutcome {
    Row(ProbeOutcome),
    CredentialRejected(String),
}

pub struct ProbeEngine {
    invoker: Arc<dyn OperationInvoker>,
    cache: ProbeCache,
    tracker: PerformanceTracker,
    config: EngineConfig,
}

impl ProbeEngine {
    pub fn new(invoker: Arc<dyn OperationInvoker>, config: EngineConfig) -> Self {
        Self::with_tracker(invoker, PerformanceTracker::new(), config)
    }

    /// Share a tracker with the caller so gate probes and engine probes
    /// land in one summary.
    pub fn with_tracker(
        invoker: Arc<dyn OperationInvoker>,
        tracker: PerformanceTracker,
        config: EngineConfig,
    ) -> Self {
        let config = EngineConfig {
            concurrency: config.concurrency.clamp(1, MAX_CONCURRENCY),
            ..config
        };
        Self {
            invoker,
            cache: ProbeCache::new(config.cache_ttl),
            tracker,
            config,
        }
    }

    /// Run the plan. Cancellation is cooperative: it stops new probes from
    /// being scheduled while in-flight ones finish. A credential rejection
    /// observed mid-run aborts everything.
    pub async fn run(
        &self,
        plan: &[PlannedProbe],
        ctx: &ProbeContext,
        cancel: &CancellationToken,
    ) -> Result<EngineRun> {
        // Entries left over from an earlier run past their TTL go away
        // up front instead of lingering until a read touches them.
        self.cache.purge_expired();

        let local = cancel.child_token();
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let mut join_set: JoinSet<(usize, TaskOutcome)> = JoinSet::new();
        let mut interrupted = false;

        for probe in plan {
            if local.is_cancelled() {
                interrupted = true;
                break;
            }
            // Take a permit before spawning so in-flight probes never
            // exceed the worker cap.
            let permit = tokio::select! {
                _ = local.cancelled() => {
                    interrupted = true;
                    break;
                }
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(p) => p,
                    Err(_) => break,
                },
            };

            let invoker = Arc::clone(&self.invoker);
            let cache = self.cache.clone();
            let tracker = self.tracker.clone();
            let ctx = ctx.clone();
            let op = Arc::clone(&probe.op);
            let sequence = probe.sequence;
            let flow_id = probe.flow_id.clone();
            let retries = self.config.retry_attempts;
            let abort = local.clone();

            join_set.spawn(async move {
                let _permit = permit;
                debug!(flow = %flow_id, op = %op.id, "probing");
                let outcome =
                    probe_operation(&op, &ctx, invoker.as_ref(), &cache, &tracker, retries).await;
                if matches!(outcome, TaskOutcome::CredentialRejected(_)) {
                    abort.cancel();
                }
                (sequence, outcome)
            });
        }

        let mut collected: Vec<(usize, ProbeOutcome)> = Vec::new();
        let mut rejected: Option<String> = None;
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((sequence, TaskOutcome::Row(row))) => collected.push((sequence, row)),
                Ok((_, TaskOutcome::CredentialRejected(code))) => rejected = Some(code),
                Err(e) => {
                    return Err(ScanError::UnknownProbe(format!("probe task failed: {}", e)))
                }
            }
        }
        if let Some(code) = rejected {
            return Err(ScanError::InvalidCredential { code });
        }

        collected.sort_by_key(|(sequence, _)| *sequence);
        let mut seen = HashSet::new();
        let rows = collected
            .into_iter()
            .filter_map(|(_, row)| seen.insert(row.operation_id.clone()).then_some(row))
            .collect();

        Ok(EngineRun {
            rows,
            interrupted: interrupted || local.is_cancelled(),
        })
    }
}

/// Probe one operation under its per-key lock: consult the cache, then
/// attempt the wire with retries. Denied and unclear answers are terminal;
/// throttling, timeouts, and transport failures retry after backoff.
async fn probe_operation(
    op: &OperationSpec,
    ctx: &ProbeContext,
    invoker: &dyn OperationInvoker,
    cache: &ProbeCache,
    tracker: &PerformanceTracker,
    retries: u32,
) -> TaskOutcome {
    let lock = cache.lock_for(&op.id);
    let _guard = lock.lock().await;

    if let Some(hit) = cache.get(&op.id) {
        debug!(op = %op.id, "cache hit");
        return TaskOutcome::Row(hit);
    }

    let mut last_error: Option<String> = None;
    let mut last_elapsed = Duration::ZERO;

    for attempt in 1..=retries {
        if attempt > 1 {
            let delay = tracker.backoff_delay(attempt - 1);
            debug!(op = %op.id, attempt, ?delay, "retrying after backoff");
            tokio::time::sleep(delay).await;
        }
        let budget = tracker.adaptive_timeout(op);
        let started = Instant::now();
        let result = timeout(budget, invoker.invoke(op, ctx)).await;
        last_elapsed = started.elapsed();

        match result {
            Ok(Ok(InvokeOutcome::Authorized { code })) => {
                tracker.record(&op.id, last_elapsed, true);
                let row = finish(op, true, last_elapsed, attempt, code);
                cache.put(row.clone());
                return TaskOutcome::Row(row);
            }
            Ok(Ok(InvokeOutcome::Denied { code })) => {
                tracker.record(&op.id, last_elapsed, false);
                let row = finish(op, false, last_elapsed, attempt, Some(code));
                cache.put(row.clone());
                return TaskOutcome::Row(row);
            }
            Ok(Ok(InvokeOutcome::Throttled { code })) => {
                warn!(op = %op.id, attempt, code = %code, "throttled");
                last_error = Some(code);
            }
            Ok(Ok(InvokeOutcome::CredentialRejected { code })) => {
                tracker.record(&op.id, last_elapsed, false);
                return TaskOutcome::CredentialRejected(code);
            }
            Ok(Ok(InvokeOutcome::Unclear { detail })) => {
                tracker.record(&op.id, last_elapsed, false);
                let row = finish(op, false, last_elapsed, attempt, Some(detail));
                cache.put(row.clone());
                return TaskOutcome::Row(row);
            }
            Ok(Err(e)) => {
                warn!(op = %op.id, attempt, error = %e, "attempt failed");
                last_error = Some(e.to_string());
            }
            Err(_) => {
                warn!(op = %op.id, attempt, ?budget, "attempt timed out");
                last_error = Some(format!("timed out after {:?}", budget));
            }
        }
    }

    tracker.record(&op.id, last_elapsed, false);
    let row = finish(op, false, last_elapsed, retries, last_error);
    cache.put(row.clone());
    TaskOutcome::Row(row)
}

fn finish(
    op: &OperationSpec,
    accessible: bool,
    elapsed: Duration,
    attempts: u32,
    error_code: Option<String>,
) -> ProbeOutcome {
    ProbeOutcome {
        operation_id: op.id.clone(),
        accessible,
        score: scoring::operation_score(op, accessible),
        elapsed_ms: elapsed.as_millis() as u64,
        attempts,
        error_code,
    }
}
