// Rolling per-operation performance history
// Feeds adaptive probe timeouts, retry backoff, and the run summary

use crate::catalog::OperationSpec;
use crate::models::OperationClass;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

const HISTORY_LIMIT: usize = 10;
const READ_TIMEOUT: Duration = Duration::from_secs(3);
const INTERMEDIATE_TIMEOUT: Duration = Duration::from_secs(6);
const WRITE_TIMEOUT: Duration = Duration::from_secs(15);
const MAX_TIMEOUT: Duration = Duration::from_secs(30);
const MIN_TIMEOUT: Duration = Duration::from_secs(1);
const BASE_RETRY_DELAY: Duration = Duration::from_secs(1);
const BACKOFF_MULTIPLIER: f64 = 1.5;
const MAX_BACKOFF: Duration = Duration::from_secs(30);
const SLOWEST_SHOWN: usize = 3;

#[derive(Debug, Clone)]
struct Sample {
    elapsed: Duration,
    success: bool,
}

/// Shared, clonable tracker. The identity probe and every engine worker
/// record into the same history so the summary covers the whole run.
#[derive(Clone)]
pub struct PerformanceTracker {
    history: Arc<DashMap<String, VecDeque<Sample>>>,
    total: Arc<AtomicU64>,
    successful: Arc<AtomicU64>,
}

impl PerformanceTracker {
    pub fn new() -> Self {
        Self {
            history: Arc::new(DashMap::new()),
            total: Arc::new(AtomicU64::new(0)),
            successful: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Record the final attempt of one probe. History keeps the last ten
    /// samples per operation, oldest out first.
    pub fn record(&self, operation_id: &str, elapsed: Duration, success: bool) {
        let mut samples = self.history.entry(operation_id.to_string()).or_default();
        if samples.len() == HISTORY_LIMIT {
            samples.pop_front();
        }
        samples.push_back(Sample { elapsed, success });
        drop(samples);

        self.total.fetch_add(1, Ordering::Relaxed);
        if success {
            self.successful.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn average_elapsed(&self, operation_id: &str) -> Option<Duration> {
        let samples = self.history.get(operation_id)?;
        if samples.is_empty() {
            return None;
        }
        let sum: Duration = samples.iter().map(|s| s.elapsed).sum();
        Some(sum / samples.len() as u32)
    }

    /// Probe time budget for an operation. Without history the class and
    /// identifier decide; with history the budget tracks three times the
    /// recent average, clamped between one and thirty seconds.
    pub fn adaptive_timeout(&self, op: &OperationSpec) -> Duration {
        if let Some(avg) = self.average_elapsed(&op.id) {
            return (avg * 3).clamp(MIN_TIMEOUT, MAX_TIMEOUT);
        }
        base_timeout_for(op)
    }

    /// Delay before retry number `attempt` (1-based), growing by half each
    /// round and capped at thirty seconds. Await it; never block a thread.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = BACKOFF_MULTIPLIER.powi(attempt as i32);
        BASE_RETRY_DELAY.mul_f64(factor).min(MAX_BACKOFF)
    }

    pub fn summary(&self) -> PerformanceSummary {
        let total = self.total.load(Ordering::Relaxed);
        let successful = self.successful.load(Ordering::Relaxed);
        let success_rate_percent = if total == 0 {
            0.0
        } else {
            successful as f64 * 100.0 / total as f64
        };

        let mut averages: Vec<SlowOperation> = self
            .history
            .iter()
            .filter_map(|entry| {
                if entry.value().is_empty() {
                    return None;
                }
                let sum: Duration = entry.value().iter().map(|s| s.elapsed).sum();
                let avg = sum / entry.value().len() as u32;
                Some(SlowOperation {
                    operation_id: entry.key().clone(),
                    average_ms: avg.as_millis() as u64,
                })
            })
            .collect();
        averages.sort_by(|a, b| b.average_ms.cmp(&a.average_ms).then(a.operation_id.cmp(&b.operation_id)));
        averages.truncate(SLOWEST_SHOWN);

        PerformanceSummary {
            total_probes: total,
            successful_probes: successful,
            failed_probes: total - successful,
            success_rate_percent,
            slowest: averages,
        }
    }
}

impl Default for PerformanceTracker {
    fn default() -> Self {
        Self::new()
    }
}

fn base_timeout_for(op: &OperationSpec) -> Duration {
    if op.class == OperationClass::Write {
        return WRITE_TIMEOUT;
    }
    let id = op.id.as_str();
    if id.contains("list") || id.contains("describe") || id.contains("get") {
        READ_TIMEOUT
    } else {
        INTERMEDIATE_TIMEOUT
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSummary {
    pub total_probes: u64,
    pub successful_probes: u64,
    pub failed_probes: u64,
    pub success_rate_percent: f64,
    pub slowest: Vec<SlowOperation>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlowOperation {
    pub operation_id: String,
    pub average_ms: u64,
}
