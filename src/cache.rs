// Probe outcome cache with a TTL
// Per-key async locks let callers make check-probe-store atomic, so an
// operation shared by several flows only touches the wire once per window

use crate::models::ProbeOutcome;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

struct CacheEntry {
    outcome: ProbeOutcome,
    stored_at: Instant,
}

#[derive(Clone)]
pub struct ProbeCache {
    entries: Arc<DashMap<String, CacheEntry>>,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
    ttl: Duration,
}

impl ProbeCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            locks: Arc::new(DashMap::new()),
            ttl,
        }
    }

    /// Fresh outcome for the operation, or None. Expired entries are
    /// dropped on read.
    pub fn get(&self, operation_id: &str) -> Option<ProbeOutcome> {
        let hit = self
            .entries
            .get(operation_id)
            .map(|entry| (entry.outcome.clone(), entry.stored_at));
        match hit {
            Some((outcome, stored_at)) if stored_at.elapsed() < self.ttl => Some(outcome),
            Some(_) => {
                self.entries.remove(operation_id);
                None
            }
            None => None,
        }
    }

    /// Store an outcome, success or failure alike.
    pub fn put(&self, outcome: ProbeOutcome) {
        self.entries.insert(
            outcome.operation_id.clone(),
            CacheEntry {
                outcome,
                stored_at: Instant::now(),
            },
        );
    }

    /// Async lock dedicated to one operation id. Hold it across the
    /// get-probe-put sequence to keep duplicate probes off the wire.
    pub fn lock_for(&self, operation_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(operation_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn purge_expired(&self) {
        self.entries
            .retain(|_, entry| entry.stored_at.elapsed() < self.ttl);
    }
}

impl Default for ProbeCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(id: &str, accessible: bool) -> ProbeOutcome {
        ProbeOutcome {
            operation_id: id.to_string(),
            accessible,
            score: if accessible { 10 } else { 0 },
            elapsed_ms: 5,
            attempts: 1,
            error_code: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_returns_fresh_entry() {
        let cache = ProbeCache::new(Duration::from_secs(300));
        cache.put(outcome("iam_users", true));

        let hit = cache.get("iam_users").expect("entry should be fresh");
        assert!(hit.accessible);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_after_ttl() {
        let cache = ProbeCache::new(Duration::from_secs(300));
        cache.put(outcome("iam_users", true));

        tokio::time::advance(Duration::from_secs(301)).await;

        assert!(cache.get("iam_users").is_none());
        // Expired entry is dropped on read
        assert_eq!(cache.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_survives_just_under_ttl() {
        let cache = ProbeCache::new(Duration::from_secs(300));
        cache.put(outcome("s3_buckets", false));

        tokio::time::advance(Duration::from_secs(299)).await;

        let hit = cache.get("s3_buckets").expect("entry still inside the TTL");
        assert!(!hit.accessible);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_are_cached_too() {
        let cache = ProbeCache::new(Duration::from_secs(300));
        cache.put(outcome("ec2_instances", false));

        let hit = cache.get("ec2_instances").expect("failure outcomes cache as well");
        assert!(!hit.accessible);
        assert_eq!(hit.score, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired_sweeps_old_entries() {
        let cache = ProbeCache::new(Duration::from_secs(300));
        cache.put(outcome("a", true));
        tokio::time::advance(Duration::from_secs(200)).await;
        cache.put(outcome("b", true));
        tokio::time::advance(Duration::from_secs(150)).await;

        cache.purge_expired();

        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_some());
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lock_for_hands_out_same_lock_per_id() {
        let cache = ProbeCache::default();
        let first = cache.lock_for("iam_users");
        let second = cache.lock_for("iam_users");
        assert!(Arc::ptr_eq(&first, &second));

        let other = cache.lock_for("s3_buckets");
        assert!(!Arc::ptr_eq(&first, &other));
    }
}
