//! Token-bucket rate limiting, one bucket per `(service, model)` pair.
//!
//! `testgen_core::RateLimitBucket` already carries the lazy-refill math;
//! this module is the thin service wrapper the router calls before
//! dispatching a worker step, persisting the bucket back to the hot store
//! after every attempt so the limit survives a restart.

use chrono::Utc;
use testgen_core::{PipelineError, PipelineResult, ProviderError, RateLimitBucket, SharedHotStore};

pub struct RateLimiter {
    store: SharedHotStore,
    default_capacity: f64,
    default_refill_per_sec: f64,
}

impl RateLimiter {
    pub fn new(store: SharedHotStore, default_capacity: f64, default_refill_per_sec: f64) -> Self {
        Self {
            store,
            default_capacity,
            default_refill_per_sec,
        }
    }

    /// Try to take one unit of capacity for `(service, model)`. On success
    /// the updated bucket is persisted; on exhaustion the bucket is left
    /// untouched so unrelated callers still see the pre-attempt state.
    pub fn try_acquire(&self, service: &str, model: &str) -> PipelineResult<()> {
        let mut bucket = self
            .store
            .get_rate_limit_bucket(service, model)
            .map_err(|e| PipelineError::Store(e.to_string()))?
            .unwrap_or_else(|| RateLimitBucket::new(self.default_capacity, self.default_refill_per_sec));

        let now = Utc::now().timestamp();
        if !bucket.try_take(now, 1.0) {
            return Err(PipelineError::Provider(ProviderError::RateLimited {
                service: service.to_string(),
                retry_after_ms: retry_after_ms(&bucket),
            }));
        }

        self.store
            .put_rate_limit_bucket(service, model, &bucket)
            .map_err(|e| PipelineError::Store(e.to_string()))
    }
}

/// How long until the bucket refills enough for one more unit, given it is
/// currently short by `1.0 - tokens` (tokens is always < 1.0 here).
fn retry_after_ms(bucket: &RateLimitBucket) -> u64 {
    if bucket.refill_per_sec <= 0.0 {
        return 1_000;
    }
    let deficit = (1.0 - bucket.tokens).max(0.0);
    ((deficit / bucket.refill_per_sec) * 1000.0).ceil() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use testgen_core::HotStore;

    fn store() -> (tempfile::TempDir, SharedHotStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = HotStore::open(dir.path()).unwrap().shared();
        (dir, store)
    }

    #[test]
    fn first_acquire_succeeds_and_persists_the_bucket() {
        let (_dir, store) = store();
        let limiter = RateLimiter::new(store, 2.0, 1.0);
        limiter.try_acquire("easy", "gpt-4o-mini").unwrap();
        limiter.try_acquire("easy", "gpt-4o-mini").unwrap();
    }

    #[test]
    fn exhausted_bucket_is_rate_limited() {
        let (_dir, store) = store();
        let limiter = RateLimiter::new(store, 1.0, 0.0);
        limiter.try_acquire("hard", "gpt-4o").unwrap();
        let err = limiter.try_acquire("hard", "gpt-4o").unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Provider(ProviderError::RateLimited { .. })
        ));
    }

    #[test]
    fn distinct_models_get_distinct_buckets() {
        let (_dir, store) = store();
        let limiter = RateLimiter::new(store, 1.0, 0.0);
        limiter.try_acquire("easy", "model-a").unwrap();
        limiter.try_acquire("easy", "model-b").unwrap();
    }
}
