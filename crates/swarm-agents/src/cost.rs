//! Cost tracker: atomic per-attempt spend recording across the rolling
//! windows the session/daily caps are checked against.
//!
//! Each `(window, agent, model, feature)` tuple gets its own
//! `testgen_core::CostBucket` in the hot store; windows are independent —
//! an hourly cap breach doesn't imply a daily one.

use testgen_core::{BudgetError, PipelineError, PipelineResult, SharedHotStore};

use crate::config::Tier;

/// Rough per-call cost estimate from prompt/completion text length. The
/// `rig` `.prompt()` convenience call the agents use doesn't surface
/// provider token-usage metadata, so spend is approximated at ~4 chars per
/// token, billed per 1k tokens at the endpoint tier's rate.
pub fn estimate_llm_cost(tier: Tier, prompt: &str, completion: &str) -> f64 {
    let tokens = (prompt.len() + completion.len()) as f64 / 4.0;
    (tokens / 1000.0) * tier.cost_per_1k_tokens()
}

/// The windows every recorded cost is accumulated into. Checked
/// independently so a burst can trip the hourly cap without touching the
/// monthly one.
pub const WINDOWS: [&str; 4] = ["hourly", "daily", "weekly", "monthly"];

pub struct CostTracker {
    store: SharedHotStore,
}

impl CostTracker {
    pub fn new(store: SharedHotStore) -> Self {
        Self { store }
    }

    /// Record `cost` against every window for `(agent, model, feature)`.
    pub fn record(&self, agent: &str, model: &str, feature: &str, cost: f64) -> PipelineResult<()> {
        for window in WINDOWS {
            let mut bucket = self
                .store
                .get_cost_bucket(window, agent, model, feature)
                .map_err(|e| PipelineError::Store(e.to_string()))?;
            bucket.record(cost);
            self.store
                .put_cost_bucket(window, agent, model, feature, &bucket)
                .map_err(|e| PipelineError::Store(e.to_string()))?;
        }
        Ok(())
    }

    /// Total spend recorded in `window` for `(agent, model, feature)`.
    pub fn spend(&self, window: &str, agent: &str, model: &str, feature: &str) -> PipelineResult<f64> {
        Ok(self
            .store
            .get_cost_bucket(window, agent, model, feature)
            .map_err(|e| PipelineError::Store(e.to_string()))?
            .total)
    }

    /// Errors iff `window`'s accumulated spend for `(agent, model, feature)`
    /// is at or beyond `cap`.
    pub fn check_window(
        &self,
        window: &str,
        agent: &str,
        model: &str,
        feature: &str,
        cap: f64,
    ) -> PipelineResult<()> {
        let spent = self.spend(window, agent, model, feature)?;
        if spent >= cap {
            return Err(PipelineError::Budget(BudgetError::WindowCapReached {
                window: window.to_string(),
                spent,
                cap,
            }));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use testgen_core::HotStore;

    fn tracker() -> (tempfile::TempDir, CostTracker) {
        let dir = tempfile::tempdir().unwrap();
        let store = HotStore::open(dir.path()).unwrap().shared();
        (dir, CostTracker::new(store))
    }

    #[test]
    fn record_accumulates_across_all_windows() {
        let (_dir, tracker) = tracker();
        tracker.record("generator", "gpt-4o-mini", "login", 1.5).unwrap();
        tracker.record("generator", "gpt-4o-mini", "login", 0.5).unwrap();
        for window in WINDOWS {
            assert_eq!(
                tracker.spend(window, "generator", "gpt-4o-mini", "login").unwrap(),
                2.0
            );
        }
    }

    #[test]
    fn check_window_errors_once_cap_reached() {
        let (_dir, tracker) = tracker();
        tracker.record("repair", "gpt-4o", "checkout", 10.0).unwrap();
        assert!(tracker.check_window("daily", "repair", "gpt-4o", "checkout", 10.0).is_err());
        assert!(tracker.check_window("daily", "repair", "gpt-4o", "checkout", 20.0).is_ok());
    }

    #[test]
    fn windows_are_independent() {
        let (_dir, tracker) = tracker();
        tracker.record("critic", "rule_based", "signup", 5.0).unwrap();
        assert!(tracker.check_window("hourly", "critic", "rule_based", "signup", 5.0).is_err());
    }
}
