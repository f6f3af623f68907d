//! Secret manager: primary/secondary API keys per named slot, with a 24h
//! overlap window during rotation so in-flight requests signed with the
//! old key are not rejected mid-rotation.
//!
//! `testgen_core::SecretSlot` carries the rotation state machine; this
//! module is the service that reads the current key for a slot and
//! persists a new one through the hot store.

use testgen_core::{PipelineError, PipelineResult, SecretSlot, SharedHotStore};

pub struct SecretManager {
    store: SharedHotStore,
}

impl SecretManager {
    pub fn new(store: SharedHotStore) -> Self {
        Self { store }
    }

    /// The key callers should sign requests with right now. Seeds the slot
    /// from `fallback` on first use (e.g. an env-var-provided key) so a
    /// fresh store doesn't require a manual rotation before first use.
    pub fn current(&self, slot: &str, fallback: &str) -> PipelineResult<String> {
        match self.load(slot)? {
            Some(s) => Ok(s.primary),
            None => {
                let seeded = SecretSlot::single(fallback);
                self.save(slot, &seeded)?;
                Ok(seeded.primary)
            }
        }
    }

    /// Whether `candidate` is currently an accepted key for `slot` — the
    /// primary, or the secondary while its rotation overlap hasn't expired.
    pub fn accepts(&self, slot: &str, candidate: &str) -> PipelineResult<bool> {
        Ok(self
            .load(slot)?
            .map(|s| s.accepts(candidate))
            .unwrap_or(false))
    }

    /// Begin a rotation: `new_secret` becomes primary immediately, the
    /// prior primary remains accepted for 24h.
    pub fn rotate(&self, slot: &str, new_secret: impl Into<String>) -> PipelineResult<()> {
        let mut current = self.load(slot)?.unwrap_or_else(|| SecretSlot::single(""));
        current.begin_rotation(new_secret);
        self.save(slot, &current)
    }

    fn load(&self, slot: &str) -> PipelineResult<Option<SecretSlot>> {
        self.store
            .get_secret(slot)
            .map_err(|e| PipelineError::Store(e.to_string()))
    }

    fn save(&self, slot: &str, value: &SecretSlot) -> PipelineResult<()> {
        self.store
            .put_secret(slot, value)
            .map_err(|e| PipelineError::Store(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use testgen_core::HotStore;

    fn manager() -> (tempfile::TempDir, SecretManager) {
        let dir = tempfile::tempdir().unwrap();
        let store = HotStore::open(dir.path()).unwrap().shared();
        (dir, SecretManager::new(store))
    }

    #[test]
    fn current_seeds_from_fallback_on_first_use() {
        let (_dir, mgr) = manager();
        assert_eq!(mgr.current("easy", "fallback-key").unwrap(), "fallback-key");
        assert_eq!(mgr.current("easy", "ignored-second-fallback").unwrap(), "fallback-key");
    }

    #[test]
    fn rotation_accepts_both_keys_until_deadline() {
        let (_dir, mgr) = manager();
        mgr.current("hard", "old-key").unwrap();
        mgr.rotate("hard", "new-key").unwrap();

        assert_eq!(mgr.current("hard", "ignored").unwrap(), "new-key");
        assert!(mgr.accepts("hard", "new-key").unwrap());
        assert!(mgr.accepts("hard", "old-key").unwrap());
        assert!(!mgr.accepts("hard", "stale-key").unwrap());
    }

    #[test]
    fn unknown_slot_accepts_nothing() {
        let (_dir, mgr) = manager();
        assert!(!mgr.accepts("vision", "whatever").unwrap());
    }
}
