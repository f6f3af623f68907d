//! RocksDB-backed hot store: session, queue, and task state.
//!
//! Column families separate entity kinds while sharing one DB handle.
//! Per-key operations are atomic; Task rows are mutated only by the thread
//! owning the Task, so no cross-key transaction is needed here.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;

use bincode::config::standard;
use chrono::Utc;
use rocksdb::{ColumnFamilyDescriptor, Options, DB};
use serde::{de::DeserializeOwned, Serialize};

use super::schema::{self, keys, ALL_CFS};
use super::types::{
    CostBucket, HitlItem, LifecycleTaskRecord, RateLimitBucket, RetrievalPattern, SecretSlot, Task,
};

pub type SharedHotStore = Arc<HotStore>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("rocksdb error: {0}")]
    RocksDb(#[from] rocksdb::Error),

    #[error("encode error: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("decode error: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    #[error("column family not found: {0}")]
    MissingColumnFamily(&'static str),
}

pub type StoreResult<T> = Result<T, StoreError>;

pub struct HotStore {
    db: DB,
}

impl HotStore {
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect();

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;
        Ok(Self { db })
    }

    pub fn shared(self) -> SharedHotStore {
        Arc::new(self)
    }

    fn cf(&self, name: &'static str) -> StoreResult<&rocksdb::ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or(StoreError::MissingColumnFamily(name))
    }

    fn put<T: Serialize>(&self, cf: &'static str, key: &str, value: &T) -> StoreResult<()> {
        let bytes = bincode::serde::encode_to_vec(value, standard())?;
        self.db.put_cf(self.cf(cf)?, key.as_bytes(), bytes)?;
        Ok(())
    }

    fn get<T: DeserializeOwned>(&self, cf: &'static str, key: &str) -> StoreResult<Option<T>> {
        match self.db.get_cf(self.cf(cf)?, key.as_bytes())? {
            Some(bytes) => {
                let (value, _) = bincode::serde::decode_from_slice(&bytes, standard())?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn delete(&self, cf: &'static str, key: &str) -> StoreResult<()> {
        self.db.delete_cf(self.cf(cf)?, key.as_bytes())?;
        Ok(())
    }

    // ---- Task ----

    pub fn put_task(&self, task: &Task) -> StoreResult<()> {
        self.put(schema::CF_TASKS, &keys::task(&task.id), task)
    }

    pub fn get_task(&self, task_id: &str) -> StoreResult<Option<Task>> {
        self.get(schema::CF_TASKS, &keys::task(task_id))
    }

    // ---- Retrieval patterns (vector index is layered on top, see vector_index.rs) ----

    pub fn put_pattern(&self, pattern: &RetrievalPattern) -> StoreResult<()> {
        self.put(schema::CF_PATTERNS, &keys::pattern(&pattern.id), pattern)
    }

    pub fn all_patterns(&self) -> StoreResult<Vec<RetrievalPattern>> {
        let cf = self.cf(schema::CF_PATTERNS)?;
        let mut out = Vec::new();
        for item in self.db.iterator_cf(cf, rocksdb::IteratorMode::Start) {
            let (_, bytes) = item?;
            let (pattern, _) = bincode::serde::decode_from_slice(&bytes, standard())?;
            out.push(pattern);
        }
        Ok(out)
    }

    // ---- Rate-limit buckets ----

    pub fn get_rate_limit_bucket(
        &self,
        service: &str,
        model: &str,
    ) -> StoreResult<Option<RateLimitBucket>> {
        self.get(schema::CF_RATE_LIMITS, &keys::rate_limit(service, model))
    }

    pub fn put_rate_limit_bucket(
        &self,
        service: &str,
        model: &str,
        bucket: &RateLimitBucket,
    ) -> StoreResult<()> {
        self.put(
            schema::CF_RATE_LIMITS,
            &keys::rate_limit(service, model),
            bucket,
        )
    }

    // ---- Secrets ----

    pub fn get_secret(&self, slot: &str) -> StoreResult<Option<SecretSlot>> {
        self.get(schema::CF_SECRETS, &keys::secret(slot))
    }

    pub fn put_secret(&self, slot: &str, value: &SecretSlot) -> StoreResult<()> {
        self.put(schema::CF_SECRETS, &keys::secret(slot), value)
    }

    // ---- Cost buckets ----

    pub fn get_cost_bucket(
        &self,
        window: &str,
        agent: &str,
        model: &str,
        feature: &str,
    ) -> StoreResult<CostBucket> {
        Ok(self
            .get(schema::CF_COST, &keys::cost(window, agent, model, feature))?
            .unwrap_or_default())
    }

    pub fn put_cost_bucket(
        &self,
        window: &str,
        agent: &str,
        model: &str,
        feature: &str,
        bucket: &CostBucket,
    ) -> StoreResult<()> {
        self.put(
            schema::CF_COST,
            &keys::cost(window, agent, model, feature),
            bucket,
        )
    }

    // ---- HITL queue ----

    pub fn put_hitl(&self, item: &HitlItem) -> StoreResult<()> {
        self.put(schema::CF_HITL, &keys::hitl(&item.task_id), item)
    }

    pub fn get_hitl(&self, task_id: &str) -> StoreResult<Option<HitlItem>> {
        self.get(schema::CF_HITL, &keys::hitl(task_id))
    }

    // ---- Lifecycle active-task registry ----

    pub fn register_active_task(&self, record: &LifecycleTaskRecord) -> StoreResult<()> {
        self.put(
            schema::CF_LIFECYCLE,
            &keys::lifecycle(&record.task_id),
            record,
        )
    }

    pub fn unregister_active_task(&self, task_id: &str) -> StoreResult<()> {
        self.delete(schema::CF_LIFECYCLE, &keys::lifecycle(task_id))
    }

    pub fn active_tasks(&self) -> StoreResult<Vec<LifecycleTaskRecord>> {
        let cf = self.cf(schema::CF_LIFECYCLE)?;
        let mut out = Vec::new();
        for item in self.db.iterator_cf(cf, rocksdb::IteratorMode::Start) {
            let (_, bytes) = item?;
            let (record, _) = bincode::serde::decode_from_slice(&bytes, standard())?;
            out.push(record);
        }
        Ok(out)
    }

    // ---- Lists with TTL (emulates Redis list+TTL semantics on top of
    //      column families, without introducing a redis dependency) ----

    /// Push a value onto the list at `key`, setting/refreshing its TTL.
    pub fn list_push(&self, key: &str, value: &str, ttl_secs: i64) -> StoreResult<()> {
        let mut list: VecDeque<String> = self.get(schema::CF_LISTS, key)?.unwrap_or_default();
        list.push_back(value.to_string());
        self.put(schema::CF_LISTS, key, &list)?;
        let expires_at = Utc::now().timestamp() + ttl_secs;
        self.put(schema::CF_TTL, key, &expires_at)
    }

    /// Read the list at `key`, returning an empty vec if it has expired.
    pub fn list_range(&self, key: &str) -> StoreResult<Vec<String>> {
        if self.is_expired(key)? {
            return Ok(Vec::new());
        }
        let list: VecDeque<String> = self.get(schema::CF_LISTS, key)?.unwrap_or_default();
        Ok(list.into_iter().collect())
    }

    fn is_expired(&self, key: &str) -> StoreResult<bool> {
        match self.get::<i64>(schema::CF_TTL, key)? {
            Some(expires_at) => Ok(Utc::now().timestamp() >= expires_at),
            None => Ok(false),
        }
    }

    // ---- Event append log (timestamp-ordered, used by the event bus for
    //      durable persistence; see events::bus and events::history) ----

    pub fn put_event_bytes(
        &self,
        timestamp_nanos: i64,
        event_id: &str,
        bytes: &[u8],
    ) -> StoreResult<()> {
        let key = keys::event(timestamp_nanos, event_id);
        self.db
            .put_cf(self.cf(schema::CF_EVENTS)?, key.as_bytes(), bytes)?;
        Ok(())
    }

    pub fn events_in_range(
        &self,
        from_nanos: i64,
        to_nanos: i64,
    ) -> StoreResult<Vec<(i64, Vec<u8>)>> {
        let cf = self.cf(schema::CF_EVENTS)?;
        let start = keys::event(from_nanos, "");
        let mut out = Vec::new();
        let iter = self.db.iterator_cf(
            cf,
            rocksdb::IteratorMode::From(start.as_bytes(), rocksdb::Direction::Forward),
        );
        for item in iter {
            let (key, bytes) = item?;
            let key_str = String::from_utf8_lossy(&key);
            match keys::parse_event_timestamp(&key_str) {
                Some(ts) if ts <= to_nanos => out.push((ts, bytes.to_vec())),
                Some(ts) if ts > to_nanos => break,
                _ => continue,
            }
        }
        Ok(out)
    }

    /// Delete events older than `cutoff_nanos`. Used by the daily log
    /// rotation/retention sweep.
    pub fn prune_events_before(&self, cutoff_nanos: i64) -> StoreResult<usize> {
        let cf = self.cf(schema::CF_EVENTS)?;
        let mut pruned = 0usize;
        let mut to_delete = Vec::new();
        for item in self.db.iterator_cf(cf, rocksdb::IteratorMode::Start) {
            let (key, _) = item?;
            let key_str = String::from_utf8_lossy(&key);
            match keys::parse_event_timestamp(&key_str) {
                Some(ts) if ts < cutoff_nanos => to_delete.push(key.to_vec()),
                Some(_) => break,
                None => continue,
            }
        }
        for key in to_delete {
            self.db.delete_cf(cf, &key)?;
            pruned += 1;
        }
        Ok(pruned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::types::{Intent, IntentType};

    fn temp_store() -> (tempfile::TempDir, HotStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = HotStore::open(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn task_round_trips() {
        let (_dir, store) = temp_store();
        let intent = Intent::new(IntentType::CreateTest, "write a test", 0.9);
        let task = Task::new(&intent);
        store.put_task(&task).unwrap();
        let fetched = store.get_task(&task.id).unwrap().unwrap();
        assert_eq!(fetched.id, task.id);
    }

    #[test]
    fn list_push_and_range() {
        let (_dir, store) = temp_store();
        store
            .list_push("voice:s1:transcripts", "hello", 3600)
            .unwrap();
        store
            .list_push("voice:s1:transcripts", "world", 3600)
            .unwrap();
        let items = store.list_range("voice:s1:transcripts").unwrap();
        assert_eq!(items, vec!["hello".to_string(), "world".to_string()]);
    }

    #[test]
    fn list_expires_after_ttl() {
        let (_dir, store) = temp_store();
        store.list_push("voice:s2:transcripts", "x", -1).unwrap();
        let items = store.list_range("voice:s2:transcripts").unwrap();
        assert!(items.is_empty());
    }

    #[test]
    fn event_range_query() {
        let (_dir, store) = temp_store();
        store.put_event_bytes(100, "e1", b"payload-1").unwrap();
        store.put_event_bytes(200, "e2", b"payload-2").unwrap();
        store.put_event_bytes(300, "e3", b"payload-3").unwrap();
        let range = store.events_in_range(150, 250).unwrap();
        assert_eq!(range.len(), 1);
        assert_eq!(range[0].0, 200);
    }

    #[test]
    fn prune_removes_old_events_only() {
        let (_dir, store) = temp_store();
        store.put_event_bytes(100, "e1", b"old").unwrap();
        store.put_event_bytes(900, "e2", b"new").unwrap();
        let pruned = store.prune_events_before(500).unwrap();
        assert_eq!(pruned, 1);
        assert_eq!(store.events_in_range(0, 1000).unwrap().len(), 1);
    }
}
