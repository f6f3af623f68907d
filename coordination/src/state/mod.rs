//! Persistent state for the test-generation pipeline.
//!
//! RocksDB backs a single embedded `HotStore` with column families for
//! tasks, retrieval patterns, rate-limit buckets, secrets, cost buckets,
//! HITL items, the active-task lifecycle registry, TTL'd lists, and the
//! timestamp-ordered event log. A `VectorIndex` sits on top as a rebuilt
//! cache for nearest-neighbour pattern lookup; the store itself is the
//! source of truth.
//!
//! # Usage
//!
//! ```ignore
//! use testgen_core::state::{HotStore, Intent, IntentType, Task};
//!
//! let store = HotStore::open("./pipeline-state")?.shared();
//! let intent = Intent::new(IntentType::CreateTest, "add a login test", 0.95);
//! let task = Task::new(&intent);
//! store.put_task(&task)?;
//! ```

pub mod schema;
pub mod store;
pub mod types;
pub mod vector_index;

pub use store::{HotStore, SharedHotStore, StoreError, StoreResult};
pub use types::{
    Artifact, ArtifactKind, Attempt, AttemptOutcome, BudgetStatus, Complexity, CostBucket,
    HitlContextBundle, HitlItem, HitlResolution, HitlStatus, Intent, IntentType,
    LifecycleTaskRecord, PatternMetadata, RateLimitBucket, RetrievalPattern, SecretSlot,
    SessionAggregates, SessionId, Task, TaskId, TaskStatus,
};
pub use vector_index::VectorIndex;
