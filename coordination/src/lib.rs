//! Core state, event, and decision plane for the test-generation pipeline.
//!
//! This crate holds the parts of the system that are not a worker's LLM
//! call: the hot store (RocksDB-backed Task/Pattern/HITL/event records),
//! the pattern retrieval index, the pub/sub event bus and durable event
//! log, the repair-loop escalation engine, the worker dispatch registry,
//! and the patch engine used by the Repair worker.

pub mod error;
pub mod escalation;
pub mod events;
pub mod patch;
pub mod registry;
pub mod state;

pub use error::{
    BudgetError, InputError, LifecycleError, PipelineError, PipelineResult, ProviderError,
    QualityError, RuntimeError, SafetyError,
};
pub use escalation::{
    EscalationConfig, EscalationDecision, EscalationEngine, EscalationState, EscalationTrigger,
    RepairBudget, RepairIteration, SuggestedAction,
};
pub use events::{
    AgentOutcome, EventBus, EventBusError, EventBusExt, EventBusResult, EventFilter, EventHistory,
    EventId, EventStats, FilteredReceiver, HistoryError, HistoryResult, PipelineEvent,
    ReplayBuilder, ReplayStats, SharedEventBus,
};
pub use patch::{HunkResult, MatchKind, PatchConfig, PatchEngine, PatchHunk, PatchResult};
pub use registry::{PipelineStep, Worker, WorkerInput, WorkerOutput, WorkerRegistry};
pub use state::{
    Artifact, ArtifactKind, Attempt, AttemptOutcome, BudgetStatus, Complexity, CostBucket,
    HitlContextBundle, HitlItem, HitlResolution, HitlStatus, HotStore, Intent, IntentType,
    LifecycleTaskRecord, PatternMetadata, RateLimitBucket, RetrievalPattern, SecretSlot,
    SessionAggregates, SessionId, SharedHotStore, StoreError, StoreResult, Task, TaskId,
    TaskStatus, VectorIndex,
};
