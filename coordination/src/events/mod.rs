//! Pipeline event bus, durable history, and the closed event taxonomy.

pub mod bus;
pub mod history;
pub mod types;

pub use bus::{
    EventBus, EventBusError, EventBusExt, EventBusResult, EventFilter, FilteredReceiver,
    SharedEventBus,
};
pub use history::{
    EventHistory, EventStats, HistoryError, HistoryResult, ReplayBuilder, ReplayStats,
};
pub use types::{AgentOutcome, EventId, PipelineEvent};
