//! Event bus: pub/sub over `tokio::sync::broadcast` with optional durable
//! persistence to the hot store's event log.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::types::PipelineEvent;
use crate::state::SharedHotStore;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("failed to send event: {0}")]
    SendFailed(String),

    #[error("failed to persist event: {0}")]
    PersistFailed(String),

    #[error("channel closed")]
    ChannelClosed,
}

pub type EventBusResult<T> = Result<T, EventBusError>;
pub type SharedEventBus = Arc<EventBus>;

pub struct EventBus {
    sender: broadcast::Sender<PipelineEvent>,
    store: Option<SharedHotStore>,
    persist_events: bool,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            sender,
            store: None,
            persist_events: false,
        }
    }

    pub fn with_persistence(store: SharedHotStore) -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            sender,
            store: Some(store),
            persist_events: true,
        }
    }

    pub fn shared(self) -> SharedEventBus {
        Arc::new(self)
    }

    pub fn set_persist_events(&mut self, persist: bool) {
        self.persist_events = persist;
    }

    pub fn publish(&self, event: PipelineEvent) -> EventBusResult<()> {
        let event_type = event.event_type();
        let timestamp = event.timestamp();

        if self.persist_events {
            if let Some(store) = &self.store {
                let event_id = PipelineEvent::new_id();
                let timestamp_nanos = timestamp.timestamp_nanos_opt().unwrap_or(0);
                let bytes = match bincode::serde::encode_to_vec(&event, bincode::config::standard())
                {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        warn!(event_type, "failed to encode event: {e}");
                        return Err(EventBusError::PersistFailed(e.to_string()));
                    }
                };
                if let Err(e) = store.put_event_bytes(timestamp_nanos, &event_id, &bytes) {
                    warn!(event_type, "failed to persist event: {e}");
                    return Err(EventBusError::PersistFailed(e.to_string()));
                }
                debug!(event_type, event_id, "event persisted");
            }
        }

        match self.sender.send(event) {
            Ok(count) => {
                debug!(event_type, receivers = count, "event published");
                Ok(())
            }
            Err(_) => {
                debug!(event_type, "event published (no receivers)");
                Ok(())
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn has_subscribers(&self) -> bool {
        self.sender.receiver_count() > 0
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Event filter for selective subscription, by task or event type.
pub struct EventFilter {
    pub task_id: Option<String>,
    pub event_types: Option<Vec<String>>,
}

impl EventFilter {
    pub fn new() -> Self {
        Self {
            task_id: None,
            event_types: None,
        }
    }

    pub fn task(mut self, task_id: &str) -> Self {
        self.task_id = Some(task_id.to_string());
        self
    }

    pub fn types(mut self, event_types: Vec<&str>) -> Self {
        self.event_types = Some(event_types.into_iter().map(String::from).collect());
        self
    }

    pub fn matches(&self, event: &PipelineEvent) -> bool {
        if let Some(ref tid) = self.task_id {
            if let Some(event_tid) = event.task_id() {
                if event_tid != tid {
                    return false;
                }
            } else {
                return false;
            }
        }

        if let Some(ref types) = self.event_types {
            if !types.iter().any(|t| t == event.event_type()) {
                return false;
            }
        }

        true
    }
}

impl Default for EventFilter {
    fn default() -> Self {
        Self::new()
    }
}

pub struct FilteredReceiver {
    receiver: broadcast::Receiver<PipelineEvent>,
    filter: EventFilter,
}

impl FilteredReceiver {
    pub fn new(receiver: broadcast::Receiver<PipelineEvent>, filter: EventFilter) -> Self {
        Self { receiver, filter }
    }

    pub async fn recv(&mut self) -> Result<PipelineEvent, broadcast::error::RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.filter.matches(&event) {
                return Ok(event);
            }
        }
    }
}

pub trait EventBusExt {
    fn subscribe_filtered(&self, filter: EventFilter) -> FilteredReceiver;
}

impl EventBusExt for EventBus {
    fn subscribe_filtered(&self, filter: EventFilter) -> FilteredReceiver {
        FilteredReceiver::new(self.subscribe(), filter)
    }
}

impl EventBusExt for SharedEventBus {
    fn subscribe_filtered(&self, filter: EventFilter) -> FilteredReceiver {
        FilteredReceiver::new(self.subscribe(), filter)
    }
}
