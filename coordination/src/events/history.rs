//! Event history and replay.
//!
//! Reads the durable append log maintained by the hot store for recovery,
//! debugging, and the `status` CLI surface.

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use super::types::{AgentOutcome, PipelineEvent};
use crate::state::SharedHotStore;

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("store error: {0}")]
    StoreError(String),

    #[error("event decode error: {0}")]
    DecodeError(String),
}

pub type HistoryResult<T> = Result<T, HistoryError>;

pub struct EventHistory {
    store: SharedHotStore,
}

impl EventHistory {
    pub fn new(store: SharedHotStore) -> Self {
        Self { store }
    }

    pub fn get_events(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> HistoryResult<Vec<PipelineEvent>> {
        let start_nanos = start.timestamp_nanos_opt().unwrap_or(0);
        let end_nanos = end.timestamp_nanos_opt().unwrap_or(i64::MAX);

        let raw = self
            .store
            .events_in_range(start_nanos, end_nanos)
            .map_err(|e| HistoryError::StoreError(e.to_string()))?;

        let events = raw
            .into_iter()
            .map(|(_, bytes)| {
                bincode::serde::decode_from_slice::<PipelineEvent, _>(
                    &bytes,
                    bincode::config::standard(),
                )
                .map(|(event, _)| event)
                .map_err(|e| HistoryError::DecodeError(e.to_string()))
            })
            .collect::<HistoryResult<Vec<_>>>()?;

        debug!(count = events.len(), "retrieved events from history");
        Ok(events)
    }

    pub fn get_recent_events(&self, minutes: i64) -> HistoryResult<Vec<PipelineEvent>> {
        let end = Utc::now();
        let start = end - Duration::minutes(minutes);
        self.get_events(start, end)
    }

    pub fn get_task_events(&self, task_id: &str) -> HistoryResult<Vec<PipelineEvent>> {
        let all_events = self.get_recent_events(60 * 24)?;
        Ok(all_events
            .into_iter()
            .filter(|e| e.task_id() == Some(task_id))
            .collect())
    }

    pub async fn replay<F, Fut>(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        mut callback: F,
    ) -> HistoryResult<ReplayStats>
    where
        F: FnMut(PipelineEvent) -> Fut,
        Fut: std::future::Future<Output = ()>,
    {
        let events = self.get_events(start, end)?;
        let total = events.len();
        info!(total, "starting event replay");

        let mut stats = ReplayStats::new();
        for event in events {
            stats.record_event(&event);
            callback(event).await;
        }

        info!(
            total = stats.total_events,
            tasks = stats.tasks_seen,
            "event replay complete"
        );
        Ok(stats)
    }

    pub fn prune_before(&self, cutoff: DateTime<Utc>) -> HistoryResult<usize> {
        let cutoff_nanos = cutoff.timestamp_nanos_opt().unwrap_or(0);
        let count = self
            .store
            .prune_events_before(cutoff_nanos)
            .map_err(|e| HistoryError::StoreError(e.to_string()))?;
        info!(count, cutoff = %cutoff, "pruned old events");
        Ok(count)
    }

    pub fn get_stats(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> HistoryResult<EventStats> {
        let events = self.get_events(start, end)?;
        Ok(EventStats::from_events(&events))
    }
}

#[derive(Debug, Default)]
pub struct ReplayStats {
    pub total_events: usize,
    pub tasks_seen: usize,
    pub failures_seen: usize,
    tasks: std::collections::HashSet<String>,
}

impl ReplayStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_event(&mut self, event: &PipelineEvent) {
        self.total_events += 1;

        if let Some(task_id) = event.task_id() {
            if self.tasks.insert(task_id.to_string()) {
                self.tasks_seen += 1;
            }
        }

        if matches!(
            event,
            PipelineEvent::AgentCompleted {
                status: AgentOutcome::Failed,
                ..
            } | PipelineEvent::HitlEscalated { .. }
        ) {
            self.failures_seen += 1;
        }
    }
}

#[derive(Debug, Default, serde::Serialize)]
pub struct EventStats {
    pub total_events: usize,
    pub events_by_type: std::collections::HashMap<String, usize>,
    pub unique_tasks: usize,
    pub agent_completions: usize,
    pub hitl_escalations: usize,
    pub failures: usize,
}

impl EventStats {
    pub fn from_events(events: &[PipelineEvent]) -> Self {
        let mut stats = Self::default();
        let mut tasks = std::collections::HashSet::new();

        for event in events {
            stats.total_events += 1;
            *stats
                .events_by_type
                .entry(event.event_type().to_string())
                .or_insert(0) += 1;

            if let Some(tid) = event.task_id() {
                tasks.insert(tid.to_string());
            }

            match event {
                PipelineEvent::AgentCompleted { status, .. } => {
                    stats.agent_completions += 1;
                    if *status == AgentOutcome::Failed {
                        stats.failures += 1;
                    }
                }
                PipelineEvent::HitlEscalated { .. } => stats.hitl_escalations += 1,
                _ => {}
            }
        }

        stats.unique_tasks = tasks.len();
        stats
    }
}

/// Builder for replaying events with filters.
pub struct ReplayBuilder {
    store: SharedHotStore,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    filter_task: Option<String>,
    filter_types: Option<Vec<String>>,
}

impl ReplayBuilder {
    pub fn new(store: SharedHotStore) -> Self {
        let now = Utc::now();
        Self {
            store,
            start: now - Duration::hours(24),
            end: now,
            filter_task: None,
            filter_types: None,
        }
    }

    pub fn time_range(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.start = start;
        self.end = end;
        self
    }

    pub fn task(mut self, task_id: &str) -> Self {
        self.filter_task = Some(task_id.to_string());
        self
    }

    pub fn event_types(mut self, types: Vec<&str>) -> Self {
        self.filter_types = Some(types.into_iter().map(String::from).collect());
        self
    }

    pub fn collect(self) -> HistoryResult<Vec<PipelineEvent>> {
        let history = EventHistory::new(self.store);
        let mut events = history.get_events(self.start, self.end)?;

        if let Some(ref task_id) = self.filter_task {
            events.retain(|e| e.task_id() == Some(task_id.as_str()));
        }

        if let Some(ref types) = self.filter_types {
            events.retain(|e| types.contains(&e.event_type().to_string()));
        }

        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::HotStore;

    fn test_history() -> (EventHistory, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = HotStore::open(dir.path()).unwrap().shared();
        (EventHistory::new(store), dir)
    }

    #[test]
    fn event_stats_count_by_type() {
        let events = vec![
            PipelineEvent::TaskQueued {
                task_id: "t1".to_string(),
                feature: "login".to_string(),
                est_cost: 0.02,
                timestamp: Utc::now(),
            },
            PipelineEvent::AgentCompleted {
                agent: "generator".to_string(),
                task_id: "t1".to_string(),
                status: AgentOutcome::Failed,
                duration_ms: 10,
                cost_usd: 0.01,
                timestamp: Utc::now(),
            },
        ];

        let stats = EventStats::from_events(&events);
        assert_eq!(stats.total_events, 2);
        assert_eq!(stats.unique_tasks, 1);
        assert_eq!(stats.agent_completions, 1);
        assert_eq!(stats.failures, 1);
    }

    #[test]
    fn replay_stats_count_unique_tasks() {
        let mut stats = ReplayStats::new();
        stats.record_event(&PipelineEvent::TaskQueued {
            task_id: "t1".to_string(),
            feature: "a".to_string(),
            est_cost: 0.0,
            timestamp: Utc::now(),
        });
        stats.record_event(&PipelineEvent::TaskQueued {
            task_id: "t2".to_string(),
            feature: "b".to_string(),
            est_cost: 0.0,
            timestamp: Utc::now(),
        });
        assert_eq!(stats.total_events, 2);
        assert_eq!(stats.tasks_seen, 2);
    }

    #[test]
    fn get_task_events_round_trips_through_store() {
        let (history, _dir) = test_history();
        history
            .store
            .put_event_bytes(
                1,
                "e1",
                &bincode::serde::encode_to_vec(
                    PipelineEvent::TaskQueued {
                        task_id: "t1".to_string(),
                        feature: "login".to_string(),
                        est_cost: 0.01,
                        timestamp: Utc::now(),
                    },
                    bincode::config::standard(),
                )
                .unwrap(),
            )
            .unwrap();

        let events = history.get_task_events("t1").unwrap();
        assert_eq!(events.len(), 1);
    }
}
