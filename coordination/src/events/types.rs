//! Event types for pipeline observability.
//!
//! These are the user-facing event contract: published on the bus for live
//! subscribers and appended to the durable event log for replay. Distinct
//! from `tracing` spans, which are developer-facing and never persisted here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state::TaskId;

pub type EventId = String;

/// The closed set of events a pipeline run can emit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    TaskQueued {
        task_id: TaskId,
        feature: String,
        est_cost: f64,
        timestamp: DateTime<Utc>,
    },

    AgentStarted {
        agent: String,
        task_id: TaskId,
        model: String,
        tools: Vec<String>,
        timestamp: DateTime<Utc>,
    },

    AgentCompleted {
        agent: String,
        task_id: TaskId,
        status: AgentOutcome,
        duration_ms: u64,
        cost_usd: f64,
        timestamp: DateTime<Utc>,
    },

    ValidationComplete {
        task_id: TaskId,
        passed: bool,
        cost: f64,
        duration_ms: u64,
        screenshots: Vec<String>,
        timestamp: DateTime<Utc>,
    },

    HitlEscalated {
        task_id: TaskId,
        attempts: u32,
        last_error: String,
        priority: f32,
        timestamp: DateTime<Utc>,
    },

    BudgetWarning {
        current_spend: f64,
        limit: f64,
        remaining: f64,
        timestamp: DateTime<Utc>,
    },

    BudgetExceeded {
        current_spend: f64,
        limit: f64,
        tasks_blocked: u32,
        timestamp: DateTime<Utc>,
    },

    ProgressUpdate {
        operation: String,
        elapsed_ms: u64,
        expected_ms: u64,
        message: String,
        timestamp: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentOutcome {
    Success,
    Failed,
    Rejected,
    Timeout,
}

impl PipelineEvent {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::TaskQueued { timestamp, .. } => *timestamp,
            Self::AgentStarted { timestamp, .. } => *timestamp,
            Self::AgentCompleted { timestamp, .. } => *timestamp,
            Self::ValidationComplete { timestamp, .. } => *timestamp,
            Self::HitlEscalated { timestamp, .. } => *timestamp,
            Self::BudgetWarning { timestamp, .. } => *timestamp,
            Self::BudgetExceeded { timestamp, .. } => *timestamp,
            Self::ProgressUpdate { timestamp, .. } => *timestamp,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::TaskQueued { .. } => "task_queued",
            Self::AgentStarted { .. } => "agent_started",
            Self::AgentCompleted { .. } => "agent_completed",
            Self::ValidationComplete { .. } => "validation_complete",
            Self::HitlEscalated { .. } => "hitl_escalated",
            Self::BudgetWarning { .. } => "budget_warning",
            Self::BudgetExceeded { .. } => "budget_exceeded",
            Self::ProgressUpdate { .. } => "progress_update",
        }
    }

    pub fn task_id(&self) -> Option<&str> {
        match self {
            Self::TaskQueued { task_id, .. } => Some(task_id),
            Self::AgentStarted { task_id, .. } => Some(task_id),
            Self::AgentCompleted { task_id, .. } => Some(task_id),
            Self::ValidationComplete { task_id, .. } => Some(task_id),
            Self::HitlEscalated { task_id, .. } => Some(task_id),
            _ => None,
        }
    }

    pub fn new_id() -> EventId {
        uuid::Uuid::new_v4().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_round_trips_through_json() {
        let event = PipelineEvent::TaskQueued {
            task_id: "task-1".to_string(),
            feature: "login flow".to_string(),
            est_cost: 0.05,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_string(&event).unwrap();
        let parsed: PipelineEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.event_type(), "task_queued");
        assert_eq!(parsed.task_id(), Some("task-1"));
    }

    #[test]
    fn budget_events_have_no_task_id() {
        let event = PipelineEvent::BudgetExceeded {
            current_spend: 2.0,
            limit: 2.0,
            tasks_blocked: 3,
            timestamp: Utc::now(),
        };
        assert_eq!(event.task_id(), None);
        assert_eq!(event.event_type(), "budget_exceeded");
    }
}
