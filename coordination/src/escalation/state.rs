//! Repair escalation state — tracks the single shared repair-attempt counter
//! and the history behind an escalation decision for one Task.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Budget for the repair loop on a single Task.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RepairBudget {
    pub max_attempts: u32,
}

impl Default for RepairBudget {
    fn default() -> Self {
        Self { max_attempts: 3 }
    }
}

/// Record of a single repair attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepairIteration {
    pub attempt: u32,
    pub timestamp: DateTime<Utc>,
    pub new_failures: usize,
    pub confidence: f32,
    pub suspected_app_side: bool,
    pub honored_invariant: bool,
}

/// Why a Task was escalated to the HITL queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationTrigger {
    /// Repair attempts on this Task exceeded the bound.
    MaxAttemptsReached { attempts: u32, max: u32 },
    /// A repair introduced regressions that had to be rolled back.
    RegressionIntroduced { new_failures: usize },
    /// The repair diagnosis confidence fell below threshold.
    LowConfidence { confidence: f32, threshold: f32 },
    /// The failure looks like an application-side change, not a test bug.
    SuspectedAppSideBreakage,
}

impl std::fmt::Display for EscalationTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MaxAttemptsReached { attempts, max } => {
                write!(f, "repair attempts {attempts} reached bound {max}")
            }
            Self::RegressionIntroduced { new_failures } => {
                write!(f, "repair introduced {new_failures} new failure(s)")
            }
            Self::LowConfidence {
                confidence,
                threshold,
            } => write!(
                f,
                "diagnosis confidence {confidence:.2} below threshold {threshold:.2}"
            ),
            Self::SuspectedAppSideBreakage => {
                write!(f, "failure suspected to be an application-side change")
            }
        }
    }
}

/// Full escalation state for a single Task's repair loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationState {
    pub task_id: String,
    pub budget: RepairBudget,
    /// The shared counter: incremented on every repair attempt regardless of
    /// whether the triggering failure was the original error persisting or a
    /// new regression that was rolled back.
    pub attempts: u32,
    pub history: Vec<RepairIteration>,
    pub resolved: bool,
    pub escalated_to: Option<EscalationTrigger>,
    pub last_activity: DateTime<Utc>,
}

impl EscalationState {
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            budget: RepairBudget::default(),
            attempts: 0,
            history: Vec::new(),
            resolved: false,
            escalated_to: None,
            last_activity: Utc::now(),
        }
    }

    pub fn with_budget(mut self, budget: RepairBudget) -> Self {
        self.budget = budget;
        self
    }

    /// Record a repair attempt. Counts toward the bound whether the repair
    /// ultimately honored the hippocratic invariant or was rolled back.
    pub fn record_attempt(
        &mut self,
        new_failures: usize,
        confidence: f32,
        suspected_app_side: bool,
    ) {
        self.attempts += 1;
        let honored_invariant = new_failures == 0;
        self.history.push(RepairIteration {
            attempt: self.attempts,
            timestamp: Utc::now(),
            new_failures,
            confidence,
            suspected_app_side,
            honored_invariant,
        });
        if honored_invariant {
            self.resolved = true;
        }
        self.last_activity = Utc::now();
    }

    pub fn remaining_attempts(&self) -> u32 {
        self.budget.max_attempts.saturating_sub(self.attempts)
    }

    pub fn record_escalation(&mut self, trigger: EscalationTrigger) {
        self.escalated_to = Some(trigger);
        self.last_activity = Utc::now();
    }

    pub fn summary(&self) -> String {
        format!(
            "task={} attempts={} resolved={} escalated={}",
            self.task_id,
            self.attempts,
            self.resolved,
            self.escalated_to.is_some()
        )
    }
}
