//! Pipeline state machine — legal transition guards over `TaskStatus`.
//!
//! Provides the driving state model for the orchestration loop so that:
//! 1. Every state transition is auditable and logged.
//! 2. Illegal transitions are rejected before they reach the hot store.
//! 3. Offline replay can reconstruct the exact sequence of states.
//!
//! `TaskStatus` itself lives in `testgen_core::state` (it is part of the
//! persisted `Task` record); this module owns the transition table, the
//! per-state budget tracker, and checkpoint/resume for that type.

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use testgen_core::TaskStatus;

/// Legal transitions between task states.
///
/// ```text
/// Todo       → Generating | Cancelled | BudgetBlocked
/// Generating → Critiquing | FailedGenerate
/// Critiquing → Executing | Hitl
/// Executing  → Validating | Repairing
/// Repairing  → Executing | Hitl
/// Validating → Done | Repairing | Hitl
/// ```
/// Any non-terminal state may additionally transition to `Failed`,
/// `Cancelled`, or `BudgetBlocked` — the three catch-all terminal states
/// reached by cancellation, a fatal error, or budget exhaustion.
fn is_legal_transition(from: TaskStatus, to: TaskStatus) -> bool {
    use TaskStatus::*;

    if matches!(to, Failed | Cancelled | BudgetBlocked) && !from.is_terminal() {
        return true;
    }

    matches!(
        (from, to),
        (Todo, Generating)
            | (Generating, Critiquing)
            | (Generating, FailedGenerate)
            | (Critiquing, Executing)
            | (Critiquing, Hitl)
            | (Executing, Validating)
            | (Executing, Repairing)
            | (Repairing, Executing)
            | (Repairing, Hitl)
            | (Validating, Done)
            | (Validating, Repairing)
            | (Validating, Hitl)
    )
}

/// A single recorded state transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    /// The state transitioned from.
    pub from: TaskStatus,
    /// The state transitioned to.
    pub to: TaskStatus,
    /// Repair/attempt iteration number at the time of transition.
    pub iteration: u32,
    /// Milliseconds since the state machine was created.
    pub elapsed_ms: u64,
    /// Optional context about why this transition happened.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Error returned when an illegal transition is attempted.
#[derive(Debug, Clone)]
pub struct IllegalTransition {
    pub from: TaskStatus,
    pub to: TaskStatus,
}

impl fmt::Display for IllegalTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Illegal state transition: {} → {}", self.from, self.to)
    }
}

impl std::error::Error for IllegalTransition {}

/// The per-task state machine.
///
/// Tracks the current state, enforces legal transitions, and maintains
/// a complete log of all transitions for replay and HITL diagnostics.
#[derive(Debug)]
pub struct StateMachine {
    current: TaskStatus,
    iteration: u32,
    created_at: Instant,
    transitions: Vec<TransitionRecord>,
}

impl StateMachine {
    /// Create a new state machine starting at `Todo`.
    pub fn new() -> Self {
        Self {
            current: TaskStatus::Todo,
            iteration: 0,
            created_at: Instant::now(),
            transitions: Vec::new(),
        }
    }

    /// Get the current state.
    pub fn current(&self) -> TaskStatus {
        self.current
    }

    /// Get the current iteration number.
    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    /// Set the iteration counter (called by the repair loop).
    pub fn set_iteration(&mut self, iteration: u32) {
        self.iteration = iteration;
    }

    /// Attempt to advance to the next state.
    ///
    /// Returns `Ok(())` if the transition is legal, or `Err(IllegalTransition)`
    /// if the transition would violate the state graph.
    pub fn advance(
        &mut self,
        to: TaskStatus,
        reason: Option<&str>,
    ) -> Result<(), IllegalTransition> {
        if !is_legal_transition(self.current, to) {
            return Err(IllegalTransition {
                from: self.current,
                to,
            });
        }

        let record = TransitionRecord {
            from: self.current,
            to,
            iteration: self.iteration,
            elapsed_ms: self.created_at.elapsed().as_millis() as u64,
            reason: reason.map(String::from),
        };

        tracing::debug!(
            from = %self.current,
            to = %to,
            iteration = self.iteration,
            "Task state transition"
        );

        self.transitions.push(record);
        self.current = to;
        Ok(())
    }

    /// Transition to `Failed` from any non-terminal state.
    pub fn fail(&mut self, reason: &str) -> Result<(), IllegalTransition> {
        self.advance(TaskStatus::Failed, Some(reason))
    }

    /// Transition to `Cancelled` from any non-terminal state.
    pub fn cancel(&mut self, reason: &str) -> Result<(), IllegalTransition> {
        self.advance(TaskStatus::Cancelled, Some(reason))
    }

    /// Transition to `BudgetBlocked` from any non-terminal state.
    pub fn block_on_budget(&mut self, reason: &str) -> Result<(), IllegalTransition> {
        self.advance(TaskStatus::BudgetBlocked, Some(reason))
    }

    /// Whether the state machine is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.current.is_terminal()
    }

    /// Get the full transition log.
    pub fn transitions(&self) -> &[TransitionRecord] {
        &self.transitions
    }

    /// Get a summary string of the state machine's history.
    pub fn summary(&self) -> String {
        let states: Vec<String> = self.transitions.iter().map(|t| t.to.to_string()).collect();
        format!(
            "{} → {} ({}ms, {} transitions)",
            TaskStatus::Todo,
            self.current,
            self.created_at.elapsed().as_millis(),
            self.transitions.len(),
        ) + if states.is_empty() {
            String::new()
        } else {
            format!(" [{}]", states.join(" → "))
        }
        .as_str()
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

// ──────────────────────────────────────────────────────────────────────────────
// Per-State Timeout and Cancellation Budgets
// ──────────────────────────────────────────────────────────────────────────────

/// Why a task was cancelled or blocked (deterministic reason codes).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancellationReason {
    /// Wall-clock timeout for this state was exceeded.
    Timeout {
        state: TaskStatus,
        elapsed_ms: u64,
        limit_ms: u64,
    },
    /// Iteration budget for this state was exhausted.
    BudgetExhausted {
        state: TaskStatus,
        used: u32,
        limit: u32,
    },
    /// Global repair-iteration limit reached across all states.
    GlobalBudgetExhausted { total_iterations: u32, limit: u32 },
    /// External cancellation (operator or shutdown signal).
    External { reason: String },
}

impl fmt::Display for CancellationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout {
                state,
                elapsed_ms,
                limit_ms,
            } => {
                write!(f, "Timeout in {state}: {elapsed_ms}ms > {limit_ms}ms limit")
            }
            Self::BudgetExhausted { state, used, limit } => {
                write!(f, "Budget exhausted in {state}: {used}/{limit} iterations")
            }
            Self::GlobalBudgetExhausted {
                total_iterations,
                limit,
            } => {
                write!(
                    f,
                    "Global budget exhausted: {total_iterations}/{limit} iterations"
                )
            }
            Self::External { reason } => write!(f, "External cancellation: {reason}"),
        }
    }
}

/// Budget configuration for a single state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateBudget {
    /// Maximum wall-clock time in this state (milliseconds).
    /// `None` means no timeout.
    pub timeout_ms: Option<u64>,
    /// Maximum iterations allowed in this state.
    /// `None` means unlimited (bounded by the global budget).
    pub max_iterations: Option<u32>,
}

impl StateBudget {
    /// Create a budget with both timeout and iteration limit.
    pub fn new(timeout: Duration, max_iterations: u32) -> Self {
        Self {
            timeout_ms: Some(timeout.as_millis() as u64),
            max_iterations: Some(max_iterations),
        }
    }

    /// Create a timeout-only budget.
    pub fn timeout_only(timeout: Duration) -> Self {
        Self {
            timeout_ms: Some(timeout.as_millis() as u64),
            max_iterations: None,
        }
    }

    /// Create an iteration-only budget.
    pub fn iterations_only(max: u32) -> Self {
        Self {
            timeout_ms: None,
            max_iterations: Some(max),
        }
    }

    /// Unlimited budget (no timeout, no iteration limit).
    pub fn unlimited() -> Self {
        Self {
            timeout_ms: None,
            max_iterations: None,
        }
    }
}

/// Per-state budget configuration for the state machine.
///
/// Defaults follow the pipeline's stated caps:
/// - Generating: 2 min timeout, 3 iterations (initial draft + retries)
/// - Critiquing: 1 min timeout
/// - Executing: 5 min timeout (headless browser run)
/// - Repairing: 10 min timeout, 5 iterations (the repair loop proper)
/// - Validating: 5 min timeout (phase2 vision pass included)
/// - Others: no budget
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Per-state budgets. States not in the map have no budget.
    pub budgets: HashMap<TaskStatus, StateBudget>,
    /// Global iteration limit across all states.
    pub global_max_iterations: u32,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        let mut budgets = HashMap::new();
        budgets.insert(
            TaskStatus::Generating,
            StateBudget::new(Duration::from_secs(2 * 60), 3),
        );
        budgets.insert(
            TaskStatus::Critiquing,
            StateBudget::timeout_only(Duration::from_secs(60)),
        );
        budgets.insert(
            TaskStatus::Executing,
            StateBudget::timeout_only(Duration::from_secs(5 * 60)),
        );
        budgets.insert(
            TaskStatus::Repairing,
            StateBudget::new(Duration::from_secs(10 * 60), 5),
        );
        budgets.insert(
            TaskStatus::Validating,
            StateBudget::timeout_only(Duration::from_secs(5 * 60)),
        );
        Self {
            budgets,
            global_max_iterations: 10,
        }
    }
}

/// Tracks per-state time and iteration counts for budget enforcement.
#[derive(Debug)]
pub struct BudgetTracker {
    config: BudgetConfig,
    /// When the current state was last entered.
    state_entered_at: Option<Instant>,
    /// Count of times each state has been entered (for iteration budgets).
    state_entry_counts: HashMap<TaskStatus, u32>,
    /// Total iterations across all states.
    total_iterations: u32,
}

impl BudgetTracker {
    /// Create a new tracker with the given budget configuration.
    pub fn new(config: BudgetConfig) -> Self {
        Self {
            config,
            state_entered_at: None,
            state_entry_counts: HashMap::new(),
            total_iterations: 0,
        }
    }

    /// Create a tracker with default budgets.
    pub fn with_defaults() -> Self {
        Self::new(BudgetConfig::default())
    }

    /// Notify the tracker that a state transition occurred.
    ///
    /// Call this after each successful `StateMachine::advance()`.
    pub fn on_state_entered(&mut self, state: TaskStatus) {
        self.state_entered_at = Some(Instant::now());
        *self.state_entry_counts.entry(state).or_insert(0) += 1;
        self.total_iterations += 1;
    }

    /// Check if the current state has exceeded its budget.
    ///
    /// Returns `Some(CancellationReason)` if the budget is exceeded.
    pub fn check_budget(&self, current_state: TaskStatus) -> Option<CancellationReason> {
        if self.total_iterations > self.config.global_max_iterations {
            return Some(CancellationReason::GlobalBudgetExhausted {
                total_iterations: self.total_iterations,
                limit: self.config.global_max_iterations,
            });
        }

        if let Some(budget) = self.config.budgets.get(&current_state) {
            if let (Some(limit_ms), Some(entered_at)) = (budget.timeout_ms, self.state_entered_at)
            {
                let elapsed_ms = entered_at.elapsed().as_millis() as u64;
                if elapsed_ms > limit_ms {
                    return Some(CancellationReason::Timeout {
                        state: current_state,
                        elapsed_ms,
                        limit_ms,
                    });
                }
            }

            if let Some(max_iters) = budget.max_iterations {
                let used = self
                    .state_entry_counts
                    .get(&current_state)
                    .copied()
                    .unwrap_or(0);
                if used > max_iters {
                    return Some(CancellationReason::BudgetExhausted {
                        state: current_state,
                        used,
                        limit: max_iters,
                    });
                }
            }
        }

        None
    }

    /// Get the number of times a state has been entered.
    pub fn entry_count(&self, state: TaskStatus) -> u32 {
        self.state_entry_counts.get(&state).copied().unwrap_or(0)
    }

    /// Get the total iterations across all states.
    pub fn total_iterations(&self) -> u32 {
        self.total_iterations
    }

    /// Get the remaining iteration budget for a state, if configured.
    pub fn remaining_iterations(&self, state: TaskStatus) -> Option<u32> {
        self.config
            .budgets
            .get(&state)
            .and_then(|b| b.max_iterations)
            .map(|max| {
                let used = self.state_entry_counts.get(&state).copied().unwrap_or(0);
                max.saturating_sub(used)
            })
    }

    /// Get the budget configuration.
    pub fn config(&self) -> &BudgetConfig {
        &self.config
    }
}

// ──────────────────────────────────────────────────────────────────────────────
// Checkpoint / Resume — typed state snapshots for crash-safe recovery
// ──────────────────────────────────────────────────────────────────────────────

/// Current checkpoint schema version. Bump on breaking changes.
pub const CHECKPOINT_SCHEMA_VERSION: u8 = 1;

/// A typed snapshot of a task's state machine at a stable transition point.
///
/// Written to the hot store after every stable transition. On restart, the
/// router loads the checkpoint and rebuilds the state machine from it,
/// resuming the task where it left off rather than re-running from `Todo`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateCheckpoint {
    /// Schema version for forward-compatibility detection.
    pub schema_version: u8,
    /// Unique ID for this checkpoint (monotonically increasing).
    pub checkpoint_id: u64,
    /// The state at checkpoint time.
    pub state: TaskStatus,
    /// Current repair iteration.
    pub iteration: u32,
    /// Complete transition history up to this point.
    pub transitions: Vec<TransitionRecord>,
    /// ISO 8601 timestamp when the checkpoint was created.
    pub created_at: String,
    /// Content digest of the candidate test at checkpoint time, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_digest: Option<String>,
    /// Task ID being processed.
    pub task_id: String,
}

/// Result of attempting to resume from a checkpoint.
#[derive(Debug)]
pub enum ResumeResult {
    /// Successfully restored state machine from checkpoint.
    Restored(StateMachine),
    /// Checkpoint is from an incompatible schema version.
    IncompatibleSchema {
        checkpoint_version: u8,
        current_version: u8,
    },
    /// Checkpoint is stale (content digest doesn't match the current candidate).
    StaleCheckpoint {
        expected_digest: String,
        actual_digest: String,
    },
}

/// States that are safe to checkpoint at (stable transition points).
///
/// Excludes `Todo` (pre-loop, nothing to resume) and all terminal states
/// (nothing further to do).
fn is_checkpointable(state: TaskStatus) -> bool {
    matches!(
        state,
        TaskStatus::Generating
            | TaskStatus::Critiquing
            | TaskStatus::Executing
            | TaskStatus::Repairing
            | TaskStatus::Validating
    )
}

impl StateMachine {
    /// Create a checkpoint of the current state.
    ///
    /// Returns `None` if the current state is not a stable checkpoint point
    /// (terminal states and `Todo` are not checkpointable).
    pub fn checkpoint(&self, task_id: &str, content_digest: Option<&str>) -> Option<StateCheckpoint> {
        if !is_checkpointable(self.current) {
            return None;
        }

        Some(StateCheckpoint {
            schema_version: CHECKPOINT_SCHEMA_VERSION,
            checkpoint_id: self.transitions.len() as u64,
            state: self.current,
            iteration: self.iteration,
            transitions: self.transitions.clone(),
            created_at: chrono::Utc::now().to_rfc3339(),
            content_digest: content_digest.map(String::from),
            task_id: task_id.to_string(),
        })
    }

    /// Resume a state machine from a checkpoint.
    ///
    /// Validates schema version compatibility. If `expected_digest` is
    /// provided, verifies it matches the checkpoint's content digest (detects
    /// stale checkpoints left over from a different candidate revision).
    pub fn resume_from(checkpoint: &StateCheckpoint, expected_digest: Option<&str>) -> ResumeResult {
        if checkpoint.schema_version != CHECKPOINT_SCHEMA_VERSION {
            return ResumeResult::IncompatibleSchema {
                checkpoint_version: checkpoint.schema_version,
                current_version: CHECKPOINT_SCHEMA_VERSION,
            };
        }

        if let (Some(expected), Some(checkpoint_digest)) =
            (expected_digest, checkpoint.content_digest.as_deref())
        {
            if expected != checkpoint_digest {
                return ResumeResult::StaleCheckpoint {
                    expected_digest: expected.to_string(),
                    actual_digest: checkpoint_digest.to_string(),
                };
            }
        }

        let sm = StateMachine {
            current: checkpoint.state,
            iteration: checkpoint.iteration,
            created_at: Instant::now(), // wall-clock cannot be restored
            transitions: checkpoint.transitions.clone(),
        };

        tracing::info!(
            state = %sm.current,
            iteration = sm.iteration,
            transitions = sm.transitions.len(),
            "Resumed task state machine from checkpoint"
        );

        ResumeResult::Restored(sm)
    }
}

/// Write a state checkpoint to disk.
///
/// The hot store is the primary record; this is used for the process-local
/// resume file consulted immediately after a crash restart, before the
/// store-backed task is re-read.
pub fn save_checkpoint(checkpoint: &StateCheckpoint, path: &std::path::Path) {
    match serde_json::to_string_pretty(checkpoint) {
        Ok(json) => match std::fs::write(path, json) {
            Ok(()) => tracing::info!(
                path = %path.display(),
                state = %checkpoint.state,
                iteration = checkpoint.iteration,
                "Saved state checkpoint"
            ),
            Err(e) => tracing::warn!("Failed to write checkpoint: {e}"),
        },
        Err(e) => tracing::warn!("Failed to serialize checkpoint: {e}"),
    }
}

/// Load a state checkpoint from disk.
pub fn load_checkpoint(path: &std::path::Path) -> Option<StateCheckpoint> {
    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str::<StateCheckpoint>(&contents) {
            Ok(cp) => {
                tracing::info!(
                    path = %path.display(),
                    state = %cp.state,
                    iteration = cp.iteration,
                    "Loaded state checkpoint"
                );
                Some(cp)
            }
            Err(e) => {
                tracing::warn!("Failed to parse checkpoint: {e}");
                None
            }
        },
        Err(e) => {
            tracing::debug!("No checkpoint file at {}: {e}", path.display());
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_state_is_todo() {
        let sm = StateMachine::new();
        assert_eq!(sm.current(), TaskStatus::Todo);
        assert!(!sm.is_terminal());
        assert_eq!(sm.transitions().len(), 0);
    }

    #[test]
    fn happy_path_reaches_done() {
        let mut sm = StateMachine::new();
        sm.advance(TaskStatus::Generating, None).unwrap();
        sm.advance(TaskStatus::Critiquing, None).unwrap();
        sm.advance(TaskStatus::Executing, None).unwrap();
        sm.advance(TaskStatus::Validating, None).unwrap();
        sm.advance(TaskStatus::Done, None).unwrap();
        assert!(sm.is_terminal());
        assert_eq!(sm.transitions().len(), 5);
    }

    #[test]
    fn repair_loop_retries_execute() {
        let mut sm = StateMachine::new();
        sm.advance(TaskStatus::Generating, None).unwrap();
        sm.advance(TaskStatus::Critiquing, None).unwrap();
        sm.advance(TaskStatus::Executing, None).unwrap();
        sm.advance(TaskStatus::Repairing, Some("console error")).unwrap();
        sm.advance(TaskStatus::Executing, None).unwrap();
        sm.advance(TaskStatus::Validating, None).unwrap();
        sm.advance(TaskStatus::Done, None).unwrap();
        assert_eq!(sm.current(), TaskStatus::Done);
    }

    #[test]
    fn escalation_to_hitl_from_repairing() {
        let mut sm = StateMachine::new();
        sm.advance(TaskStatus::Generating, None).unwrap();
        sm.advance(TaskStatus::Critiquing, None).unwrap();
        sm.advance(TaskStatus::Executing, None).unwrap();
        sm.advance(TaskStatus::Repairing, None).unwrap();
        sm.advance(TaskStatus::Hitl, Some("max attempts reached")).unwrap();
        assert!(sm.is_terminal());
    }

    #[test]
    fn fail_is_legal_from_any_nonterminal_state() {
        let mut sm = StateMachine::new();
        sm.advance(TaskStatus::Generating, None).unwrap();
        sm.fail("provider outage").unwrap();
        assert_eq!(sm.current(), TaskStatus::Failed);
    }

    #[test]
    fn fail_is_illegal_from_terminal_state() {
        let mut sm = StateMachine::new();
        sm.advance(TaskStatus::Generating, None).unwrap();
        sm.advance(TaskStatus::FailedGenerate, None).unwrap();
        assert!(sm.fail("double fault").is_err());
    }

    #[test]
    fn illegal_skip_is_rejected() {
        let mut sm = StateMachine::new();
        let err = sm.advance(TaskStatus::Executing, None).unwrap_err();
        assert_eq!(err.from, TaskStatus::Todo);
        assert_eq!(err.to, TaskStatus::Executing);
    }

    #[test]
    fn illegal_backward_transition_is_rejected() {
        let mut sm = StateMachine::new();
        sm.advance(TaskStatus::Generating, None).unwrap();
        sm.advance(TaskStatus::Critiquing, None).unwrap();
        sm.advance(TaskStatus::Executing, None).unwrap();
        assert!(sm.advance(TaskStatus::Generating, None).is_err());
    }

    #[test]
    fn transition_record_carries_reason() {
        let mut sm = StateMachine::new();
        sm.advance(TaskStatus::Generating, Some("intent parsed")).unwrap();
        assert_eq!(
            sm.transitions()[0].reason.as_deref(),
            Some("intent parsed")
        );
    }

    #[test]
    fn summary_lists_visited_states() {
        let mut sm = StateMachine::new();
        sm.advance(TaskStatus::Generating, None).unwrap();
        sm.advance(TaskStatus::Critiquing, None).unwrap();
        let summary = sm.summary();
        assert!(summary.contains("Generating"));
        assert!(summary.contains("Critiquing"));
    }

    #[test]
    fn checkpoint_round_trips_through_serde() {
        let mut sm = StateMachine::new();
        sm.advance(TaskStatus::Generating, None).unwrap();
        let cp = sm.checkpoint("task-1", Some("abc123")).unwrap();
        let json = serde_json::to_string(&cp).unwrap();
        let back: StateCheckpoint = serde_json::from_str(&json).unwrap();
        assert_eq!(back.state, TaskStatus::Generating);
        assert_eq!(back.task_id, "task-1");
    }

    #[test]
    fn checkpoint_is_none_for_todo() {
        let sm = StateMachine::new();
        assert!(sm.checkpoint("task-1", None).is_none());
    }

    #[test]
    fn checkpoint_is_none_for_terminal_state() {
        let mut sm = StateMachine::new();
        sm.advance(TaskStatus::Generating, None).unwrap();
        sm.advance(TaskStatus::FailedGenerate, None).unwrap();
        assert!(sm.checkpoint("task-1", None).is_none());
    }

    #[test]
    fn save_and_load_checkpoint_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");

        let mut sm = StateMachine::new();
        sm.advance(TaskStatus::Generating, None).unwrap();
        let cp = sm.checkpoint("task-1", Some("digest")).unwrap();

        save_checkpoint(&cp, &path);
        let loaded = load_checkpoint(&path).unwrap();
        assert_eq!(loaded.state, TaskStatus::Generating);
        assert_eq!(loaded.task_id, "task-1");
    }

    #[test]
    fn resume_restores_state_machine() {
        let mut sm = StateMachine::new();
        sm.advance(TaskStatus::Generating, None).unwrap();
        sm.advance(TaskStatus::Critiquing, None).unwrap();
        let cp = sm.checkpoint("task-1", Some("digest")).unwrap();

        match StateMachine::resume_from(&cp, Some("digest")) {
            ResumeResult::Restored(resumed) => {
                assert_eq!(resumed.current(), TaskStatus::Critiquing);
                assert_eq!(resumed.transitions().len(), 2);
            }
            other => panic!("expected Restored, got {other:?}"),
        }
    }

    #[test]
    fn resume_rejects_incompatible_schema() {
        let mut sm = StateMachine::new();
        sm.advance(TaskStatus::Generating, None).unwrap();
        let mut cp = sm.checkpoint("task-1", None).unwrap();
        cp.schema_version = CHECKPOINT_SCHEMA_VERSION + 1;

        match StateMachine::resume_from(&cp, None) {
            ResumeResult::IncompatibleSchema { .. } => {}
            other => panic!("expected IncompatibleSchema, got {other:?}"),
        }
    }

    #[test]
    fn resume_rejects_stale_digest() {
        let mut sm = StateMachine::new();
        sm.advance(TaskStatus::Generating, None).unwrap();
        let cp = sm.checkpoint("task-1", Some("digest-a")).unwrap();

        match StateMachine::resume_from(&cp, Some("digest-b")) {
            ResumeResult::StaleCheckpoint { .. } => {}
            other => panic!("expected StaleCheckpoint, got {other:?}"),
        }
    }

    #[test]
    fn resume_with_no_digest_skips_staleness_check() {
        let mut sm = StateMachine::new();
        sm.advance(TaskStatus::Generating, None).unwrap();
        let cp = sm.checkpoint("task-1", None).unwrap();

        match StateMachine::resume_from(&cp, Some("anything")) {
            ResumeResult::Restored(_) => {}
            other => panic!("expected Restored, got {other:?}"),
        }
    }

    #[test]
    fn budget_config_defaults_cover_loop_states() {
        let config = BudgetConfig::default();
        assert!(config.budgets.contains_key(&TaskStatus::Generating));
        assert!(config.budgets.contains_key(&TaskStatus::Repairing));
        assert_eq!(config.global_max_iterations, 10);
    }

    #[test]
    fn budget_tracker_flags_iteration_exhaustion() {
        let mut tracker = BudgetTracker::with_defaults();
        for _ in 0..4 {
            tracker.on_state_entered(TaskStatus::Generating);
        }
        let reason = tracker.check_budget(TaskStatus::Generating);
        assert!(matches!(
            reason,
            Some(CancellationReason::BudgetExhausted { .. })
        ));
    }

    #[test]
    fn budget_tracker_flags_global_exhaustion() {
        let mut tracker = BudgetTracker::new(BudgetConfig {
            budgets: HashMap::new(),
            global_max_iterations: 2,
        });
        tracker.on_state_entered(TaskStatus::Executing);
        tracker.on_state_entered(TaskStatus::Repairing);
        tracker.on_state_entered(TaskStatus::Executing);
        let reason = tracker.check_budget(TaskStatus::Executing);
        assert!(matches!(
            reason,
            Some(CancellationReason::GlobalBudgetExhausted { .. })
        ));
    }

    #[test]
    fn budget_tracker_remaining_iterations_counts_down() {
        let mut tracker = BudgetTracker::with_defaults();
        let initial = tracker.remaining_iterations(TaskStatus::Generating).unwrap();
        tracker.on_state_entered(TaskStatus::Generating);
        let after = tracker.remaining_iterations(TaskStatus::Generating).unwrap();
        assert_eq!(after, initial - 1);
    }

    #[test]
    fn budget_tracker_unconfigured_state_has_no_budget() {
        let tracker = BudgetTracker::with_defaults();
        assert!(tracker.check_budget(TaskStatus::Hitl).is_none());
        assert_eq!(tracker.remaining_iterations(TaskStatus::Hitl), None);
    }

    #[test]
    fn cancellation_reason_display_and_serde() {
        let reason = CancellationReason::Timeout {
            state: TaskStatus::Executing,
            elapsed_ms: 400_000,
            limit_ms: 300_000,
        };
        assert!(reason.to_string().contains("Timeout in Executing"));
        let json = serde_json::to_string(&reason).unwrap();
        let back: CancellationReason = serde_json::from_str(&json).unwrap();
        assert_eq!(reason, back);
    }
}
