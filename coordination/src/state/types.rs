//! Core data types for the test-generation pipeline.
//!
//! `Task` is the only mutable row; `Attempt`s and `Artifact`s are appended to
//! it by reference and are themselves immutable once written.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub type TaskId = String;
pub type SessionId = String;

fn new_id(prefix: &str) -> String {
    format!("{prefix}-{}", uuid::Uuid::new_v4())
}

/// Structured form of a natural-language command, produced by the ingress
/// surface and consumed by the router.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Intent {
    #[serde(rename = "type")]
    pub intent_type: IntentType,
    pub slots: HashMap<String, String>,
    pub raw_command: String,
    pub confidence: f32,
    pub needs_clarification: bool,
    pub clarification_prompt: Option<String>,
}

impl Intent {
    pub fn new(intent_type: IntentType, raw_command: impl Into<String>, confidence: f32) -> Self {
        Self {
            intent_type,
            slots: HashMap::new(),
            raw_command: raw_command.into(),
            confidence,
            needs_clarification: false,
            clarification_prompt: None,
        }
    }

    pub fn with_slot(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.slots.insert(key.into(), value.into());
        self
    }

    pub fn needing_clarification(mut self, prompt: impl Into<String>) -> Self {
        self.needs_clarification = true;
        self.clarification_prompt = Some(prompt.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentType {
    CreateTest,
    RunTest,
    FixFailure,
    Validate,
    Status,
    BuildFeature,
    Unknown,
}

impl IntentType {
    /// Whether this intent type drives the full generate→validate pipeline.
    pub fn is_full_pipeline(&self) -> bool {
        matches!(self, Self::CreateTest | Self::BuildFeature)
    }
}

impl std::fmt::Display for IntentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::CreateTest => "create_test",
            Self::RunTest => "run_test",
            Self::FixFailure => "fix_failure",
            Self::Validate => "validate",
            Self::Status => "status",
            Self::BuildFeature => "build_feature",
            Self::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// Terminal and non-terminal Task states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Todo,
    Generating,
    Critiquing,
    Executing,
    Repairing,
    Validating,
    Done,
    Hitl,
    Cancelled,
    BudgetBlocked,
    Failed,
    FailedGenerate,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Done
                | Self::Hitl
                | Self::Cancelled
                | Self::BudgetBlocked
                | Self::Failed
                | Self::FailedGenerate
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// One worker invocation record. Append-only within a Task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attempt {
    pub worker: String,
    pub input_digest: String,
    pub outcome: AttemptOutcome,
    pub duration_ms: u64,
    pub cost: f64,
    pub diagnosis: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl Attempt {
    pub fn new(worker: impl Into<String>, input: &[u8], outcome: AttemptOutcome) -> Self {
        Self {
            worker: worker.into(),
            input_digest: blake3::hash(input).to_hex().to_string(),
            outcome,
            duration_ms: 0,
            cost: 0.0,
            diagnosis: None,
            recorded_at: Utc::now(),
        }
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = cost;
        self
    }

    pub fn with_diagnosis(mut self, diagnosis: impl Into<String>) -> Self {
        self.diagnosis = Some(diagnosis.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    Rejected,
    Failed,
    Timeout,
}

/// Produced/consumed test code, diffs, screenshots, reports. Immutable once
/// written; referenced by Task and Attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub kind: ArtifactKind,
    pub path: String,
    pub digest: String,
}

impl Artifact {
    pub fn new(kind: ArtifactKind, path: impl Into<String>, content: &[u8]) -> Self {
        Self {
            kind,
            path: path.into(),
            digest: blake3::hash(content).to_hex().to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    TestSource,
    Diff,
    RegressionReport,
    Screenshot,
    Trace,
}

/// One unit of work moving through the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub feature_text: String,
    pub intent_type: IntentType,
    pub slots: HashMap<String, String>,
    pub status: TaskStatus,
    pub attempts: Vec<Attempt>,
    pub artifacts: Vec<Artifact>,
    pub cost_so_far: f64,
    pub created_at: DateTime<Utc>,
    pub owner_worker: Option<String>,
    /// Shared counter for repair attempts, incremented identically whether
    /// the triggering failure was a persisted original error or a new
    /// regression that was rolled back (see DESIGN.md, Open Question 1).
    pub repair_attempts: u32,
}

impl Task {
    pub fn new(intent: &Intent) -> Self {
        Self {
            id: new_id("task"),
            feature_text: intent
                .slots
                .get("feature")
                .cloned()
                .unwrap_or_else(|| intent.raw_command.clone()),
            intent_type: intent.intent_type,
            slots: intent.slots.clone(),
            status: TaskStatus::Todo,
            attempts: Vec::new(),
            artifacts: Vec::new(),
            cost_so_far: 0.0,
            created_at: Utc::now(),
            owner_worker: None,
            repair_attempts: 0,
        }
    }

    pub fn record_attempt(&mut self, attempt: Attempt) {
        self.cost_so_far += attempt.cost;
        self.attempts.push(attempt);
    }

    pub fn add_artifact(&mut self, artifact: Artifact) {
        self.artifacts.push(artifact);
    }

    pub fn artifacts_of(&self, kind: ArtifactKind) -> impl Iterator<Item = &Artifact> {
        self.artifacts.iter().filter(move |a| a.kind == kind)
    }
}

/// A previously validated test snippet, written only on successful validator
/// outcome; never mutated, only superseded by a new id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalPattern {
    pub id: String,
    pub code: String,
    pub metadata: PatternMetadata,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternMetadata {
    pub feature: String,
    pub complexity: Complexity,
    pub validated: bool,
    pub validator_phase2: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Easy,
    Hard,
}

impl RetrievalPattern {
    pub fn new(code: impl Into<String>, metadata: PatternMetadata, embedding: Vec<f32>) -> Self {
        Self {
            id: new_id("pattern"),
            code: code.into(),
            metadata,
            embedding,
        }
    }
}

/// Token bucket state per service×model.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateLimitBucket {
    pub capacity: f64,
    pub refill_per_sec: f64,
    pub tokens: f64,
    pub updated_at_secs: i64,
}

impl RateLimitBucket {
    pub fn new(capacity: f64, refill_per_sec: f64) -> Self {
        Self {
            capacity,
            refill_per_sec,
            tokens: capacity,
            updated_at_secs: Utc::now().timestamp(),
        }
    }

    /// Refill lazily based on elapsed time, then try to take one token.
    pub fn try_take(&mut self, now_secs: i64, cost: f64) -> bool {
        let elapsed = (now_secs - self.updated_at_secs).max(0) as f64;
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.updated_at_secs = now_secs;
        if self.tokens >= cost {
            self.tokens -= cost;
            true
        } else {
            false
        }
    }
}

/// Active credential pair with overlap rotation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretSlot {
    pub primary: String,
    pub secondary: Option<String>,
    pub rotation_deadline: Option<DateTime<Utc>>,
}

impl SecretSlot {
    pub fn single(primary: impl Into<String>) -> Self {
        Self {
            primary: primary.into(),
            secondary: None,
            rotation_deadline: None,
        }
    }

    /// Begin a 24h overlap rotation: both old and new key accepted until
    /// `rotation_deadline`.
    pub fn begin_rotation(&mut self, new_secret: impl Into<String>) {
        self.secondary = Some(std::mem::replace(&mut self.primary, new_secret.into()));
        self.rotation_deadline = Some(Utc::now() + chrono::Duration::hours(24));
    }

    pub fn accepts(&self, candidate: &str) -> bool {
        if candidate == self.primary {
            return true;
        }
        if let (Some(secondary), Some(deadline)) = (&self.secondary, self.rotation_deadline) {
            return candidate == secondary && Utc::now() < deadline;
        }
        false
    }
}

/// Accumulated spend per {window, agent, model, feature}.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CostBucket {
    pub total: f64,
    pub count: u64,
}

impl CostBucket {
    pub fn record(&mut self, cost: f64) {
        self.total += cost;
        self.count += 1;
    }
}

/// An escalated task, written by the router after a bound breach.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HitlItem {
    pub task_id: TaskId,
    pub priority: f32,
    pub last_error: String,
    pub attempts: u32,
    pub context_bundle: HitlContextBundle,
    pub status: HitlStatus,
    pub resolution: Option<HitlResolution>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HitlContextBundle {
    pub test_path: Option<String>,
    pub error_message: String,
    pub ai_diagnosis: Option<String>,
    pub code_changes: Option<String>,
    pub screenshots: Vec<String>,
    pub attempt_history: Vec<Attempt>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HitlStatus {
    Pending,
    Resolved,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HitlResolution {
    pub root_cause: String,
    pub fix_strategy: String,
    pub severity: String,
    pub human_notes: String,
    pub patch: Option<String>,
}

impl HitlItem {
    pub fn new(task: &Task, priority: f32, last_error: impl Into<String>) -> Self {
        let last_error = last_error.into();
        let test_path = task
            .artifacts_of(ArtifactKind::TestSource)
            .last()
            .map(|a| a.path.clone());
        let code_changes = task
            .artifacts_of(ArtifactKind::Diff)
            .last()
            .map(|a| a.path.clone());
        let screenshots = task
            .artifacts_of(ArtifactKind::Screenshot)
            .map(|a| a.path.clone())
            .collect();
        let ai_diagnosis = task.attempts.iter().rev().find_map(|a| a.diagnosis.clone());

        Self {
            task_id: task.id.clone(),
            priority,
            last_error: last_error.clone(),
            attempts: task.attempts.len() as u32,
            context_bundle: HitlContextBundle {
                test_path,
                error_message: last_error,
                ai_diagnosis,
                code_changes,
                screenshots,
                attempt_history: task.attempts.clone(),
            },
            status: HitlStatus::Pending,
            resolution: None,
        }
    }
}

/// Active-task registry row, added on worker start, removed on worker end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleTaskRecord {
    pub task_id: TaskId,
    pub agent: String,
    pub started_at: DateTime<Utc>,
}

/// Session aggregates returned by a `status` intent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionAggregates {
    pub total_tasks: u64,
    pub successful_tasks: u64,
    pub session_cost: f64,
    pub budget_status: BudgetStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetStatus {
    Ok,
    Warning,
    Exceeded,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_from_intent_carries_feature_slot() {
        let intent = Intent::new(IntentType::CreateTest, "write a login test", 0.9)
            .with_slot("feature", "user login");
        let task = Task::new(&intent);
        assert_eq!(task.feature_text, "user login");
        assert_eq!(task.status, TaskStatus::Todo);
        assert!(!task.status.is_terminal());
    }

    #[test]
    fn terminal_states_are_closed() {
        assert!(TaskStatus::Done.is_terminal());
        assert!(TaskStatus::Hitl.is_terminal());
        assert!(TaskStatus::BudgetBlocked.is_terminal());
        assert!(!TaskStatus::Executing.is_terminal());
    }

    #[test]
    fn rate_limit_bucket_refills_lazily() {
        let mut bucket = RateLimitBucket::new(10.0, 1.0);
        bucket.tokens = 0.0;
        bucket.updated_at_secs -= 5;
        assert!(bucket.try_take(Utc::now().timestamp(), 3.0));
    }

    #[test]
    fn secret_slot_accepts_both_during_overlap() {
        let mut slot = SecretSlot::single("key-a");
        slot.begin_rotation("key-b");
        assert!(slot.accepts("key-b"));
        assert!(slot.accepts("key-a"));
        assert!(!slot.accepts("key-c"));
    }

    #[test]
    fn repair_attempts_share_a_single_counter() {
        let intent = Intent::new(IntentType::CreateTest, "x", 0.9);
        let mut task = Task::new(&intent);
        task.repair_attempts += 1; // original error persists
        task.repair_attempts += 1; // new regression, rolled back
        assert_eq!(task.repair_attempts, 2);
    }
}
