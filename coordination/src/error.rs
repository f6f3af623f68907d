//! Closed error taxonomy for the pipeline core.
//!
//! Every error that can occur while running a Task is one of seven kinds:
//! input, provider, runtime, quality, safety, budget, lifecycle. Each kind
//! is its own `thiserror` enum so call sites can match narrowly; `PipelineError`
//! composes them with `#[from]` for the cases that need to cross a module
//! boundary as a single type (the router, the event log).

use std::path::PathBuf;

pub type PipelineResult<T> = Result<T, PipelineError>;

/// Ambiguous or otherwise unusable intake.
#[derive(Debug, thiserror::Error)]
pub enum InputError {
    #[error("intent is ambiguous and needs clarification: {prompt}")]
    AmbiguousIntent { prompt: String },

    #[error("invalid slot `{slot}`: {reason}")]
    InvalidSlot { slot: String, reason: String },

    #[error("unsupported file: {path}")]
    UnsupportedFile { path: PathBuf },
}

/// Errors from an LLM or other external provider.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("rate limited by {service}: retry after {retry_after_ms}ms")]
    RateLimited { service: String, retry_after_ms: u64 },

    #[error("authentication failed for {service}")]
    Auth { service: String },

    #[error("transient network error calling {service}: {message}")]
    Network { service: String, message: String },

    #[error("quota exhausted for {service}")]
    Quota { service: String },
}

/// Errors from the local execution substrate (browser engine, filesystem).
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("failed to launch browser engine: {message}")]
    EngineLaunch { message: String },

    #[error("execution timed out after {elapsed_ms}ms (cap {cap_ms}ms)")]
    ExecutionTimeout { elapsed_ms: u64, cap_ms: u64 },

    #[error("missing artifact: {description}")]
    MissingArtifact { description: String },
}

/// Quality-gate rejections. Not fatal on their own; surfaced to the router.
#[derive(Debug, thiserror::Error)]
pub enum QualityError {
    #[error("critic rejected the generated test ({critical_count} critical issue(s))")]
    CriticRejected { critical_count: usize },

    #[error("validator rejected the result: {reason}")]
    ValidatorRejected { reason: String },
}

/// The hippocratic invariant was violated: a repair introduced a new failure.
#[derive(Debug, thiserror::Error)]
#[error("repair introduced {new_failures} new failure(s) against the regression baseline")]
pub struct SafetyError {
    pub new_failures: usize,
}

/// Cost-cap breaches.
#[derive(Debug, thiserror::Error)]
pub enum BudgetError {
    #[error("session budget exceeded: spent {spent} of cap {cap}")]
    SessionCapReached { spent: f64, cap: f64 },

    #[error("{window} budget exceeded: spent {spent} of cap {cap}")]
    WindowCapReached { window: String, spent: f64, cap: f64 },
}

/// Process lifecycle states that refuse new work.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("process is shutting down; new tasks are not accepted")]
    ShuttingDown,

    #[error("task {task_id} was cancelled")]
    Cancelled { task_id: String },
}

/// The closed, top-level error type. Each variant group corresponds to one
/// of the seven kinds named in the error handling design.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Input(#[from] InputError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error(transparent)]
    Quality(#[from] QualityError),

    #[error(transparent)]
    Safety(#[from] SafetyError),

    #[error(transparent)]
    Budget(#[from] BudgetError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error("state store error: {0}")]
    Store(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl PipelineError {
    /// Whether local recovery (bounded retry, secondary-key fallback,
    /// single relaunch) applies to this error, per the propagation policy.
    pub fn is_locally_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Provider(ProviderError::RateLimited { .. })
                | Self::Provider(ProviderError::Network { .. })
                | Self::Provider(ProviderError::Auth { .. })
                | Self::Runtime(RuntimeError::EngineLaunch { .. })
        )
    }

    /// Whether this error should be recorded on the Task and surfaced to
    /// the router rather than retried silently.
    pub fn is_router_surfaced(&self) -> bool {
        matches!(
            self,
            Self::Quality(_) | Self::Runtime(RuntimeError::ExecutionTimeout { .. }) | Self::Runtime(RuntimeError::MissingArtifact { .. })
        )
    }

    /// Whether this error is fatal to the Task (routes to HITL) rather than
    /// retryable or process-fatal. Per policy, nothing in this taxonomy is
    /// fatal to the process itself.
    pub fn is_task_fatal(&self) -> bool {
        matches!(
            self,
            Self::Safety(_) | Self::Budget(_) | Self::Input(InputError::AmbiguousIntent { .. })
        )
    }

    /// A concise, stack-trace-free message suitable for a user-facing summary.
    /// Mirrors the fixed substitution table in the error handling design.
    pub fn user_visible(&self) -> String {
        match self {
            Self::Runtime(RuntimeError::ExecutionTimeout { .. }) => "timeout issue".to_string(),
            Self::Runtime(RuntimeError::MissingArtifact { .. }) => "element not found".to_string(),
            Self::Provider(ProviderError::Network { .. }) => "network connection issue".to_string(),
            Self::Quality(QualityError::ValidatorRejected { .. }) => {
                "test assertion failed".to_string()
            }
            Self::Safety(_) => "a safety check blocked this change".to_string(),
            Self::Budget(_) => "budget limit reached".to_string(),
            Self::Lifecycle(LifecycleError::ShuttingDown) => "shutting down".to_string(),
            Self::Lifecycle(LifecycleError::Cancelled { .. }) => "cancelled".to_string(),
            other => other.to_string(),
        }
    }
}
