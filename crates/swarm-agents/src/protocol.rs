//! Wire shapes exchanged between the router and each worker via
//! `WorkerInput::payload` / `WorkerOutput::payload`.
//!
//! Workers are dispatched through `testgen_core::registry::Worker`, whose
//! trait boundary is an untyped `serde_json::Value`. These structs are the
//! typed contract both sides agree on so the router never builds or parses
//! JSON by hand at the call site.

use serde::{Deserialize, Serialize};

use crate::contracts::{CriticReport, SelfValidationReport};

/// Input to the Generator worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub feature_text: String,
    pub complexity_hint: Option<String>,
    /// Issues from a prior self-validation failure, fed back for retry.
    pub retry_feedback: Vec<String>,
    /// Source of similar validated tests, retrieved from the vector index.
    pub retrieved_patterns: Vec<String>,
}

/// Output of the Generator worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub test_source: String,
    pub self_validation: SelfValidationReport,
}

/// Input to the Critic worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CritiqueRequest {
    pub test_source: String,
}

/// Output of the Critic worker is a bare `CriticReport`.
pub type CritiqueResponse = CriticReport;

/// Input to the Executor (and the Validator's phase-1 re-run).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteRequest {
    pub test_source: String,
    pub timeout_ms: u64,
    /// Full screenshot collection vs. executor's lighter-weight pass.
    pub collect_all_screenshots: bool,
}

/// Structured outcome of one browser-engine run (§4.4 contract).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub browser_launched: bool,
    pub test_executed: bool,
    pub test_passed: bool,
    pub screenshots: Vec<String>,
    pub console_errors: Vec<String>,
    pub network_failures: Vec<String>,
    pub execution_time_ms: u64,
}

impl ExecutionOutcome {
    /// The hard validation rubric shared by Executor and Validator phase 1
    /// (§4.4, §4.6): `browser_launched ∧ test_executed ∧ test_passed ∧
    /// |screenshots| ≥ 1 ∧ execution_time_ms ≤ timeout_cap`.
    pub fn passes_rubric(&self, timeout_cap_ms: u64) -> bool {
        self.browser_launched
            && self.test_executed
            && self.test_passed
            && !self.screenshots.is_empty()
            && self.execution_time_ms <= timeout_cap_ms
    }
}

/// Input to the Repair worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepairRequest {
    pub test_source: String,
    pub error_message: String,
    pub console_errors: Vec<String>,
    pub network_failures: Vec<String>,
    pub prior_attempts: Vec<String>,
    /// A fixed, small set of stable tests (e.g. auth, core navigation) run
    /// before and after the patch to detect regressions (§4.5 step 1, 4).
    pub regression_scope: Vec<String>,
}

/// Output of the Repair worker — the hippocratic comparison report (§4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepairResponse {
    /// `None` when the proposed patch had to be rolled back.
    pub patched_source: Option<String>,
    pub diff: String,
    pub baseline_failures: usize,
    pub new_failures: usize,
    pub confidence: f32,
    pub suspected_app_side: bool,
    pub hippocratic_oath_honored: bool,
    pub diagnosis: String,
}

/// Input to the Validator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidateRequest {
    pub test_source: String,
    pub timeout_cap_ms: u64,
    pub phase2: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RubricValidation {
    pub passed: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisionAnalysis {
    pub ui_correctness: bool,
    pub confidence_score: f32,
    pub findings: String,
    pub screenshots_analyzed: usize,
    pub cost: f64,
}

/// Output of the Validator (§4.6 contract).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidateResponse {
    pub validation_result: ExecutionOutcome,
    pub rubric_validation: RubricValidation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_analysis: Option<VisionAnalysis>,
}
