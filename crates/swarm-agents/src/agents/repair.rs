//! Repair worker — the "do-no-harm" worker (§4.5).
//!
//! Captures a regression baseline, proposes a minimal patch, applies it with
//! the whitespace/fuzzy-tolerant patch engine, re-runs the regression scope,
//! and rolls back to the pre-patch bytes if the fix introduced any new
//! failure. `new_failures` always counts, even after a rollback — the caller
//! (router) is responsible for feeding it to `EscalationEngine::decide`.

use async_trait::async_trait;
use rig::client::CompletionClient;
use rig::completion::Prompt;
use rig::providers::openai;
use serde::Deserialize;
use testgen_core::registry::{Worker, WorkerInput, WorkerOutput};
use testgen_core::{Attempt, AttemptOutcome, PatchEngine, PatchHunk, PipelineResult};

use crate::agents::executor::run_browser_engine;
use crate::config::{ClientSet, PipelineConfig, Tier};
use crate::cost::estimate_llm_cost;
use crate::protocol::RepairRequest;

const REPAIR_PREAMBLE: &str = "You repair a failing browser test. You will be given the \
current test source, the failure, and console/network evidence. Propose the smallest \
possible fix — prefer selector and wait updates over logic rewrites. Respond with a JSON \
array of hunks: [{\"old_lines\": [...], \"new_lines\": [...], \"description\": \"...\"}], \
followed on a new line by 'CONFIDENCE: <0.0-1.0>' and 'APP_SIDE: <true|false>' indicating \
whether the failure looks like an application change rather than a test bug.";

#[derive(Debug, Deserialize)]
struct DiagnosisHunk {
    old_lines: Vec<String>,
    new_lines: Vec<String>,
    description: Option<String>,
}

struct Diagnosis {
    hunks: Vec<PatchHunk>,
    confidence: f32,
    suspected_app_side: bool,
    raw: String,
}

fn parse_diagnosis(response: &str) -> Diagnosis {
    let mut confidence = 0.0f32;
    let mut suspected_app_side = false;
    for line in response.lines() {
        let line = line.trim();
        if let Some(v) = line.strip_prefix("CONFIDENCE:") {
            confidence = v.trim().parse().unwrap_or(0.0);
        } else if let Some(v) = line.strip_prefix("APP_SIDE:") {
            suspected_app_side = v.trim().eq_ignore_ascii_case("true");
        }
    }

    let json_start = response.find('[');
    let json_end = response.rfind(']');
    let hunks = match (json_start, json_end) {
        (Some(start), Some(end)) if end > start => {
            serde_json::from_str::<Vec<DiagnosisHunk>>(&response[start..=end])
                .unwrap_or_default()
                .into_iter()
                .map(|h| PatchHunk {
                    old_lines: h.old_lines,
                    new_lines: h.new_lines,
                    description: h.description,
                })
                .collect()
        }
        _ => Vec::new(),
    };

    Diagnosis {
        hunks,
        confidence,
        suspected_app_side,
        raw: response.to_string(),
    }
}

/// Run the fixed regression suite (file paths, not literal source — each
/// entry is read from disk before execution) and count failures.
async fn run_regression_scope(scope: &[String]) -> usize {
    let mut failures = 0;
    for test_path in scope {
        let test_source = match std::fs::read_to_string(test_path) {
            Ok(source) => source,
            Err(_) => {
                failures += 1;
                continue;
            }
        };
        match run_browser_engine(&test_source, 45_000, false).await {
            Ok(outcome) if outcome.test_passed => {}
            _ => failures += 1,
        }
    }
    failures
}

pub struct RepairWorker {
    hard: openai::CompletionsClient,
    hard_model: String,
    patch_engine: PatchEngine,
}

impl RepairWorker {
    pub fn new(clients: &ClientSet, config: &PipelineConfig) -> Self {
        Self {
            hard: clients.hard.clone(),
            hard_model: config.hard_endpoint.model.clone(),
            patch_engine: PatchEngine::default_engine(),
        }
    }
}

#[async_trait]
impl Worker for RepairWorker {
    async fn execute(&self, input: WorkerInput) -> PipelineResult<WorkerOutput> {
        let req: RepairRequest = serde_json::from_value(input.payload)?;

        let baseline_failures = run_regression_scope(&req.regression_scope).await;

        let agent = self
            .hard
            .agent(&self.hard_model)
            .name("repair_diagnostician")
            .preamble(REPAIR_PREAMBLE)
            .build();

        let mut prompt = format!(
            "Error: {}\n\nTest source:\n{}\n",
            req.error_message, req.test_source
        );
        if !req.console_errors.is_empty() {
            prompt.push_str(&format!("\nConsole errors:\n{}\n", req.console_errors.join("\n")));
        }
        if !req.network_failures.is_empty() {
            prompt.push_str(&format!(
                "\nNetwork failures:\n{}\n",
                req.network_failures.join("\n")
            ));
        }
        if !req.prior_attempts.is_empty() {
            prompt.push_str(&format!(
                "\nPrior attempts that did not resolve this:\n{}\n",
                req.prior_attempts.join("\n---\n")
            ));
        }

        let response: String = agent.prompt(prompt.as_str()).await.map_err(|e| {
            testgen_core::ProviderError::Network {
                service: "repair".to_string(),
                message: e.to_string(),
            }
        })?;
        let call_cost = estimate_llm_cost(Tier::Hard, &prompt, &response);

        let diagnosis = parse_diagnosis(&response);
        let patch_result = self.patch_engine.apply(&req.test_source, &diagnosis.hunks);

        let diff = unified_diff(&req.test_source, patch_result.patched_content.as_deref());

        let (patched_source, new_failures) = if patch_result.success {
            if let Some(ref patched) = patch_result.patched_content {
                let post_failures = run_regression_scope(&req.regression_scope).await;
                let new_failures = post_failures.saturating_sub(baseline_failures);
                if new_failures == 0 {
                    (Some(patched.clone()), 0)
                } else {
                    (None, new_failures)
                }
            } else {
                (None, 0)
            }
        } else {
            (None, 0)
        };

        let hippocratic_oath_honored = patch_result.success && new_failures == 0;
        let outcome = if hippocratic_oath_honored {
            AttemptOutcome::Success
        } else {
            AttemptOutcome::Failed
        };

        let response = crate::protocol::RepairResponse {
            patched_source,
            diff,
            baseline_failures,
            new_failures,
            confidence: diagnosis.confidence,
            suspected_app_side: diagnosis.suspected_app_side,
            hippocratic_oath_honored,
            diagnosis: diagnosis.raw,
        };

        let attempt =
            Attempt::new("repair", req.error_message.as_bytes(), outcome).with_cost(call_cost);

        Ok(WorkerOutput {
            payload: serde_json::to_value(&response)?,
            artifacts: Vec::new(),
            attempt,
        })
    }
}

/// Minimal unified-style diff between the original source and the patched
/// result, for the `fix.diff` artifact (§4.5).
fn unified_diff(original: &str, patched: Option<&str>) -> String {
    let Some(patched) = patched else {
        return String::new();
    };
    if original == patched {
        return String::new();
    }
    let mut out = String::new();
    out.push_str("--- before\n+++ after\n");
    for line in original.lines() {
        if !patched.lines().any(|p| p == line) {
            out.push_str(&format!("-{line}\n"));
        }
    }
    for line in patched.lines() {
        if !original.lines().any(|o| o == line) {
            out.push_str(&format!("+{line}\n"));
        }
    }
    out
}
