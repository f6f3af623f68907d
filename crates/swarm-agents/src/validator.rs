//! Validator worker: deterministic pass/fail with visual evidence, plus an
//! optional vision-model semantic review of that evidence (§4.6).

use async_trait::async_trait;
use rig::client::CompletionClient;
use rig::completion::Prompt;
use rig::providers::openai;
use testgen_core::registry::{Worker, WorkerInput, WorkerOutput};
use testgen_core::{Attempt, AttemptOutcome, PipelineResult};

use crate::agents::executor::run_browser_engine;
use crate::config::{ClientSet, PipelineConfig, Tier};
use crate::cost::estimate_llm_cost;
use crate::protocol::{RubricValidation, ValidateRequest, ValidateResponse, VisionAnalysis};

const VISION_PREAMBLE: &str = "You judge whether a sequence of UI screenshots shows \
correct application behavior for the described test. Respond with exactly three lines: \
'CORRECT: <true|false>', 'CONFIDENCE: <0.0-1.0>', then 'FINDINGS: <one sentence>'.";

pub struct Validator {
    vision: Option<openai::CompletionsClient>,
    vision_model: Option<String>,
    phase2_enabled: bool,
    phase2_max_images: usize,
    time_cap_ms: u64,
}

impl Validator {
    pub fn new(clients: &ClientSet, config: &PipelineConfig) -> Self {
        Self {
            vision: clients.vision.clone(),
            vision_model: config.vision_endpoint.as_ref().map(|e| e.model.clone()),
            phase2_enabled: config.phase2_enabled,
            phase2_max_images: config.phase2_max_images,
            time_cap_ms: config.validator_time_cap_ms,
        }
    }

    /// Phase 2: send the collected screenshots to the vision model for a
    /// UI-correctness judgement. Skipped (returns `None`, not an error) on
    /// missing evidence, a missing vision client, or any API failure.
    async fn run_phase2(&self, screenshots: &[String]) -> Option<VisionAnalysis> {
        if screenshots.is_empty() {
            return None;
        }
        let (client, model) = match (&self.vision, &self.vision_model) {
            (Some(client), Some(model)) => (client, model),
            _ => return None,
        };

        let bounded = &screenshots[..screenshots.len().min(self.phase2_max_images)];
        let agent = client
            .agent(model)
            .name("validator_vision")
            .preamble(VISION_PREAMBLE)
            .build();

        let prompt = format!(
            "Screenshots in order (paths on the validation host): {}",
            bounded.join(", ")
        );

        let response: String = match agent.prompt(prompt.as_str()).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "vision phase 2 call failed, skipping");
                return None;
            }
        };
        let call_cost = estimate_llm_cost(Tier::Vision, &prompt, &response);

        let mut ui_correctness = false;
        let mut confidence_score = 0.0f32;
        let mut findings = String::new();
        for line in response.lines() {
            let line = line.trim();
            if let Some(v) = line.strip_prefix("CORRECT:") {
                ui_correctness = v.trim().eq_ignore_ascii_case("true");
            } else if let Some(v) = line.strip_prefix("CONFIDENCE:") {
                confidence_score = v.trim().parse().unwrap_or(0.0);
            } else if let Some(v) = line.strip_prefix("FINDINGS:") {
                findings = v.trim().to_string();
            }
        }

        Some(VisionAnalysis {
            ui_correctness,
            confidence_score,
            findings,
            screenshots_analyzed: bounded.len(),
            cost: call_cost,
        })
    }
}

#[async_trait]
impl Worker for Validator {
    async fn execute(&self, input: WorkerInput) -> PipelineResult<WorkerOutput> {
        let req: ValidateRequest = serde_json::from_value(input.payload)?;
        let time_cap_ms = if req.timeout_cap_ms > 0 {
            req.timeout_cap_ms
        } else {
            self.time_cap_ms
        };

        let validation_result = match run_browser_engine(&req.test_source, time_cap_ms, true).await
        {
            Ok(outcome) => outcome,
            Err(e) if e.is_router_surfaced() => crate::protocol::ExecutionOutcome::default(),
            Err(e) => return Err(e),
        };

        let passed = validation_result.passes_rubric(time_cap_ms);
        let mut errors = Vec::new();
        if !validation_result.browser_launched {
            errors.push("browser did not launch".to_string());
        }
        if !validation_result.test_executed {
            errors.push("test did not execute".to_string());
        }
        if !validation_result.test_passed {
            errors.push("test assertions failed".to_string());
        }
        if validation_result.screenshots.is_empty() {
            errors.push("no screenshots captured".to_string());
        }
        if validation_result.execution_time_ms > time_cap_ms {
            errors.push(format!(
                "execution time {}ms exceeded cap {}ms",
                validation_result.execution_time_ms, time_cap_ms
            ));
        }
        let warnings: Vec<String> = validation_result
            .console_errors
            .iter()
            .chain(validation_result.network_failures.iter())
            .cloned()
            .collect();

        let ai_analysis = if req.phase2 && self.phase2_enabled && passed {
            self.run_phase2(&validation_result.screenshots).await
        } else {
            None
        };

        let attempt_outcome = if passed {
            AttemptOutcome::Success
        } else {
            AttemptOutcome::Failed
        };
        let attempt = Attempt::new("validator", req.test_source.as_bytes(), attempt_outcome)
            .with_duration(validation_result.execution_time_ms);

        let response = ValidateResponse {
            validation_result,
            rubric_validation: RubricValidation {
                passed,
                errors,
                warnings,
            },
            ai_analysis,
        };

        Ok(WorkerOutput {
            payload: serde_json::to_value(&response)?,
            artifacts: Vec::new(),
            attempt,
        })
    }
}
