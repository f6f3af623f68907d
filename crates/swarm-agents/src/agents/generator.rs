//! Generator worker: draft a browser test from a feature description,
//! optionally grounded in retrieved patterns, then self-validate against the
//! same rule set the Critic uses (§4.2).

use async_trait::async_trait;
use rig::client::CompletionClient;
use rig::completion::Prompt;
use rig::providers::openai;
use testgen_core::registry::{Worker, WorkerInput, WorkerOutput};
use testgen_core::{Artifact, ArtifactKind, Attempt, AttemptOutcome, PipelineResult};

use crate::config::{ClientSet, PipelineConfig, Tier};
use crate::contracts::{review_source, SelfValidationReport};
use crate::cost::estimate_llm_cost;
use crate::protocol::{GenerateRequest, GenerateResponse};

const GENERATOR_PREAMBLE: &str = "You write browser end-to-end tests. Given a feature \
description and, optionally, similar previously-validated tests, produce a single \
self-contained test script. Always: target elements with data-testid selectors, assert \
on observable UI state, capture a screenshot after each significant interaction, and \
read the base URL from a template variable rather than hardcoding a host. Return only \
the test source, no commentary.";

pub struct GeneratorWorker {
    easy: openai::CompletionsClient,
    hard: openai::CompletionsClient,
    easy_model: String,
    hard_model: String,
    max_steps: u32,
    max_duration_ms: u64,
    max_retries: u32,
    generated_tests_dir: std::path::PathBuf,
}

impl GeneratorWorker {
    pub fn new(clients: &ClientSet, config: &PipelineConfig) -> Self {
        Self {
            easy: clients.easy.clone(),
            hard: clients.hard.clone(),
            easy_model: config.easy_endpoint.model.clone(),
            hard_model: config.hard_endpoint.model.clone(),
            max_steps: config.critic_max_steps,
            max_duration_ms: config.critic_max_duration_ms,
            max_retries: config.generator_max_retries,
            generated_tests_dir: config.generated_tests_dir.clone(),
        }
    }

    fn build_prompt(&self, req: &GenerateRequest) -> String {
        let mut prompt = format!("Feature: {}\n", req.feature_text);
        if !req.retrieved_patterns.is_empty() {
            prompt.push_str("\nSimilar validated tests for reference:\n");
            for (i, pattern) in req.retrieved_patterns.iter().enumerate() {
                prompt.push_str(&format!("--- pattern {} ---\n{pattern}\n", i + 1));
            }
        }
        if !req.retry_feedback.is_empty() {
            prompt.push_str("\nThe previous draft was rejected for:\n");
            for issue in &req.retry_feedback {
                prompt.push_str(&format!("- {issue}\n"));
            }
            prompt.push_str("Fix these issues in the new draft.\n");
        }
        prompt
    }

    /// Write the accepted draft to `generated_tests_dir` and build the
    /// `TestSource` artifact recording it. Logged and skipped, not fatal, on
    /// I/O failure — the test source still reaches the caller via the
    /// response payload.
    fn write_test_source(&self, digest_input: &[u8], test_source: &str) -> Option<Artifact> {
        if let Err(e) = std::fs::create_dir_all(&self.generated_tests_dir) {
            tracing::warn!(error = %e, "failed to create generated tests directory");
            return None;
        }
        let file_name = format!("{}.spec", blake3::hash(digest_input).to_hex());
        let path = self.generated_tests_dir.join(file_name);
        if let Err(e) = std::fs::write(&path, test_source) {
            tracing::warn!(error = %e, "failed to write generated test source");
            return None;
        }
        Some(Artifact::new(
            ArtifactKind::TestSource,
            path.to_string_lossy().into_owned(),
            test_source.as_bytes(),
        ))
    }
}

#[async_trait]
impl Worker for GeneratorWorker {
    async fn execute(&self, input: WorkerInput) -> PipelineResult<WorkerOutput> {
        let req: GenerateRequest = serde_json::from_value(input.payload)?;

        let (client, model, tier) = match req.complexity_hint.as_deref() {
            Some("hard") => (&self.hard, self.hard_model.as_str(), Tier::Hard),
            _ => (&self.easy, self.easy_model.as_str(), Tier::Easy),
        };

        let agent = client
            .agent(model)
            .name("test_generator")
            .preamble(GENERATOR_PREAMBLE)
            .build();

        let prompt = self.build_prompt(&req);
        let digest_input = prompt.as_bytes().to_vec();

        let mut test_source = String::new();
        let mut self_validation = SelfValidationReport::fail_closed(0);
        let mut attempts_used = 0u32;
        let mut call_cost = 0.0f64;

        while attempts_used < self.max_retries {
            attempts_used += 1;
            let draft: String = agent
                .prompt(prompt.as_str())
                .await
                .map_err(|e| {
                    testgen_core::ProviderError::Network {
                        service: "generator".to_string(),
                        message: e.to_string(),
                    }
                })?;

            call_cost += estimate_llm_cost(tier, &prompt, &draft);

            let report = review_source(&draft, self.max_steps, self.max_duration_ms);
            let patterns_used: Vec<String> = req
                .retrieved_patterns
                .iter()
                .take(req.retrieved_patterns.len())
                .cloned()
                .collect();
            self_validation =
                SelfValidationReport::from_critic_report(&report, attempts_used, patterns_used);
            test_source = draft;

            if self_validation.passed {
                break;
            }
        }

        let outcome = if self_validation.passed {
            AttemptOutcome::Success
        } else {
            AttemptOutcome::Rejected
        };

        let mut artifacts = Vec::new();
        if self_validation.passed {
            if let Some(artifact) = self.write_test_source(&digest_input, &test_source) {
                artifacts.push(artifact);
            }
        }

        let attempt = Attempt::new("generator", &digest_input, outcome).with_cost(call_cost);

        let response = GenerateResponse {
            test_source,
            self_validation,
        };

        Ok(WorkerOutput {
            payload: serde_json::to_value(&response)?,
            artifacts,
            attempt,
        })
    }
}
