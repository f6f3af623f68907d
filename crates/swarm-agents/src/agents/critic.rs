//! Critic worker: a thin `Worker` wrapper over the shared, purely
//! deterministic rule set in `contracts::review_source` (§4.3). No LLM call.

use async_trait::async_trait;
use testgen_core::registry::{Worker, WorkerInput, WorkerOutput};
use testgen_core::{Attempt, AttemptOutcome, PipelineResult};

use crate::config::PipelineConfig;
use crate::contracts::review_source;
use crate::protocol::CritiqueRequest;

pub struct CriticWorker {
    max_steps: u32,
    max_duration_ms: u64,
}

impl CriticWorker {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            max_steps: config.critic_max_steps,
            max_duration_ms: config.critic_max_duration_ms,
        }
    }
}

#[async_trait]
impl Worker for CriticWorker {
    async fn execute(&self, input: WorkerInput) -> PipelineResult<WorkerOutput> {
        let req: CritiqueRequest = serde_json::from_value(input.payload)?;
        let report = review_source(&req.test_source, self.max_steps, self.max_duration_ms);

        let outcome = if report.is_rejected() {
            AttemptOutcome::Rejected
        } else {
            AttemptOutcome::Success
        };
        let attempt = Attempt::new("critic", req.test_source.as_bytes(), outcome);

        Ok(WorkerOutput {
            payload: serde_json::to_value(&report)?,
            artifacts: Vec::new(),
            attempt,
        })
    }
}
