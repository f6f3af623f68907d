//! Worker dispatch registry.
//!
//! A small registry maps `(intent_type, pipeline_step)` to a worker
//! implementing a single trait with one async entry point. The router never
//! matches on worker identity directly — it looks the worker up here and
//! calls the trait method. New intent types or steps register new entries;
//! no router control flow needs to change.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::PipelineResult;
use crate::state::{Artifact, Attempt, IntentType, Task};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStep {
    Generate,
    Critique,
    Execute,
    Repair,
    Validate,
}

impl std::fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Generate => "generate",
            Self::Critique => "critique",
            Self::Execute => "execute",
            Self::Repair => "repair",
            Self::Validate => "validate",
        };
        write!(f, "{s}")
    }
}

/// Input handed to a worker: the Task it is operating on, plus a
/// step-specific payload (e.g. the candidate test source for Critic).
#[derive(Debug, Clone)]
pub struct WorkerInput {
    pub task: Task,
    pub payload: Value,
}

impl WorkerInput {
    pub fn new(task: Task, payload: Value) -> Self {
        Self { task, payload }
    }
}

/// Output from a worker invocation: a step-specific payload, any artifacts
/// produced, and the Attempt record to append to the Task.
#[derive(Debug, Clone)]
pub struct WorkerOutput {
    pub payload: Value,
    pub artifacts: Vec<Artifact>,
    pub attempt: Attempt,
}

/// Stable interface every pipeline worker implements.
#[async_trait]
pub trait Worker: Send + Sync {
    async fn execute(&self, input: WorkerInput) -> PipelineResult<WorkerOutput>;
}

/// Maps `(intent_type, pipeline_step)` to the worker that handles it.
#[derive(Default)]
pub struct WorkerRegistry {
    workers: HashMap<(IntentType, PipelineStep), Arc<dyn Worker>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self {
            workers: HashMap::new(),
        }
    }

    pub fn register(&mut self, intent: IntentType, step: PipelineStep, worker: Arc<dyn Worker>) {
        self.workers.insert((intent, step), worker);
    }

    pub fn get(&self, intent: IntentType, step: PipelineStep) -> Option<&Arc<dyn Worker>> {
        self.workers.get(&(intent, step))
    }

    pub async fn dispatch(
        &self,
        intent: IntentType,
        step: PipelineStep,
        input: WorkerInput,
    ) -> PipelineResult<WorkerOutput> {
        match self.get(intent, step) {
            Some(worker) => worker.execute(input).await,
            None => Err(crate::error::RuntimeError::MissingArtifact {
                description: format!("no worker registered for {intent}/{step}"),
            }
            .into()),
        }
    }
}
