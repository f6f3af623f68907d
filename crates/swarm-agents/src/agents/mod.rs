//! Worker builders for the test-generation pipeline.
//!
//! Each worker implements `testgen_core::registry::Worker`; `build_registry`
//! wires them into the `(intent_type, pipeline_step)` dispatch table the
//! router looks them up through.

pub mod critic;
pub mod executor;
pub mod generator;
pub mod repair;

use std::sync::Arc;

use testgen_core::registry::{PipelineStep, WorkerRegistry};
use testgen_core::IntentType;

use crate::config::{ClientSet, PipelineConfig};
use crate::validator::Validator;

/// Build the worker registry driving the full pipeline (§4.1-4.6).
///
/// `CreateTest` and `BuildFeature` are the two intent types for which
/// `IntentType::is_full_pipeline()` is true; both route through the same
/// five workers.
pub fn build_registry(clients: &ClientSet, config: &PipelineConfig) -> WorkerRegistry {
    let mut registry = WorkerRegistry::new();

    let generator = Arc::new(generator::GeneratorWorker::new(clients, config));
    let critic = Arc::new(critic::CriticWorker::new(config));
    let executor = Arc::new(executor::ExecutorWorker::new(config));
    let repair = Arc::new(repair::RepairWorker::new(clients, config));
    let validator = Arc::new(Validator::new(clients, config));

    for intent in [IntentType::CreateTest, IntentType::BuildFeature] {
        registry.register(intent, PipelineStep::Generate, generator.clone());
        registry.register(intent, PipelineStep::Critique, critic.clone());
        registry.register(intent, PipelineStep::Execute, executor.clone());
        registry.register(intent, PipelineStep::Repair, repair.clone());
        registry.register(intent, PipelineStep::Validate, validator.clone());
    }

    registry
}
