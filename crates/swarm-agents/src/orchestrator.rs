//! Router: drives one Task through generate → critique → execute → repair →
//! validate, enforcing state legality, per-state budgets, and the
//! deterministic escalation policy.
//!
//! The router never calls an LLM directly — every model call lives behind a
//! `Worker`, dispatched through the registry built in `agents::build_registry`.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde_json::Value;
use testgen_core::registry::{PipelineStep, WorkerInput, WorkerOutput, WorkerRegistry};
use testgen_core::{
    AgentOutcome, Artifact, Complexity, EscalationEngine, EscalationState, HitlItem, Intent,
    IntentType, PatternMetadata, PipelineError, PipelineEvent, PipelineResult, RepairBudget,
    RetrievalPattern, RuntimeError, SharedEventBus, SharedHotStore, SuggestedAction, Task, TaskId,
    TaskStatus, VectorIndex,
};

use crate::config::{CriticMode, PipelineConfig};
use crate::cost::CostTracker;
use crate::embedding::embed;
use crate::protocol::{
    CritiqueRequest, ExecuteRequest, ExecutionOutcome, GenerateRequest, GenerateResponse,
    RepairRequest, RepairResponse, ValidateRequest, ValidateResponse,
};
use crate::state_machine::{BudgetTracker, IllegalTransition, StateMachine};

/// Agent/model/feature key the session-wide spend is accumulated and
/// checked under, independent of any one Task's own `cost_so_far`. Mirrors
/// the key `main.rs`'s `status` subcommand already reads.
const SESSION_COST_AGENT: &str = "router";
const SESSION_COST_MODEL: &str = "all";
const SESSION_COST_FEATURE: &str = "all";
/// Window the session cost cap is checked against.
const SESSION_COST_WINDOW: &str = "daily";

/// Outcome of accepting a structured command.
#[derive(Debug, Clone)]
pub enum IntakeOutcome {
    Queued(TaskId),
    NeedsClarification(String),
}

enum RepairOutcome {
    Resolved(String),
    Escalated(String),
}

pub struct Router {
    store: SharedHotStore,
    bus: SharedEventBus,
    registry: Arc<WorkerRegistry>,
    config: PipelineConfig,
    escalation: EscalationEngine,
    cost_tracker: CostTracker,
}

impl Router {
    pub fn new(
        store: SharedHotStore,
        bus: SharedEventBus,
        registry: Arc<WorkerRegistry>,
        config: PipelineConfig,
    ) -> Self {
        let cost_tracker = CostTracker::new(store.clone());
        Self {
            store,
            bus,
            registry,
            config,
            escalation: EscalationEngine::new(),
            cost_tracker,
        }
    }

    /// Session-wide spend recorded so far, across every Task this process
    /// has driven (§4.1: "router consults the Cost Tracker for the current
    /// session", §8 testable property 6).
    fn session_spend(&self) -> PipelineResult<f64> {
        self.cost_tracker.spend(
            SESSION_COST_WINDOW,
            SESSION_COST_AGENT,
            SESSION_COST_MODEL,
            SESSION_COST_FEATURE,
        )
    }

    /// Turn a structured intent into a queued Task, or a clarification ask.
    pub fn intake(&self, intent: Intent) -> PipelineResult<IntakeOutcome> {
        if intent.needs_clarification {
            let prompt = intent
                .clarification_prompt
                .clone()
                .unwrap_or_else(|| "could you clarify the feature to test?".to_string());
            return Ok(IntakeOutcome::NeedsClarification(prompt));
        }

        let task = Task::new(&intent);
        self.persist(&task)?;
        self.bus
            .publish(PipelineEvent::TaskQueued {
                task_id: task.id.clone(),
                feature: task.feature_text.clone(),
                est_cost: 0.0,
                timestamp: Utc::now(),
            })
            .ok();

        Ok(IntakeOutcome::Queued(task.id))
    }

    fn persist(&self, task: &Task) -> PipelineResult<()> {
        self.store
            .put_task(task)
            .map_err(|e| PipelineError::Store(e.to_string()))
    }

    fn model_for_step(&self, step: PipelineStep) -> String {
        match step {
            PipelineStep::Generate => self.config.easy_endpoint.model.clone(),
            PipelineStep::Critique | PipelineStep::Execute => "rule_based".to_string(),
            PipelineStep::Repair => self.config.hard_endpoint.model.clone(),
            PipelineStep::Validate => self
                .config
                .vision_endpoint
                .as_ref()
                .map(|e| e.model.clone())
                .unwrap_or_else(|| "none".to_string()),
        }
    }

    /// Dispatch one worker step, wrapped in the `AgentStarted`/`AgentCompleted`
    /// event pair every step emits regardless of which worker handles it.
    async fn dispatch_step(
        &self,
        task: &Task,
        step: PipelineStep,
        payload: Value,
    ) -> PipelineResult<WorkerOutput> {
        let agent = step.to_string();
        self.bus
            .publish(PipelineEvent::AgentStarted {
                agent: agent.clone(),
                task_id: task.id.clone(),
                model: self.model_for_step(step),
                tools: Vec::new(),
                timestamp: Utc::now(),
            })
            .ok();

        let started = Instant::now();
        let result = self
            .registry
            .dispatch(task.intent_type, step, WorkerInput::new(task.clone(), payload))
            .await;

        let (status, cost) = match &result {
            Ok(output) => (AgentOutcome::Success, output.attempt.cost),
            Err(PipelineError::Runtime(RuntimeError::ExecutionTimeout { .. })) => {
                (AgentOutcome::Timeout, 0.0)
            }
            Err(_) => (AgentOutcome::Failed, 0.0),
        };
        if cost > 0.0 {
            self.cost_tracker
                .record(SESSION_COST_AGENT, SESSION_COST_MODEL, SESSION_COST_FEATURE, cost)?;
        }
        self.bus
            .publish(PipelineEvent::AgentCompleted {
                agent,
                task_id: task.id.clone(),
                status,
                duration_ms: started.elapsed().as_millis() as u64,
                cost_usd: cost,
                timestamp: Utc::now(),
            })
            .ok();

        result
    }

    fn retrieve_patterns(&self, feature_text: &str) -> PipelineResult<Vec<String>> {
        let index =
            VectorIndex::rebuild(&self.store).map_err(|e| PipelineError::Store(e.to_string()))?;
        if index.is_empty() {
            return Ok(Vec::new());
        }
        let query = embed(feature_text);
        Ok(index
            .query(&query, self.config.max_patterns, self.config.pattern_threshold)
            .into_iter()
            .map(|p| p.code.clone())
            .collect())
    }

    /// Persist a newly-validated test as a retrieval pattern. Any phase-1
    /// green is inserted regardless of whether phase 2 ran.
    fn store_pattern(&self, task: &Task, code: &str, phase2_ran: bool) -> PipelineResult<()> {
        let complexity = match task.slots.get("complexity").map(String::as_str) {
            Some("hard") => Complexity::Hard,
            _ => Complexity::Easy,
        };
        let pattern = RetrievalPattern::new(
            code,
            PatternMetadata {
                feature: task.feature_text.clone(),
                complexity,
                validated: true,
                validator_phase2: phase2_ran,
            },
            embed(&task.feature_text),
        );
        self.store
            .put_pattern(&pattern)
            .map_err(|e| PipelineError::Store(e.to_string()))
    }

    fn raise_hitl(&self, task: &Task, reason: &str) -> PipelineResult<()> {
        let item = HitlItem::new(task, priority_from_attempts(task.repair_attempts), reason);
        self.store
            .put_hitl(&item)
            .map_err(|e| PipelineError::Store(e.to_string()))?;
        self.bus
            .publish(PipelineEvent::HitlEscalated {
                task_id: task.id.clone(),
                attempts: item.attempts,
                last_error: reason.to_string(),
                priority: item.priority,
                timestamp: Utc::now(),
            })
            .ok();
        Ok(())
    }

    /// A per-state budget was exhausted (not a quality or repair-policy
    /// escalation): block the task rather than route it to a human, since
    /// `BudgetBlocked` is legal from every non-terminal state and `Hitl` is
    /// not legal from every state a budget can be exhausted in.
    fn block_on_budget(
        &self,
        task: &mut Task,
        sm: &mut StateMachine,
        reason: String,
    ) -> PipelineResult<TaskStatus> {
        sm.block_on_budget(&reason).map_err(illegal)?;
        task.status = TaskStatus::BudgetBlocked;
        self.persist(task)?;
        Ok(task.status)
    }

    /// Drive `task_id` from its current status through to a terminal state
    /// (or `BudgetBlocked`, which a later run can retry). Only intents for
    /// which `IntentType::is_full_pipeline()` is true are driven here.
    pub async fn run_task(&self, task_id: &str) -> PipelineResult<TaskStatus> {
        let mut task = self
            .store
            .get_task(task_id)
            .map_err(|e| PipelineError::Store(e.to_string()))?
            .ok_or_else(|| {
                PipelineError::Runtime(RuntimeError::MissingArtifact {
                    description: format!("no task {task_id}"),
                })
            })?;

        if !task.intent_type.is_full_pipeline() {
            return Ok(task.status);
        }

        let session_spend = self.session_spend()?;
        if session_spend >= self.config.session_cost_cap {
            task.status = TaskStatus::BudgetBlocked;
            self.persist(&task)?;
            self.bus
                .publish(PipelineEvent::BudgetExceeded {
                    current_spend: session_spend,
                    limit: self.config.session_cost_cap,
                    tasks_blocked: 1,
                    timestamp: Utc::now(),
                })
                .ok();
            return Ok(task.status);
        } else if session_spend >= self.config.session_cost_cap * 0.8 {
            self.bus
                .publish(PipelineEvent::BudgetWarning {
                    current_spend: session_spend,
                    limit: self.config.session_cost_cap,
                    remaining: self.config.session_cost_cap - session_spend,
                    timestamp: Utc::now(),
                })
                .ok();
        }

        let mut sm = StateMachine::new();
        let mut budget = BudgetTracker::with_defaults();
        let mut escalation_state = EscalationState::new(task_id).with_budget(RepairBudget {
            max_attempts: self.config.max_fix_attempts,
        });

        // ---- Generate (the worker itself retries internally) ----
        sm.advance(TaskStatus::Generating, Some("intake accepted"))
            .map_err(illegal)?;
        budget.on_state_entered(TaskStatus::Generating);
        task.status = TaskStatus::Generating;
        self.persist(&task)?;

        let patterns = self.retrieve_patterns(&task.feature_text)?;
        let generate_request = GenerateRequest {
            feature_text: task.feature_text.clone(),
            complexity_hint: task.slots.get("complexity").cloned(),
            retry_feedback: Vec::new(),
            retrieved_patterns: patterns.clone(),
        };
        let generate_output = self
            .dispatch_step(
                &task,
                PipelineStep::Generate,
                serde_json::to_value(&generate_request)?,
            )
            .await?;
        task.record_attempt(generate_output.attempt.clone());
        for artifact in generate_output.artifacts.clone() {
            task.add_artifact(artifact);
        }
        self.persist(&task)?;

        let generate_response: GenerateResponse = serde_json::from_value(generate_output.payload)?;
        if !generate_response.self_validation.passed {
            sm.advance(
                TaskStatus::FailedGenerate,
                Some("self-validation did not pass within the retry budget"),
            )
            .map_err(illegal)?;
            task.status = TaskStatus::FailedGenerate;
            self.persist(&task)?;
            return Ok(task.status);
        }

        // ---- Critique ----
        sm.advance(TaskStatus::Critiquing, Some("generator self-validation passed"))
            .map_err(illegal)?;
        budget.on_state_entered(TaskStatus::Critiquing);
        task.status = TaskStatus::Critiquing;
        self.persist(&task)?;

        let critique_request = CritiqueRequest {
            test_source: generate_response.test_source.clone(),
        };
        let critique_output = self
            .dispatch_step(
                &task,
                PipelineStep::Critique,
                serde_json::to_value(&critique_request)?,
            )
            .await?;
        task.record_attempt(critique_output.attempt.clone());
        self.persist(&task)?;

        let critic_report: crate::contracts::CriticReport =
            serde_json::from_value(critique_output.payload)?;
        if critic_report.is_rejected() && self.config.critic_mode == CriticMode::Block {
            let reason = format!(
                "critic blocked the draft ({} critical issue(s))",
                critic_report.counters.critical
            );
            sm.advance(TaskStatus::Hitl, Some(reason.as_str())).map_err(illegal)?;
            task.status = TaskStatus::Hitl;
            self.raise_hitl(&task, &reason)?;
            self.persist(&task)?;
            return Ok(task.status);
        }

        // ---- Execute / Repair / Validate loop ----
        sm.advance(TaskStatus::Executing, Some("critic passed"))
            .map_err(illegal)?;
        task.status = TaskStatus::Executing;
        self.persist(&task)?;

        let mut current_source = generate_response.test_source;
        let regression_scope = &self.config.regression_scope;

        let final_outcome: Result<ValidateResponse, String> = loop {
            budget.on_state_entered(TaskStatus::Executing);
            if let Some(reason) = budget.check_budget(TaskStatus::Executing) {
                return self.block_on_budget(&mut task, &mut sm, reason.to_string());
            }

            let (exec_outcome, exec_artifacts) = self
                .dispatch_execute(&task, &current_source, self.config.executor_timeout_ms, false)
                .await?;
            for artifact in exec_artifacts {
                task.add_artifact(artifact);
            }
            self.persist(&task)?;

            if !exec_outcome.passes_rubric(self.config.executor_timeout_ms) {
                sm.advance(TaskStatus::Repairing, Some("executor outcome failed rubric"))
                    .map_err(illegal)?;
                task.status = TaskStatus::Repairing;
                self.persist(&task)?;

                let error_message = exec_outcome
                    .console_errors
                    .first()
                    .cloned()
                    .unwrap_or_else(|| "test failed without a console error".to_string());

                match self
                    .repair_until_resolved(
                        &mut task,
                        &mut budget,
                        &mut escalation_state,
                        &current_source,
                        error_message,
                        exec_outcome.console_errors.clone(),
                        exec_outcome.network_failures.clone(),
                        regression_scope,
                    )
                    .await?
                {
                    RepairOutcome::Resolved(new_source) => {
                        current_source = new_source;
                        sm.advance(TaskStatus::Executing, Some("repair honored the invariant"))
                            .map_err(illegal)?;
                        task.status = TaskStatus::Executing;
                        self.persist(&task)?;
                        continue;
                    }
                    RepairOutcome::Escalated(reason) => break Err(reason),
                }
            }

            // ---- Validate ----
            sm.advance(TaskStatus::Validating, Some("executor rubric passed"))
                .map_err(illegal)?;
            budget.on_state_entered(TaskStatus::Validating);
            task.status = TaskStatus::Validating;
            self.persist(&task)?;

            let validate_request = ValidateRequest {
                test_source: current_source.clone(),
                timeout_cap_ms: self.config.validator_time_cap_ms,
                phase2: self.config.phase2_enabled,
            };
            let validate_output = self
                .dispatch_step(
                    &task,
                    PipelineStep::Validate,
                    serde_json::to_value(&validate_request)?,
                )
                .await?;
            task.record_attempt(validate_output.attempt.clone());
            for artifact in validate_output.artifacts.clone() {
                task.add_artifact(artifact);
            }
            self.persist(&task)?;

            let validate_response: ValidateResponse = serde_json::from_value(validate_output.payload)?;

            self.bus
                .publish(PipelineEvent::ValidationComplete {
                    task_id: task.id.clone(),
                    passed: validate_response.rubric_validation.passed,
                    cost: validate_response
                        .ai_analysis
                        .as_ref()
                        .map(|a| a.cost)
                        .unwrap_or(0.0),
                    duration_ms: validate_response.validation_result.execution_time_ms,
                    screenshots: validate_response.validation_result.screenshots.clone(),
                    timestamp: Utc::now(),
                })
                .ok();

            if validate_response.rubric_validation.passed {
                break Ok(validate_response);
            }

            sm.advance(TaskStatus::Repairing, Some("validator rejected the result"))
                .map_err(illegal)?;
            task.status = TaskStatus::Repairing;
            self.persist(&task)?;

            match self
                .repair_until_resolved(
                    &mut task,
                    &mut budget,
                    &mut escalation_state,
                    &current_source,
                    validate_response.rubric_validation.errors.join("; "),
                    validate_response.validation_result.console_errors.clone(),
                    validate_response.validation_result.network_failures.clone(),
                    regression_scope,
                )
                .await?
            {
                RepairOutcome::Resolved(new_source) => {
                    current_source = new_source;
                    sm.advance(TaskStatus::Executing, Some("repair honored the invariant"))
                        .map_err(illegal)?;
                    task.status = TaskStatus::Executing;
                    self.persist(&task)?;
                }
                RepairOutcome::Escalated(reason) => break Err(reason),
            }
        };

        match final_outcome {
            Ok(validate_response) => {
                sm.advance(TaskStatus::Done, Some("validator rubric passed"))
                    .map_err(illegal)?;
                task.status = TaskStatus::Done;
                self.persist(&task)?;
                self.store_pattern(&task, &current_source, validate_response.ai_analysis.is_some())?;
                Ok(task.status)
            }
            Err(reason) => {
                sm.advance(TaskStatus::Hitl, Some(reason.as_str())).map_err(illegal)?;
                task.status = TaskStatus::Hitl;
                self.raise_hitl(&task, &reason)?;
                self.persist(&task)?;
                Ok(task.status)
            }
        }
    }

    async fn dispatch_execute(
        &self,
        task: &Task,
        test_source: &str,
        timeout_ms: u64,
        collect_all_screenshots: bool,
    ) -> PipelineResult<(ExecutionOutcome, Vec<Artifact>)> {
        let request = ExecuteRequest {
            test_source: test_source.to_string(),
            timeout_ms,
            collect_all_screenshots,
        };
        let output = self
            .dispatch_step(task, PipelineStep::Execute, serde_json::to_value(&request)?)
            .await?;
        let outcome = serde_json::from_value(output.payload)?;
        Ok((outcome, output.artifacts))
    }

    /// Repeatedly dispatch Repair until the escalation engine says `Proceed`
    /// (the do-no-harm invariant held) or `FlagForHuman`.
    #[allow(clippy::too_many_arguments)]
    async fn repair_until_resolved(
        &self,
        task: &mut Task,
        budget: &mut BudgetTracker,
        escalation_state: &mut EscalationState,
        current_source: &str,
        error_message: String,
        console_errors: Vec<String>,
        network_failures: Vec<String>,
        regression_scope: &[String],
    ) -> PipelineResult<RepairOutcome> {
        let mut prior_diagnoses: Vec<String> = Vec::new();

        loop {
            budget.on_state_entered(TaskStatus::Repairing);
            if let Some(reason) = budget.check_budget(TaskStatus::Repairing) {
                return Ok(RepairOutcome::Escalated(reason.to_string()));
            }

            let repair_request = RepairRequest {
                test_source: current_source.to_string(),
                error_message: error_message.clone(),
                console_errors: console_errors.clone(),
                network_failures: network_failures.clone(),
                prior_attempts: prior_diagnoses.clone(),
                regression_scope: regression_scope.to_vec(),
            };
            let output = self
                .dispatch_step(task, PipelineStep::Repair, serde_json::to_value(&repair_request)?)
                .await?;
            task.record_attempt(output.attempt.clone());
            task.repair_attempts += 1;
            self.persist(task)?;

            let response: RepairResponse = serde_json::from_value(output.payload)?;
            prior_diagnoses.push(response.diagnosis.clone());

            let decision = self.escalation.decide(
                escalation_state,
                response.new_failures,
                response.confidence,
                response.suspected_app_side,
            );

            match decision.action {
                SuggestedAction::Proceed => {
                    let source = response
                        .patched_source
                        .unwrap_or_else(|| current_source.to_string());
                    return Ok(RepairOutcome::Resolved(source));
                }
                SuggestedAction::RetryRepair => continue,
                SuggestedAction::FlagForHuman { reason } => {
                    return Ok(RepairOutcome::Escalated(reason));
                }
            }
        }
    }
}

fn priority_from_attempts(attempts: u32) -> f32 {
    (attempts as f32 / 5.0).min(1.0)
}

fn illegal(e: IllegalTransition) -> PipelineError {
    PipelineError::Runtime(RuntimeError::MissingArtifact {
        description: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_scales_with_attempts_and_caps_at_one() {
        assert_eq!(priority_from_attempts(0), 0.0);
        assert!((priority_from_attempts(5) - 1.0).abs() < 1e-6);
        assert!((priority_from_attempts(10) - 1.0).abs() < 1e-6);
    }
}
