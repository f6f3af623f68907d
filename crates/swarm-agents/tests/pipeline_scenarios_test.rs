//! End-to-end scenarios for the generate -> critique -> execute -> repair ->
//! validate loop, driven against a real `Router`/`HotStore`/`EventBus` with
//! fake workers standing in for the model- and browser-calling steps.
//!
//! Each fake worker is deterministic; where behaviour changes across calls
//! (a flaky executor that turns green after N attempts) that state lives in
//! an `AtomicU32` counter. No network access or browser required.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use testgen_core::registry::{PipelineStep, Worker, WorkerInput, WorkerOutput, WorkerRegistry};
use testgen_core::{
    Artifact, ArtifactKind, Attempt, AttemptOutcome, EventBus, HotStore, Intent, IntentType,
    PipelineResult, TaskStatus,
};
use testgen_workers::config::PipelineConfig;
use testgen_workers::contracts::{CriticReport, CriticStatus, Counters, SelfValidationReport};
use testgen_workers::orchestrator::{IntakeOutcome, Router};
use testgen_workers::protocol::{
    ExecutionOutcome, GenerateResponse, RepairResponse, RubricValidation, ValidateResponse,
};

fn fresh_config() -> PipelineConfig {
    let mut config = PipelineConfig::test_config("http://localhost:0");
    config.store_path = std::env::temp_dir().join(format!("testgen-scenario-{}", uuid::Uuid::new_v4()));
    config
}

fn attempt(worker: &str, outcome: AttemptOutcome, cost: f64) -> Attempt {
    Attempt::new(worker, b"fixture", outcome).with_cost(cost)
}

/// Always returns a passing self-validated draft.
struct FixedGenerator {
    source: String,
}

#[async_trait]
impl Worker for FixedGenerator {
    async fn execute(&self, _input: WorkerInput) -> PipelineResult<WorkerOutput> {
        let response = GenerateResponse {
            test_source: self.source.clone(),
            self_validation: SelfValidationReport {
                passed: true,
                issues: Vec::new(),
                attempts_used: 1,
                patterns_used: Vec::new(),
            },
        };
        Ok(WorkerOutput {
            payload: serde_json::to_value(&response)?,
            artifacts: vec![Artifact::new(
                ArtifactKind::TestSource,
                "test_source.spec.ts",
                self.source.as_bytes(),
            )],
            attempt: attempt("generator", AttemptOutcome::Success, 0.02),
        })
    }
}

/// Approves every draft outright.
struct ApprovingCritic;

#[async_trait]
impl Worker for ApprovingCritic {
    async fn execute(&self, _input: WorkerInput) -> PipelineResult<WorkerOutput> {
        let report = CriticReport {
            status: CriticStatus::Approved,
            issues: Vec::new(),
            counters: Counters::default(),
            estimated_cost: 0.0,
            estimated_duration_ms: 0,
        };
        Ok(WorkerOutput {
            payload: serde_json::to_value(&report)?,
            artifacts: Vec::new(),
            attempt: attempt("critic", AttemptOutcome::Success, 0.0),
        })
    }
}

/// Generator whose own internal self-validation rejected the draft twice
/// (`.nth(2)`, `waitForTimeout`) before the retry loop landed on a draft
/// that passes — the retry count the self-validation rule set drives
/// happens entirely inside the worker (§4.2 step 4), not in the router.
struct SelfCorrectingGenerator {
    source: String,
    attempts_used: u32,
}

#[async_trait]
impl Worker for SelfCorrectingGenerator {
    async fn execute(&self, _input: WorkerInput) -> PipelineResult<WorkerOutput> {
        let response = GenerateResponse {
            test_source: self.source.clone(),
            self_validation: SelfValidationReport {
                passed: true,
                issues: Vec::new(),
                attempts_used: self.attempts_used,
                patterns_used: Vec::new(),
            },
        };
        Ok(WorkerOutput {
            payload: serde_json::to_value(&response)?,
            artifacts: vec![Artifact::new(
                ArtifactKind::TestSource,
                "test_source.spec.ts",
                self.source.as_bytes(),
            )],
            attempt: attempt("generator", AttemptOutcome::Success, 0.02)
                .with_diagnosis(format!("self_validation.attempts_used={}", self.attempts_used)),
        })
    }
}

/// Always a green run: launched, executed, passed, one screenshot, fast.
struct GreenExecutor;

#[async_trait]
impl Worker for GreenExecutor {
    async fn execute(&self, _input: WorkerInput) -> PipelineResult<WorkerOutput> {
        let outcome = ExecutionOutcome {
            browser_launched: true,
            test_executed: true,
            test_passed: true,
            screenshots: vec!["shot-1.png".to_string()],
            console_errors: Vec::new(),
            network_failures: Vec::new(),
            execution_time_ms: 1_200,
        };
        Ok(WorkerOutput {
            payload: serde_json::to_value(&outcome)?,
            artifacts: Vec::new(),
            attempt: attempt("executor", AttemptOutcome::Success, 0.01),
        })
    }
}

/// Fails the first `fail_count` calls with a missing-selector error, then green.
struct SelectorFlakeExecutor {
    calls: AtomicU32,
    fail_count: u32,
}

impl SelectorFlakeExecutor {
    fn new(fail_count: u32) -> Self {
        Self { calls: AtomicU32::new(0), fail_count }
    }
}

#[async_trait]
impl Worker for SelectorFlakeExecutor {
    async fn execute(&self, _input: WorkerInput) -> PipelineResult<WorkerOutput> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let outcome = if call < self.fail_count {
            ExecutionOutcome {
                browser_launched: true,
                test_executed: true,
                test_passed: false,
                screenshots: Vec::new(),
                console_errors: vec!["Selector [data-testid='submit-order'] not found".to_string()],
                network_failures: Vec::new(),
                execution_time_ms: 900,
            }
        } else {
            ExecutionOutcome {
                browser_launched: true,
                test_executed: true,
                test_passed: true,
                screenshots: vec!["shot-1.png".to_string()],
                console_errors: Vec::new(),
                network_failures: Vec::new(),
                execution_time_ms: 1_100,
            }
        };
        Ok(WorkerOutput {
            payload: serde_json::to_value(&outcome)?,
            artifacts: Vec::new(),
            attempt: attempt("executor", AttemptOutcome::Success, 0.01),
        })
    }
}

/// Patches cleanly with the hippocratic invariant honored: no new failures.
struct CleanRepair {
    patched_source: String,
}

#[async_trait]
impl Worker for CleanRepair {
    async fn execute(&self, _input: WorkerInput) -> PipelineResult<WorkerOutput> {
        let response = RepairResponse {
            patched_source: Some(self.patched_source.clone()),
            diff: "--- a/test.spec.ts\n+++ b/test.spec.ts\n".to_string(),
            baseline_failures: 0,
            new_failures: 0,
            confidence: 0.92,
            suspected_app_side: false,
            hippocratic_oath_honored: true,
            diagnosis: "stale selector, swapped to the stable data-testid".to_string(),
        };
        Ok(WorkerOutput {
            payload: serde_json::to_value(&response)?,
            artifacts: vec![
                Artifact::new(ArtifactKind::Diff, "fix.diff", response.diff.as_bytes()),
                Artifact::new(
                    ArtifactKind::RegressionReport,
                    "regression_report.json",
                    b"{\"new_failures\":0}",
                ),
            ],
            attempt: attempt("repair", AttemptOutcome::Success, 0.05),
        })
    }
}

/// Introduces a regression and is rolled back: `new_failures=1`, no patch.
struct RegressingRepair;

#[async_trait]
impl Worker for RegressingRepair {
    async fn execute(&self, _input: WorkerInput) -> PipelineResult<WorkerOutput> {
        let response = RepairResponse {
            patched_source: None,
            diff: "--- a/test.spec.ts\n+++ b/test.spec.ts\n".to_string(),
            baseline_failures: 0,
            new_failures: 1,
            confidence: 0.4,
            suspected_app_side: false,
            hippocratic_oath_honored: false,
            diagnosis: "patch broke core-nav".to_string(),
        };
        Ok(WorkerOutput {
            payload: serde_json::to_value(&response)?,
            artifacts: Vec::new(),
            attempt: attempt("repair", AttemptOutcome::Success, 0.05),
        })
    }
}

/// Always green with two screenshots, phase 2 disabled in the request driving it.
struct GreenValidator;

#[async_trait]
impl Worker for GreenValidator {
    async fn execute(&self, _input: WorkerInput) -> PipelineResult<WorkerOutput> {
        let response = ValidateResponse {
            validation_result: ExecutionOutcome {
                browser_launched: true,
                test_executed: true,
                test_passed: true,
                screenshots: vec!["shot-1.png".to_string(), "shot-2.png".to_string()],
                console_errors: Vec::new(),
                network_failures: Vec::new(),
                execution_time_ms: 3_200,
            },
            rubric_validation: RubricValidation { passed: true, errors: Vec::new(), warnings: Vec::new() },
            ai_analysis: None,
        };
        Ok(WorkerOutput {
            payload: serde_json::to_value(&response)?,
            artifacts: vec![
                Artifact::new(ArtifactKind::Screenshot, "shot-1.png", b"s1"),
                Artifact::new(ArtifactKind::Screenshot, "shot-2.png", b"s2"),
            ],
            attempt: attempt("validator", AttemptOutcome::Success, 0.03),
        })
    }
}

fn registry(
    generator: impl Worker + 'static,
    critic: impl Worker + 'static,
    executor: impl Worker + 'static,
    repair: impl Worker + 'static,
    validator: impl Worker + 'static,
) -> Arc<WorkerRegistry> {
    let mut registry = WorkerRegistry::new();
    registry.register(IntentType::CreateTest, PipelineStep::Generate, Arc::new(generator));
    registry.register(IntentType::CreateTest, PipelineStep::Critique, Arc::new(critic));
    registry.register(IntentType::CreateTest, PipelineStep::Execute, Arc::new(executor));
    registry.register(IntentType::CreateTest, PipelineStep::Repair, Arc::new(repair));
    registry.register(IntentType::CreateTest, PipelineStep::Validate, Arc::new(validator));
    Arc::new(registry)
}

/// S1 — happy path: approve, green execute, green validate.
#[tokio::test]
async fn s1_happy_path_reaches_done_with_two_screenshots() {
    let config = fresh_config();
    let store = HotStore::open(&config.store_path).unwrap().shared();
    let bus = EventBus::new().shared();
    let registry = registry(
        FixedGenerator { source: "test('login', async () => {});".to_string() },
        ApprovingCritic,
        GreenExecutor,
        CleanRepair { patched_source: String::new() },
        GreenValidator,
    );
    let router = Router::new(store.clone(), bus.clone(), registry, config);

    let intent = Intent::new(IntentType::CreateTest, "write a test for user login", 0.95);
    let task_id = match router.intake(intent).unwrap() {
        IntakeOutcome::Queued(id) => id,
        IntakeOutcome::NeedsClarification(p) => panic!("unexpected clarification: {p}"),
    };

    let status = router.run_task(&task_id).await.unwrap();

    assert_eq!(status, TaskStatus::Done);
    let task = store.get_task(&task_id).unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Done);
    let screenshots = task
        .artifacts
        .iter()
        .filter(|a| a.kind == ArtifactKind::Screenshot)
        .count();
    assert_eq!(screenshots, 2);
    assert!(task.artifacts.iter().any(|a| a.kind == ArtifactKind::TestSource));

    let patterns = store.all_patterns().unwrap();
    assert_eq!(patterns.len(), 1);
}

/// S2 — the generator's internal retry loop burns two self-validation
/// attempts before landing on a draft clean enough to pass the external
/// critic outright; the task still reaches done on the single router pass.
#[tokio::test]
async fn s2_generator_self_correction_still_reaches_done() {
    let mut config = fresh_config();
    config.critic_mode = testgen_workers::config::CriticMode::Block;
    let store = HotStore::open(&config.store_path).unwrap().shared();
    let bus = EventBus::new().shared();
    let registry = registry(
        SelfCorrectingGenerator {
            source: "test('checkout', async () => {});".to_string(),
            attempts_used: 2,
        },
        ApprovingCritic,
        GreenExecutor,
        CleanRepair { patched_source: String::new() },
        GreenValidator,
    );
    let router = Router::new(store.clone(), bus.clone(), registry, config);

    let intent = Intent::new(IntentType::CreateTest, "create a checkout test", 0.9);
    let task_id = match router.intake(intent).unwrap() {
        IntakeOutcome::Queued(id) => id,
        IntakeOutcome::NeedsClarification(p) => panic!("unexpected clarification: {p}"),
    };
    let status = router.run_task(&task_id).await.unwrap();

    assert_eq!(status, TaskStatus::Done);
    let task = store.get_task(&task_id).unwrap().unwrap();
    let generate_attempt = task.attempts.iter().find(|a| a.worker == "generator").unwrap();
    assert_eq!(generate_attempt.diagnosis.as_deref(), Some("self_validation.attempts_used=2"));
}

/// A critic rejection in block mode (first external check after the
/// generator's own retries are exhausted) routes straight to Hitl rather
/// than being silently dropped.
#[tokio::test]
async fn critic_rejection_in_block_mode_routes_to_hitl() {
    let mut config = fresh_config();
    config.critic_mode = testgen_workers::config::CriticMode::Block;
    let store = HotStore::open(&config.store_path).unwrap().shared();
    let bus = EventBus::new().shared();
    let rejecting_report = CriticReport {
        status: CriticStatus::Rejected,
        issues: Vec::new(),
        counters: Counters { critical: 2, ..Counters::default() },
        estimated_cost: 0.0,
        estimated_duration_ms: 0,
    };
    struct RejectingCritic(CriticReport);
    #[async_trait]
    impl Worker for RejectingCritic {
        async fn execute(&self, _input: WorkerInput) -> PipelineResult<WorkerOutput> {
            Ok(WorkerOutput {
                payload: serde_json::to_value(&self.0)?,
                artifacts: Vec::new(),
                attempt: attempt("critic", AttemptOutcome::Rejected, 0.0),
            })
        }
    }
    let registry = registry(
        FixedGenerator { source: "test('x', async () => {});".to_string() },
        RejectingCritic(rejecting_report),
        GreenExecutor,
        CleanRepair { patched_source: String::new() },
        GreenValidator,
    );
    let router = Router::new(store.clone(), bus.clone(), registry, config);

    let intent = Intent::new(IntentType::CreateTest, "create a checkout test", 0.9);
    let task_id = match router.intake(intent).unwrap() {
        IntakeOutcome::Queued(id) => id,
        IntakeOutcome::NeedsClarification(p) => panic!("unexpected clarification: {p}"),
    };
    let status = router.run_task(&task_id).await.unwrap();

    assert_eq!(status, TaskStatus::Hitl);
}

/// S3 — executor fails on a stale selector, repair swaps it, second execute is green.
#[tokio::test]
async fn s3_repair_loop_reaches_green_with_one_repair_attempt() {
    let config = fresh_config();
    let store = HotStore::open(&config.store_path).unwrap().shared();
    let bus = EventBus::new().shared();
    let registry = registry(
        FixedGenerator { source: "test('order', async () => {});".to_string() },
        ApprovingCritic,
        SelectorFlakeExecutor::new(1),
        CleanRepair { patched_source: "test('order', async () => { /* place-order-btn */ });".to_string() },
        GreenValidator,
    );
    let router = Router::new(store.clone(), bus.clone(), registry, config);

    let intent = Intent::new(IntentType::CreateTest, "create an order submission test", 0.9);
    let task_id = match router.intake(intent).unwrap() {
        IntakeOutcome::Queued(id) => id,
        IntakeOutcome::NeedsClarification(p) => panic!("unexpected clarification: {p}"),
    };
    let status = router.run_task(&task_id).await.unwrap();

    assert_eq!(status, TaskStatus::Done);
    let task = store.get_task(&task_id).unwrap().unwrap();
    assert_eq!(task.repair_attempts, 1);
    assert!(task.artifacts.iter().any(|a| a.kind == ArtifactKind::Diff));
    assert!(task.artifacts.iter().any(|a| a.kind == ArtifactKind::RegressionReport));
}

/// S4 — repair introduces a regression; it must be rolled back and escalated.
#[tokio::test]
async fn s4_hippocratic_violation_escalates_to_hitl() {
    let config = fresh_config();
    let store = HotStore::open(&config.store_path).unwrap().shared();
    let bus = EventBus::new().shared();
    let registry = registry(
        FixedGenerator { source: "test('nav', async () => {});".to_string() },
        ApprovingCritic,
        SelectorFlakeExecutor::new(u32::MAX),
        RegressingRepair,
        GreenValidator,
    );
    let router = Router::new(store.clone(), bus.clone(), registry, config);

    let intent = Intent::new(IntentType::CreateTest, "create a core nav test", 0.9);
    let task_id = match router.intake(intent).unwrap() {
        IntakeOutcome::Queued(id) => id,
        IntakeOutcome::NeedsClarification(p) => panic!("unexpected clarification: {p}"),
    };
    let status = router.run_task(&task_id).await.unwrap();

    assert_eq!(status, TaskStatus::Hitl);
    let hitl = store.get_hitl(&task_id).unwrap().expect("hitl item recorded");
    assert!(hitl.priority > 0.0);
    assert_eq!(hitl.attempts, store.get_task(&task_id).unwrap().unwrap().attempts.len() as u32);
}

/// S5 — once the session's cumulative spend (tracked by `CostTracker`
/// across every Task this process has driven, not any one Task's own
/// `cost_so_far`) sits at or past the session cap, the next task is blocked
/// before any worker runs. The router's pre-dispatch guard is a
/// `session_spend >= session_cost_cap` check rather than a projected-next-cost
/// estimate, so this pins spend to exactly the cap rather than the spec's
/// illustrative "$1.98 of $2.00, next task ~$0.10" framing.
#[tokio::test]
async fn s5_budget_cap_blocks_before_dispatch() {
    let mut config = fresh_config();
    config.session_cost_cap = 2.0;
    let store = HotStore::open(&config.store_path).unwrap().shared();
    let bus = EventBus::new().shared();
    let registry = registry(
        FixedGenerator { source: "test('x', async () => {});".to_string() },
        ApprovingCritic,
        GreenExecutor,
        CleanRepair { patched_source: String::new() },
        GreenValidator,
    );
    let router = Router::new(store.clone(), bus.clone(), registry, config);

    let intent = Intent::new(IntentType::CreateTest, "create a pricing test", 0.9);
    let task_id = match router.intake(intent).unwrap() {
        IntakeOutcome::Queued(id) => id,
        IntakeOutcome::NeedsClarification(p) => panic!("unexpected clarification: {p}"),
    };

    testgen_workers::cost::CostTracker::new(store.clone())
        .record("router", "all", "all", 2.0)
        .unwrap();

    let status = router.run_task(&task_id).await.unwrap();

    assert_eq!(status, TaskStatus::BudgetBlocked);
    let persisted = store.get_task(&task_id).unwrap().unwrap();
    assert_eq!(persisted.status, TaskStatus::BudgetBlocked);
}

/// Intake rejects anything once the lifecycle manager has flipped to
/// shutting-down, covering the shared half of S6 that doesn't need a
/// mid-flight cancellation hook inside the router itself.
#[tokio::test]
async fn s6_intake_is_rejected_once_shutting_down() {
    let config = fresh_config();
    let store = HotStore::open(&config.store_path).unwrap().shared();
    let bus = EventBus::new().shared();
    let lifecycle = testgen_workers::lifecycle::LifecycleManager::new(
        store.clone(),
        bus.clone(),
        std::time::Duration::from_millis(50),
    );

    lifecycle.shutdown().await;

    assert!(lifecycle.guard_intake().is_err());
}
