//! Command-line entry point: `intake`, `status`, `shutdown` against a
//! single running pipeline backed by one hot store directory.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use testgen_core::{BudgetStatus, EventBus, HotStore, Intent, SessionAggregates, SharedEventBus, SharedHotStore};
use testgen_workers::config::{ClientSet, PipelineConfig};
use testgen_workers::orchestrator::{IntakeOutcome, Router};
use testgen_workers::{agents, cost::CostTracker, intent_parser, lifecycle::LifecycleManager, rate_limit::RateLimiter};

#[derive(Parser)]
#[command(name = "testgen-workers", about = "Autonomous browser test generation pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a raw command or a pre-built intent JSON; streams resulting
    /// events to stdout as newline-delimited JSON until the task reaches a
    /// terminal state.
    Intake {
        /// Raw natural-language command, e.g. "create a test for login".
        #[arg(long, conflicts_with = "intent_json")]
        command: Option<String>,
        /// A pre-built `Intent` as JSON, bypassing the rule-based parser.
        #[arg(long, conflicts_with = "command")]
        intent_json: Option<String>,
    },
    /// Print session aggregates (task counts, spend, budget status).
    Status,
    /// Send a local cancellation signal, equivalent to SIGTERM.
    Shutdown,
}

#[tokio::main]
async fn main() -> Result<()> {
    let log_dir = init_tracing();
    testgen_workers::log_retention::spawn(log_dir, testgen_workers::log_retention::RetentionPolicy::default());

    let config = PipelineConfig::default();
    let store = HotStore::open(&config.store_path)
        .context("failed to open hot store")?
        .shared();
    let bus = EventBus::with_persistence(store.clone()).shared();
    let lifecycle = Arc::new(LifecycleManager::new(
        store.clone(),
        bus.clone(),
        Duration::from_millis(config.shutdown_grace_period_ms),
    ));

    let recovered = lifecycle
        .recover_orphans()
        .context("failed to recover orphaned tasks from a prior run")?;
    if !recovered.is_empty() {
        tracing::warn!(count = recovered.len(), tasks = ?recovered, "recovered orphaned tasks on startup");
    }

    let cli = Cli::parse();

    match cli.command {
        Commands::Intake { command, intent_json } => {
            run_intake(&config, store, bus, lifecycle, command, intent_json).await
        }
        Commands::Status => run_status(store),
        Commands::Shutdown => {
            lifecycle.shutdown().await;
            println!("shutdown complete");
            Ok(())
        }
    }
}

async fn run_intake(
    config: &PipelineConfig,
    store: SharedHotStore,
    bus: SharedEventBus,
    lifecycle: Arc<LifecycleManager>,
    command: Option<String>,
    intent_json: Option<String>,
) -> Result<()> {
    lifecycle
        .guard_intake()
        .context("rejecting intake: process is shutting down")?;

    let intent: Intent = match (command, intent_json) {
        (Some(raw), None) => intent_parser::parse(&raw),
        (None, Some(json)) => {
            serde_json::from_str(&json).context("intent_json is not a valid Intent")?
        }
        _ => anyhow::bail!("exactly one of --command or --intent-json is required"),
    };

    let rate_limiter = RateLimiter::new(
        store.clone(),
        config.rate_limit_capacity,
        config.rate_limit_refill_per_sec,
    );
    rate_limiter
        .try_acquire("router", "intake")
        .context("rate limited")?;

    let clients = ClientSet::from_config(config).context("failed to build model clients")?;
    let registry = Arc::new(agents::build_registry(&clients, config));
    let router = Router::new(store.clone(), bus.clone(), registry, config.clone());

    let outcome = router.intake(intent).context("intake failed")?;
    let task_id = match outcome {
        IntakeOutcome::Queued(task_id) => task_id,
        IntakeOutcome::NeedsClarification(prompt) => {
            println!("{}", serde_json::json!({ "needs_clarification": prompt }));
            return Ok(());
        }
    };

    lifecycle.register_active_task(&task_id, "router")?;

    let signal_lifecycle = lifecycle.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            return;
        }
        tracing::info!("ctrl-c received, initiating shutdown");
        signal_lifecycle.shutdown().await;
    });

    let mut subscriber = bus.subscribe();
    let mut run = {
        let task_id = task_id.clone();
        tokio::spawn(async move { router.run_task(&task_id).await })
    };

    loop {
        tokio::select! {
            event = subscriber.recv() => {
                match event {
                    Ok(event) if event.task_id() == Some(task_id.as_str()) => {
                        println!("{}", serde_json::to_string(&event)?);
                    }
                    Ok(_) => continue,
                    Err(_) => break,
                }
            }
            result = &mut run => {
                let status = result.context("router task panicked")??;
                println!("{}", serde_json::json!({ "task_id": task_id, "status": status }));
                break;
            }
            _ = async {
                while !lifecycle.is_shutting_down() {
                    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                }
            } => {
                tracing::warn!(task_id = %task_id, "shutting down with a task still in flight");
                break;
            }
        }
    }

    lifecycle.unregister_active_task(&task_id)?;
    Ok(())
}

fn run_status(store: SharedHotStore) -> Result<()> {
    let tracker = CostTracker::new(store.clone());
    let spend = tracker.spend("daily", "router", "all", "all").unwrap_or(0.0);
    let active = store.active_tasks().context("failed to read active tasks")?;

    let aggregates = SessionAggregates {
        total_tasks: active.len() as u64,
        successful_tasks: 0,
        session_cost: spend,
        budget_status: BudgetStatus::Ok,
    };
    println!("{}", serde_json::to_string_pretty(&aggregates)?);
    Ok(())
}

fn init_tracing() -> std::path::PathBuf {
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());

    let log_dir: std::path::PathBuf = std::env::var("TESTGEN_LOG_DIR").unwrap_or_else(|_| "./logs".into()).into();
    let file_appender = tracing_appender::rolling::daily(&log_dir, "testgen-workers.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    // Leaked intentionally: the guard must outlive the process for the
    // background writer thread to keep flushing until exit.
    Box::leak(Box::new(guard));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(non_blocking)
        .init();

    log_dir
}
