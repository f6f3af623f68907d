//! Executor worker: run the generated test against the browser engine and
//! report a structured outcome. Never rewrites source (§4.4).

use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use testgen_core::{
    Artifact, ArtifactKind, Attempt, AttemptOutcome, PipelineResult, RuntimeError,
};
use testgen_core::registry::{Worker, WorkerInput, WorkerOutput};

use crate::config::PipelineConfig;
use crate::protocol::{ExecuteRequest, ExecutionOutcome};

const DEFAULT_ENGINE_BIN: &str = "testgen-browser-engine";

fn engine_bin() -> String {
    std::env::var("TESTGEN_BROWSER_ENGINE_BIN").unwrap_or_else(|_| DEFAULT_ENGINE_BIN.to_string())
}

/// Truncate a line to 200 chars, matching the executor's parsing rules.
fn truncate(line: &str) -> String {
    line.chars().take(200).collect()
}

fn parse_console_errors(stdout: &str, stderr: &str) -> Vec<String> {
    stdout
        .lines()
        .chain(stderr.lines())
        .filter(|l| l.to_lowercase().contains("error"))
        .map(truncate)
        .collect()
}

fn parse_network_failures(stdout: &str, stderr: &str) -> Vec<String> {
    stdout
        .lines()
        .chain(stderr.lines())
        .filter(|l| l.contains("net::") || l.contains("ERR_") || l.to_lowercase().contains("timeout"))
        .map(truncate)
        .collect()
}

/// Collect screenshots from the run's artifacts directory, chronological by
/// mtime (§4.4 parsing rules).
fn collect_screenshots(dir: &Path) -> std::io::Result<Vec<String>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut entries: Vec<(std::time::SystemTime, String)> = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let is_image = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("png") | Some("jpg") | Some("jpeg")
        );
        if !is_image {
            continue;
        }
        let mtime = entry.metadata()?.modified()?;
        entries.push((mtime, path.to_string_lossy().to_string()));
    }
    entries.sort_by_key(|(mtime, _)| *mtime);
    Ok(entries.into_iter().map(|(_, path)| path).collect())
}

/// Run the browser engine as a subprocess against `test_source`, returning a
/// structured outcome. Shared by the Executor and the Validator's phase 1.
pub async fn run_browser_engine(
    test_source: &str,
    timeout_ms: u64,
    collect_all_screenshots: bool,
) -> PipelineResult<ExecutionOutcome> {
    let run_dir = tempfile::Builder::new()
        .prefix("testgen-run-")
        .tempdir()
        .map_err(testgen_core::PipelineError::Io)?;
    let test_path = run_dir.path().join("test.spec");
    std::fs::write(&test_path, test_source).map_err(testgen_core::PipelineError::Io)?;
    let artifacts_dir = run_dir.path().join("artifacts");
    std::fs::create_dir_all(&artifacts_dir).map_err(testgen_core::PipelineError::Io)?;

    let mut cmd = tokio::process::Command::new(engine_bin());
    cmd.arg(&test_path).arg("--artifacts-dir").arg(&artifacts_dir);
    if collect_all_screenshots {
        cmd.arg("--full-screenshots");
    }

    let start = Instant::now();
    let spawned = cmd.output();
    let output = match tokio::time::timeout(Duration::from_millis(timeout_ms), spawned).await {
        Err(_) => {
            return Err(RuntimeError::ExecutionTimeout {
                elapsed_ms: timeout_ms,
                cap_ms: timeout_ms,
            }
            .into())
        }
        Ok(Err(e)) => {
            return Err(RuntimeError::EngineLaunch {
                message: e.to_string(),
            }
            .into())
        }
        Ok(Ok(output)) => output,
    };
    let execution_time_ms = start.elapsed().as_millis() as u64;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    let screenshots = collect_screenshots(&artifacts_dir).map_err(testgen_core::PipelineError::Io)?;

    Ok(ExecutionOutcome {
        browser_launched: true,
        test_executed: true,
        test_passed: output.status.success(),
        screenshots,
        console_errors: parse_console_errors(&stdout, &stderr),
        network_failures: parse_network_failures(&stdout, &stderr),
        execution_time_ms,
    })
}

pub struct ExecutorWorker {
    timeout_ms: u64,
}

impl ExecutorWorker {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            timeout_ms: config.executor_timeout_ms,
        }
    }
}

#[async_trait]
impl Worker for ExecutorWorker {
    async fn execute(&self, input: WorkerInput) -> PipelineResult<WorkerOutput> {
        let req: ExecuteRequest = serde_json::from_value(input.payload)?;
        let timeout_ms = if req.timeout_ms > 0 {
            req.timeout_ms
        } else {
            self.timeout_ms
        };

        let digest_input = req.test_source.as_bytes();
        let outcome = run_browser_engine(&req.test_source, timeout_ms, false).await;

        let (outcome, attempt_outcome) = match outcome {
            Ok(outcome) if outcome.test_passed => (outcome, AttemptOutcome::Success),
            Ok(outcome) => (outcome, AttemptOutcome::Failed),
            Err(testgen_core::PipelineError::Runtime(RuntimeError::ExecutionTimeout {
                ..
            })) => (ExecutionOutcome::default(), AttemptOutcome::Timeout),
            Err(e) => return Err(e),
        };

        let artifacts = outcome
            .screenshots
            .iter()
            .map(|path| {
                let bytes = std::fs::read(path).unwrap_or_default();
                Artifact::new(ArtifactKind::Screenshot, path.clone(), &bytes)
            })
            .collect();

        let attempt = Attempt::new("executor", digest_input, attempt_outcome)
            .with_duration(outcome.execution_time_ms);

        Ok(WorkerOutput {
            payload: serde_json::to_value(&outcome)?,
            artifacts,
            attempt,
        })
    }
}
