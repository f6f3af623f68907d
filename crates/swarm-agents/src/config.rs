use anyhow::{Context, Result};
use rig::providers::openai;
use serde::Deserialize;

/// Generation complexity tier — picks which model the Generator calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum Tier {
    /// Cheap/fast model for `easy` features.
    Easy,
    /// Stronger model for `hard` features and Repair diagnosis.
    Hard,
    /// Vision model for Validator phase 2.
    Vision,
}

impl Tier {
    /// Rough $/1k-token rate used to estimate a call's spend when the
    /// provider response carries no usage metadata (the `rig` convenience
    /// `.prompt()` call doesn't expose it).
    pub fn cost_per_1k_tokens(self) -> f64 {
        match self {
            Tier::Easy => 0.002,
            Tier::Hard => 0.02,
            Tier::Vision => 0.03,
        }
    }
}

/// An LLM endpoint: base URL, model name, and API key.
#[derive(Debug, Clone, Deserialize)]
pub struct Endpoint {
    pub url: String,
    pub model: String,
    pub tier: Tier,
    pub api_key: String,
}

/// Critic's halt policy when it rejects a generated test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum CriticMode {
    /// Rejection is recorded but does not halt the pipeline (default).
    LogAndContinue,
    /// Rejection halts the pipeline and rejoins the Generator.
    Block,
}

/// Process-wide pipeline configuration, assembled from env vars at startup.
///
/// Every field has a documented default so the binary runs with zero
/// configuration against the external collaborators it expects at
/// `localhost`-style defaults only in test builds; production deployments
/// are expected to set the corresponding env var.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Endpoint used for `easy`-complexity Generator calls.
    pub easy_endpoint: Endpoint,
    /// Endpoint used for `hard`-complexity Generator calls and Repair diagnosis.
    pub hard_endpoint: Endpoint,
    /// Vision endpoint for Validator phase 2 (optional; phase 2 is skipped without it).
    pub vision_endpoint: Option<Endpoint>,

    /// Critic halt policy (§4.3 / §4.1 Open Question 3).
    pub critic_mode: CriticMode,
    /// Critic/self-validation: step count above which a warning fires.
    pub critic_max_steps: u32,
    /// Critic/self-validation: estimated duration (ms) above which a warning fires.
    pub critic_max_duration_ms: u64,

    /// Generator: max similar patterns appended to the prompt.
    pub max_patterns: usize,
    /// Generator: minimum cosine similarity for a retrieved pattern to qualify.
    pub pattern_threshold: f32,
    /// Generator: max self-validation retries before giving up.
    pub generator_max_retries: u32,
    /// Generator: directory the accepted test source is written to before
    /// the `TestSource` artifact is recorded.
    pub generated_tests_dir: std::path::PathBuf,

    /// Executor: default test timeout.
    pub executor_timeout_ms: u64,

    /// Repair: max repair attempts per Task before escalating to HITL.
    pub max_fix_attempts: u32,
    /// Repair: the fixed, small regression scope (§4.5 step 1) the
    /// do-no-harm baseline is measured against — stable tests such as auth
    /// and core navigation, independent of whatever patterns the Generator
    /// happened to retrieve for the current feature.
    pub regression_scope: Vec<String>,

    /// Validator: whether phase 2 (vision) runs by default when a task allows it.
    pub phase2_enabled: bool,
    /// Validator: max screenshots sent to the vision model per request.
    pub phase2_max_images: usize,
    /// Validator: execution time cap (ms) the rubric enforces.
    pub validator_time_cap_ms: u64,

    /// Lifecycle: graceful shutdown grace period before forced exit.
    pub shutdown_grace_period_ms: u64,

    /// Cost: session-level spend cap before new tasks are budget-blocked.
    pub session_cost_cap: f64,
    /// Cost: rolling daily spend cap.
    pub daily_cost_cap: f64,

    /// Rate limiter: default token bucket capacity per service×model.
    pub rate_limit_capacity: f64,
    /// Rate limiter: default refill rate (tokens/sec).
    pub rate_limit_refill_per_sec: f64,

    /// Bounded-parallelism semaphore size across in-flight Tasks.
    pub max_concurrent_tasks: usize,

    /// Hot store path (RocksDB data directory).
    pub store_path: std::path::PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            easy_endpoint: Endpoint {
                url: std::env::var("TESTGEN_EASY_URL")
                    .unwrap_or_else(|_| "http://localhost:8080/v1".into()),
                model: std::env::var("TESTGEN_EASY_MODEL").unwrap_or_else(|_| "gpt-4o-mini".into()),
                tier: Tier::Easy,
                api_key: std::env::var("TESTGEN_EASY_API_KEY").unwrap_or_else(|_| "not-needed".into()),
            },
            hard_endpoint: Endpoint {
                url: std::env::var("TESTGEN_HARD_URL")
                    .unwrap_or_else(|_| "http://localhost:8080/v1".into()),
                model: std::env::var("TESTGEN_HARD_MODEL").unwrap_or_else(|_| "gpt-4o".into()),
                tier: Tier::Hard,
                api_key: std::env::var("TESTGEN_HARD_API_KEY").unwrap_or_else(|_| "not-needed".into()),
            },
            vision_endpoint: Self::vision_from_env(),

            critic_mode: std::env::var("TESTGEN_CRITIC_MODE")
                .ok()
                .map(|v| {
                    if v.eq_ignore_ascii_case("block") {
                        CriticMode::Block
                    } else {
                        CriticMode::LogAndContinue
                    }
                })
                .unwrap_or(CriticMode::LogAndContinue),
            critic_max_steps: std::env::var("TESTGEN_CRITIC_MAX_STEPS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|v| *v > 0)
                .unwrap_or(10),
            critic_max_duration_ms: std::env::var("TESTGEN_CRITIC_MAX_DURATION_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|v| *v > 0)
                .unwrap_or(60_000),

            max_patterns: std::env::var("TESTGEN_MAX_PATTERNS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|v| *v > 0)
                .unwrap_or(5),
            pattern_threshold: std::env::var("TESTGEN_PATTERN_THRESHOLD")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|v: &f32| (0.0..=1.0).contains(v))
                .unwrap_or(0.7),
            generator_max_retries: std::env::var("TESTGEN_GENERATOR_MAX_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|v| *v > 0)
                .unwrap_or(3),
            generated_tests_dir: std::env::var("TESTGEN_GENERATED_TESTS_DIR")
                .map(std::path::PathBuf::from)
                .unwrap_or_else(|_| std::path::PathBuf::from("generated-tests")),

            executor_timeout_ms: std::env::var("TESTGEN_EXECUTOR_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|v| *v > 0)
                .unwrap_or(45_000),

            max_fix_attempts: std::env::var("TESTGEN_MAX_FIX_ATTEMPTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|v| *v > 0)
                .unwrap_or(3),
            regression_scope: std::env::var("TESTGEN_REGRESSION_SCOPE")
                .ok()
                .map(|v| v.split(',').map(str::trim).map(String::from).collect())
                .filter(|v: &Vec<String>| !v.is_empty())
                .unwrap_or_else(|| {
                    vec![
                        "tests/auth.spec.ts".to_string(),
                        "tests/core_navigation.spec.ts".to_string(),
                    ]
                }),

            phase2_enabled: std::env::var("TESTGEN_PHASE2_ENABLED")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            phase2_max_images: std::env::var("TESTGEN_PHASE2_MAX_IMAGES")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|v| *v > 0)
                .unwrap_or(3),
            validator_time_cap_ms: std::env::var("TESTGEN_VALIDATOR_TIME_CAP_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|v| *v > 0)
                .unwrap_or(45_000),

            shutdown_grace_period_ms: std::env::var("TESTGEN_SHUTDOWN_GRACE_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|v| *v > 0)
                .unwrap_or(30_000),

            session_cost_cap: std::env::var("TESTGEN_SESSION_COST_CAP")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(25.0),
            daily_cost_cap: std::env::var("TESTGEN_DAILY_COST_CAP")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(200.0),

            rate_limit_capacity: std::env::var("TESTGEN_RATE_LIMIT_CAPACITY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(60.0),
            rate_limit_refill_per_sec: std::env::var("TESTGEN_RATE_LIMIT_REFILL_PER_SEC")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1.0),

            max_concurrent_tasks: std::env::var("TESTGEN_MAX_CONCURRENT_TASKS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|v| *v > 0)
                .unwrap_or(8),

            store_path: std::env::var("TESTGEN_STORE_PATH")
                .map(std::path::PathBuf::from)
                .unwrap_or_else(|_| std::path::PathBuf::from("./testgen-data")),
        }
    }
}

impl PipelineConfig {
    fn vision_from_env() -> Option<Endpoint> {
        let url = std::env::var("TESTGEN_VISION_URL").ok()?;
        let api_key = std::env::var("TESTGEN_VISION_API_KEY").ok()?;
        let model = std::env::var("TESTGEN_VISION_MODEL").unwrap_or_else(|_| "gpt-4o".into());
        Some(Endpoint {
            url,
            api_key,
            model,
            tier: Tier::Vision,
        })
    }

    /// Configuration pointing every tier at a local test double.
    ///
    /// Used by integration tests that run against a mock OpenAI-compatible
    /// server on loopback.
    pub fn test_config(base_url: &str) -> Self {
        Self {
            easy_endpoint: Endpoint {
                url: base_url.to_string(),
                model: "test-easy".into(),
                tier: Tier::Easy,
                api_key: "test-key".into(),
            },
            hard_endpoint: Endpoint {
                url: base_url.to_string(),
                model: "test-hard".into(),
                tier: Tier::Hard,
                api_key: "test-key".into(),
            },
            vision_endpoint: Some(Endpoint {
                url: base_url.to_string(),
                model: "test-vision".into(),
                tier: Tier::Vision,
                api_key: "test-key".into(),
            }),
            critic_mode: CriticMode::LogAndContinue,
            critic_max_steps: 10,
            critic_max_duration_ms: 60_000,
            max_patterns: 5,
            pattern_threshold: 0.7,
            generator_max_retries: 3,
            generated_tests_dir: std::env::temp_dir().join("testgen-generated-tests"),
            executor_timeout_ms: 45_000,
            max_fix_attempts: 3,
            regression_scope: vec![
                "tests/auth.spec.ts".to_string(),
                "tests/core_navigation.spec.ts".to_string(),
            ],
            phase2_enabled: true,
            phase2_max_images: 3,
            validator_time_cap_ms: 45_000,
            shutdown_grace_period_ms: 30_000,
            session_cost_cap: 25.0,
            daily_cost_cap: 200.0,
            rate_limit_capacity: 60.0,
            rate_limit_refill_per_sec: 1.0,
            max_concurrent_tasks: 8,
            store_path: std::env::temp_dir().join("testgen-test-data"),
        }
    }
}

/// Pre-built rig completion clients for the Generator/Repair/Validator endpoints.
pub struct ClientSet {
    /// Client for the `easy` tier.
    pub easy: openai::CompletionsClient,
    /// Client for the `hard` tier (also used for Repair diagnosis).
    pub hard: openai::CompletionsClient,
    /// Client for the vision tier, when phase 2 is configured.
    pub vision: Option<openai::CompletionsClient>,
}

impl ClientSet {
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        let easy = openai::CompletionsClient::builder()
            .api_key(&config.easy_endpoint.api_key)
            .base_url(&config.easy_endpoint.url)
            .build()
            .context("failed to build easy-tier client")?;

        let hard = openai::CompletionsClient::builder()
            .api_key(&config.hard_endpoint.api_key)
            .base_url(&config.hard_endpoint.url)
            .build()
            .context("failed to build hard-tier client")?;

        let vision = config
            .vision_endpoint
            .as_ref()
            .map(|ep| {
                openai::CompletionsClient::builder()
                    .api_key(&ep.api_key)
                    .base_url(&ep.url)
                    .build()
            })
            .transpose()
            .context("failed to build vision client")?;

        Ok(Self { easy, hard, vision })
    }
}

/// Check if an inference endpoint is reachable and has a model loaded.
///
/// Queries `GET /v1/models` and optionally verifies that `expected_model` is in
/// the response. Returns `true` only if the endpoint responds and the model
/// check passes.
pub async fn check_endpoint(url: &str, api_key: Option<&str>) -> bool {
    check_endpoint_with_model(url, api_key, None).await
}

/// Like [`check_endpoint`] but also verifies a specific model is loaded.
pub async fn check_endpoint_with_model(
    url: &str,
    api_key: Option<&str>,
    expected_model: Option<&str>,
) -> bool {
    let models_url = format!("{url}/models");
    let client = reqwest::Client::new();
    let mut req = client
        .get(&models_url)
        .timeout(std::time::Duration::from_secs(5));

    if let Some(key) = api_key {
        if key != "not-needed" {
            req = req.bearer_auth(key);
        }
    }

    match req.send().await {
        Ok(resp) if resp.status().is_success() => {
            let Some(expected) = expected_model else {
                return true;
            };

            if let Ok(body) = resp.json::<serde_json::Value>().await {
                let has_model = body["data"]
                    .as_array()
                    .map(|models| {
                        models.iter().any(|m| {
                            m["id"]
                                .as_str()
                                .map(|id| id.contains(expected))
                                .unwrap_or(false)
                        })
                    })
                    .unwrap_or(false);

                if !has_model {
                    tracing::warn!(
                        endpoint = url,
                        expected_model = expected,
                        "endpoint reachable but expected model not loaded"
                    );
                }
                has_model
            } else {
                true
            }
        }
        Ok(resp) => {
            tracing::warn!(endpoint = url, status = %resp.status(), "endpoint returned non-success status");
            false
        }
        Err(e) => {
            tracing::warn!(endpoint = url, error = %e, "endpoint unreachable");
            false
        }
    }
}
