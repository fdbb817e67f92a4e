use std::time::Duration;

/// Application-level constants
pub const APP_NAME: &str = "Clinscribe";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Minimum accepted transcript length (characters, after trimming).
pub const MIN_TRANSCRIPT_LENGTH: usize = 10;

/// Maximum accepted transcript length (characters).
pub const MAX_TRANSCRIPT_LENGTH: usize = 5_000;

/// Maximum number of diagnosis codes carried in a result.
pub const MAX_DIAGNOSIS_CODES: usize = 3;

/// Maximum number of additional billing items carried in a result.
pub const MAX_BILLING_ITEMS: usize = 3;

/// Default Ollama-compatible backend address.
pub const DEFAULT_BACKEND_URL: &str = "http://localhost:11434";

/// Default per-stage request deadline (seconds).
pub const DEFAULT_STAGE_TIMEOUT_SECS: u64 = 120;

/// Default model fallback order, most capable first.
pub const DEFAULT_MODEL_CHAIN: &[&str] = &[
    "medgemma:27b",
    "medgemma:4b",
    "llama3:8b",
];

/// How the fallback executor reacts to non-transient model errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailoverPolicy {
    /// Advance to the next candidate only on capacity/rate-limit errors;
    /// abort immediately on anything else.
    #[default]
    TransientOnly,
    /// Advance to the next candidate on any model error.
    AnyError,
}

/// Pipeline configuration, resolved once per process and snapshotted per run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Ollama-compatible backend base URL.
    pub backend_url: String,
    /// Ordered fallback chain of candidate models.
    pub model_chain: Vec<String>,
    /// Per-stage request deadline.
    pub stage_timeout: Duration,
    /// Failover behavior for non-transient errors.
    pub failover: FailoverPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            backend_url: DEFAULT_BACKEND_URL.to_string(),
            model_chain: DEFAULT_MODEL_CHAIN.iter().map(|m| m.to_string()).collect(),
            stage_timeout: Duration::from_secs(DEFAULT_STAGE_TIMEOUT_SECS),
            failover: FailoverPolicy::TransientOnly,
        }
    }
}

impl PipelineConfig {
    /// Resolve configuration from the environment, falling back to defaults.
    ///
    /// - `CLINSCRIBE_BACKEND_URL` — backend base URL
    /// - `CLINSCRIBE_MODELS` — comma-separated fallback chain
    /// - `CLINSCRIBE_STAGE_TIMEOUT_SECS` — per-stage deadline
    /// - `CLINSCRIBE_FAILOVER` — `transient-only` or `any-error`
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("CLINSCRIBE_BACKEND_URL") {
            if !url.trim().is_empty() {
                config.backend_url = url.trim().trim_end_matches('/').to_string();
            }
        }

        if let Ok(models) = std::env::var("CLINSCRIBE_MODELS") {
            let chain: Vec<String> = models
                .split(',')
                .map(|m| m.trim().to_string())
                .filter(|m| !m.is_empty())
                .collect();
            if !chain.is_empty() {
                config.model_chain = chain;
            }
        }

        if let Ok(secs) = std::env::var("CLINSCRIBE_STAGE_TIMEOUT_SECS") {
            if let Ok(secs) = secs.trim().parse::<u64>() {
                if secs > 0 {
                    config.stage_timeout = Duration::from_secs(secs);
                }
            }
        }

        if let Ok(policy) = std::env::var("CLINSCRIBE_FAILOVER") {
            if policy.trim() == "any-error" {
                config.failover = FailoverPolicy::AnyError;
            }
        }

        config
    }

    /// Configuration with an explicit model chain, defaults elsewhere.
    pub fn with_models<S: Into<String>>(models: impl IntoIterator<Item = S>) -> Self {
        Self {
            model_chain: models.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }
}

/// Default log filter for the tracing subscriber.
pub fn default_log_filter() -> String {
    format!("{}=info", env!("CARGO_PKG_NAME"))
}
