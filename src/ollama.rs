//! Ollama-compatible model backend access.
//!
//! One blocking HTTP client per pipeline run. Failures are classified
//! explicitly as transient (capacity/rate-limit, worth advancing the
//! fallback chain) or not — the classification lives here, next to the
//! transport, not scattered through the pipeline.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::PipelineConfig;

/// Errors from a single model backend call.
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("Model backend is not reachable at {0}")]
    Connection(String),

    #[error("Request timed out after {0}s")]
    Timeout(u64),

    #[error("Model backend rate-limited the request: {0}")]
    RateLimited(String),

    #[error("Model backend returned error (status {status}): {body}")]
    Server { status: u16, body: String },

    #[error("Could not decode backend response: {0}")]
    ResponseDecode(String),

    #[error("Model call failed: {0}")]
    Other(String),
}

impl LlmError {
    /// Is this a capacity/rate-limit signal worth trying the next candidate?
    ///
    /// HTTP 429 and 5xx map here, as do quota keywords in the body — some
    /// backends report exhaustion as 200-level prose or opaque 400s.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RateLimited(_) | Self::Timeout(_) => true,
            Self::Server { status, body } => {
                *status == 429
                    || (500..=599).contains(status)
                    || is_capacity_message(body)
            }
            Self::Other(msg) => is_capacity_message(msg),
            Self::Connection(_) | Self::ResponseDecode(_) => false,
        }
    }
}

fn is_capacity_message(body: &str) -> bool {
    let lower = body.to_lowercase();
    lower.contains("rate limit")
        || lower.contains("rate-limit")
        || lower.contains("quota")
        || lower.contains("overloaded")
        || lower.contains("capacity")
}

/// Model backend abstraction (allows mocking).
pub trait LlmClient {
    /// Run one prompt against one named model, returning the raw text response.
    fn generate(&self, model: &str, prompt: &str, system: &str) -> Result<String, LlmError>;

    /// List model names known to the backend.
    fn list_models(&self) -> Result<Vec<String>, LlmError>;
}

/// Blocking HTTP client for an Ollama-compatible backend.
pub struct OllamaClient {
    base_url: String,
    client: reqwest::blocking::Client,
    timeout_secs: u64,
}

impl OllamaClient {
    /// Create a client pointing at a backend instance.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, LlmError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| LlmError::Other(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            timeout_secs: timeout.as_secs(),
        })
    }

    /// Client configured from a pipeline config snapshot.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, LlmError> {
        Self::new(&config.backend_url, config.stage_timeout)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

/// Request body for /api/generate
#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    system: &'a str,
    stream: bool,
}

/// Response body from /api/generate
#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

/// Response body from /api/tags
#[derive(Deserialize)]
struct TagsResponse {
    models: Vec<TaggedModel>,
}

#[derive(Deserialize)]
struct TaggedModel {
    name: String,
}

impl LlmClient for OllamaClient {
    fn generate(&self, model: &str, prompt: &str, system: &str) -> Result<String, LlmError> {
        let url = format!("{}/api/generate", self.base_url);
        let body = GenerateRequest {
            model,
            prompt,
            system,
            stream: false,
        };

        let response = self.client.post(&url).json(&body).send().map_err(|e| {
            if e.is_connect() {
                LlmError::Connection(self.base_url.clone())
            } else if e.is_timeout() {
                LlmError::Timeout(self.timeout_secs)
            } else {
                LlmError::Other(e.to_string())
            }
        })?;

        let status = response.status();
        if status.as_u16() == 429 {
            let body = response.text().unwrap_or_default();
            return Err(LlmError::RateLimited(body));
        }
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(LlmError::Server {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GenerateResponse = response
            .json()
            .map_err(|e| LlmError::ResponseDecode(e.to_string()))?;

        Ok(parsed.response)
    }

    fn list_models(&self) -> Result<Vec<String>, LlmError> {
        let url = format!("{}/api/tags", self.base_url);

        let response = self.client.get(&url).send().map_err(|e| {
            if e.is_connect() {
                LlmError::Connection(self.base_url.clone())
            } else {
                LlmError::Other(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(LlmError::Server {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: TagsResponse = response
            .json()
            .map_err(|e| LlmError::ResponseDecode(e.to_string()))?;

        Ok(parsed.models.into_iter().map(|m| m.name).collect())
    }
}

// ═══════════════════════════════════════════════════════════
// Mock client for tests
// ═══════════════════════════════════════════════════════════

/// Scripted step for [`MockLlmClient`]: a canned response or a canned error.
pub enum MockReply {
    Text(String),
    Fail(LlmError),
}

impl MockReply {
    pub fn text(s: &str) -> Self {
        Self::Text(s.to_string())
    }

    pub fn rate_limited() -> Self {
        Self::Fail(LlmError::RateLimited("rate limit exceeded".into()))
    }

    pub fn server_error(status: u16, body: &str) -> Self {
        Self::Fail(LlmError::Server {
            status,
            body: body.to_string(),
        })
    }
}

/// Mock backend that replays a scripted queue of replies, one per call.
/// When the queue runs dry it repeats the final reply, so a single-response
/// mock answers every stage with the same text.
pub struct MockLlmClient {
    replies: std::sync::Mutex<Vec<MockReply>>,
    last: std::sync::Mutex<Option<String>>,
    calls: std::sync::atomic::AtomicUsize,
}

impl MockLlmClient {
    /// Mock that answers every call with the same text.
    pub fn new(response: &str) -> Self {
        Self::scripted(vec![MockReply::text(response)])
    }

    /// Mock that replays `replies` in order.
    pub fn scripted(replies: Vec<MockReply>) -> Self {
        Self {
            replies: std::sync::Mutex::new(replies),
            last: std::sync::Mutex::new(None),
            calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// How many generate calls have been made.
    pub fn call_count(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

impl LlmClient for MockLlmClient {
    fn generate(&self, _model: &str, _prompt: &str, _system: &str) -> Result<String, LlmError> {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let mut replies = self.replies.lock().unwrap();
        let mut last = self.last.lock().unwrap();

        let reply = if replies.is_empty() {
            return match last.as_ref() {
                Some(text) => Ok(text.clone()),
                None => Err(LlmError::Other("mock queue empty".into())),
            };
        } else if replies.len() == 1 {
            // Peek the final reply without consuming, so it repeats.
            match &replies[0] {
                MockReply::Text(t) => {
                    *last = Some(t.clone());
                    return Ok(t.clone());
                }
                MockReply::Fail(_) => replies.remove(0),
            }
        } else {
            replies.remove(0)
        };

        match reply {
            MockReply::Text(t) => {
                *last = Some(t.clone());
                Ok(t)
            }
            MockReply::Fail(e) => Err(e),
        }
    }

    fn list_models(&self) -> Result<Vec<String>, LlmError> {
        Ok(vec!["medgemma:latest".into()])
    }
}
