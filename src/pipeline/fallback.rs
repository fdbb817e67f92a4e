//! Ordered model fallback for one pipeline run.
//!
//! The executor owns a cursor into the candidate list. The cursor is sticky:
//! once a candidate serves a response, later calls start there. It only ever
//! moves forward, and it is scoped to one run — concurrent runs each build
//! their own executor from a config snapshot, so one request's fallback
//! choice cannot leak into another's.

use crate::config::FailoverPolicy;
use crate::ollama::{LlmClient, LlmError};

use super::PipelineError;

/// Raw response plus the candidate that produced it.
#[derive(Debug, Clone)]
pub struct FallbackResponse {
    pub text: String,
    pub model: String,
}

pub struct ModelFallbackExecutor<'a> {
    client: &'a dyn LlmClient,
    candidates: Vec<String>,
    cursor: usize,
    policy: FailoverPolicy,
}

impl<'a> ModelFallbackExecutor<'a> {
    pub fn new(
        client: &'a dyn LlmClient,
        candidates: Vec<String>,
        policy: FailoverPolicy,
    ) -> Self {
        Self {
            client,
            candidates,
            cursor: 0,
            policy,
        }
    }

    /// The candidate the next call will try first.
    pub fn current_model(&self) -> Option<&str> {
        self.candidates.get(self.cursor).map(String::as_str)
    }

    /// Execute one prompt, starting at the cursor and advancing through the
    /// chain on failures the policy allows. Success leaves the cursor at the
    /// serving candidate.
    pub fn execute(&mut self, prompt: &str, system: &str) -> Result<FallbackResponse, PipelineError> {
        if self.candidates.is_empty() {
            return Err(PipelineError::AllModelsExhausted {
                last: LlmError::Other("empty candidate list".into()),
            });
        }

        let mut last_error: Option<LlmError> = None;

        while self.cursor < self.candidates.len() {
            let model = self.candidates[self.cursor].clone();
            match self.client.generate(&model, prompt, system) {
                Ok(text) => {
                    tracing::debug!(model = %model, cursor = self.cursor, "Model call served");
                    return Ok(FallbackResponse { text, model });
                }
                Err(e) if self.should_advance(&e) => {
                    tracing::warn!(
                        model = %model,
                        cursor = self.cursor,
                        error = %e,
                        "Candidate failed, advancing fallback chain"
                    );
                    last_error = Some(e);
                    self.cursor += 1;
                }
                Err(e) => {
                    tracing::error!(model = %model, error = %e, "Non-transient model failure");
                    return Err(PipelineError::Model(e));
                }
            }
        }

        Err(PipelineError::AllModelsExhausted {
            last: last_error
                .unwrap_or_else(|| LlmError::Other("no candidate was attempted".into())),
        })
    }

    fn should_advance(&self, error: &LlmError) -> bool {
        match self.policy {
            FailoverPolicy::TransientOnly => error.is_transient(),
            FailoverPolicy::AnyError => true,
        }
    }
}
