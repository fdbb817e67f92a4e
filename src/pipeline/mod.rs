pub mod extract;
pub mod fallback;
pub mod orchestrator;
pub mod prompts;
pub mod stages;
pub mod types;
pub mod validation;

pub use extract::*;
pub use fallback::*;
pub use orchestrator::*;
pub use stages::*;
pub use types::*;

use thiserror::Error;

use crate::ollama::LlmError;
use crate::trace::TraceEntry;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Invalid transcript: {0}")]
    InvalidTranscript(String),

    #[error("All candidate models exhausted; last error: {last}")]
    AllModelsExhausted { last: LlmError },

    #[error("Model call failed: {0}")]
    Model(#[from] LlmError),

    #[error("Could not parse {stage} response: {detail}")]
    ParseFailure { stage: &'static str, detail: String },

    #[error("Could not persist analysis result: {0}")]
    StoreFailed(String),
}

/// A terminal failure paired with the audit trail accumulated before it,
/// so partial progress is never silently lost.
#[derive(Debug)]
pub struct PipelineFailure {
    pub error: PipelineError,
    pub trace: Vec<TraceEntry>,
}

impl std::fmt::Display for PipelineFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({} trace entries)", self.error, self.trace.len())
    }
}

impl std::error::Error for PipelineFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}
