//! ClinScribe: clinical consultation transcripts in, structured
//! documentation out.
//!
//! A five-stage LLM pipeline (speaker identification, SOAP note generation,
//! problem extraction, diagnosis coding, billing coding) runs against a local
//! Ollama backend with an ordered model fallback chain. An emergency screen
//! gates the whole run, a guardrail pass softens absolute clinical claims and
//! attaches a compliance banner, and every step lands in an append-only
//! audit trail.
//!
//! Entry point is [`pipeline::ConsultationPipeline`]; wire it up with an
//! [`ollama::OllamaClient`], a [`store::SessionStore`], and an
//! [`audit::AuditSink`].

pub mod audit;
pub mod config;
pub mod guardrail;
pub mod ollama;
pub mod pipeline;
pub mod store;
pub mod trace;

pub use audit::{AuditEvent, AuditSink, TracingAuditSink};
pub use config::{FailoverPolicy, PipelineConfig};
pub use ollama::{LlmClient, LlmError, OllamaClient};
pub use pipeline::{
    AnalysisOutcome, AnalysisReport, AnalysisRequest, ConsultationPipeline, PipelineError,
    PipelineFailure,
};
pub use store::{InMemorySessionStore, SessionStore};
pub use trace::{TraceEntry, TraceRecorder};

use tracing_subscriber::EnvFilter;

/// Initialize tracing for binaries embedding the pipeline.
/// `RUST_LOG` wins over the built-in default filter.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();

    tracing::info!("{} v{} logging initialized", config::APP_NAME, config::APP_VERSION);
}
