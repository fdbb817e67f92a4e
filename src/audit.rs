//! Audit sink contract.
//!
//! The pipeline emits discrete events with enough detail for an external
//! sink to log them; it does not depend on the sink's storage format.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::pipeline::types::Severity;

/// Events the pipeline is obligated to emit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEvent {
    AnalysisRequested {
        transcript_length: usize,
        has_emergency: bool,
        severity: Severity,
    },
    AnalysisError {
        detail: String,
    },
}

pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Sink that forwards events to the tracing layer.
#[derive(Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        match &event {
            AuditEvent::AnalysisRequested {
                transcript_length,
                has_emergency,
                severity,
            } => {
                tracing::info!(
                    transcript_length,
                    has_emergency,
                    severity = ?severity,
                    "ANALYSIS_REQUESTED"
                );
            }
            AuditEvent::AnalysisError { detail } => {
                tracing::error!(detail = %detail, "ANALYSIS_ERROR");
            }
        }
    }
}

/// Sink that collects events in memory, for tests.
#[derive(Default)]
pub struct CollectingAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl CollectingAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl AuditSink for CollectingAuditSink {
    fn record(&self, event: AuditEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
