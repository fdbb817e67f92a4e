//! Append-only audit trail for one pipeline run.
//!
//! Entry order is append order. Timestamps are clamped so the sequence is
//! monotonically non-decreasing even when the wall clock is not.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One step in the audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEntry {
    pub timestamp: DateTime<Utc>,
    /// Step name, e.g. `note_generation:complete`.
    pub step: String,
    /// Free-text detail (summary, counts — never transcript bodies).
    pub detail: String,
    /// Redacted prompt sent to the model, if a model call was made.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    /// Raw model response, if a model call was made.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    /// Prompting technique label (audit/UX metadata, no behavioral effect).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub technique: Option<String>,
}

impl TraceEntry {
    pub fn new(step: &str, detail: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            step: step.to_string(),
            detail: detail.to_string(),
            prompt: None,
            response: None,
            technique: None,
        }
    }

    pub fn with_technique(mut self, technique: &str) -> Self {
        self.technique = Some(technique.to_string());
        self
    }

    pub fn with_exchange(mut self, prompt: &str, response: &str) -> Self {
        self.prompt = Some(prompt.to_string());
        self.response = Some(response.to_string());
        self
    }
}

/// Ordered audit log, one instance per pipeline run.
#[derive(Debug, Default)]
pub struct TraceRecorder {
    entries: Vec<TraceEntry>,
}

impl TraceRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one entry. Its timestamp is clamped to the previous entry's
    /// timestamp if the clock reads earlier.
    pub fn append(&mut self, mut entry: TraceEntry) {
        if let Some(last) = self.entries.last() {
            if entry.timestamp < last.timestamp {
                entry.timestamp = last.timestamp;
            }
        }
        self.entries.push(entry);
    }

    /// Read view over the log, in append order.
    pub fn entries(&self) -> &[TraceEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Freeze the log at hand-off.
    pub fn into_entries(self) -> Vec<TraceEntry> {
        self.entries
    }
}
