use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::PipelineError;
use crate::config::{MAX_TRANSCRIPT_LENGTH, MIN_TRANSCRIPT_LENGTH};
use crate::trace::TraceEntry;

/// Validated consultation transcript. Immutable once accepted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Transcript(String);

impl Transcript {
    /// Accept raw text, enforcing the length policy (10..=5000 chars).
    pub fn new(raw: &str) -> Result<Self, PipelineError> {
        let trimmed = raw.trim();
        let len = trimmed.chars().count();
        if len < MIN_TRANSCRIPT_LENGTH {
            return Err(PipelineError::InvalidTranscript(format!(
                "transcript too short ({len} chars, minimum {MIN_TRANSCRIPT_LENGTH})"
            )));
        }
        if len > MAX_TRANSCRIPT_LENGTH {
            return Err(PipelineError::InvalidTranscript(format!(
                "transcript too long ({len} chars, maximum {MAX_TRANSCRIPT_LENGTH})"
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn text(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.chars().count()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Confidence label attached to extracted codes and stage outputs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    #[default]
    Low,
    Medium,
    High,
}

/// Stage 1 output: who said what.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeakerMap {
    pub doctor: String,
    pub patient: String,
    #[serde(default)]
    pub others: Vec<String>,
    #[serde(default)]
    pub confidence: Confidence,
    /// Transcript with speaker labels applied.
    pub annotated_transcript: String,
}

impl SpeakerMap {
    /// Default applied when speaker identification cannot be parsed:
    /// generic labels, low confidence, original transcript unchanged.
    pub fn generic(transcript: &Transcript) -> Self {
        Self {
            doctor: "Speaker 1".into(),
            patient: "Speaker 2".into(),
            others: Vec::new(),
            confidence: Confidence::Low,
            annotated_transcript: transcript.text().to_string(),
        }
    }
}

/// Stage 2 output: the four-section consultation note.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoapNote {
    pub subjective: String,
    pub objective: String,
    pub assessment: String,
    pub plan: String,
}

/// Stage 3 output element: one clinical problem with its rationale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Problem {
    pub description: String,
    pub rationale: String,
}

/// Stage 4 output element: one diagnosis code candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosisCode {
    pub code: String,
    pub description: String,
    #[serde(default)]
    pub confidence: Confidence,
}

/// One billable service item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingItem {
    pub code: String,
    pub description: String,
    #[serde(default)]
    pub confidence: Confidence,
}

/// Stage 5 output: the full billing picture.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingResult {
    pub level: BillingItem,
    #[serde(default)]
    pub duration_minutes: Option<u32>,
    pub justification: String,
    #[serde(default)]
    pub additional_items: Vec<BillingItem>,
    pub hint: String,
}

impl BillingResult {
    /// Default applied when billing coding cannot be parsed: a fixed
    /// low-confidence standard consultation level, nothing else.
    pub fn standard_consultation() -> Self {
        Self {
            level: BillingItem {
                code: "99213".into(),
                description: "Established patient office visit, low complexity".into(),
                confidence: Confidence::Low,
            },
            duration_minutes: None,
            justification: "Billing level could not be derived from the consultation; \
                            standard outpatient visit assumed."
                .into(),
            additional_items: Vec::new(),
            hint: "Verify the visit level against documented time and complexity before billing."
                .into(),
        }
    }
}

/// Severity of an emergency assessment.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Default)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

/// Emergency screen verdict, produced once per pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmergencyAssessment {
    pub has_emergency: bool,
    #[serde(default)]
    pub detected_conditions: Vec<String>,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub recommendation: String,
}

impl EmergencyAssessment {
    pub fn clear() -> Self {
        Self {
            has_emergency: false,
            detected_conditions: Vec::new(),
            severity: Severity::Low,
            recommendation: String::new(),
        }
    }
}

/// How a stage's structured value was obtained.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum OutcomeKind {
    /// Response parsed directly.
    Ok,
    /// Response parsed only after syntactic repair.
    ParsedWithRepair,
    /// Parsing failed; the stage's defined default was used.
    FallbackDefault,
}

/// Final documentation assembled from all five stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    pub speakers: SpeakerMap,
    pub note: SoapNote,
    pub problems: Vec<Problem>,
    pub diagnosis_codes: Vec<DiagnosisCode>,
    pub billing: BillingResult,
    pub emergency: EmergencyAssessment,
}

/// One recorded claim-softening edit, for the audit trail.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SofteningEdit {
    /// Which result field was rewritten.
    pub field: String,
    /// The absolute phrase that was replaced.
    pub phrase: String,
}

/// Guardrail pass output: the rewritten result plus safety metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardrailOutcome {
    pub result: PipelineResult,
    pub softening_edits: Vec<SofteningEdit>,
    pub compliance_banner: String,
}

/// Completed analysis handed back to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub session_id: Uuid,
    pub outcome: GuardrailOutcome,
    pub trace: Vec<TraceEntry>,
}

/// Result of one analysis request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnalysisOutcome {
    /// Documentation was generated, guarded, and saved.
    Completed(Box<AnalysisReport>),
    /// Emergency indicators were found and the caller has not acknowledged
    /// them; no documentation was generated.
    AcknowledgmentRequired {
        detected_conditions: Vec<String>,
        severity: Severity,
        recommendation: String,
    },
}

/// Caller-supplied analysis request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub transcript: String,
    #[serde(default)]
    pub acknowledge_emergency: bool,
}
