//! The five documentation stages and their failure policy.
//!
//! Policy is data: each stage row names its technique label and what happens
//! when its response cannot be parsed. The orchestrator consults the table
//! instead of growing a bespoke try/recover block per stage.

use serde::de::DeserializeOwned;
use serde_json::Value;

use super::extract::{extract_json, ExtractionMethod};
use super::types::{
    BillingResult, DiagnosisCode, OutcomeKind, Problem, SoapNote, SpeakerMap, Transcript,
};
use super::validation::{validate_billing, validate_diagnosis_codes, ValidationSummary};
use super::PipelineError;

/// The five stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    SpeakerIdentification,
    NoteGeneration,
    ProblemExtraction,
    DiagnosisCoding,
    BillingCoding,
}

/// What to do when a stage's response cannot be parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Substitute the stage's defined default value.
    UseDefault,
    /// Terminate the pipeline run.
    Terminate,
}

/// One row of the stage policy table.
#[derive(Debug, Clone, Copy)]
pub struct StageSpec {
    pub kind: StageKind,
    pub name: &'static str,
    /// Prompting technique label — audit/UX metadata only.
    pub technique: &'static str,
    pub on_parse_failure: FailurePolicy,
}

/// The policy table, in execution order.
pub const STAGES: [StageSpec; 5] = [
    StageSpec {
        kind: StageKind::SpeakerIdentification,
        name: "speaker_identification",
        technique: "role prompting",
        on_parse_failure: FailurePolicy::UseDefault,
    },
    StageSpec {
        kind: StageKind::NoteGeneration,
        name: "note_generation",
        technique: "chain-of-thought",
        on_parse_failure: FailurePolicy::Terminate,
    },
    StageSpec {
        kind: StageKind::ProblemExtraction,
        name: "problem_extraction",
        technique: "structured extraction",
        on_parse_failure: FailurePolicy::UseDefault,
    },
    StageSpec {
        kind: StageKind::DiagnosisCoding,
        name: "diagnosis_coding",
        technique: "few-shot",
        on_parse_failure: FailurePolicy::UseDefault,
    },
    StageSpec {
        kind: StageKind::BillingCoding,
        name: "billing_coding",
        technique: "constrained output",
        on_parse_failure: FailurePolicy::UseDefault,
    },
];

pub fn stage_spec(kind: StageKind) -> &'static StageSpec {
    let index = match kind {
        StageKind::SpeakerIdentification => 0,
        StageKind::NoteGeneration => 1,
        StageKind::ProblemExtraction => 2,
        StageKind::DiagnosisCoding => 3,
        StageKind::BillingCoding => 4,
    };
    &STAGES[index]
}

/// A stage's structured value plus how it was obtained.
#[derive(Debug, Clone)]
pub struct StageValue<T> {
    pub value: T,
    pub kind: OutcomeKind,
    pub validation: ValidationSummary,
}

impl<T> StageValue<T> {
    fn parsed(value: T, method: ExtractionMethod) -> Self {
        Self {
            value,
            kind: if method.needed_repair() {
                OutcomeKind::ParsedWithRepair
            } else {
                OutcomeKind::Ok
            },
            validation: ValidationSummary::default(),
        }
    }

    fn fallback(value: T) -> Self {
        Self {
            value,
            kind: OutcomeKind::FallbackDefault,
            validation: ValidationSummary::default(),
        }
    }
}

// ── Per-stage response parsing ──────────────────────────────

/// Stage 1: parse the speaker map, or fall back to generic labels.
pub fn parse_speaker_response(response: &str, transcript: &Transcript) -> StageValue<SpeakerMap> {
    match typed_extract::<SpeakerMap>(response) {
        Ok((map, method)) => {
            let mut map = map;
            // Never let a parse quirk lose the transcript body
            if map.annotated_transcript.trim().is_empty() {
                map.annotated_transcript = transcript.text().to_string();
            }
            StageValue::parsed(map, method)
        }
        Err(e) => {
            tracing::warn!(error = %e, "Speaker identification unparseable, using generic labels");
            StageValue::fallback(SpeakerMap::generic(transcript))
        }
    }
}

/// Stage 2: parse the note. No safe default exists — failure is terminal.
pub fn parse_note_response(response: &str) -> Result<StageValue<SoapNote>, PipelineError> {
    match typed_extract::<SoapNote>(response) {
        Ok((note, method)) => Ok(StageValue::parsed(note, method)),
        Err(e) => Err(PipelineError::ParseFailure {
            stage: "note_generation",
            detail: e,
        }),
    }
}

/// Stage 3: parse the problem list, or fall back to an empty list.
/// Elements that fail to deserialize individually are skipped.
pub fn parse_problem_response(response: &str) -> StageValue<Vec<Problem>> {
    match array_extract::<Problem>(response) {
        Ok((problems, method)) => StageValue::parsed(problems, method),
        Err(e) => {
            tracing::warn!(error = %e, "Problem extraction unparseable, using empty list");
            StageValue::fallback(Vec::new())
        }
    }
}

/// Stage 4: parse diagnosis codes, validate patterns, cap at the maximum.
pub fn parse_diagnosis_response(response: &str) -> StageValue<Vec<DiagnosisCode>> {
    match array_extract::<DiagnosisCode>(response) {
        Ok((codes, method)) => {
            let (codes, validation) = validate_diagnosis_codes(codes);
            StageValue {
                value: codes,
                kind: if method.needed_repair() {
                    OutcomeKind::ParsedWithRepair
                } else {
                    OutcomeKind::Ok
                },
                validation,
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "Diagnosis coding unparseable, using empty list");
            StageValue::fallback(Vec::new())
        }
    }
}

/// Stage 5: parse billing, validate codes, or fall back to the standard
/// consultation level.
pub fn parse_billing_response(response: &str) -> StageValue<BillingResult> {
    match typed_extract::<BillingResult>(response) {
        Ok((billing, method)) => {
            let (billing, validation) = validate_billing(billing);
            StageValue {
                value: billing,
                kind: if method.needed_repair() {
                    OutcomeKind::ParsedWithRepair
                } else {
                    OutcomeKind::Ok
                },
                validation,
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "Billing coding unparseable, using standard default");
            StageValue::fallback(BillingResult::standard_consultation())
        }
    }
}

// ── Shared extraction helpers ───────────────────────────────

fn typed_extract<T: DeserializeOwned>(response: &str) -> Result<(T, ExtractionMethod), String> {
    let extracted = extract_json(response).map_err(|e| e.to_string())?;
    let value = serde_json::from_value::<T>(extracted.value).map_err(|e| e.to_string())?;
    Ok((value, extracted.method))
}

/// Extract a JSON array, skipping elements that fail to deserialize.
fn array_extract<T: DeserializeOwned>(
    response: &str,
) -> Result<(Vec<T>, ExtractionMethod), String> {
    let extracted = extract_json(response).map_err(|e| e.to_string())?;
    let Value::Array(items) = extracted.value else {
        return Err("expected a JSON array".into());
    };
    let parsed: Vec<T> = items
        .into_iter()
        .filter_map(|v| serde_json::from_value(v).ok())
        .collect();
    Ok((parsed, extracted.method))
}
