//! Emergency screening of the original transcript.
//!
//! Primary path is a model call parsed like any other stage output. The
//! deterministic keyword scan backs it up: it runs whenever the model path
//! fails for any reason, and it also overrides a model verdict of "no
//! emergency" when a high-risk phrase is plainly present — the screen is
//! never less safe than the keyword list.

use crate::pipeline::extract::extract_json;
use crate::pipeline::fallback::ModelFallbackExecutor;
use crate::pipeline::prompts::{build_emergency_prompt, EMERGENCY_SYSTEM_PROMPT};
use crate::pipeline::types::{EmergencyAssessment, Severity, Transcript};

/// High-risk phrases and the condition label each one signals.
/// Matching is case-insensitive substring search.
static HIGH_RISK_PHRASES: &[(&str, &str)] = &[
    // Cardiovascular
    ("chest pain", "possible cardiac event"),
    ("crushing chest", "possible cardiac event"),
    ("heart attack", "possible cardiac event"),
    // Neurological
    ("slurred speech", "possible stroke"),
    ("face drooping", "possible stroke"),
    ("worst headache", "possible neurological emergency"),
    ("seizure", "possible neurological emergency"),
    // Mental health
    ("suicidal", "suicide risk"),
    ("suicide", "suicide risk"),
    ("self-harm", "self-harm risk"),
    ("want to end my life", "suicide risk"),
    // Respiratory
    ("can't breathe", "respiratory distress"),
    ("cannot breathe", "respiratory distress"),
    ("struggling to breathe", "respiratory distress"),
    // Allergic
    ("throat is closing", "possible anaphylaxis"),
    ("throat swelling", "possible anaphylaxis"),
    ("anaphylaxis", "possible anaphylaxis"),
    // Trauma
    ("severe bleeding", "major trauma"),
    ("unconscious", "loss of consciousness"),
    // Poisoning / overdose
    ("overdose", "possible overdose"),
    ("poisoning", "possible poisoning"),
];

const FALLBACK_RECOMMENDATION: &str =
    "High-risk indicators present; advise immediate emergency evaluation.";

/// Deterministic keyword scan over the transcript.
pub fn keyword_scan(transcript: &Transcript) -> EmergencyAssessment {
    let lower = transcript.text().to_lowercase();
    let mut conditions: Vec<String> = Vec::new();

    for (phrase, label) in HIGH_RISK_PHRASES {
        if lower.contains(phrase) && !conditions.iter().any(|c| c == label) {
            conditions.push(label.to_string());
        }
    }

    if conditions.is_empty() {
        EmergencyAssessment::clear()
    } else {
        EmergencyAssessment {
            has_emergency: true,
            detected_conditions: conditions,
            severity: Severity::High,
            recommendation: FALLBACK_RECOMMENDATION.into(),
        }
    }
}

/// The model call and response text behind an assessment, for the trace.
#[derive(Debug, Clone)]
pub struct EmergencyScreen {
    pub assessment: EmergencyAssessment,
    /// Which path produced the verdict.
    pub via_model: bool,
    pub response: Option<String>,
}

/// Screen the transcript: model first, keyword scan as backstop.
pub fn screen_transcript(
    executor: &mut ModelFallbackExecutor<'_>,
    transcript: &Transcript,
) -> EmergencyScreen {
    let prompt = build_emergency_prompt(transcript.text());

    let model_verdict = executor
        .execute(&prompt, EMERGENCY_SYSTEM_PROMPT)
        .map_err(|e| e.to_string())
        .and_then(|response| {
            let value = extract_json(&response.text).map_err(|e| e.to_string())?;
            let assessment: EmergencyAssessment =
                serde_json::from_value(value.value).map_err(|e| e.to_string())?;
            Ok((assessment, response.text))
        });

    match model_verdict {
        Ok((assessment, response)) => {
            let merged = merge_with_keywords(assessment, transcript);
            EmergencyScreen {
                assessment: merged,
                via_model: true,
                response: Some(response),
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "Emergency screen model path failed, using keyword scan");
            EmergencyScreen {
                assessment: keyword_scan(transcript),
                via_model: false,
                response: None,
            }
        }
    }
}

/// The merged verdict is never less severe than the keyword scan: a model
/// "all clear" does not stand when the scan disagrees, and a model severity
/// below the scan's is raised to match.
fn merge_with_keywords(
    model: EmergencyAssessment,
    transcript: &Transcript,
) -> EmergencyAssessment {
    let scanned = keyword_scan(transcript);
    if !scanned.has_emergency {
        return model;
    }
    if !model.has_emergency {
        tracing::warn!(
            conditions = ?scanned.detected_conditions,
            "Model reported no emergency but high-risk phrases are present; escalating"
        );
        return scanned;
    }

    let mut merged = model;
    merged.severity = merged.severity.max(scanned.severity);
    for condition in scanned.detected_conditions {
        if !merged.detected_conditions.contains(&condition) {
            merged.detected_conditions.push(condition);
        }
    }
    if merged.recommendation.trim().is_empty() {
        merged.recommendation = scanned.recommendation;
    }
    merged
}
