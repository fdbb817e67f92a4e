//! Post-generation safety pass over the assembled result.
//!
//! Two independent sub-passes in fixed order: the emergency assessment
//! (already computed at the top of the run, see `guardrail::emergency`) and
//! deterministic claim softening, followed by banner synthesis. One trace
//! entry summarizes everything the pass did.

pub mod banner;
pub mod emergency;
pub mod softening;

pub use banner::compliance_banner;
pub use emergency::{keyword_scan, screen_transcript, EmergencyScreen};
pub use softening::soften_claims;

use crate::pipeline::types::{GuardrailOutcome, PipelineResult, SofteningEdit};
use crate::trace::{TraceEntry, TraceRecorder};

/// Apply the guardrail pass to an assembled result.
///
/// The result's free-text note fields and billing hint are rewritten by the
/// softening table; every edit is recorded. The compliance banner is derived
/// from the result's emergency flag.
pub fn apply_guardrails(mut result: PipelineResult, recorder: &mut TraceRecorder) -> GuardrailOutcome {
    let mut edits: Vec<SofteningEdit> = Vec::new();

    soften_field(&mut result.note.subjective, "note.subjective", &mut edits);
    soften_field(&mut result.note.objective, "note.objective", &mut edits);
    soften_field(&mut result.note.assessment, "note.assessment", &mut edits);
    soften_field(&mut result.note.plan, "note.plan", &mut edits);
    soften_field(&mut result.billing.hint, "billing.hint", &mut edits);

    let banner = compliance_banner(result.emergency.has_emergency);

    tracing::info!(
        claims_softened = edits.len(),
        has_emergency = result.emergency.has_emergency,
        severity = ?result.emergency.severity,
        "Guardrail pass complete"
    );

    recorder.append(TraceEntry::new(
        "guardrails",
        &format!(
            "claims softened: {}; emergency: {}; severity: {:?}",
            edits.len(),
            result.emergency.has_emergency,
            result.emergency.severity,
        ),
    ));

    GuardrailOutcome {
        result,
        softening_edits: edits,
        compliance_banner: banner,
    }
}

fn soften_field(field: &mut String, name: &str, edits: &mut Vec<SofteningEdit>) {
    let (softened, applied) = soften_claims(field);
    for phrase in applied {
        edits.push(SofteningEdit {
            field: name.to_string(),
            phrase: phrase.to_string(),
        });
    }
    *field = softened;
}
