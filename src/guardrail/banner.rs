//! Compliance banner synthesis. Deterministic given the emergency flag —
//! no model dependency.

pub const BASE_DISCLAIMER: &str =
    "AI-generated draft documentation. All content requires review and sign-off \
     by a licensed clinician before use.";

const URGENT_PREFIX: &str =
    "URGENT: potential emergency indicators were detected in this consultation. ";

const TRIAGE_QUALIFIER: &str = " This tool is not a triage tool and must not delay emergency care.";

/// Build the banner for a run.
pub fn compliance_banner(has_emergency: bool) -> String {
    if has_emergency {
        format!("{URGENT_PREFIX}{BASE_DISCLAIMER}{TRIAGE_QUALIFIER}")
    } else {
        BASE_DISCLAIMER.to_string()
    }
}
