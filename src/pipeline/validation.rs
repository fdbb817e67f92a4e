//! Structural validation of model-proposed codes.
//!
//! Structurally valid JSON can still violate the data model: too many codes,
//! or code strings that do not match the coding system's lexical shape.
//! Offending entries are dropped and counted, never passed through.

use std::sync::LazyLock;

use regex::Regex;

use crate::config::{MAX_BILLING_ITEMS, MAX_DIAGNOSIS_CODES};

use super::types::{BillingItem, BillingResult, DiagnosisCode};

/// Diagnosis codes: letter, two digits, optional decimal of 1-4 digits.
static DIAGNOSIS_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z]\d{2}(\.\d{1,4})?$").expect("static code pattern"));

/// Billing items: fixed-length 5-digit numeric codes.
static BILLING_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{5}$").expect("static code pattern"));

pub fn is_valid_diagnosis_code(code: &str) -> bool {
    DIAGNOSIS_CODE.is_match(code)
}

pub fn is_valid_billing_code(code: &str) -> bool {
    BILLING_CODE.is_match(code)
}

/// What validation did to a stage's code list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValidationSummary {
    /// Entries dropped for failing the lexical pattern.
    pub dropped: usize,
    /// Entries truncated past the list cap.
    pub truncated: usize,
}

impl ValidationSummary {
    pub fn touched(&self) -> bool {
        self.dropped > 0 || self.truncated > 0
    }
}

/// Drop malformed diagnosis codes and cap the list at the maximum count.
pub fn validate_diagnosis_codes(
    codes: Vec<DiagnosisCode>,
) -> (Vec<DiagnosisCode>, ValidationSummary) {
    let mut summary = ValidationSummary::default();

    let mut kept: Vec<DiagnosisCode> = codes
        .into_iter()
        .filter(|c| {
            let normalized = c.code.trim().to_uppercase();
            if is_valid_diagnosis_code(&normalized) {
                true
            } else {
                tracing::warn!(code = %c.code, "Dropping malformed diagnosis code");
                summary.dropped += 1;
                false
            }
        })
        .map(|mut c| {
            c.code = c.code.trim().to_uppercase();
            c
        })
        .collect();

    if kept.len() > MAX_DIAGNOSIS_CODES {
        summary.truncated = kept.len() - MAX_DIAGNOSIS_CODES;
        tracing::warn!(
            truncated = summary.truncated,
            "Diagnosis code list exceeded cap, truncating"
        );
        kept.truncate(MAX_DIAGNOSIS_CODES);
    }

    (kept, summary)
}

/// Validate the billing result in place: malformed additional items are
/// dropped, the list is capped, and a malformed level item falls back to the
/// standard consultation default.
pub fn validate_billing(billing: BillingResult) -> (BillingResult, ValidationSummary) {
    let mut summary = ValidationSummary::default();
    let mut out = billing;

    let level_code = out.level.code.trim().to_string();
    if is_valid_billing_code(&level_code) {
        out.level.code = level_code;
    } else {
        tracing::warn!(code = %out.level.code, "Malformed billing level, applying default");
        summary.dropped += 1;
        out.level = BillingResult::standard_consultation().level;
    }

    out.additional_items.retain(|item| {
        if is_valid_billing_code(item.code.trim()) {
            true
        } else {
            tracing::warn!(code = %item.code, "Dropping malformed billing item");
            summary.dropped += 1;
            false
        }
    });
    for item in &mut out.additional_items {
        item.code = item.code.trim().to_string();
    }

    if out.additional_items.len() > MAX_BILLING_ITEMS {
        summary.truncated = out.additional_items.len() - MAX_BILLING_ITEMS;
        out.additional_items.truncate(MAX_BILLING_ITEMS);
    }

    (out, summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::Confidence;

    fn dx(code: &str) -> DiagnosisCode {
        DiagnosisCode {
            code: code.into(),
            description: "test".into(),
            confidence: Confidence::Medium,
        }
    }

    fn item(code: &str) -> BillingItem {
        BillingItem {
            code: code.into(),
            description: "test".into(),
            confidence: Confidence::Low,
        }
    }

    #[test]
    fn diagnosis_pattern_accepts_standard_shapes() {
        assert!(is_valid_diagnosis_code("J06"));
        assert!(is_valid_diagnosis_code("J06.9"));
        assert!(is_valid_diagnosis_code("E11.3213"));
        assert!(is_valid_diagnosis_code("I10"));
    }

    #[test]
    fn diagnosis_pattern_rejects_malformed() {
        assert!(!is_valid_diagnosis_code("icd unclear"));
        assert!(!is_valid_diagnosis_code("J6"));
        assert!(!is_valid_diagnosis_code("J06."));
        assert!(!is_valid_diagnosis_code("J06.12345"));
        assert!(!is_valid_diagnosis_code("99213"));
        assert!(!is_valid_diagnosis_code(""));
    }

    #[test]
    fn billing_pattern_is_five_digits() {
        assert!(is_valid_billing_code("99213"));
        assert!(is_valid_billing_code("87804"));
        assert!(!is_valid_billing_code("9921"));
        assert!(!is_valid_billing_code("992134"));
        assert!(!is_valid_billing_code("J06.9"));
    }

    #[test]
    fn malformed_diagnosis_codes_are_dropped() {
        let (kept, summary) =
            validate_diagnosis_codes(vec![dx("J06.9"), dx("not a code"), dx("E11")]);
        assert_eq!(kept.len(), 2);
        assert_eq!(summary.dropped, 1);
        assert!(kept.iter().all(|c| is_valid_diagnosis_code(&c.code)));
    }

    #[test]
    fn diagnosis_codes_are_normalized_to_uppercase() {
        let (kept, _) = validate_diagnosis_codes(vec![dx(" j06.9 ")]);
        assert_eq!(kept[0].code, "J06.9");
    }

    #[test]
    fn diagnosis_list_is_capped_at_three() {
        let codes = vec![dx("J06"), dx("E11"), dx("I10"), dx("M54.5"), dx("R05")];
        let (kept, summary) = validate_diagnosis_codes(codes);
        assert_eq!(kept.len(), 3);
        assert_eq!(summary.truncated, 2);
        // Order preserved: best-match-first truncates from the tail
        assert_eq!(kept[0].code, "J06");
    }

    #[test]
    fn malformed_billing_level_falls_back_to_default() {
        let billing = BillingResult {
            level: item("CPT-HIGH"),
            duration_minutes: Some(15),
            justification: "test".into(),
            additional_items: vec![],
            hint: "test".into(),
        };
        let (out, summary) = validate_billing(billing);
        assert_eq!(out.level.code, "99213");
        assert_eq!(out.level.confidence, Confidence::Low);
        assert_eq!(summary.dropped, 1);
        // Remaining fields untouched
        assert_eq!(out.duration_minutes, Some(15));
    }

    #[test]
    fn malformed_additional_items_are_dropped_and_capped() {
        let billing = BillingResult {
            level: item("99214"),
            duration_minutes: None,
            justification: "".into(),
            additional_items: vec![
                item("87804"),
                item("bad"),
                item("81002"),
                item("36415"),
                item("94760"),
            ],
            hint: "".into(),
        };
        let (out, summary) = validate_billing(billing);
        assert_eq!(summary.dropped, 1);
        assert_eq!(summary.truncated, 1);
        assert_eq!(out.additional_items.len(), 3);
        assert_eq!(out.level.code, "99214");
    }

    #[test]
    fn clean_billing_passes_untouched() {
        let billing = BillingResult {
            level: item("99213"),
            duration_minutes: None,
            justification: "routine".into(),
            additional_items: vec![item("87804")],
            hint: "hint".into(),
        };
        let (out, summary) = validate_billing(billing);
        assert!(!summary.touched());
        assert_eq!(out.additional_items.len(), 1);
    }
}
