//! Deterministic softening of absolute medical claims.
//!
//! Table-driven, case-insensitive, whole-phrase replacements. The table is
//! constructed so no replacement text matches any rule, which makes the
//! pass idempotent: softening twice equals softening once.

use std::sync::LazyLock;

use regex::Regex;

/// One softening rule: an absolute phrase and its hedged replacement.
struct SofteningRule {
    /// Canonical phrase, for the audit record.
    phrase: &'static str,
    pattern: Regex,
    replacement: &'static str,
}

fn rule(phrase: &'static str, replacement: &'static str) -> SofteningRule {
    let escaped = regex::escape(phrase);
    SofteningRule {
        phrase,
        pattern: Regex::new(&format!(r"(?i)\b{escaped}\b")).expect("static softening pattern"),
        replacement,
    }
}

static SOFTENING_RULES: LazyLock<Vec<SofteningRule>> = LazyLock::new(|| {
    vec![
        rule("will cure", "may help improve"),
        rule("will definitely cure", "may help improve"),
        rule("will heal", "may support recovery from"),
        rule("will prevent", "may reduce the risk of"),
        rule("will eliminate", "may reduce"),
        rule("guaranteed to work", "often considered effective"),
        rule("guaranteed", "expected in many cases"),
        rule("always works", "is often effective"),
        rule("never fails", "is often effective"),
        rule("completely safe", "generally well tolerated"),
        rule("no side effects", "a low rate of reported side effects"),
        rule("100% effective", "effective for many patients"),
        rule("certainly", "likely"),
        rule("definitely", "probably"),
        rule("permanent cure", "lasting improvement"),
    ]
});

/// Apply the softening table to one piece of text, returning the rewritten
/// text and the canonical phrase of every rule that fired.
pub fn soften_claims(text: &str) -> (String, Vec<&'static str>) {
    let mut result = text.to_string();
    let mut applied = Vec::new();

    for rule in SOFTENING_RULES.iter() {
        if rule.pattern.is_match(&result) {
            result = rule
                .pattern
                .replace_all(&result, rule.replacement)
                .into_owned();
            applied.push(rule.phrase);
        }
    }

    (result, applied)
}
