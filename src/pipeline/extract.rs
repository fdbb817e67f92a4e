//! Recover a JSON value from free-text model output.
//!
//! Models wrap JSON in code fences, prose, or both, and occasionally emit
//! near-JSON (trailing commas, raw newlines inside strings). Strategies are
//! tried in a fixed order; each is a standalone function so a failing repair
//! can be pinned down in isolation.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

/// Which strategy produced the parsed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionMethod {
    /// Parsed directly after fence stripping.
    Direct,
    /// Parsed after slicing the outermost brace/bracket span.
    Sliced,
    /// Parsed after syntactic repair of the slice.
    Repaired,
}

impl ExtractionMethod {
    /// Did recovery need more than a direct parse?
    pub fn needed_repair(&self) -> bool {
        !matches!(self, Self::Direct)
    }
}

/// Extracted value plus how it was obtained.
#[derive(Debug, Clone)]
pub struct Extracted {
    pub value: Value,
    pub method: ExtractionMethod,
}

/// Parse failure after every strategy was exhausted.
#[derive(Debug, thiserror::Error)]
#[error("No JSON value could be recovered from the response: {0}")]
pub struct ParseFailure(pub String);

/// Recover a JSON object or array from an arbitrary model response.
pub fn extract_json(response: &str) -> Result<Extracted, ParseFailure> {
    let unfenced = strip_code_fences(response);

    // Strategy 1: direct parse of the fence-stripped text.
    if let Ok(value) = serde_json::from_str::<Value>(unfenced.trim()) {
        if value.is_object() || value.is_array() {
            return Ok(Extracted {
                value,
                method: ExtractionMethod::Direct,
            });
        }
    }

    // Strategy 2: outermost structure slice. Balanced search is not needed
    // for the target shapes — first opener to last closer is sufficient.
    let Some(slice) = slice_outer_structure(&unfenced) else {
        return Err(ParseFailure("no JSON structure found".into()));
    };
    if let Ok(value) = serde_json::from_str::<Value>(slice) {
        return Ok(Extracted {
            value,
            method: ExtractionMethod::Sliced,
        });
    }

    // Strategy 3: syntactic repairs on the slice.
    let repaired = normalize_literal_newlines(&strip_trailing_commas(slice));
    match serde_json::from_str::<Value>(&repaired) {
        Ok(value) => Ok(Extracted {
            value,
            method: ExtractionMethod::Repaired,
        }),
        Err(e) => Err(ParseFailure(e.to_string())),
    }
}

// ── Individual strategies ───────────────────────────────────

static CODE_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```(?:json|JSON)?").expect("static fence pattern"));

/// Remove Markdown code-fence markers, keeping fence contents in place.
pub fn strip_code_fences(text: &str) -> String {
    CODE_FENCE.replace_all(text, "").into_owned()
}

/// Slice from the first `{`/`[` to the last matching-kind closer.
/// Returns `None` when no opener is present.
pub fn slice_outer_structure(text: &str) -> Option<&str> {
    let obj_start = text.find('{');
    let arr_start = text.find('[');

    let (start, closer) = match (obj_start, arr_start) {
        (Some(o), Some(a)) if a < o => (a, ']'),
        (Some(o), _) => (o, '}'),
        (None, Some(a)) => (a, ']'),
        (None, None) => return None,
    };

    let end = text.rfind(closer)?;
    if end < start {
        return None;
    }
    Some(&text[start..=end])
}

static TRAILING_COMMA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",\s*([}\]])").expect("static comma pattern"));

/// Remove trailing commas immediately before a closing brace/bracket.
pub fn strip_trailing_commas(text: &str) -> String {
    TRAILING_COMMA.replace_all(text, "$1").into_owned()
}

/// Escape literal newlines that appear inside string literals.
/// Newlines between tokens are left alone.
pub fn normalize_literal_newlines(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;

    for c in text.chars() {
        match c {
            '\\' if in_string && !escaped => {
                escaped = true;
                out.push(c);
                continue;
            }
            '"' if !escaped => in_string = !in_string,
            '\n' if in_string => {
                out.push_str("\\n");
                escaped = false;
                continue;
            }
            '\r' if in_string => {
                escaped = false;
                continue;
            }
            _ => {}
        }
        escaped = false;
        out.push(c);
    }
    out
}
