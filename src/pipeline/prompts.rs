//! Prompt templates for the five documentation stages and the emergency
//! screen. Each builder takes the prior stage's parsed output, never raw
//! model text.

use std::sync::LazyLock;

use regex::Regex;

use super::types::{Problem, SoapNote};

pub const DOCUMENTATION_SYSTEM_PROMPT: &str = r#"
You are a clinical documentation assistant. Your ONLY role is to structure
information that is explicitly present in the consultation transcript.

RULES — ABSOLUTE, NO EXCEPTIONS:
1. Use ONLY information stated in the provided material.
2. NEVER add diagnoses, treatment advice, or clinical opinion of your own.
3. If information is missing or unclear, say so rather than inventing it.
4. Output MUST be valid JSON in exactly the requested shape, wrapped in
   ```json``` fences, with no other text.
"#;

pub const EMERGENCY_SYSTEM_PROMPT: &str = r#"
You are a clinical safety screener. You flag possible emergencies described
in a consultation transcript. You never diagnose and never give treatment
advice. Output MUST be valid JSON in exactly the requested shape.
"#;

/// Stage 1: identify speakers and annotate the transcript.
pub fn build_speaker_prompt(transcript: &str) -> String {
    format!(
        r#"<transcript>
{transcript}
</transcript>

Identify the speakers in the consultation transcript above. Then rewrite the
transcript with each line prefixed by its speaker label.

```json
{{
  "doctor": "label used for the clinician",
  "patient": "label used for the patient",
  "others": ["any additional speakers"],
  "confidence": "low | medium | high",
  "annotated_transcript": "the transcript with speaker labels applied"
}}
```"#
    )
}

/// Stage 2: generate the four-section note from the annotated transcript.
pub fn build_note_prompt(annotated_transcript: &str) -> String {
    format!(
        r#"<transcript>
{annotated_transcript}
</transcript>

Working step by step through the annotated consultation above, write a
clinical note. First gather what the patient reported, then what was
observed or measured, then the clinician's stated impression, then the
agreed plan.

```json
{{
  "subjective": "what the patient reported",
  "objective": "findings, vitals, examination results",
  "assessment": "the clinician's stated impression",
  "plan": "agreed next steps"
}}
```"#
    )
}

/// Stage 3: extract discrete problems from the note.
pub fn build_problem_prompt(note: &SoapNote) -> String {
    format!(
        r#"<note>
Subjective: {subjective}
Objective: {objective}
Assessment: {assessment}
Plan: {plan}
</note>

List each distinct clinical problem documented in the note above, with the
evidence from the note that supports it.

```json
[
  {{"description": "the problem", "rationale": "supporting evidence from the note"}}
]
```"#,
        subjective = note.subjective,
        objective = note.objective,
        assessment = note.assessment,
        plan = note.plan,
    )
}

/// Stage 4: propose diagnosis codes for the problem list.
pub fn build_diagnosis_prompt(problems: &[Problem]) -> String {
    let problem_lines = problems
        .iter()
        .map(|p| format!("- {} ({})", p.description, p.rationale))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"<problems>
{problem_lines}
</problems>

Propose ICD-10 diagnosis codes for the problems above, at most 3, best match
first. Codes must look like these examples: J06.9, E11, I10, M54.5.

```json
[
  {{"code": "J06.9", "description": "Acute upper respiratory infection, unspecified", "confidence": "high"}}
]
```"#
    )
}

/// Stage 5: derive the billing level from the note and problem list.
pub fn build_billing_prompt(note: &SoapNote, problems: &[Problem]) -> String {
    let problem_lines = problems
        .iter()
        .map(|p| format!("- {}", p.description))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"<note>
Assessment: {assessment}
Plan: {plan}
</note>
<problems>
{problem_lines}
</problems>

Select the outpatient visit level (a 5-digit CPT code such as 99212, 99213,
99214) justified by the documentation above, plus up to 3 additional billable
items if clearly documented. Do not exceed what the documentation supports.

```json
{{
  "level": {{"code": "99213", "description": "visit level description", "confidence": "medium"}},
  "duration_minutes": null,
  "justification": "why this level is supported",
  "additional_items": [
    {{"code": "87804", "description": "item description", "confidence": "low"}}
  ],
  "hint": "one sentence of billing guidance for the clinician"
}}
```"#,
        assessment = note.assessment,
        plan = note.plan,
    )
}

/// Emergency screen: classify the original transcript.
pub fn build_emergency_prompt(transcript: &str) -> String {
    format!(
        r#"<transcript>
{transcript}
</transcript>

Screen the transcript above for emergency indicators, both explicit and
implied, in these categories: cardiovascular, neurological, mental-health,
respiratory, allergic, trauma, poisoning/overdose.

```json
{{
  "has_emergency": false,
  "detected_conditions": ["condition labels, if any"],
  "severity": "low | medium | high | critical",
  "recommendation": "one line, e.g. advise immediate emergency evaluation"
}}
```"#
    )
}

// ── Redaction ───────────────────────────────────────────────

static TAGGED_BODY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<(transcript|note|problems)>.*?</(transcript|note|problems)>")
        .expect("static redaction pattern")
});

/// Elide patient material from a prompt before it enters the audit trail.
/// The instruction scaffolding stays; tagged bodies are replaced.
pub fn redact_prompt(prompt: &str) -> String {
    TAGGED_BODY
        .replace_all(prompt, "<$1>[content elided]</$1>")
        .into_owned()
}
