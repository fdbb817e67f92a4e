//! The consultation pipeline: emergency gate → five stages → guardrails →
//! persistence, with an audit trail accumulated throughout.
//!
//! All state is run-scoped. The fallback executor, trace recorder, and
//! session id are created fresh per `analyze` call, so concurrent requests
//! share nothing mutable.

use uuid::Uuid;

use crate::audit::{AuditEvent, AuditSink};
use crate::config::PipelineConfig;
use crate::guardrail::{apply_guardrails, screen_transcript};
use crate::ollama::LlmClient;
use crate::store::SessionStore;
use crate::trace::{TraceEntry, TraceRecorder};

use super::fallback::ModelFallbackExecutor;
use super::prompts::{
    build_billing_prompt, build_diagnosis_prompt, build_note_prompt, build_problem_prompt,
    build_speaker_prompt, redact_prompt, DOCUMENTATION_SYSTEM_PROMPT,
};
use super::stages::{
    parse_billing_response, parse_diagnosis_response, parse_note_response,
    parse_problem_response, parse_speaker_response, stage_spec, StageKind, StageValue,
};
use super::types::{
    AnalysisOutcome, AnalysisReport, AnalysisRequest, PipelineResult, Transcript,
};
use super::{PipelineError, PipelineFailure};

/// One pipeline host. Collaborators are borrowed; everything mutable is
/// created per run.
pub struct ConsultationPipeline<'a> {
    client: &'a (dyn LlmClient + Sync),
    store: &'a dyn SessionStore,
    audit: &'a dyn AuditSink,
    config: PipelineConfig,
}

impl<'a> ConsultationPipeline<'a> {
    pub fn new(
        client: &'a (dyn LlmClient + Sync),
        store: &'a dyn SessionStore,
        audit: &'a dyn AuditSink,
        config: PipelineConfig,
    ) -> Self {
        Self {
            client,
            store,
            audit,
            config,
        }
    }

    /// Run one analysis end to end.
    ///
    /// Returns `AcknowledgmentRequired` without making any generation calls
    /// when emergency indicators are present and unacknowledged. Terminal
    /// failures carry the trace accumulated so far.
    pub fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisOutcome, PipelineFailure> {
        let session_id = Uuid::new_v4();
        let _span =
            tracing::info_span!("analyze", session_id = %session_id).entered();

        let mut recorder = TraceRecorder::new();

        let transcript = match Transcript::new(&request.transcript) {
            Ok(t) => t,
            Err(e) => return Err(self.fail(e, recorder)),
        };

        // Run-scoped executor: the fallback cursor lives and dies with this call.
        let mut executor = ModelFallbackExecutor::new(
            self.client,
            self.config.model_chain.clone(),
            self.config.failover,
        );

        // Emergency screen before any documentation work.
        let screen = screen_transcript(&mut executor, &transcript);
        recorder.append(TraceEntry::new(
            "emergency_screen",
            &format!(
                "via {}; emergency: {}; severity: {:?}",
                if screen.via_model { "model" } else { "keyword scan" },
                screen.assessment.has_emergency,
                screen.assessment.severity,
            ),
        ));

        self.audit.record(AuditEvent::AnalysisRequested {
            transcript_length: transcript.len(),
            has_emergency: screen.assessment.has_emergency,
            severity: screen.assessment.severity,
        });

        if screen.assessment.has_emergency && !request.acknowledge_emergency {
            tracing::warn!(
                severity = ?screen.assessment.severity,
                "Emergency unacknowledged, refusing documentation generation"
            );
            return Ok(AnalysisOutcome::AcknowledgmentRequired {
                detected_conditions: screen.assessment.detected_conditions,
                severity: screen.assessment.severity,
                recommendation: screen.assessment.recommendation,
            });
        }

        // Stage 1: speaker identification.
        let response = self.call_stage(
            StageKind::SpeakerIdentification,
            &build_speaker_prompt(transcript.text()),
            &mut executor,
            &mut recorder,
        )?;
        let speakers = parse_speaker_response(&response.1, &transcript);
        self.complete_stage(
            StageKind::SpeakerIdentification,
            &format!("outcome: {:?}, confidence: {:?}", speakers.kind, speakers.value.confidence),
            &response,
            &mut recorder,
        );

        // Stage 2: note generation. No safe default — parse failure is terminal.
        let response = self.call_stage(
            StageKind::NoteGeneration,
            &build_note_prompt(&speakers.value.annotated_transcript),
            &mut executor,
            &mut recorder,
        )?;
        let note: StageValue<_> = match parse_note_response(&response.1) {
            Ok(v) => v,
            Err(e) => return Err(self.fail(e, recorder)),
        };
        self.complete_stage(
            StageKind::NoteGeneration,
            &format!("outcome: {:?}, 4 sections", note.kind),
            &response,
            &mut recorder,
        );

        // Stage 3: problem extraction.
        let response = self.call_stage(
            StageKind::ProblemExtraction,
            &build_problem_prompt(&note.value),
            &mut executor,
            &mut recorder,
        )?;
        let problems = parse_problem_response(&response.1);
        self.complete_stage(
            StageKind::ProblemExtraction,
            &format!("outcome: {:?}, {} problems", problems.kind, problems.value.len()),
            &response,
            &mut recorder,
        );

        // Stage 4: diagnosis coding.
        let response = self.call_stage(
            StageKind::DiagnosisCoding,
            &build_diagnosis_prompt(&problems.value),
            &mut executor,
            &mut recorder,
        )?;
        let diagnoses = parse_diagnosis_response(&response.1);
        self.complete_stage(
            StageKind::DiagnosisCoding,
            &format!(
                "outcome: {:?}, {} codes (dropped {}, truncated {})",
                diagnoses.kind,
                diagnoses.value.len(),
                diagnoses.validation.dropped,
                diagnoses.validation.truncated,
            ),
            &response,
            &mut recorder,
        );

        // Stage 5: billing coding.
        let response = self.call_stage(
            StageKind::BillingCoding,
            &build_billing_prompt(&note.value, &problems.value),
            &mut executor,
            &mut recorder,
        )?;
        let billing = parse_billing_response(&response.1);
        self.complete_stage(
            StageKind::BillingCoding,
            &format!(
                "outcome: {:?}, level {}, {} additional items",
                billing.kind,
                billing.value.level.code,
                billing.value.additional_items.len(),
            ),
            &response,
            &mut recorder,
        );

        let result = PipelineResult {
            speakers: speakers.value,
            note: note.value,
            problems: problems.value,
            diagnosis_codes: diagnoses.value,
            billing: billing.value,
            emergency: screen.assessment,
        };

        let outcome = apply_guardrails(result, &mut recorder);

        if let Err(e) = self.store.save(
            session_id,
            &transcript,
            &outcome,
            outcome.result.emergency.has_emergency,
        ) {
            return Err(self.fail(PipelineError::StoreFailed(e), recorder));
        }

        tracing::info!(trace_entries = recorder.len(), "Analysis complete");

        Ok(AnalysisOutcome::Completed(Box::new(AnalysisReport {
            session_id,
            outcome,
            trace: recorder.into_entries(),
        })))
    }

    /// Record the stage start entry and run its model call.
    /// Returns the redacted prompt alongside the raw response text.
    fn call_stage(
        &self,
        kind: StageKind,
        prompt: &str,
        executor: &mut ModelFallbackExecutor<'_>,
        recorder: &mut TraceRecorder,
    ) -> Result<(String, String), PipelineFailure> {
        let spec = stage_spec(kind);
        recorder.append(
            TraceEntry::new(&format!("{}:start", spec.name), "stage started")
                .with_technique(spec.technique),
        );

        match executor.execute(prompt, DOCUMENTATION_SYSTEM_PROMPT) {
            Ok(response) => Ok((redact_prompt(prompt), response.text)),
            Err(e) => {
                let mut taken = TraceRecorder::new();
                std::mem::swap(recorder, &mut taken);
                Err(self.fail(e, taken))
            }
        }
    }

    fn complete_stage(
        &self,
        kind: StageKind,
        detail: &str,
        exchange: &(String, String),
        recorder: &mut TraceRecorder,
    ) {
        let spec = stage_spec(kind);
        recorder.append(
            TraceEntry::new(&format!("{}:complete", spec.name), detail)
                .with_exchange(&exchange.0, &exchange.1)
                .with_technique(spec.technique),
        );
    }

    fn fail(&self, error: PipelineError, recorder: TraceRecorder) -> PipelineFailure {
        self.audit.record(AuditEvent::AnalysisError {
            detail: error.to_string(),
        });
        tracing::error!(error = %error, "Analysis failed");
        PipelineFailure {
            error,
            trace: recorder.into_entries(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::CollectingAuditSink;
    use crate::ollama::{LlmError, MockLlmClient, MockReply};
    use crate::store::InMemorySessionStore;

    const URI_TRANSCRIPT: &str = "Patient: I've had a cough and fever for 3 days. \
        Doctor: Lungs clear, temp 100.2F, likely viral URI, rest and fluids advised.";

    fn emergency_clear() -> String {
        r#"{"has_emergency": false, "detected_conditions": [], "severity": "low",
            "recommendation": ""}"#
            .into()
    }

    fn speaker_reply() -> String {
        r#"{"doctor": "Doctor", "patient": "Patient", "others": [], "confidence": "high",
            "annotated_transcript": "[Patient] cough and fever for 3 days. [Doctor] Lungs clear, temp 100.2F, likely viral URI."}"#
            .into()
    }

    fn note_reply() -> String {
        r#"{"subjective": "Cough and fever for 3 days.",
            "objective": "Lungs clear, temperature 100.2F.",
            "assessment": "Likely viral upper respiratory infection.",
            "plan": "Rest and fluids; return if symptoms worsen."}"#
            .into()
    }

    fn problems_reply() -> String {
        r#"[{"description": "Viral upper respiratory infection",
             "rationale": "assessment states likely viral URI with clear lungs"}]"#
            .into()
    }

    fn diagnosis_reply() -> String {
        r#"[{"code": "J06.9", "description": "Acute upper respiratory infection, unspecified",
             "confidence": "high"}]"#
            .into()
    }

    fn billing_reply() -> String {
        r#"{"level": {"code": "99213", "description": "Established patient, low complexity",
                      "confidence": "medium"},
            "duration_minutes": 15,
            "justification": "One acute uncomplicated problem.",
            "additional_items": [],
            "hint": "Confirm documented visit duration."}"#
            .into()
    }

    fn happy_path_client() -> MockLlmClient {
        MockLlmClient::scripted(vec![
            MockReply::Text(emergency_clear()),
            MockReply::Text(speaker_reply()),
            MockReply::Text(note_reply()),
            MockReply::Text(problems_reply()),
            MockReply::Text(diagnosis_reply()),
            MockReply::Text(billing_reply()),
        ])
    }

    fn run(
        client: &MockLlmClient,
        store: &InMemorySessionStore,
        audit: &CollectingAuditSink,
        transcript: &str,
        acknowledge: bool,
    ) -> Result<AnalysisOutcome, PipelineFailure> {
        let pipeline = ConsultationPipeline::new(
            client,
            store,
            audit,
            PipelineConfig::with_models(["model-a", "model-b"]),
        );
        pipeline.analyze(&AnalysisRequest {
            transcript: transcript.into(),
            acknowledge_emergency: acknowledge,
        })
    }

    #[test]
    fn end_to_end_uri_consultation() {
        let client = happy_path_client();
        let store = InMemorySessionStore::new();
        let audit = CollectingAuditSink::new();

        let outcome = run(&client, &store, &audit, URI_TRANSCRIPT, false).unwrap();
        let report = match outcome {
            AnalysisOutcome::Completed(report) => report,
            other => panic!("Expected Completed, got {other:?}"),
        };

        // Assessment mentions an upper respiratory diagnosis
        assert!(report
            .outcome
            .result
            .note
            .assessment
            .to_lowercase()
            .contains("upper respiratory"));

        // Diagnosis code matches the lexical pattern
        assert_eq!(report.outcome.result.diagnosis_codes.len(), 1);
        assert!(crate::pipeline::validation::is_valid_diagnosis_code(
            &report.outcome.result.diagnosis_codes[0].code
        ));

        // No emergency
        assert!(!report.outcome.result.emergency.has_emergency);

        // Exactly 5 stage-complete entries then one guardrail entry, in order
        let audited: Vec<&str> = report
            .trace
            .iter()
            .filter(|e| e.step.ends_with(":complete") || e.step == "guardrails")
            .map(|e| e.step.as_str())
            .collect();
        assert_eq!(
            audited,
            vec![
                "speaker_identification:complete",
                "note_generation:complete",
                "problem_extraction:complete",
                "diagnosis_coding:complete",
                "billing_coding:complete",
                "guardrails",
            ]
        );

        // Saved exactly once
        assert_eq!(store.len(), 1);
        let saved = store.get_last().unwrap();
        assert_eq!(saved.session_id, report.session_id);

        // One requested event, no errors
        let events = audit.events();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], AuditEvent::AnalysisRequested { .. }));
    }

    #[test]
    fn trace_timestamps_are_monotonic_end_to_end() {
        let client = happy_path_client();
        let store = InMemorySessionStore::new();
        let audit = CollectingAuditSink::new();

        let outcome = run(&client, &store, &audit, URI_TRANSCRIPT, false).unwrap();
        let AnalysisOutcome::Completed(report) = outcome else {
            panic!("Expected Completed");
        };
        for pair in report.trace.windows(2) {
            assert!(pair[1].timestamp >= pair[0].timestamp);
        }
    }

    #[test]
    fn stage_complete_entries_carry_redacted_prompts() {
        let client = happy_path_client();
        let store = InMemorySessionStore::new();
        let audit = CollectingAuditSink::new();

        let outcome = run(&client, &store, &audit, URI_TRANSCRIPT, false).unwrap();
        let AnalysisOutcome::Completed(report) = outcome else {
            panic!("Expected Completed");
        };

        let speaker_entry = report
            .trace
            .iter()
            .find(|e| e.step == "speaker_identification:complete")
            .unwrap();
        let prompt = speaker_entry.prompt.as_deref().unwrap();
        assert!(prompt.contains("[content elided]"));
        assert!(!prompt.contains("cough and fever"));
        assert!(speaker_entry.response.is_some());
        assert_eq!(speaker_entry.technique.as_deref(), Some("role prompting"));
    }

    #[test]
    fn unacknowledged_emergency_short_circuits() {
        // Model says all clear, but the transcript contains "suicidal" —
        // the keyword override gates generation.
        let client = MockLlmClient::scripted(vec![MockReply::Text(emergency_clear())]);
        let store = InMemorySessionStore::new();
        let audit = CollectingAuditSink::new();

        let transcript = "Patient: I've been feeling suicidal lately. Doctor: tell me more.";
        let outcome = run(&client, &store, &audit, transcript, false).unwrap();

        match outcome {
            AnalysisOutcome::AcknowledgmentRequired {
                detected_conditions,
                severity,
                ..
            } => {
                assert!(detected_conditions.contains(&"suicide risk".to_string()));
                assert_eq!(severity, crate::pipeline::types::Severity::High);
            }
            other => panic!("Expected AcknowledgmentRequired, got {other:?}"),
        }

        // Only the emergency screen call was made — no generation calls
        assert_eq!(client.call_count(), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn emergency_screen_failure_still_gates_on_keywords() {
        // Emergency model call fails outright; keyword fallback must still
        // report the emergency and gate the run.
        let client = MockLlmClient::scripted(vec![MockReply::Fail(LlmError::Connection(
            "http://localhost:11434".into(),
        ))]);
        let store = InMemorySessionStore::new();
        let audit = CollectingAuditSink::new();

        let transcript = "Patient: sudden chest pain and sweating since this morning.";
        let outcome = run(&client, &store, &audit, transcript, false).unwrap();
        assert!(matches!(
            outcome,
            AnalysisOutcome::AcknowledgmentRequired { .. }
        ));
    }

    #[test]
    fn acknowledged_emergency_proceeds_to_documentation() {
        let client = MockLlmClient::scripted(vec![
            MockReply::Text(
                r#"{"has_emergency": true, "detected_conditions": ["possible cardiac event"],
                    "severity": "high", "recommendation": "advise emergency evaluation"}"#
                    .into(),
            ),
            MockReply::Text(speaker_reply()),
            MockReply::Text(note_reply()),
            MockReply::Text(problems_reply()),
            MockReply::Text(diagnosis_reply()),
            MockReply::Text(billing_reply()),
        ]);
        let store = InMemorySessionStore::new();
        let audit = CollectingAuditSink::new();

        let transcript = "Patient: crushing chest pain radiating to my arm. Doctor: noted.";
        let outcome = run(&client, &store, &audit, transcript, true).unwrap();

        let AnalysisOutcome::Completed(report) = outcome else {
            panic!("Expected Completed");
        };
        assert!(report.outcome.result.emergency.has_emergency);
        assert!(report.outcome.compliance_banner.starts_with("URGENT:"));
        let saved = store.get_last().unwrap();
        assert!(saved.has_emergency);
    }

    #[test]
    fn invalid_transcript_is_rejected_before_any_call() {
        let client = MockLlmClient::new("unused");
        let store = InMemorySessionStore::new();
        let audit = CollectingAuditSink::new();

        let result = run(&client, &store, &audit, "too short", false);
        assert!(matches!(
            result,
            Err(PipelineFailure {
                error: PipelineError::InvalidTranscript(_),
                ..
            })
        ));
        assert_eq!(client.call_count(), 0);
        assert_eq!(audit.events().len(), 1);
    }

    #[test]
    fn note_parse_failure_is_terminal_with_trace() {
        let client = MockLlmClient::scripted(vec![
            MockReply::Text(emergency_clear()),
            MockReply::Text(speaker_reply()),
            MockReply::Text("I am unable to produce a note today.".into()),
        ]);
        let store = InMemorySessionStore::new();
        let audit = CollectingAuditSink::new();

        let result = run(&client, &store, &audit, URI_TRANSCRIPT, false);
        let failure = result.unwrap_err();
        assert!(matches!(
            failure.error,
            PipelineError::ParseFailure {
                stage: "note_generation",
                ..
            }
        ));

        // Partial progress is preserved: emergency screen, stage 1, and the
        // note stage's start entry are all in the trace.
        let steps: Vec<&str> = failure.trace.iter().map(|e| e.step.as_str()).collect();
        assert!(steps.contains(&"emergency_screen"));
        assert!(steps.contains(&"speaker_identification:complete"));
        assert!(steps.contains(&"note_generation:start"));

        assert!(store.is_empty());
        assert!(audit
            .events()
            .iter()
            .any(|e| matches!(e, AuditEvent::AnalysisError { .. })));
    }

    #[test]
    fn speaker_parse_failure_uses_default_and_continues() {
        let client = MockLlmClient::scripted(vec![
            MockReply::Text(emergency_clear()),
            MockReply::Text("no speakers for you".into()),
            MockReply::Text(note_reply()),
            MockReply::Text(problems_reply()),
            MockReply::Text(diagnosis_reply()),
            MockReply::Text(billing_reply()),
        ]);
        let store = InMemorySessionStore::new();
        let audit = CollectingAuditSink::new();

        let outcome = run(&client, &store, &audit, URI_TRANSCRIPT, false).unwrap();
        let AnalysisOutcome::Completed(report) = outcome else {
            panic!("Expected Completed");
        };
        assert_eq!(report.outcome.result.speakers.doctor, "Speaker 1");
        // Stage 2 received the original transcript via the generic default
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn transient_failures_ride_the_fallback_chain() {
        let client = MockLlmClient::scripted(vec![
            MockReply::rate_limited(),
            MockReply::Text(emergency_clear()),
            MockReply::Text(speaker_reply()),
            MockReply::Text(note_reply()),
            MockReply::Text(problems_reply()),
            MockReply::Text(diagnosis_reply()),
            MockReply::Text(billing_reply()),
        ]);
        let store = InMemorySessionStore::new();
        let audit = CollectingAuditSink::new();

        // model-a rate-limits the first call; the run finishes on model-b
        let outcome = run(&client, &store, &audit, URI_TRANSCRIPT, false).unwrap();
        assert!(matches!(outcome, AnalysisOutcome::Completed(_)));
        // 1 failed + 6 successful calls
        assert_eq!(client.call_count(), 7);
    }

    #[test]
    fn all_models_exhausted_is_terminal() {
        let client = MockLlmClient::scripted(vec![
            MockReply::Text(emergency_clear()),
            MockReply::rate_limited(),
            MockReply::Fail(LlmError::RateLimited("still limited".into())),
        ]);
        let store = InMemorySessionStore::new();
        let audit = CollectingAuditSink::new();

        let result = run(&client, &store, &audit, URI_TRANSCRIPT, false);
        let failure = result.unwrap_err();
        assert!(matches!(
            failure.error,
            PipelineError::AllModelsExhausted { .. }
        ));
        // The speaker stage's start entry is preserved
        assert!(failure
            .trace
            .iter()
            .any(|e| e.step == "speaker_identification:start"));
    }

    #[test]
    fn diagnosis_overflow_is_capped_in_final_result() {
        let many_codes = r#"[
            {"code": "J06.9", "description": "URI", "confidence": "high"},
            {"code": "R05", "description": "Cough", "confidence": "medium"},
            {"code": "R50.9", "description": "Fever", "confidence": "medium"},
            {"code": "J02.9", "description": "Pharyngitis", "confidence": "low"},
            {"code": "J00", "description": "Common cold", "confidence": "low"}
        ]"#;
        let client = MockLlmClient::scripted(vec![
            MockReply::Text(emergency_clear()),
            MockReply::Text(speaker_reply()),
            MockReply::Text(note_reply()),
            MockReply::Text(problems_reply()),
            MockReply::Text(many_codes.into()),
            MockReply::Text(billing_reply()),
        ]);
        let store = InMemorySessionStore::new();
        let audit = CollectingAuditSink::new();

        let outcome = run(&client, &store, &audit, URI_TRANSCRIPT, false).unwrap();
        let AnalysisOutcome::Completed(report) = outcome else {
            panic!("Expected Completed");
        };
        assert_eq!(report.outcome.result.diagnosis_codes.len(), 3);
    }

    #[test]
    fn non_transient_failure_aborts_run_under_default_policy() {
        let client = MockLlmClient::scripted(vec![
            MockReply::Text(emergency_clear()),
            MockReply::server_error(400, "model not found"),
        ]);
        let store = InMemorySessionStore::new();
        let audit = CollectingAuditSink::new();

        let result = run(&client, &store, &audit, URI_TRANSCRIPT, false);
        assert!(matches!(
            result,
            Err(PipelineFailure {
                error: PipelineError::Model(_),
                ..
            })
        ));
        // model-b was never tried
        assert_eq!(client.call_count(), 2);
    }
}
