//! End-to-end runs through the triage graph with in-memory collaborators.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use intake_agent::{
    AutoApproveChannel, Engine, InMemoryScheduler, IntakeRequest, ReviewDecision, RunProgress,
    Scheduler, ScriptedReviewChannel, SchedulingError, SchedulingOutcome, SchedulingRequest,
};
use intake_core::{InMemoryLogSink, IntakeConfig, TerminalStatus, TraceStep};

fn default_engine(sink: &InMemoryLogSink) -> Engine {
    engine_with(IntakeConfig::default(), Arc::new(InMemoryScheduler::default()), sink)
}

fn engine_with(
    config: IntakeConfig,
    scheduler: Arc<dyn Scheduler>,
    sink: &InMemoryLogSink,
) -> Engine {
    Engine::new(config, scheduler, Arc::new(sink.clone())).expect("config builds")
}

/// Fails the first `failures` requests with a transient error, then delegates
/// to the in-memory scheduler.
struct FlakyScheduler {
    failures: AtomicU32,
    inner: InMemoryScheduler,
}

impl FlakyScheduler {
    fn new(failures: u32) -> Self {
        Self { failures: AtomicU32::new(failures), inner: InMemoryScheduler::default() }
    }
}

impl Scheduler for FlakyScheduler {
    fn handle(
        &self,
        request: SchedulingRequest<'_>,
    ) -> Result<SchedulingOutcome, SchedulingError> {
        if self.failures.load(Ordering::SeqCst) > 0 {
            self.failures.fetch_sub(1, Ordering::SeqCst);
            return Err(SchedulingError::Unavailable("backend timeout".into()));
        }
        self.inner.handle(request)
    }
}

#[test]
fn reschedule_with_booked_slot_offers_alternative() {
    let sink = InMemoryLogSink::default();
    let engine = default_engine(&sink);

    let result = engine.run_with(
        IntakeRequest::new("I need to reschedule my appointment ID 1234 to 2pm tomorrow"),
        &AutoApproveChannel,
    );

    assert_eq!(result.terminal_status, TerminalStatus::Ready);
    assert!(result.final_response.contains("2pm"));
    assert!(result.final_response.contains("3:00pm"));
    assert_eq!(
        result.route_trace,
        vec![
            TraceStep::ClassifyIntent,
            TraceStep::SafetyOk,
            TraceStep::InfoComplete,
            TraceStep::HandleIntent,
            TraceStep::DraftGenerated,
            TraceStep::AwaitingReview,
            TraceStep::HitlApprove,
            TraceStep::Finalize,
        ]
    );
}

#[test]
fn missing_appointment_id_short_circuits_to_need_info() {
    let sink = InMemoryLogSink::default();
    let engine = default_engine(&sink);

    let result =
        engine.run_with(IntakeRequest::new("I need to cancel my appointment"), &AutoApproveChannel);

    assert_eq!(result.terminal_status, TerminalStatus::NeedInfo);
    assert!(result.final_response.contains("appointment ID"));
    assert_eq!(
        result.route_trace,
        vec![
            TraceStep::ClassifyIntent,
            TraceStep::SafetyOk,
            TraceStep::NeedInfo,
            TraceStep::Finalize,
        ]
    );
    for excluded in [
        TraceStep::HandleIntent,
        TraceStep::DraftGenerated,
        TraceStep::AwaitingReview,
        TraceStep::HitlApprove,
    ] {
        assert!(!result.route_trace.contains(&excluded), "unexpected step {excluded:?}");
    }
}

#[test]
fn risk_keywords_short_circuit_to_escalate() {
    let sink = InMemoryLogSink::default();
    let engine = default_engine(&sink);

    let result = engine.run_with(
        IntakeRequest::new("I have severe chest pain, can I move my appointment?"),
        &AutoApproveChannel,
    );

    assert_eq!(result.terminal_status, TerminalStatus::Escalate);
    assert!(result.final_response.contains("emergency services"));
    assert_eq!(
        result.route_trace,
        vec![TraceStep::ClassifyIntent, TraceStep::SafetyEscalate, TraceStep::Finalize]
    );
    assert!(!result.route_trace.contains(&TraceStep::InfoComplete));
    assert!(!result.route_trace.contains(&TraceStep::NeedInfo));
    assert!(!result.route_trace.contains(&TraceStep::DraftGenerated));
}

#[test]
fn prep_request_drafts_instructions_without_an_appointment_id() {
    let sink = InMemoryLogSink::default();
    let engine = default_engine(&sink);

    let result = engine.run_with(
        IntakeRequest::new("How should I prepare for my MRI scan next week?"),
        &AutoApproveChannel,
    );

    assert_eq!(result.terminal_status, TerminalStatus::Ready);
    assert!(result.final_response.to_lowercase().contains("mri"));
    assert!(result.route_trace.contains(&TraceStep::DraftGenerated));
}

#[test]
fn unknown_request_asks_for_details() {
    let sink = InMemoryLogSink::default();
    let engine = default_engine(&sink);

    let result =
        engine.run_with(IntakeRequest::new("hello, are you open on sundays?"), &AutoApproveChannel);

    assert_eq!(result.terminal_status, TerminalStatus::NeedInfo);
    assert!(result.route_trace.contains(&TraceStep::NeedInfo));
}

#[test]
fn edited_draft_becomes_the_final_response() {
    let sink = InMemoryLogSink::default();
    let engine = default_engine(&sink);
    let channel =
        ScriptedReviewChannel::new(ReviewDecision::Edit { text: "See you at 3:00pm.".to_owned() });

    let result =
        engine.run_with(IntakeRequest::new("Cancel appointment ID 1234 please"), &channel);

    assert_eq!(result.terminal_status, TerminalStatus::Ready);
    assert_eq!(result.final_response, "See you at 3:00pm.");
    assert!(result.route_trace.contains(&TraceStep::HitlEdit));
    assert!(!result.route_trace.contains(&TraceStep::HitlApprove));
}

#[test]
fn transient_scheduler_failures_recover_within_the_retry_budget() {
    let sink = InMemoryLogSink::default();
    let scheduler = Arc::new(FlakyScheduler::new(2));
    let engine = engine_with(IntakeConfig::default(), scheduler, &sink);

    let result = engine.run_with(
        IntakeRequest::new("Cancel appointment ID 1234 please"),
        &AutoApproveChannel,
    );

    assert_eq!(result.terminal_status, TerminalStatus::Ready);
    assert!(result.route_trace.contains(&TraceStep::HandleIntent));
}

#[test]
fn exhausted_retries_escalate_with_a_safe_message() {
    let sink = InMemoryLogSink::default();
    let scheduler = Arc::new(FlakyScheduler::new(u32::MAX));
    let engine = engine_with(IntakeConfig::default(), scheduler, &sink);

    let result = engine.run_with(
        IntakeRequest::new("Cancel appointment ID 1234 please"),
        &AutoApproveChannel,
    );

    assert_eq!(result.terminal_status, TerminalStatus::Escalate);
    assert_eq!(result.route_trace.last(), Some(&TraceStep::NodeFailed));
    assert!(result.final_response.contains("contact the clinic"));
    assert!(!result.final_response.contains("backend timeout"));
}

#[test]
fn call_ceiling_cuts_off_retries_and_escalates() {
    let sink = InMemoryLogSink::default();
    let mut config = IntakeConfig::default();
    config.limits.default_call_ceiling = 1;
    let scheduler = Arc::new(FlakyScheduler::new(u32::MAX));
    let engine = engine_with(config, scheduler, &sink);

    let result = engine.run_with(
        IntakeRequest::new("Cancel appointment ID 1234 please"),
        &AutoApproveChannel,
    );

    assert_eq!(result.terminal_status, TerminalStatus::Escalate);
    assert_eq!(result.route_trace.last(), Some(&TraceStep::CallLimitExceeded));
}

#[test]
fn every_run_ends_in_a_closed_terminal_set() {
    let sink = InMemoryLogSink::default();
    let engine = default_engine(&sink);
    let inputs = [
        "Reschedule appointment ID 1234 to 10am",
        "I want to reschedule",
        "chest pain right now",
        "how do I prepare for a CT scan",
        "gibberish input with no meaning",
    ];

    for input in inputs {
        let result = engine.run_with(IntakeRequest::new(input), &AutoApproveChannel);
        assert!(matches!(
            result.terminal_status,
            TerminalStatus::Ready | TerminalStatus::NeedInfo | TerminalStatus::Escalate
        ));
        assert!(!result.final_response.is_empty(), "empty response for {input:?}");
        assert!(!result.route_trace.is_empty(), "empty trace for {input:?}");
    }
}

#[test]
fn logged_events_never_leak_identifiers() {
    let sink = InMemoryLogSink::default();
    let engine = default_engine(&sink);

    let result = engine.run_with(
        IntakeRequest::new("Cancel appointment ID 1234, confirmation to sam@example.com"),
        &AutoApproveChannel,
    );
    assert_eq!(result.terminal_status, TerminalStatus::Ready);

    let events = sink.events();
    assert!(!events.is_empty());
    for event in &events {
        for (key, value) in &event.metadata {
            assert!(!value.contains("1234"), "unmasked id in `{key}`: {value}");
            assert!(!value.contains("sam@example.com"), "unmasked email in `{key}`: {value}");
        }
    }
}

#[test]
fn suspended_run_survives_serialization_before_resume() {
    let sink = InMemoryLogSink::default();
    let engine = default_engine(&sink);

    let pending = match engine.start(IntakeRequest::new("Cancel appointment ID 1234")) {
        RunProgress::AwaitingReview(pending) => pending,
        RunProgress::Completed(result) => panic!("expected suspension, got {result:?}"),
    };

    let stored = serde_json::to_vec(&pending).expect("pending review serializes");
    let restored: intake_agent::PendingReview =
        serde_json::from_slice(&stored).expect("pending review deserializes");

    let result = engine.resume(restored, ReviewDecision::Approve);
    assert_eq!(result.terminal_status, TerminalStatus::Ready);
    assert_eq!(result.route_trace.last(), Some(&TraceStep::Finalize));
}
