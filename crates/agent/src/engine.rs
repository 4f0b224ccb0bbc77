use std::sync::Arc;

use serde::{Deserialize, Serialize};

use intake_core::{
    ConfigError, EventOutcome, IntakeConfig, LogEvent, LogSink, PiiMasker, PipelineError, RunId,
    RunResult, RunState, TerminalStatus, TraceStep,
};

use crate::middleware::{MiddlewarePipeline, NodeBody};
use crate::nodes::{
    self, NODE_CLASSIFY_INTENT, NODE_DRAFT, NODE_FINALIZE, NODE_HANDLE_INTENT, NODE_HITL,
    NODE_INFO_CHECK, NODE_SAFETY_CHECK,
};
use crate::review::{ReviewChannel, ReviewDecision};
use crate::scheduling::Scheduler;

const FALLBACK_RESPONSE: &str = "Something went wrong while processing your request. \
     Please contact the clinic directly.";

/// A new triage request entering the graph.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntakeRequest {
    pub user_input: String,
    pub appointment_id: Option<String>,
}

impl IntakeRequest {
    pub fn new(user_input: impl Into<String>) -> Self {
        Self { user_input: user_input.into(), appointment_id: None }
    }

    pub fn with_appointment_id(mut self, appointment_id: impl Into<String>) -> Self {
        self.appointment_id = Some(appointment_id.into());
        self
    }
}

/// A run parked at the human-review suspension point.
///
/// Serializable so callers can persist a suspended run and resume it after a
/// process restart. `Engine::resume` consumes the value, so a pending
/// decision can be applied at most once; dropping the value abandons the run
/// and nothing can resume it afterwards.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PendingReview {
    state: RunState,
}

impl PendingReview {
    pub fn run_id(&self) -> RunId {
        self.state.run_id
    }

    /// The draft awaiting review. Present by construction: a run only
    /// suspends after the draft node has produced one.
    pub fn draft(&self) -> &str {
        self.state.draft_response.as_deref().unwrap_or_default()
    }
}

/// Result of driving a run as far as it can go without a human decision.
#[derive(Clone, Debug, PartialEq)]
pub enum RunProgress {
    Completed(RunResult),
    AwaitingReview(PendingReview),
}

/// The router/graph engine: holds the fixed node graph and drives a run from
/// start to a terminal status, executing every node through the middleware
/// pipeline and appending exactly one trace entry per executed node.
pub struct Engine {
    config: IntakeConfig,
    pipeline: MiddlewarePipeline,
    masker: PiiMasker,
    scheduler: Arc<dyn Scheduler>,
    sink: Arc<dyn LogSink>,
}

impl Engine {
    pub fn new(
        config: IntakeConfig,
        scheduler: Arc<dyn Scheduler>,
        sink: Arc<dyn LogSink>,
    ) -> Result<Self, ConfigError> {
        let masker = config
            .masking
            .build_masker()
            .map_err(|error| ConfigError::Validation(error.to_string()))?;
        let pipeline = MiddlewarePipeline::new(&config.limits, masker.clone(), Arc::clone(&sink));
        Ok(Self { config, pipeline, masker, scheduler, sink })
    }

    pub fn masker(&self) -> &PiiMasker {
        &self.masker
    }

    /// Drives a fresh run until it completes or suspends for review.
    pub fn start(&self, request: IntakeRequest) -> RunProgress {
        let mut state = RunState::new(request.user_input);
        if let Some(appointment_id) = request.appointment_id {
            state = state.with_appointment_id(appointment_id);
        }
        self.sink.emit(
            LogEvent::new(state.run_id, "run.started", EventOutcome::Success)
                .with_metadata("input", self.masker.mask(&state.user_input)),
        );

        match self.advance_to_review(state) {
            Ok(progress) => progress,
            Err((state, error)) => RunProgress::Completed(self.force_escalate(state, error)),
        }
    }

    /// Applies the human decision to a suspended run and finalizes it.
    /// Consumes the pending review; see [`PendingReview`].
    pub fn resume(&self, pending: PendingReview, decision: ReviewDecision) -> RunResult {
        let PendingReview { state } = pending;
        let step = match &decision {
            ReviewDecision::Approve => TraceStep::HitlApprove,
            ReviewDecision::Edit { .. } => TraceStep::HitlEdit,
        };
        let body = nodes::apply_decision(&decision);
        let mut state = match self.step(NODE_HITL, state, &body) {
            Ok(state) => state,
            Err((state, error)) => return self.force_escalate(state, error),
        };
        state.record_step(step);
        match self.finish(state) {
            Ok(result) => result,
            Err((state, error)) => self.force_escalate(state, error),
        }
    }

    /// Convenience for synchronous transports: start, collect the decision
    /// from the channel, resume. A channel failure is fail-safe escalated.
    pub fn run_with(&self, request: IntakeRequest, channel: &dyn ReviewChannel) -> RunResult {
        match self.start(request) {
            RunProgress::Completed(result) => result,
            RunProgress::AwaitingReview(pending) => match channel.review(pending.draft()) {
                Ok(decision) => self.resume(pending, decision),
                Err(error) => {
                    let PendingReview { state } = pending;
                    self.force_escalate(
                        state,
                        PipelineError::Fatal {
                            node: NODE_HITL.to_owned(),
                            message: error.to_string(),
                        },
                    )
                }
            },
        }
    }

    fn advance_to_review(
        &self,
        state: RunState,
    ) -> Result<RunProgress, (RunState, PipelineError)> {
        let mut state = self.step(NODE_CLASSIFY_INTENT, state, &nodes::classify_intent)?;
        state.record_step(TraceStep::ClassifyIntent);

        let safety = nodes::safety_check(&self.config.safety);
        let mut state = self.step(NODE_SAFETY_CHECK, state, &safety)?;
        if state.risk_flag {
            state.record_step(TraceStep::SafetyEscalate);
            return self.finish(state).map(RunProgress::Completed);
        }
        state.record_step(TraceStep::SafetyOk);

        let info = nodes::info_check(&self.config.intents);
        let mut state = self.step(NODE_INFO_CHECK, state, &info)?;
        if !state.missing_info.is_empty() {
            state.record_step(TraceStep::NeedInfo);
            return self.finish(state).map(RunProgress::Completed);
        }
        state.record_step(TraceStep::InfoComplete);

        let handle = nodes::handle_intent(self.scheduler.as_ref());
        let mut state = self.step(NODE_HANDLE_INTENT, state, &handle)?;
        state.record_step(TraceStep::HandleIntent);

        let mut state = self.step(NODE_DRAFT, state, &nodes::draft)?;
        state.record_step(TraceStep::DraftGenerated);

        state.record_step(TraceStep::AwaitingReview);
        self.sink.emit(
            LogEvent::new(state.run_id, "run.suspended", EventOutcome::Success)
                .with_metadata("draft", self.masker.mask(draft_text(&state))),
        );
        Ok(RunProgress::AwaitingReview(PendingReview { state }))
    }

    /// Executes one node through the middleware pipeline. On failure the
    /// pre-node state is handed back so the fail-safe path still has the
    /// run's identity and trace.
    fn step(
        &self,
        node: &'static str,
        state: RunState,
        body: &NodeBody<'_>,
    ) -> Result<RunState, (RunState, PipelineError)> {
        let snapshot = state.clone();
        self.pipeline.execute(node, state, body).map_err(|error| (snapshot, error))
    }

    fn finish(&self, state: RunState) -> Result<RunResult, (RunState, PipelineError)> {
        let mut state = self.step(NODE_FINALIZE, state, &nodes::finalize)?;
        state.record_step(TraceStep::Finalize);
        let result = into_result(state);
        let outcome = match result.terminal_status {
            TerminalStatus::Ready => EventOutcome::Success,
            TerminalStatus::NeedInfo | TerminalStatus::Escalate => EventOutcome::ShortCircuit,
        };
        self.sink.emit(
            LogEvent::new(result.run_id, "run.completed", outcome)
                .with_metadata("terminal_status", result.terminal_status.as_str())
                .with_metadata("route_trace", result.trace_line()),
        );
        Ok(result)
    }

    /// Failure policy: any error surfacing from the pipeline terminates the
    /// run as an escalation with a generic safe message, so a run can never
    /// end without a terminal status.
    fn force_escalate(&self, mut state: RunState, error: PipelineError) -> RunResult {
        state.record_step(error.trace_step());
        state.mark_terminal(TerminalStatus::Escalate);
        state.final_response = Some(error.user_message().to_owned());
        let result = into_result(state);
        self.sink.emit(
            LogEvent::new(result.run_id, "run.failed", EventOutcome::Failed)
                .with_metadata("error", self.masker.mask(&error.to_string()))
                .with_metadata("route_trace", result.trace_line()),
        );
        result
    }
}

fn draft_text(state: &RunState) -> &str {
    state.draft_response.as_deref().unwrap_or_default()
}

fn into_result(state: RunState) -> RunResult {
    RunResult {
        run_id: state.run_id,
        terminal_status: state.terminal_status.unwrap_or(TerminalStatus::Escalate),
        route_trace: state.route_trace,
        final_response: state.final_response.unwrap_or_else(|| FALLBACK_RESPONSE.to_owned()),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{Engine, IntakeRequest, RunProgress};
    use crate::review::ReviewDecision;
    use crate::scheduling::InMemoryScheduler;
    use intake_core::{InMemoryLogSink, IntakeConfig, TerminalStatus, TraceStep};

    fn engine(sink: &InMemoryLogSink) -> Engine {
        Engine::new(
            IntakeConfig::default(),
            Arc::new(InMemoryScheduler::default()),
            Arc::new(sink.clone()),
        )
        .expect("default config builds")
    }

    #[test]
    fn suspended_run_resumes_with_approval() {
        let sink = InMemoryLogSink::default();
        let engine = engine(&sink);

        let pending = match engine.start(IntakeRequest::new("Cancel appointment ID 1234")) {
            RunProgress::AwaitingReview(pending) => pending,
            RunProgress::Completed(result) => panic!("expected suspension, got {result:?}"),
        };
        let draft = pending.draft().to_owned();

        let result = engine.resume(pending, ReviewDecision::Approve);

        assert_eq!(result.terminal_status, TerminalStatus::Ready);
        assert_eq!(result.final_response, draft);
        assert_eq!(result.route_trace.last(), Some(&TraceStep::Finalize));
        assert!(result.route_trace.contains(&TraceStep::HitlApprove));
    }

    #[test]
    fn edits_replace_the_draft() {
        let sink = InMemoryLogSink::default();
        let engine = engine(&sink);

        let pending = match engine.start(IntakeRequest::new("Cancel appointment ID 1234")) {
            RunProgress::AwaitingReview(pending) => pending,
            RunProgress::Completed(result) => panic!("expected suspension, got {result:?}"),
        };

        let result = engine
            .resume(pending, ReviewDecision::Edit { text: "Cancellation confirmed.".to_owned() });

        assert_eq!(result.final_response, "Cancellation confirmed.");
        assert!(result.route_trace.contains(&TraceStep::HitlEdit));
    }

    #[test]
    fn abandoned_suspension_leaves_no_completed_run() {
        let sink = InMemoryLogSink::default();
        let engine = engine(&sink);

        let progress = engine.start(IntakeRequest::new("Cancel appointment ID 1234"));
        assert!(matches!(progress, RunProgress::AwaitingReview(_)));
        drop(progress);

        let events = sink.events();
        assert!(events.iter().any(|event| event.event_type == "run.suspended"));
        assert!(!events.iter().any(|event| event.event_type == "run.completed"));
    }

    #[test]
    fn pending_review_round_trips_through_serde() {
        let sink = InMemoryLogSink::default();
        let engine = engine(&sink);

        let pending = match engine.start(IntakeRequest::new("Cancel appointment ID 1234")) {
            RunProgress::AwaitingReview(pending) => pending,
            RunProgress::Completed(result) => panic!("expected suspension, got {result:?}"),
        };

        let serialized = serde_json::to_string(&pending).expect("serializes");
        let restored: super::PendingReview =
            serde_json::from_str(&serialized).expect("deserializes");
        assert_eq!(restored, pending);

        let result = engine.resume(restored, ReviewDecision::Approve);
        assert_eq!(result.terminal_status, TerminalStatus::Ready);
    }

    #[test]
    fn caller_supplied_appointment_id_satisfies_info_check() {
        let sink = InMemoryLogSink::default();
        let engine = engine(&sink);

        let progress = engine
            .start(IntakeRequest::new("Cancel my appointment").with_appointment_id("AB-42"));

        assert!(matches!(progress, RunProgress::AwaitingReview(_)));
    }
}
