use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifies a single triage run.
///
/// Generated fresh when the run state is created; propagated through log
/// events and the final [`RunResult`] so all activity from one request can be
/// correlated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(Uuid);

impl RunId {
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(self) -> Uuid {
        self.0
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Intent {
    Reschedule,
    Cancel,
    PrepInfo,
    Unknown,
}

impl Intent {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Reschedule => "RESCHEDULE",
            Self::Cancel => "CANCEL",
            Self::PrepInfo => "PREP_INFO",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed set of final run outcomes. Once one is set the engine schedules no
/// further nodes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TerminalStatus {
    Ready,
    NeedInfo,
    Escalate,
}

impl TerminalStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ready => "READY",
            Self::NeedInfo => "NEED_INFO",
            Self::Escalate => "ESCALATE",
        }
    }
}

impl std::fmt::Display for TerminalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry in the append-only route trace.
///
/// Names are stable so traces can be compared for direct equality in tests
/// and rendered verbatim in run summaries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceStep {
    ClassifyIntent,
    SafetyOk,
    SafetyEscalate,
    InfoComplete,
    NeedInfo,
    HandleIntent,
    DraftGenerated,
    AwaitingReview,
    HitlApprove,
    HitlEdit,
    Finalize,
    CallLimitExceeded,
    NodeFailed,
}

impl TraceStep {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ClassifyIntent => "classify_intent",
            Self::SafetyOk => "safety_ok",
            Self::SafetyEscalate => "safety_escalate",
            Self::InfoComplete => "info_complete",
            Self::NeedInfo => "need_info",
            Self::HandleIntent => "handle_intent",
            Self::DraftGenerated => "draft_generated",
            Self::AwaitingReview => "awaiting_review",
            Self::HitlApprove => "hitl_approve",
            Self::HitlEdit => "hitl_edit",
            Self::Finalize => "finalize",
            Self::CallLimitExceeded => "call_limit_exceeded",
            Self::NodeFailed => "node_failed",
        }
    }
}

impl std::fmt::Display for TraceStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Preparation topic recognised in a prep-info request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrepTopic {
    Mri,
    CtScan,
    Ultrasound,
    General,
}

/// Outcome facts recorded by the intent handler and consumed by the draft
/// node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HandledAction {
    RescheduleBooked { slot: Option<String> },
    RescheduleUnavailable { requested: String, alternative: String },
    CancelRecorded,
    PrepInstructions { topic: PrepTopic },
}

/// The single mutable state record threaded through a run.
///
/// Created with only `run_id` and `user_input` populated (plus an optional
/// caller-supplied appointment id); mutated strictly by the active node at
/// each step; discarded once the terminal [`RunResult`] has been produced.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub run_id: RunId,
    pub user_input: String,
    pub intent: Option<Intent>,
    pub risk_flag: bool,
    pub missing_info: Vec<String>,
    pub appointment_id: Option<String>,
    pub handled: Option<HandledAction>,
    pub draft_response: Option<String>,
    pub final_response: Option<String>,
    pub terminal_status: Option<TerminalStatus>,
    pub route_trace: Vec<TraceStep>,
    pub call_counts: BTreeMap<String, u32>,
}

impl RunState {
    pub fn new(user_input: impl Into<String>) -> Self {
        Self {
            run_id: RunId::new_random(),
            user_input: user_input.into(),
            intent: None,
            risk_flag: false,
            missing_info: Vec::new(),
            appointment_id: None,
            handled: None,
            draft_response: None,
            final_response: None,
            terminal_status: None,
            route_trace: Vec::new(),
            call_counts: BTreeMap::new(),
        }
    }

    pub fn with_appointment_id(mut self, appointment_id: impl Into<String>) -> Self {
        self.appointment_id = Some(appointment_id.into());
        self
    }

    /// Appends a step to the route trace. The trace is append-only; nothing
    /// ever removes or reorders entries.
    pub fn record_step(&mut self, step: TraceStep) {
        self.route_trace.push(step);
    }

    /// Sets the terminal status if none is set yet. The first status wins;
    /// later attempts are ignored so a run can never change its outcome.
    pub fn mark_terminal(&mut self, status: TerminalStatus) {
        self.terminal_status.get_or_insert(status);
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal_status.is_some()
    }
}

/// Caller-facing summary of a finished run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: RunId,
    pub terminal_status: TerminalStatus,
    pub route_trace: Vec<TraceStep>,
    pub final_response: String,
}

impl RunResult {
    /// Renders the route trace as `step -> step -> step`.
    pub fn trace_line(&self) -> String {
        self.route_trace.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(" -> ")
    }
}
