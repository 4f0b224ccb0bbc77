use thiserror::Error;

use crate::state::TraceStep;

/// Failure raised by a node body (or a collaborator it calls).
///
/// `Transient` failures are eligible for retry by the middleware pipeline;
/// `Fatal` failures are not.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum NodeError {
    #[error("transient failure: {0}")]
    Transient(String),
    #[error("fatal failure: {0}")]
    Fatal(String),
}

impl NodeError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// The only error shapes that reach the engine.
///
/// Node-local failures are absorbed by the retry layer; what surfaces here is
/// either an exhausted retry budget, an exceeded call ceiling, or a fatal
/// condition. The engine converts all of them into the forced-escalate
/// outcome, so none of these messages ever reach the end user verbatim.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("call limit exceeded for node `{node}` (ceiling {ceiling})")]
    CallLimitExceeded { node: String, ceiling: u32 },
    #[error("retries exhausted for node `{node}` after {attempts} attempts: {last_error}")]
    RetriesExhausted { node: String, attempts: u32, last_error: String },
    #[error("fatal failure in node `{node}`: {message}")]
    Fatal { node: String, message: String },
}

impl PipelineError {
    /// Trace marker the engine appends when this error forces escalation.
    pub fn trace_step(&self) -> TraceStep {
        match self {
            Self::CallLimitExceeded { .. } => TraceStep::CallLimitExceeded,
            Self::RetriesExhausted { .. } | Self::Fatal { .. } => TraceStep::NodeFailed,
        }
    }

    /// Generic safe text used as the final response on the forced-escalate
    /// path. Never includes internal detail.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::CallLimitExceeded { .. } => {
                "I'm not able to safely complete that request right now. \
                 Please contact the clinic directly for assistance."
            }
            Self::RetriesExhausted { .. } | Self::Fatal { .. } => {
                "Something went wrong while processing your request. \
                 Please contact the clinic directly."
            }
        }
    }
}
