use std::sync::Arc;

use thiserror::Error;

use intake_core::{
    EventOutcome, LimitConfig, LogEvent, LogSink, NodeError, PiiMasker, PipelineError, RunState,
};

/// A node body as seen by the pipeline: consumes the previous state snapshot
/// and produces the next one.
pub type NodeBody<'a> = dyn Fn(RunState) -> Result<RunState, NodeError> + 'a;

/// Per-invocation context shared down the stage chain.
pub struct CallContext {
    pub node: &'static str,
}

/// Internal error channel between stages. Node-level failures travel upward
/// until the retry stage absorbs or promotes them; pipeline-level failures
/// pass through untouched.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StageError {
    #[error(transparent)]
    Node(#[from] NodeError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

/// One cross-cutting stage wrapped around every node invocation. Each stage
/// receives the rest of the chain as `next` and decides how often (and with
/// which state snapshot) to invoke it.
pub trait Stage: Send + Sync {
    fn call(
        &self,
        cx: &CallContext,
        state: RunState,
        next: Next<'_>,
    ) -> Result<RunState, StageError>;
}

/// The remainder of the stage chain, ending in the node body.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    stages: &'a [Box<dyn Stage>],
    body: &'a NodeBody<'a>,
}

impl Next<'_> {
    pub fn run(&self, cx: &CallContext, state: RunState) -> Result<RunState, StageError> {
        match self.stages.split_first() {
            Some((stage, rest)) => stage.call(cx, state, Next { stages: rest, body: self.body }),
            None => (self.body)(state).map_err(StageError::Node),
        }
    }
}

/// Charges one invocation of `node` against the call budget kept in the
/// state record. Fails once the ceiling is exceeded.
fn charge_call(state: &mut RunState, node: &str, ceiling: u32) -> Result<(), StageError> {
    let count = state.call_counts.entry(node.to_owned()).or_insert(0);
    *count += 1;
    if *count > ceiling {
        return Err(StageError::Pipeline(PipelineError::CallLimitExceeded {
            node: node.to_owned(),
            ceiling,
        }));
    }
    Ok(())
}

struct CallLimitStage {
    limits: LimitConfig,
}

impl Stage for CallLimitStage {
    fn call(
        &self,
        cx: &CallContext,
        mut state: RunState,
        next: Next<'_>,
    ) -> Result<RunState, StageError> {
        charge_call(&mut state, cx.node, self.limits.ceiling_for(cx.node))?;
        next.run(cx, state)
    }
}

struct RetryStage {
    max_attempts: u32,
    limits: LimitConfig,
}

impl Stage for RetryStage {
    fn call(
        &self,
        cx: &CallContext,
        state: RunState,
        next: Next<'_>,
    ) -> Result<RunState, StageError> {
        // Each attempt runs on a clone of the entering state, so a failed
        // attempt persists nothing except the call-count bookkeeping below.
        let mut base = state;
        let mut attempts = 1u32;
        loop {
            let last_error = match next.run(cx, base.clone()) {
                Ok(out) => return Ok(out),
                Err(StageError::Node(NodeError::Transient(message))) => message,
                Err(StageError::Node(NodeError::Fatal(message))) => {
                    return Err(StageError::Pipeline(PipelineError::Fatal {
                        node: cx.node.to_owned(),
                        message,
                    }));
                }
                Err(other) => return Err(other),
            };
            attempts += 1;
            if attempts > self.max_attempts {
                return Err(StageError::Pipeline(PipelineError::RetriesExhausted {
                    node: cx.node.to_owned(),
                    attempts: self.max_attempts,
                    last_error,
                }));
            }
            // Every retry charges the call budget again; the ceiling always
            // takes priority over the remaining retry allowance.
            charge_call(&mut base, cx.node, self.limits.ceiling_for(cx.node))?;
        }
    }
}

struct MaskedLogStage {
    masker: PiiMasker,
    sink: Arc<dyn LogSink>,
}

impl Stage for MaskedLogStage {
    fn call(
        &self,
        cx: &CallContext,
        state: RunState,
        next: Next<'_>,
    ) -> Result<RunState, StageError> {
        let run_id = state.run_id;
        let result = next.run(cx, state);
        match &result {
            Ok(out) => {
                let mut event = LogEvent::new(run_id, "node.completed", EventOutcome::Success)
                    .with_node(cx.node)
                    .with_metadata("input", self.masker.mask(&out.user_input));
                if let Some(intent) = out.intent {
                    event = event.with_metadata("intent", intent.as_str());
                }
                if let Some(draft) = &out.draft_response {
                    event = event.with_metadata("draft", self.masker.mask(draft));
                }
                self.sink.emit(event);
            }
            Err(error) => {
                self.sink.emit(
                    LogEvent::new(run_id, "node.failed", EventOutcome::Failed)
                        .with_node(cx.node)
                        .with_metadata("error", self.masker.mask(&error.to_string())),
                );
            }
        }
        result
    }
}

/// The fixed middleware chain wrapped around every node invocation.
///
/// Composition order (outer to inner) is call-limit, retry, masked logging,
/// node body. The limiter therefore guards entry, the retry stage re-charges
/// the budget per attempt, and every logged outcome has been masked.
pub struct MiddlewarePipeline {
    stages: Vec<Box<dyn Stage>>,
}

impl MiddlewarePipeline {
    pub fn new(limits: &LimitConfig, masker: PiiMasker, sink: Arc<dyn LogSink>) -> Self {
        Self {
            stages: vec![
                Box::new(CallLimitStage { limits: limits.clone() }),
                Box::new(RetryStage {
                    max_attempts: limits.retry_max_attempts,
                    limits: limits.clone(),
                }),
                Box::new(MaskedLogStage { masker, sink }),
            ],
        }
    }

    pub fn execute(
        &self,
        node: &'static str,
        state: RunState,
        body: &NodeBody<'_>,
    ) -> Result<RunState, PipelineError> {
        let cx = CallContext { node };
        Next { stages: &self.stages, body }.run(&cx, state).map_err(|error| match error {
            StageError::Pipeline(error) => error,
            // Node errors only escape the chain when the retry stage is
            // absent, which never happens with the fixed stage list above.
            StageError::Node(NodeError::Transient(message)) => PipelineError::RetriesExhausted {
                node: node.to_owned(),
                attempts: 1,
                last_error: message,
            },
            StageError::Node(NodeError::Fatal(message)) => {
                PipelineError::Fatal { node: node.to_owned(), message }
            }
        })
    }
}
