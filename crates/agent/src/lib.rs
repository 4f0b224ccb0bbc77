//! Orchestration engine for appointment-request triage.
//!
//! A free-text request moves through a fixed node graph: intent
//! classification, a safety gate, a required-information check, intent
//! handling against an appointment collaborator, draft generation, a
//! human-review suspension point, and finalization. Every node executes
//! through the middleware pipeline in [`middleware`], which enforces
//! per-node call budgets, retries transient failures, and logs masked
//! outcomes.
//!
//! [`Engine`] drives a run either to completion or to a [`PendingReview`]
//! suspension; callers apply the human decision with [`Engine::resume`] or
//! wire a [`ReviewChannel`] through [`Engine::run_with`].

pub mod engine;
pub mod middleware;
pub mod nodes;
pub mod review;
pub mod scheduling;

pub use engine::{Engine, IntakeRequest, PendingReview, RunProgress};
pub use middleware::{CallContext, MiddlewarePipeline, Next, NodeBody, Stage, StageError};
pub use review::{AutoApproveChannel, ReviewChannel, ReviewDecision, ReviewError, ScriptedReviewChannel};
pub use scheduling::{
    InMemoryScheduler, Scheduler, SchedulingError, SchedulingOutcome, SchedulingRequest,
};
