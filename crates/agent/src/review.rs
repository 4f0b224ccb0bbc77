use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Human verdict on a draft response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReviewDecision {
    Approve,
    Edit { text: String },
}

#[derive(Debug, Error)]
pub enum ReviewError {
    #[error("review channel failed: {0}")]
    Channel(String),
}

/// Transport that collects a [`ReviewDecision`] for a draft. The CLI binds
/// this to a terminal prompt; tests use the scripted implementations below.
/// Callers that persist suspended runs skip this trait entirely and drive
/// `Engine::resume` themselves.
pub trait ReviewChannel {
    fn review(&self, draft: &str) -> Result<ReviewDecision, ReviewError>;
}

/// Approves every draft unchanged. Used for non-interactive runs.
#[derive(Clone, Copy, Debug, Default)]
pub struct AutoApproveChannel;

impl ReviewChannel for AutoApproveChannel {
    fn review(&self, _draft: &str) -> Result<ReviewDecision, ReviewError> {
        Ok(ReviewDecision::Approve)
    }
}

/// Returns a fixed decision; test double.
#[derive(Clone, Debug)]
pub struct ScriptedReviewChannel {
    decision: ReviewDecision,
}

impl ScriptedReviewChannel {
    pub fn new(decision: ReviewDecision) -> Self {
        Self { decision }
    }
}

impl ReviewChannel for ScriptedReviewChannel {
    fn review(&self, _draft: &str) -> Result<ReviewDecision, ReviewError> {
        Ok(self.decision.clone())
    }
}
