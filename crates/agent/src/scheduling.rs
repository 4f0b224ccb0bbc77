use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU32, Ordering};

use thiserror::Error;

use intake_core::{Intent, NodeError};

/// Request handed to the appointment collaborator by the intent handler.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SchedulingRequest<'a> {
    pub intent: Intent,
    pub appointment_id: Option<&'a str>,
    pub requested_slot: Option<&'a str>,
}

/// Outcome facts the collaborator reports back for draft generation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SchedulingOutcome {
    Rescheduled { slot: Option<String> },
    SlotUnavailable { requested: String, alternative: String },
    CancelRecorded,
    PrepReady,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SchedulingError {
    #[error("scheduling backend unavailable: {0}")]
    Unavailable(String),
    #[error("appointment `{0}` was not found")]
    UnknownAppointment(String),
    #[error("unsupported request: {0}")]
    Unsupported(String),
}

impl SchedulingError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

impl From<SchedulingError> for NodeError {
    fn from(error: SchedulingError) -> Self {
        if error.is_transient() {
            NodeError::Transient(error.to_string())
        } else {
            NodeError::Fatal(error.to_string())
        }
    }
}

/// Appointment collaborator contract. Only the input/output shape matters to
/// the engine; failures must carry a transient/fatal classification.
pub trait Scheduler: Send + Sync {
    fn handle(&self, request: SchedulingRequest<'_>) -> Result<SchedulingOutcome, SchedulingError>;
}

/// Deterministic in-memory collaborator used by the CLI and tests.
///
/// Availability rule: a small fixed set of slots is booked out; requesting
/// one of them yields the fixed alternative instead of a booking.
#[derive(Debug)]
pub struct InMemoryScheduler {
    unavailable_slots: BTreeSet<String>,
    alternative_slot: String,
    handled: AtomicU32,
}

impl Default for InMemoryScheduler {
    fn default() -> Self {
        Self {
            unavailable_slots: ["2pm", "2:00pm", "14:00"].into_iter().map(str::to_owned).collect(),
            alternative_slot: "3:00pm".to_owned(),
            handled: AtomicU32::new(0),
        }
    }
}

impl InMemoryScheduler {
    /// Number of requests handled; used by tests asserting invocation counts.
    pub fn handled_count(&self) -> u32 {
        self.handled.load(Ordering::Relaxed)
    }

    fn slot_is_open(&self, slot: &str) -> bool {
        let normalized: String = slot.to_lowercase().split_whitespace().collect();
        !self.unavailable_slots.contains(&normalized)
    }
}

impl Scheduler for InMemoryScheduler {
    fn handle(&self, request: SchedulingRequest<'_>) -> Result<SchedulingOutcome, SchedulingError> {
        self.handled.fetch_add(1, Ordering::Relaxed);
        match request.intent {
            Intent::Reschedule => match request.requested_slot {
                Some(slot) if !self.slot_is_open(slot) => Ok(SchedulingOutcome::SlotUnavailable {
                    requested: slot.to_owned(),
                    alternative: self.alternative_slot.clone(),
                }),
                slot => Ok(SchedulingOutcome::Rescheduled { slot: slot.map(str::to_owned) }),
            },
            Intent::Cancel => Ok(SchedulingOutcome::CancelRecorded),
            Intent::PrepInfo => Ok(SchedulingOutcome::PrepReady),
            Intent::Unknown => {
                Err(SchedulingError::Unsupported("cannot handle an unclassified request".into()))
            }
        }
    }
}
