use once_cell::sync::Lazy;
use regex::Regex;

use intake_core::{
    HandledAction, Intent, IntentRules, NodeError, PrepTopic, RunState, SafetyConfig,
};

use crate::review::ReviewDecision;
use crate::scheduling::{Scheduler, SchedulingOutcome, SchedulingRequest};

pub const NODE_CLASSIFY_INTENT: &str = "classify_intent";
pub const NODE_SAFETY_CHECK: &str = "safety_check";
pub const NODE_INFO_CHECK: &str = "info_check";
pub const NODE_HANDLE_INTENT: &str = "handle_intent";
pub const NODE_DRAFT: &str = "draft";
pub const NODE_HITL: &str = "hitl";
pub const NODE_FINALIZE: &str = "finalize";

const RESCHEDULE_KEYWORDS: &[&str] = &["reschedule", "move my appointment", "change my appointment"];
const CANCEL_KEYWORDS: &[&str] = &["cancel", "call off"];
const PREP_KEYWORDS: &[&str] = &["prep", "prepare", "preparation", "instructions"];

static APPOINTMENT_ID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:appointment|appt)\s*(?:id)?\s*[:#]?\s*([A-Za-z0-9\-]{3,})\b")
        .expect("appointment id pattern compiles")
});
static APPOINTMENT_WORD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:appointment|appt)\b").expect("appointment pattern compiles"));
static DIGIT_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{3,})\b").expect("digit id pattern compiles"));
static TIME_AMPM_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(\d{1,2})\s*(:\s*\d{2})?\s*(am|pm)\b").expect("am/pm time pattern compiles")
});
static TIME_24H_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b([01]?\d|2[0-3]):[0-5]\d\b").expect("24h time pattern compiles"));

/// Pulls an appointment identifier out of free text: an explicit
/// `appointment id 1234` style token, or a bare digit run when the text
/// mentions an appointment at all.
pub fn extract_appointment_id(text: &str) -> Option<String> {
    if let Some(captures) = APPOINTMENT_ID_RE.captures(text) {
        return captures.get(1).map(|m| m.as_str().to_owned());
    }
    if APPOINTMENT_WORD_RE.is_match(text) {
        if let Some(captures) = DIGIT_ID_RE.captures(text) {
            return captures.get(1).map(|m| m.as_str().to_owned());
        }
    }
    None
}

/// Lightweight requested-time extraction: `2pm`, `2:30 pm`, `14:00`.
pub fn extract_requested_timeslot(text: &str) -> Option<String> {
    let lowered = text.to_lowercase();
    if let Some(captures) = TIME_AMPM_RE.captures(&lowered) {
        let hour = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
        let minutes =
            captures.get(2).map(|m| m.as_str().replace(char::is_whitespace, "")).unwrap_or_default();
        let meridiem = captures.get(3).map(|m| m.as_str()).unwrap_or_default();
        return Some(format!("{hour}{minutes}{meridiem}"));
    }
    TIME_24H_RE.find(&lowered).map(|m| m.as_str().to_owned())
}

fn contains_any(text: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|keyword| text.contains(keyword))
}

/// Maps the request text to an intent via keyword rules. Unmatched text is
/// `Unknown`, which the info check downstream treats as missing information.
pub fn classify_intent(mut state: RunState) -> Result<RunState, NodeError> {
    if state.intent.is_some() {
        return Ok(state);
    }
    let text = state.user_input.to_lowercase();
    let intent = if contains_any(&text, RESCHEDULE_KEYWORDS) {
        Intent::Reschedule
    } else if contains_any(&text, CANCEL_KEYWORDS) {
        Intent::Cancel
    } else if contains_any(&text, PREP_KEYWORDS) {
        Intent::PrepInfo
    } else {
        Intent::Unknown
    };
    state.intent = Some(intent);
    Ok(state)
}

/// Scans the request against the configured risk keywords. A hit sets the
/// risk flag and stages the emergency-safe message the escalation path will
/// release as the final response.
pub fn safety_check(config: &SafetyConfig) -> impl Fn(RunState) -> Result<RunState, NodeError> + '_ {
    move |mut state: RunState| {
        let text = state.user_input.to_lowercase();
        if config.risk_keywords.iter().any(|keyword| text.contains(keyword.as_str())) {
            state.risk_flag = true;
            if state.final_response.is_none() {
                state.final_response = Some(config.escalation_message.clone());
            }
        } else {
            state.risk_flag = false;
        }
        Ok(state)
    }
}

/// Computes the required-field set for the classified intent and records
/// which fields the request is still missing. A non-empty result stages the
/// intent-specific clarification message.
pub fn info_check(rules: &IntentRules) -> impl Fn(RunState) -> Result<RunState, NodeError> + '_ {
    move |mut state: RunState| {
        let intent = state.intent.unwrap_or(Intent::Unknown);
        let mut missing = Vec::new();
        for field in rules.required_for(intent) {
            let satisfied = match field.as_str() {
                "appointment_id" => {
                    if state.appointment_id.is_none() {
                        state.appointment_id = extract_appointment_id(&state.user_input);
                    }
                    state.appointment_id.is_some()
                }
                // Present exactly when classification produced a real intent.
                "request_details" => intent != Intent::Unknown,
                _ => false,
            };
            if !satisfied {
                missing.push(field.clone());
            }
        }
        state.missing_info = missing;
        if !state.missing_info.is_empty() && state.final_response.is_none() {
            state.final_response = Some(need_info_message(intent).to_owned());
        }
        Ok(state)
    }
}

fn need_info_message(intent: Intent) -> &'static str {
    match intent {
        Intent::Reschedule => {
            "I can help reschedule. Please provide your appointment ID \
             (or confirmation number) and your preferred new date/time window."
        }
        Intent::Cancel => {
            "I can help cancel. Please provide your appointment ID \
             (or confirmation number)."
        }
        Intent::PrepInfo | Intent::Unknown => {
            "I can assist with rescheduling, cancellation, or preparation \
             instructions. Please provide more details so I can assist."
        }
    }
}

/// Executes the domain action for the classified intent against the
/// appointment collaborator and records the outcome facts for the draft node.
pub fn handle_intent(
    scheduler: &dyn Scheduler,
) -> impl Fn(RunState) -> Result<RunState, NodeError> + '_ {
    move |mut state: RunState| {
        let intent = state
            .intent
            .ok_or_else(|| NodeError::Fatal("handle_intent requires a classified intent".into()))?;
        let requested_slot = extract_requested_timeslot(&state.user_input);
        let outcome = scheduler.handle(SchedulingRequest {
            intent,
            appointment_id: state.appointment_id.as_deref(),
            requested_slot: requested_slot.as_deref(),
        })?;
        state.handled = Some(match outcome {
            SchedulingOutcome::Rescheduled { slot } => HandledAction::RescheduleBooked { slot },
            SchedulingOutcome::SlotUnavailable { requested, alternative } => {
                HandledAction::RescheduleUnavailable { requested, alternative }
            }
            SchedulingOutcome::CancelRecorded => HandledAction::CancelRecorded,
            SchedulingOutcome::PrepReady => {
                HandledAction::PrepInstructions { topic: prep_topic(&state.user_input) }
            }
        });
        Ok(state)
    }
}

fn prep_topic(text: &str) -> PrepTopic {
    let lowered = text.to_lowercase();
    if lowered.contains("mri") {
        PrepTopic::Mri
    } else if lowered.contains("ct") || lowered.contains("cat scan") {
        PrepTopic::CtScan
    } else if lowered.contains("ultrasound") || lowered.contains("sonogram") {
        PrepTopic::Ultrasound
    } else {
        PrepTopic::General
    }
}

/// Renders the draft response deterministically from the intent and the
/// recorded handling facts.
pub fn draft(mut state: RunState) -> Result<RunState, NodeError> {
    let handled = state
        .handled
        .as_ref()
        .ok_or_else(|| NodeError::Fatal("draft requires recorded handling facts".into()))?;
    let text = match handled {
        HandledAction::RescheduleBooked { slot: Some(slot) } => format!(
            "I can confirm your reschedule request. The appointment will be moved to {slot} \
             once the clinic finalizes the change."
        ),
        HandledAction::RescheduleBooked { slot: None } => {
            "I can help with rescheduling. I've noted your request and will move the \
             appointment to your requested window once confirmed."
                .to_owned()
        }
        HandledAction::RescheduleUnavailable { requested, alternative } => format!(
            "The requested time {requested} is not available. The closest open slot is \
             {alternative}. Reply to confirm and I will move the appointment there."
        ),
        HandledAction::CancelRecorded => {
            "I can help cancel your appointment. I've recorded the cancellation request."
                .to_owned()
        }
        HandledAction::PrepInstructions { topic } => prep_draft(*topic).to_owned(),
    };
    state.draft_response = Some(text);
    Ok(state)
}

fn prep_draft(topic: PrepTopic) -> &'static str {
    match topic {
        PrepTopic::Mri => {
            "MRI preparation (general):\n\
             - Tell the clinic if you have any implanted devices or metal in your body.\n\
             - Remove metal objects (jewelry, watches, hairpins) before the scan.\n\
             - You may be asked not to eat or drink for a few hours if contrast is used.\n\
             - Let staff know if you are pregnant, have kidney disease, or feel claustrophobic.\n\
             If you share whether contrast is planned and your appointment time, I can tailor \
             the instructions."
        }
        PrepTopic::CtScan => {
            "CT scan preparation (general):\n\
             - You may be asked not to eat or drink for a few hours before the scan.\n\
             - If contrast is used, tell the clinic about allergies (especially iodine/contrast) \
             and kidney disease.\n\
             - Wear comfortable clothing and remove metal items as instructed.\n\
             If you share whether contrast is planned and your appointment time, I can tailor \
             the instructions."
        }
        PrepTopic::Ultrasound => {
            "Ultrasound preparation (general):\n\
             - Preparation depends on the body area being scanned.\n\
             - For some pelvic ultrasounds, you may be asked to drink water and arrive with a \
             full bladder.\n\
             - For some abdominal ultrasounds, you may be asked to avoid eating for several hours.\n\
             Tell me which body area is being scanned and your appointment time, and I'll tailor \
             the instructions."
        }
        PrepTopic::General => {
            "Preparation instructions depend on the procedure.\n\
             Please tell me the procedure type (e.g., MRI, CT, ultrasound) and your appointment \
             time, and I'll draft the relevant preparation steps for review."
        }
    }
}

/// Applies the human decision to the draft: approval releases the draft
/// verbatim; an edit releases the supplied text (empty edits fall back to
/// the draft).
pub fn apply_decision(
    decision: &ReviewDecision,
) -> impl Fn(RunState) -> Result<RunState, NodeError> + '_ {
    move |mut state: RunState| {
        let draft = state
            .draft_response
            .clone()
            .ok_or_else(|| NodeError::Fatal("review requires a draft response".into()))?;
        let final_text = match decision {
            ReviewDecision::Approve => draft,
            ReviewDecision::Edit { text } => {
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    draft
                } else {
                    trimmed.to_owned()
                }
            }
        };
        state.final_response = Some(final_text);
        Ok(state)
    }
}

/// Sets the terminal status: escalation and need-info short-circuits take
/// priority, otherwise the run is ready. Guarantees a final response exists.
pub fn finalize(mut state: RunState) -> Result<RunState, NodeError> {
    use intake_core::TerminalStatus::{Escalate, NeedInfo, Ready};

    let status = if state.risk_flag {
        Escalate
    } else if !state.missing_info.is_empty() {
        NeedInfo
    } else {
        Ready
    };
    state.mark_terminal(status);
    if state.final_response.is_none() {
        state.final_response = Some(
            match status {
                Escalate => {
                    "Please contact the clinic or local emergency services for immediate \
                     assistance."
                }
                NeedInfo => "Please provide more details so I can assist.",
                Ready => "Your request has been processed.",
            }
            .to_owned(),
        );
    }
    Ok(state)
}
