//! Domain core for the intake triage agent.
//!
//! Everything here is deliberately free of I/O (beyond reading the config
//! file): the state record threaded through a run, the closed terminal-status
//! and trace vocabularies, the error taxonomy, PII masking, the log-event
//! sink seam, and configuration loading. The orchestration engine and its
//! collaborators live in `intake-agent`; this crate defines *what* a run is,
//! not how it is driven.

pub mod config;
pub mod errors;
pub mod events;
pub mod masking;
pub mod state;

pub use config::{
    ConfigError, ConfigOverrides, IntakeConfig, IntentRules, LimitConfig, LoadOptions, LogFormat,
    LoggingConfig, MaskingConfig, SafetyConfig,
};
pub use errors::{NodeError, PipelineError};
pub use events::{EventOutcome, InMemoryLogSink, LogEvent, LogSink, TracingLogSink};
pub use masking::{PiiMasker, REDACTION_MARKER};
pub use state::{
    HandledAction, Intent, PrepTopic, RunId, RunResult, RunState, TerminalStatus, TraceStep,
};
