use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use intake_agent::{AutoApproveChannel, Engine, InMemoryScheduler, IntakeRequest};
use intake_core::{InMemoryLogSink, IntakeConfig, LoadOptions, TerminalStatus};

use crate::commands::CommandResult;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum SmokeStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct SmokeCheck {
    name: &'static str,
    status: SmokeStatus,
    elapsed_ms: u64,
    message: String,
}

#[derive(Debug, Serialize)]
struct SmokeReport {
    command: &'static str,
    status: SmokeStatus,
    summary: String,
    total_elapsed_ms: u64,
    checks: Vec<SmokeCheck>,
}

pub fn run() -> CommandResult {
    let started = Instant::now();
    let mut checks = Vec::new();

    let config = match timed_check(|| IntakeConfig::load(LoadOptions::default())) {
        Ok((elapsed_ms, config)) => {
            checks.push(SmokeCheck {
                name: "config_validation",
                status: SmokeStatus::Pass,
                elapsed_ms,
                message: "configuration loaded and validated".to_string(),
            });
            config
        }
        Err((elapsed_ms, error)) => {
            checks.push(SmokeCheck {
                name: "config_validation",
                status: SmokeStatus::Fail,
                elapsed_ms,
                message: error.to_string(),
            });
            checks.push(skipped("reschedule_alternative_slot"));
            checks.push(skipped("missing_info_short_circuit"));
            checks.push(skipped("safety_escalation"));
            checks.push(skipped("log_masking"));
            return finalize_report(checks, started.elapsed().as_millis() as u64);
        }
    };

    let sink = InMemoryLogSink::default();
    let engine = match Engine::new(
        config,
        Arc::new(InMemoryScheduler::default()),
        Arc::new(sink.clone()),
    ) {
        Ok(engine) => engine,
        Err(error) => {
            checks.push(SmokeCheck {
                name: "reschedule_alternative_slot",
                status: SmokeStatus::Fail,
                elapsed_ms: 0,
                message: format!("failed to build engine: {error}"),
            });
            checks.push(skipped("missing_info_short_circuit"));
            checks.push(skipped("safety_escalation"));
            checks.push(skipped("log_masking"));
            return finalize_report(checks, started.elapsed().as_millis() as u64);
        }
    };

    checks.push(scenario_check(
        &engine,
        "reschedule_alternative_slot",
        "I need to reschedule my appointment ID 1234 to 2pm",
        TerminalStatus::Ready,
        Some("3:00pm"),
    ));
    checks.push(scenario_check(
        &engine,
        "missing_info_short_circuit",
        "I want to reschedule my appointment",
        TerminalStatus::NeedInfo,
        None,
    ));
    checks.push(scenario_check(
        &engine,
        "safety_escalation",
        "I have chest pain and need help",
        TerminalStatus::Escalate,
        None,
    ));

    let masking_started = Instant::now();
    let leaked = sink.events().iter().any(|event| {
        event.metadata.values().any(|value| value.contains("1234"))
    });
    checks.push(SmokeCheck {
        name: "log_masking",
        status: if leaked { SmokeStatus::Fail } else { SmokeStatus::Pass },
        elapsed_ms: masking_started.elapsed().as_millis() as u64,
        message: if leaked {
            "an identifier from the scenario inputs leaked into log metadata".to_string()
        } else {
            "no scenario identifiers visible in log metadata".to_string()
        },
    });

    finalize_report(checks, started.elapsed().as_millis() as u64)
}

fn scenario_check(
    engine: &Engine,
    name: &'static str,
    input: &str,
    expected: TerminalStatus,
    expected_fragment: Option<&str>,
) -> SmokeCheck {
    let started = Instant::now();
    let result = engine.run_with(IntakeRequest::new(input), &AutoApproveChannel);
    let elapsed_ms = started.elapsed().as_millis() as u64;

    if result.terminal_status != expected {
        return SmokeCheck {
            name,
            status: SmokeStatus::Fail,
            elapsed_ms,
            message: format!(
                "expected terminal status {} but run ended {} (trace: {})",
                expected.as_str(),
                result.terminal_status.as_str(),
                result.trace_line(),
            ),
        };
    }
    if let Some(fragment) = expected_fragment {
        if !result.final_response.contains(fragment) {
            return SmokeCheck {
                name,
                status: SmokeStatus::Fail,
                elapsed_ms,
                message: format!("response is missing expected fragment `{fragment}`"),
            };
        }
    }
    SmokeCheck {
        name,
        status: SmokeStatus::Pass,
        elapsed_ms,
        message: format!("run ended {} as expected", expected.as_str()),
    }
}

fn timed_check<T, E>(check: impl FnOnce() -> Result<T, E>) -> Result<(u64, T), (u64, E)> {
    let started = Instant::now();
    match check() {
        Ok(value) => Ok((started.elapsed().as_millis() as u64, value)),
        Err(error) => Err((started.elapsed().as_millis() as u64, error)),
    }
}

fn skipped(name: &'static str) -> SmokeCheck {
    SmokeCheck {
        name,
        status: SmokeStatus::Skipped,
        elapsed_ms: 0,
        message: "skipped due previous failure".to_string(),
    }
}

fn finalize_report(checks: Vec<SmokeCheck>, total_elapsed_ms: u64) -> CommandResult {
    let passed = checks.iter().filter(|check| check.status == SmokeStatus::Pass).count();
    let total = checks.len();
    let failed = checks.iter().any(|check| check.status == SmokeStatus::Fail);

    let report = SmokeReport {
        command: "smoke",
        status: if failed { SmokeStatus::Fail } else { SmokeStatus::Pass },
        summary: format!("smoke: {passed}/{total} checks passed in {total_elapsed_ms}ms"),
        total_elapsed_ms,
        checks,
    };

    let human = report.summary.clone();
    let machine = serde_json::to_string(&report).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"smoke\",\"status\":\"fail\",\"summary\":\"serialization failed\",\"error\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    });

    CommandResult { exit_code: if failed { 6 } else { 0 }, output: format!("{human}\n{machine}") }
}
