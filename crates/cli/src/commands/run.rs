use std::io::{self, BufRead, Write};
use std::sync::Arc;

use serde::Serialize;

use intake_agent::{
    AutoApproveChannel, Engine, InMemoryScheduler, IntakeRequest, ReviewChannel, ReviewDecision,
    ReviewError,
};
use intake_core::{IntakeConfig, LoadOptions, RunResult, TracingLogSink};

use crate::commands::CommandResult;

/// Terminal review prompt: show the draft, then accept `a` (approve) or `e`
/// (edit, with replacement text on the next line).
struct PromptReviewChannel;

impl ReviewChannel for PromptReviewChannel {
    fn review(&self, draft: &str) -> Result<ReviewDecision, ReviewError> {
        let mut stdout = io::stdout().lock();
        writeln!(stdout, "--- draft response ---").map_err(channel_error)?;
        writeln!(stdout, "{draft}").map_err(channel_error)?;
        writeln!(stdout, "----------------------").map_err(channel_error)?;
        write!(stdout, "approve as-is or edit? [a/e]: ").map_err(channel_error)?;
        stdout.flush().map_err(channel_error)?;

        let choice = read_line()?;
        if choice.trim().eq_ignore_ascii_case("e") {
            write!(stdout, "replacement text (empty keeps the draft): ")
                .map_err(channel_error)?;
            stdout.flush().map_err(channel_error)?;
            let text = read_line()?;
            Ok(ReviewDecision::Edit { text: text.trim().to_owned() })
        } else {
            Ok(ReviewDecision::Approve)
        }
    }
}

fn read_line() -> Result<String, ReviewError> {
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line).map_err(channel_error)?;
    Ok(line)
}

fn channel_error(error: io::Error) -> ReviewError {
    ReviewError::Channel(error.to_string())
}

#[derive(Debug, Serialize)]
struct RunReport {
    command: &'static str,
    run_id: String,
    input: String,
    terminal_status: &'static str,
    route_trace: String,
    final_response: String,
}

pub fn run(input: &str, appointment_id: Option<&str>, yes: bool, json: bool) -> CommandResult {
    let config = match IntakeConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure("run", "config_validation", error.to_string(), 2)
        }
    };
    crate::init_logging(&config);

    let engine =
        match Engine::new(config, Arc::new(InMemoryScheduler::default()), Arc::new(TracingLogSink))
        {
            Ok(engine) => engine,
            Err(error) => return CommandResult::failure("run", "engine_init", error.to_string(), 2),
        };

    let mut request = IntakeRequest::new(input);
    if let Some(appointment_id) = appointment_id {
        request = request.with_appointment_id(appointment_id);
    }

    let result = if yes {
        engine.run_with(request, &AutoApproveChannel)
    } else {
        engine.run_with(request, &PromptReviewChannel)
    };

    render(&engine, input, result, json)
}

fn render(engine: &Engine, input: &str, result: RunResult, json: bool) -> CommandResult {
    let report = RunReport {
        command: "run",
        run_id: result.run_id.to_string(),
        // The echoed input goes through the masker like any other displayed
        // or logged text; only the response itself reaches the user verbatim.
        input: engine.masker().mask(input),
        terminal_status: result.terminal_status.as_str(),
        route_trace: result.trace_line(),
        final_response: result.final_response,
    };

    let output = if json {
        serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"command\":\"run\",\"status\":\"error\",\"error_class\":\"serialization\",\"message\":\"{}\"}}",
                error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
            )
        })
    } else {
        [
            format!("run {} finished: {}", report.run_id, report.terminal_status),
            format!("  input:  {}", report.input),
            format!("  trace:  {}", report.route_trace),
            format!("  response:\n{}", indent(&report.final_response)),
        ]
        .join("\n")
    };

    CommandResult { exit_code: 0, output }
}

fn indent(text: &str) -> String {
    text.lines().map(|line| format!("    {line}")).collect::<Vec<_>>().join("\n")
}
