pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

use intake_core::{IntakeConfig, LogFormat};

#[derive(Debug, Parser)]
#[command(
    name = "intake",
    about = "Appointment-request triage CLI",
    long_about = "Triage free-text appointment requests through classification, safety and \
                  information checks, drafting, and human review.",
    after_help = "Examples:\n  intake run \"Cancel appointment ID 1234\"\n  intake run --yes --json \"Reschedule appointment ID 1234 to 2pm\"\n  intake smoke\n  intake config"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Triage one request and review the draft before it is released")]
    Run {
        #[arg(help = "The request text to triage")]
        input: String,
        #[arg(long, help = "Appointment identifier, if already known")]
        appointment_id: Option<String>,
        #[arg(long, short = 'y', help = "Approve the draft without prompting")]
        yes: bool,
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Run end-to-end readiness checks with per-check timing details")]
    Smoke,
    #[command(about = "Inspect effective configuration values with source attribution")]
    Config,
}

/// Installs the global subscriber. A no-op when one is already set, so
/// commands can share this unconditionally.
pub(crate) fn init_logging(config: &IntakeConfig) {
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    let result = match config.logging.format {
        LogFormat::Compact => tracing_subscriber::fmt()
            .with_target(false)
            .with_max_level(log_level)
            .compact()
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::fmt()
            .with_target(false)
            .with_max_level(log_level)
            .pretty()
            .try_init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .with_target(false)
            .with_max_level(log_level)
            .json()
            .try_init(),
    };
    let _ = result;
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Run { input, appointment_id, yes, json } => {
            commands::run::run(&input, appointment_id.as_deref(), yes, json)
        }
        Command::Smoke => commands::smoke::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
