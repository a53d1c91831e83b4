use std::process::ExitCode;

use clap::{Parser, Subcommand};

use hive_hooks::commands::claims::ClaimsArgs;
use hive_hooks::commands::config::ConfigCommand;
use hive_hooks::commands::hive::HiveArgs;
use hive_hooks::commands::hooks::HooksCommand;
use hive_hooks::commands::ralph::RalphArgs;
use hive_hooks::{error, telemetry};

#[derive(Debug, Parser)]
#[command(
    name = "hive-hooks",
    version,
    about = "Hooks for coordinating concurrent coding agents"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Install, audit, and run host hooks
    Hooks {
        #[command(subcommand)]
        command: HooksCommand,
    },
    /// Inspect and manage file and task claims
    Claims(ClaimsArgs),
    /// Manage the hive (agents and tasks)
    Hive(HiveArgs),
    /// Start, inspect, and cancel the Ralph iteration loop
    Ralph(RalphArgs),
    /// Create, show, or describe configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

impl Commands {
    const fn name(&self) -> &'static str {
        match self {
            Self::Hooks { .. } => "hooks",
            Self::Claims(_) => "claims",
            Self::Hive(_) => "hive",
            Self::Ralph(_) => "ralph",
            Self::Config { .. } => "config",
        }
    }
}

fn main() -> ExitCode {
    let _telemetry = telemetry::init();

    let cli = Cli::parse();

    let _span = tracing::info_span!("command", name = cli.command.name()).entered();

    let result = match cli.command {
        Commands::Hooks { command } => command.execute(),
        Commands::Claims(args) => args.execute(),
        Commands::Hive(args) => args.execute(),
        Commands::Ralph(args) => args.execute(),
        Commands::Config { command } => command.execute(),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if let Some(exit_err) = e.downcast_ref::<error::ExitError>() {
                eprintln!("error: {exit_err}");
                exit_err.exit_code()
            } else {
                eprintln!("error: {e:#}");
                ExitCode::FAILURE
            }
        }
    }
}
