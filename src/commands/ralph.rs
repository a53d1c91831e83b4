use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use serde_json::json;

use super::{CommandContext, OutputFormat, print_json};
use crate::error::ExitError;
use crate::ralph::{LoopController, LoopError, LoopStatus};

#[derive(Debug, Args)]
pub struct RalphArgs {
    /// Project root directory (the loop is keyed by this path)
    #[arg(long, global = true)]
    pub project_root: Option<PathBuf>,
    /// Output format
    #[arg(long, value_enum, global = true, default_value_t = OutputFormat::Pretty)]
    pub format: OutputFormat,
    #[command(subcommand)]
    pub command: RalphCommand,
}

#[derive(Debug, Subcommand)]
pub enum RalphCommand {
    /// Start a loop: the Stop hook will re-inject PROMPT until done
    Start {
        /// Task prompt
        #[arg(required_unless_present = "prompt_file")]
        prompt: Option<String>,
        /// Read the prompt from a file
        #[arg(long, conflicts_with = "prompt")]
        prompt_file: Option<PathBuf>,
        /// Override the configured iteration ceiling for this loop
        #[arg(long)]
        max_iterations: Option<u32>,
        /// Phrase that counts as the agent declaring success
        #[arg(long)]
        completion_promise: Option<String>,
        /// Replace a loop that is already active
        #[arg(long)]
        force: bool,
    },
    /// Show the loop for this project
    Status,
    /// Stop the loop for this project
    Cancel,
}

impl RalphArgs {
    pub fn execute(&self) -> Result<()> {
        let ctx = CommandContext::load(self.project_root.as_deref())?;
        let controller = LoopController::new(ctx.layout.clone(), ctx.config.ralph.clone());
        let project = &ctx.project_dir;

        match &self.command {
            RalphCommand::Start {
                prompt,
                prompt_file,
                max_iterations,
                completion_promise,
                force,
            } => {
                let prompt = match (prompt, prompt_file) {
                    (Some(p), _) => p.clone(),
                    (None, Some(file)) => std::fs::read_to_string(file)
                        .with_context(|| format!("reading {}", file.display()))?,
                    (None, None) => {
                        return Err(ExitError::Config("a prompt is required".into()).into());
                    }
                };
                let state = controller
                    .start_loop(
                        project,
                        prompt.trim(),
                        *max_iterations,
                        completion_promise.as_deref(),
                        *force,
                    )
                    .map_err(|e| match e {
                        active @ LoopError::AlreadyActive { .. } => anyhow::Error::new(
                            ExitError::Denied(format!("{active}; use --force to replace it")),
                        ),
                        LoopError::Fault(fault) => fault.into(),
                    })?;
                match self.format {
                    OutputFormat::Json => print_json(&state)?,
                    OutputFormat::Pretty => {
                        let max = state.max_iterations.unwrap_or(ctx.config.ralph.max_iterations);
                        println!("Ralph loop started for {} (max {max} iterations)", project.display());
                    }
                }
            }
            RalphCommand::Status => {
                let status = controller.loop_status(project)?;
                match self.format {
                    OutputFormat::Json => print_json(&status)?,
                    OutputFormat::Pretty => print_status(&status),
                }
            }
            RalphCommand::Cancel => {
                let cancelled = controller.cancel_loop(project)?;
                match self.format {
                    OutputFormat::Json => print_json(&json!({
                        "cancelled": cancelled.is_some(),
                        "iteration": cancelled.as_ref().map(|s| s.iteration),
                    }))?,
                    OutputFormat::Pretty => match cancelled {
                        Some(state) => println!("Loop cancelled at iteration {}", state.iteration),
                        None => println!("No active loop"),
                    },
                }
            }
        }
        Ok(())
    }
}

fn print_status(status: &LoopStatus) {
    let Some(state) = &status.state else {
        println!("No active loop");
        return;
    };
    println!(
        "Loop active: iteration {}/{} | budget ${:.2}/${:.2}",
        state.iteration, status.max_iterations, status.spent_usd, status.budget_usd
    );
    if let Some(file) = &status.state_file {
        println!("State: {} ({:?})", file.display(), state.source);
    }
    let ci = match state.last_ci_passed {
        Some(true) => "pass",
        Some(false) => "fail",
        None => "not run",
    };
    println!(
        "CI: {ci} | errors {} | no-progress {} | CI failures {}",
        state.consecutive_errors, state.consecutive_no_progress, state.consecutive_ci_failures
    );
    if status.checksum_ok == Some(false) {
        println!("Warning: state checksum mismatch (file edited outside hive-hooks)");
    }
    let first_line = state.original_prompt.lines().next().unwrap_or_default();
    println!("Prompt: {first_line}");
    for record in &status.recent {
        println!(
            "  #{} {} {}",
            record.iteration,
            record.ts.to_rfc3339(),
            record.outcome.as_deref().unwrap_or("-")
        );
    }
}
