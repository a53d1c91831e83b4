use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Subcommand};
use serde_json::json;

use super::{CommandContext, OutputFormat, print_json};
use crate::coordination::{FileClaimRegistry, TaskClaimRegistry};
use crate::error::ExitError;

#[derive(Debug, Args)]
pub struct ClaimsArgs {
    /// Project root directory (selects the config file)
    #[arg(long, global = true)]
    pub project_root: Option<PathBuf>,
    /// Act as this agent instead of the resolved session identity
    #[arg(long, global = true)]
    pub agent: Option<String>,
    /// Output format
    #[arg(long, value_enum, global = true, default_value_t = OutputFormat::Pretty)]
    pub format: OutputFormat,
    #[command(subcommand)]
    pub command: ClaimsCommand,
}

#[derive(Debug, Subcommand)]
pub enum ClaimsCommand {
    /// List live file claims
    List,
    /// Claim a file
    Claim { path: PathBuf },
    /// Release a file claim you hold
    Release { path: PathBuf },
    /// Release every file claim you hold
    ReleaseAll,
    /// Record yourself as the owner of a task (never refused)
    TaskClaim { task_id: String },
    /// Release a task claim you hold
    TaskRelease { task_id: String },
    /// List live task claims
    Tasks,
}

impl ClaimsArgs {
    pub fn execute(&self) -> Result<()> {
        let ctx = CommandContext::load(self.project_root.as_deref())?;
        let files = FileClaimRegistry::new(ctx.layout.claims(), ctx.config.claims.file_ttl_secs);
        let tasks = TaskClaimRegistry::new(ctx.layout.task_claims(), ctx.config.claims.task_ttl_secs);
        let agent = || ctx.agent_id(self.agent.as_deref());

        match &self.command {
            ClaimsCommand::List => {
                let claims = files.list()?;
                match self.format {
                    OutputFormat::Json => print_json(&json!({ "claims": claims }))?,
                    OutputFormat::Pretty if claims.is_empty() => println!("No live file claims"),
                    OutputFormat::Pretty => {
                        for c in &claims {
                            println!("{}  {}  (expires {})", c.owner, c.file, c.expires_at.to_rfc3339());
                        }
                    }
                }
            }
            ClaimsCommand::Claim { path } => {
                let path = ctx.project_dir.join(path);
                let outcome = files.claim(&path, &agent()?)?;
                match self.format {
                    OutputFormat::Json => print_json(&outcome)?,
                    OutputFormat::Pretty if outcome.granted => {
                        println!("Claimed {} ({})", path.display(), outcome.reason);
                    }
                    OutputFormat::Pretty => {}
                }
                if !outcome.granted {
                    return Err(ExitError::Denied(outcome.reason).into());
                }
            }
            ClaimsCommand::Release { path } => {
                let path = ctx.project_dir.join(path);
                let released = files.release(&path, &agent()?)?;
                report_release(self.format, &path.display().to_string(), released)?;
            }
            ClaimsCommand::ReleaseAll => {
                let released = files.release_all(&agent()?)?;
                match self.format {
                    OutputFormat::Json => print_json(&json!({ "released": released }))?,
                    OutputFormat::Pretty => println!("Released {} claim(s)", released.len()),
                }
            }
            ClaimsCommand::TaskClaim { task_id } => {
                let claim = tasks.claim(task_id, &agent()?)?;
                match self.format {
                    OutputFormat::Json => print_json(&claim)?,
                    OutputFormat::Pretty => match &claim.previous_owner {
                        Some(prev) => println!("Claimed task {task_id} (handed off from {prev})"),
                        None => println!("Claimed task {task_id}"),
                    },
                }
            }
            ClaimsCommand::TaskRelease { task_id } => {
                let released = tasks.release(task_id, &agent()?)?;
                report_release(self.format, task_id, released)?;
            }
            ClaimsCommand::Tasks => {
                let claims = tasks.list()?;
                match self.format {
                    OutputFormat::Json => print_json(&json!({ "task_claims": claims }))?,
                    OutputFormat::Pretty if claims.is_empty() => println!("No live task claims"),
                    OutputFormat::Pretty => {
                        for c in &claims {
                            println!("{}  {}", c.owner, c.task_id);
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

fn report_release(format: OutputFormat, what: &str, released: bool) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(&json!({ "released": released, "target": what })),
        OutputFormat::Pretty => {
            if released {
                println!("Released {what}");
            } else {
                println!("No claim held on {what}; nothing released");
            }
            Ok(())
        }
    }
}
