use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Subcommand};
use serde::Serialize;
use serde_json::json;

use super::{CommandContext, OutputFormat, print_json};
use crate::error::ExitError;
use crate::hive::{AgentStatus, HiveError, HiveStatus, HiveTracker, TaskPriority};

#[derive(Debug, Args)]
pub struct HiveArgs {
    /// Project root directory (selects the config file)
    #[arg(long, global = true)]
    pub project_root: Option<PathBuf>,
    /// Output format
    #[arg(long, value_enum, global = true, default_value_t = OutputFormat::Pretty)]
    pub format: OutputFormat,
    #[command(subcommand)]
    pub command: HiveCommand,
}

#[derive(Debug, Subcommand)]
pub enum HiveCommand {
    /// Create the hive (no-op if one is running)
    Init {
        #[arg(long)]
        topology: Option<String>,
    },
    /// Show agent and task counts
    Status,
    /// Register an agent
    RegisterAgent {
        role: String,
        /// Explicit agent id (re-registering a live id refreshes it)
        #[arg(long)]
        id: Option<String>,
    },
    /// Set an agent's status
    AgentStatus {
        agent_id: String,
        status: AgentStatus,
        /// Metadata to merge, as key=value
        #[arg(long = "meta", value_parser = parse_meta)]
        meta: Vec<(String, String)>,
    },
    /// Register a pending task
    AddTask {
        description: String,
        #[arg(long, value_enum, default_value_t = TaskPriority::Normal)]
        priority: TaskPriority,
    },
    /// Assign a pending task to an agent
    AssignTask { task_id: String, agent_id: String },
    /// Start a task on an agent (agent becomes busy)
    StartTask { task_id: String, agent_id: String },
    /// Finish a task (agent becomes idle)
    CompleteTask {
        task_id: String,
        /// Record the task as failed
        #[arg(long)]
        failed: bool,
        #[arg(long)]
        result: Option<String>,
    },
    /// Relabel silent agents as stuck
    DetectStuck,
    /// Terminate every agent and close the hive
    Shutdown {
        /// Shut down even with tasks in progress (they are marked failed)
        #[arg(long)]
        force: bool,
    },
}

fn parse_meta(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected key=value, got {raw:?}"))
}

impl HiveArgs {
    pub fn execute(&self) -> Result<()> {
        let ctx = CommandContext::load(self.project_root.as_deref())?;
        let tracker = HiveTracker::new(ctx.layout.hive_state(), &ctx.config.hive);

        match self.run(&tracker) {
            Ok(()) => Ok(()),
            Err(HiveError::Fault(fault)) => Err(fault.into()),
            Err(denial) => {
                if self.format == OutputFormat::Json {
                    print_json(&denial.to_denial_json())?;
                }
                Err(ExitError::Denied(denial.to_string()).into())
            }
        }
    }

    fn emit<T: Serialize>(&self, value: &T, pretty: impl FnOnce()) -> Result<(), HiveError> {
        match self.format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
            }
            OutputFormat::Pretty => pretty(),
        }
        Ok(())
    }

    fn run(&self, tracker: &HiveTracker) -> Result<(), HiveError> {
        match &self.command {
            HiveCommand::Init { topology } => {
                let hive_id = tracker.init_hive(topology.as_deref())?;
                self.emit(&json!({ "hive_id": hive_id }), || println!("Hive {hive_id} running"))
            }
            HiveCommand::Status => {
                let status = tracker.get_status()?;
                self.emit(&status, || print_status(&status))
            }
            HiveCommand::RegisterAgent { role, id } => {
                let agent = tracker.register_agent(role, id.as_deref())?;
                self.emit(&agent, || println!("Registered {} ({})", agent.id, agent.role))
            }
            HiveCommand::AgentStatus {
                agent_id,
                status,
                meta,
            } => {
                let metadata = meta
                    .iter()
                    .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                    .collect();
                let agent = tracker.update_agent_status(agent_id, *status, metadata)?;
                self.emit(&agent, || println!("{} is {}", agent.id, agent.status))
            }
            HiveCommand::AddTask {
                description,
                priority,
            } => {
                let task = tracker.register_task(description, *priority)?;
                self.emit(&task, || println!("Added {}: {}", task.id, task.description))
            }
            HiveCommand::AssignTask { task_id, agent_id } => {
                let task = tracker.assign_task(task_id, agent_id)?;
                self.emit(&task, || println!("Assigned {} to {agent_id}", task.id))
            }
            HiveCommand::StartTask { task_id, agent_id } => {
                let task = tracker.start_task(task_id, agent_id)?;
                self.emit(&task, || println!("Started {} on {agent_id}", task.id))
            }
            HiveCommand::CompleteTask {
                task_id,
                failed,
                result,
            } => {
                let task = tracker.complete_task(task_id, !failed, result.clone())?;
                self.emit(&task, || println!("{} {}", task.id, task.status))
            }
            HiveCommand::DetectStuck => {
                let stuck = tracker.detect_stuck_agents()?;
                self.emit(&json!({ "stuck": stuck }), || {
                    if stuck.is_empty() {
                        println!("No stuck agents");
                    } else {
                        println!("Marked stuck: {}", stuck.join(", "));
                    }
                })
            }
            HiveCommand::Shutdown { force } => {
                let report = tracker.shutdown_hive(!force)?;
                self.emit(&report, || {
                    println!(
                        "Hive shut down: {} agent(s) terminated",
                        report.terminated_agents.len()
                    );
                    if !report.aborted_tasks.is_empty() {
                        println!("Aborted tasks: {}", report.aborted_tasks.join(", "));
                    }
                })
            }
        }
    }
}

fn print_status(status: &HiveStatus) {
    match &status.hive_id {
        Some(id) => println!("Hive {id} ({})", status.topology),
        None => println!("No active hive"),
    }
    let counts = |map: &std::collections::BTreeMap<String, usize>| {
        map.iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(" ")
    };
    println!(
        "Agents: {} ({} live) {}",
        status.agent_count,
        status.live_agents,
        counts(&status.agents_by_status)
    );
    println!("Tasks:  {} {}", status.task_count, counts(&status.tasks_by_status));
    if !status.stuck_agents.is_empty() {
        println!("Stuck:  {}", status.stuck_agents.join(", "));
    }
}
