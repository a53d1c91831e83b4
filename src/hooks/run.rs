use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::input::{Decision, HookInput, HookOutput};
use super::registry::{HookEvent, HookRegistry};
use crate::config::Config;
use crate::coordination::{ClaimOutcome, FileClaimRegistry, TaskClaimRegistry};
use crate::error::{ExitError, FailOpen};
use crate::hive::{HiveError, HiveTracker, Task, TaskPriority};
use crate::identity;
use crate::layout::StateLayout;
use crate::ralph::guards::summarize;
use crate::ralph::transcript;
use crate::ralph::{Evidence, KeywordDetector, LoopController, SignalDetector, StopDecision, StopInput};

/// Everything a hook needs besides its payload.
#[derive(Debug, Clone)]
pub struct HookContext {
    pub project_dir: PathBuf,
    pub config: Config,
    pub layout: StateLayout,
}

impl HookContext {
    /// Project directory from the flag, the payload's `cwd`, or the process
    /// cwd. A broken config file falls back to defaults.
    pub fn resolve(project_root: Option<&Path>, input: &HookInput) -> Self {
        let project_dir = project_root
            .map(Path::to_path_buf)
            .or_else(|| input.cwd.clone())
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));
        let config = match Config::resolve(&project_dir) {
            Ok((config, _)) => config,
            Err(e) => {
                warn!(error = %e, "invalid config, using defaults");
                Config::default()
            }
        };
        let layout = StateLayout::new(config.state_root());
        Self {
            project_dir,
            config,
            layout,
        }
    }

    fn agent_id(&self, input: &HookInput) -> Option<String> {
        identity::resolve(input.session_id.as_deref(), &self.layout.session_id())
            .map(Some)
            .fail_open("resolve agent identity", None)
    }

    fn tracker(&self) -> HiveTracker {
        HiveTracker::new(self.layout.hive_state(), &self.config.hive)
    }

    fn task_claims(&self) -> TaskClaimRegistry {
        TaskClaimRegistry::new(self.layout.task_claims(), self.config.claims.task_ttl_secs)
    }
}

/// Run the named hook. A payload for an event the hook is not registered
/// for is ignored.
pub fn dispatch(name: &str, ctx: &HookContext, input: &HookInput) -> anyhow::Result<HookOutput> {
    let entry = HookRegistry::find(name)
        .ok_or_else(|| ExitError::Config(format!("unknown hook: {name}")))?;
    let event = input.hook_event_name.as_deref().and_then(HookEvent::from_name);
    if event.is_some_and(|event| !entry.handles(event)) {
        debug!(hook = name, event = ?event, "event not handled by hook, skipping");
        return Ok(HookOutput::empty());
    }

    let output = match entry.name {
        "claim-file" => claim_file(ctx, input),
        "release-claims" => release_claims(ctx, input),
        "track-task" => track_task(ctx, input),
        "ralph-stop" => ralph_stop(ctx, input),
        other => return Err(ExitError::Config(format!("hook {other} has no handler")).into()),
    };
    Ok(output)
}

fn is_write_tool(tool: &str) -> bool {
    matches!(tool, "Write" | "Edit" | "MultiEdit" | "NotebookEdit")
}

/// PreToolUse on write-class tools: claim the target or block.
pub fn claim_file(ctx: &HookContext, input: &HookInput) -> HookOutput {
    if input.tool_name.as_deref().is_some_and(|tool| !is_write_tool(tool)) {
        return HookOutput::empty();
    }
    let Some(target) = input.target_file() else {
        return HookOutput::empty();
    };
    let Some(agent) = ctx.agent_id(input) else {
        return HookOutput::empty();
    };

    let path = ctx.project_dir.join(target);
    let registry = FileClaimRegistry::new(ctx.layout.claims(), ctx.config.claims.file_ttl_secs);
    let outcome = registry
        .claim(&path, &agent)
        .fail_open_with("claim file", ClaimOutcome::fail_open);

    if outcome.granted {
        HookOutput::empty()
    } else {
        HookOutput::block(format!(
            "File claim denied: {}. Another agent is editing it; work on something else or wait for the claim to expire.",
            outcome.reason
        ))
    }
}

/// SessionEnd: drop every claim the session holds.
pub fn release_claims(ctx: &HookContext, input: &HookInput) -> HookOutput {
    let Some(agent) = ctx.agent_id(input) else {
        return HookOutput::empty();
    };
    let registry = FileClaimRegistry::new(ctx.layout.claims(), ctx.config.claims.file_ttl_secs);
    let released = registry
        .release_all(&agent)
        .fail_open("release claims", Vec::new());
    info!(agent = %agent, released = released.len(), "session claims released");
    HookOutput::empty()
}

/// Pre/PostToolUse on `Task`: mirror subagent work into the hive.
pub fn track_task(ctx: &HookContext, input: &HookInput) -> HookOutput {
    if input.tool_name.is_some() && !input.tool_is("Task") {
        return HookOutput::empty();
    }
    let Some(description) = input
        .input_str("description")
        .or_else(|| input.input_str("prompt"))
    else {
        return HookOutput::empty();
    };

    let event = input
        .hook_event_name
        .as_deref()
        .and_then(HookEvent::from_name)
        .unwrap_or(if input.tool_response.is_some() || input.tool_output.is_some() {
            HookEvent::PostToolUse
        } else {
            HookEvent::PreToolUse
        });

    let result = match event {
        HookEvent::PreToolUse => start_tracked_task(ctx, input, description),
        HookEvent::PostToolUse => finish_tracked_task(ctx, input, description),
        _ => Ok(None),
    };

    match result {
        Ok(_) => HookOutput::empty(),
        Err(HiveError::Fault(fault)) => Err::<HookOutput, _>(fault).fail_open("track task", HookOutput::empty()),
        Err(denial) => {
            warn!(code = denial.code(), reason = %denial, "hive refused task tracking");
            HookOutput::message(format!("hive: {denial}"))
        }
    }
}

fn start_tracked_task(
    ctx: &HookContext,
    input: &HookInput,
    description: &str,
) -> Result<Option<Task>, HiveError> {
    let Some(session) = ctx.agent_id(input) else {
        return Ok(None);
    };
    let role = input
        .input_str("subagent_type")
        .or_else(|| input.input_str("mode"))
        .unwrap_or("general-purpose");
    let agent_id = format!("{session}/{role}");

    let tracker = ctx.tracker();
    tracker.register_agent(role, Some(&agent_id))?;
    let task = tracker.register_task(description, TaskPriority::Normal)?;
    let task = tracker.start_task(&task.id, &agent_id)?;

    ctx.task_claims()
        .claim(&task.id, &agent_id)
        .map(|_| ())
        .fail_open("claim task", ());
    debug!(task_id = %task.id, agent_id = %agent_id, "subagent task tracked");
    Ok(Some(task))
}

fn finish_tracked_task(
    ctx: &HookContext,
    input: &HookInput,
    description: &str,
) -> Result<Option<Task>, HiveError> {
    let tracker = ctx.tracker();
    let Some(task) = tracker.find_open_task(description)? else {
        debug!(description, "no open task to complete");
        return Ok(None);
    };

    let text = input.result_text();
    let evidence = Evidence {
        text: &text,
        exit_status: input.exit_status(),
        completion_promise: None,
    };
    let failure = KeywordDetector.failure(&evidence);
    let result = match &failure {
        Some(signal) => format!("failed ({signal}): {}", summarize(&text, 200)),
        None => summarize(&text, 200),
    };
    let task = tracker.complete_task(&task.id, failure.is_none(), Some(result))?;

    if let Some(agent) = task.assigned_to.as_deref() {
        ctx.task_claims()
            .release(&task.id, agent)
            .fail_open("release task claim", false);
    }
    Ok(Some(task))
}

/// Stop: let the loop controller decide whether the agent may stop.
pub fn ralph_stop(ctx: &HookContext, input: &HookInput) -> HookOutput {
    let text = stop_text(ctx, input);
    let controller = LoopController::new(ctx.layout.clone(), ctx.config.ralph.clone());
    let decision = controller
        .on_stop(
            &ctx.project_dir,
            &StopInput {
                text,
                exit_status: input.exit_status(),
            },
        )
        .fail_open("ralph stop", StopDecision::Inactive);

    match decision {
        StopDecision::Inactive => HookOutput::empty(),
        StopDecision::Continue { prompt, status, .. } => HookOutput::block(prompt).with_message(status),
        StopDecision::Stop { reason, .. } => HookOutput {
            decision: Some(Decision::Allow),
            reason: None,
            system_message: Some(reason.clone()),
            stop_reason: Some(reason),
        },
    }
}

/// Latest agent output: inline transcript, else the tail of the transcript
/// file, else the stop reason.
fn stop_text(ctx: &HookContext, input: &HookInput) -> String {
    if let Some(inline) = input.transcript.as_deref().filter(|t| !t.trim().is_empty()) {
        return transcript::latest_output(inline);
    }
    if let Some(path) = &input.transcript_path {
        let raw = transcript::read_tail(path, ctx.config.ralph.transcript_tail_bytes)
            .fail_open("read transcript", String::new());
        if !raw.trim().is_empty() {
            return transcript::latest_output(&raw);
        }
    }
    input.stop_reason.clone().unwrap_or_default()
}
