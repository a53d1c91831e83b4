use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Subcommand;
use serde_json::{Value, json};
use tracing::{error, info};

use super::{OutputFormat, resolve_project_dir};
use crate::error::ExitError;
use crate::hooks::{HookContext, HookEntry, HookInput, HookOutput, HookRegistry, dispatch};

/// Largest stdin payload read by `hooks run`; inline transcripts can be big.
const MAX_HOOK_INPUT: u64 = 4 * 1024 * 1024;

#[derive(Debug, Subcommand)]
pub enum HooksCommand {
    /// Install hive-hooks into .claude/settings.json
    Install {
        /// Project root directory
        #[arg(long)]
        project_root: Option<PathBuf>,
        /// Command used to invoke this binary from the host
        #[arg(long, default_value = "hive-hooks")]
        binary: String,
    },
    /// Audit hook registrations and report issues
    Audit {
        /// Project root directory
        #[arg(long)]
        project_root: Option<PathBuf>,
        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Pretty)]
        format: OutputFormat,
    },
    /// Run a hook: read the payload on stdin, write the decision on stdout
    Run {
        /// Hook name (claim-file, release-claims, track-task, ralph-stop)
        hook_name: String,
        /// Project root directory (defaults to the payload's cwd)
        #[arg(long)]
        project_root: Option<PathBuf>,
    },
}

impl HooksCommand {
    pub fn execute(&self) -> Result<()> {
        match self {
            HooksCommand::Install {
                project_root,
                binary,
            } => install_hooks(project_root.as_deref(), binary),
            HooksCommand::Audit {
                project_root,
                format,
            } => audit_hooks(project_root.as_deref(), *format),
            HooksCommand::Run {
                hook_name,
                project_root,
            } => {
                run_hook(hook_name, project_root.as_deref());
                Ok(())
            }
        }
    }
}

fn settings_path(root: &Path) -> PathBuf {
    root.join(".claude").join("settings.json")
}

fn install_hooks(project_root: Option<&Path>, binary: &str) -> Result<()> {
    let root = resolve_project_dir(project_root)?;
    let path = settings_path(&root);

    let existing = if path.exists() {
        let content =
            fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_str::<Value>(&content).unwrap_or_else(|_| json!({}))
    } else {
        json!({})
    };

    let settings = merge_settings(existing, &managed_entries(&HookRegistry::all(), binary));

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    fs::write(&path, serde_json::to_string_pretty(&settings)?)
        .with_context(|| format!("writing {}", path.display()))?;

    info!(path = %path.display(), "hooks installed");
    println!("Generated {}", path.display());
    for hook in HookRegistry::all() {
        println!("  {:<15} {}", hook.name, hook.description);
    }
    println!("Hooks installed successfully");
    Ok(())
}

/// settings.json entries for every registered hook, grouped by event.
fn managed_entries(hooks: &[HookEntry], binary: &str) -> BTreeMap<&'static str, Vec<Value>> {
    let mut by_event: BTreeMap<&'static str, Vec<Value>> = BTreeMap::new();
    for hook in hooks {
        for event in hook.events {
            let mut entry = json!({
                "hooks": [{
                    "type": "command",
                    "command": format!("{binary} hooks run {}", hook.name),
                }]
            });
            if let Some(matcher) = hook.matcher {
                entry["matcher"] = json!(matcher);
            }
            by_event.entry(event.as_str()).or_default().push(entry);
        }
    }
    by_event
}

/// An entry is ours when its command runs a registered hook, whatever
/// binary path it was installed with.
fn is_managed(entry: &Value) -> bool {
    let names = HookRegistry::names();
    let runs_registered_hook = |cmd: &str| {
        let words: Vec<&str> = cmd.split_whitespace().collect();
        words
            .windows(3)
            .any(|w| w[0] == "hooks" && w[1] == "run" && names.contains(&w[2]))
    };
    entry["hooks"].as_array().is_some_and(|hooks| {
        hooks
            .iter()
            .any(|h| h["command"].as_str().is_some_and(runs_registered_hook))
    })
}

/// Replace our entries per event, keeping everything else the user has.
fn merge_settings(mut settings: Value, managed: &BTreeMap<&'static str, Vec<Value>>) -> Value {
    if !settings.is_object() {
        settings = json!({});
    }
    let mut merged = settings
        .get("hooks")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    for (event, new_entries) in managed {
        let mut combined: Vec<Value> = merged
            .get(*event)
            .and_then(Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|entry| !is_managed(entry))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        combined.extend(new_entries.iter().cloned());
        merged.insert((*event).to_string(), Value::Array(combined));
    }

    settings["hooks"] = Value::Object(merged);
    settings
}

/// Problems with the hook registrations in `settings`.
fn audit_settings(settings: &Value, hooks: &[HookEntry]) -> Vec<String> {
    let mut issues = Vec::new();
    for hook in hooks {
        let needle = format!("hooks run {}", hook.name);
        for event in hook.events {
            let entries = settings["hooks"][event.as_str()]
                .as_array()
                .cloned()
                .unwrap_or_default();
            let found = entries.iter().find(|entry| {
                entry["hooks"].as_array().is_some_and(|cmds| {
                    cmds.iter()
                        .any(|h| h["command"].as_str().is_some_and(|c| c.contains(&needle)))
                })
            });
            match found {
                None => issues.push(format!(
                    "Hook '{}' not registered for {}",
                    hook.name,
                    event.as_str()
                )),
                Some(entry) => {
                    if let Some(expected) = hook.matcher {
                        if entry["matcher"].as_str() != Some(expected) {
                            issues.push(format!(
                                "Hook '{}' on {} has matcher {} (expected {expected:?})",
                                hook.name,
                                event.as_str(),
                                entry["matcher"]
                            ));
                        }
                    }
                }
            }
        }
    }
    issues
}

fn audit_hooks(project_root: Option<&Path>, format: OutputFormat) -> Result<()> {
    let root = resolve_project_dir(project_root)?;
    let path = settings_path(&root);

    let issues = if path.exists() {
        let content =
            fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
        let settings: Value = serde_json::from_str(&content)
            .with_context(|| format!("parsing {}", path.display()))?;
        audit_settings(&settings, &HookRegistry::all())
    } else {
        vec!["Missing .claude/settings.json".to_string()]
    };

    match format {
        OutputFormat::Json => {
            let result = json!({
                "issues": issues,
                "status": if issues.is_empty() { "ok" } else { "issues_found" }
            });
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        OutputFormat::Pretty => {
            if issues.is_empty() {
                println!("✓ All hooks configured correctly");
            } else {
                eprintln!("Hook audit found {} issue(s):", issues.len());
                for issue in &issues {
                    eprintln!("  - {issue}");
                }
                return Err(ExitError::AuditFailed.into());
            }
        }
    }
    Ok(())
}

/// Hooks always exit 0 and always print one JSON object; anything that goes
/// wrong prints `{}`.
fn run_hook(hook_name: &str, project_root: Option<&Path>) {
    let stdin_input = {
        let mut buf = String::new();
        let mut handle = std::io::stdin().take(MAX_HOOK_INPUT);
        handle.read_to_string(&mut buf).ok();
        if buf.is_empty() { None } else { Some(buf) }
    };

    let outcome = catch_unwind(AssertUnwindSafe(|| {
        let input = HookInput::parse(stdin_input.as_deref());
        let ctx = HookContext::resolve(project_root, &input);
        dispatch(hook_name, &ctx, &input)
    }));

    let output = match outcome {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            error!(hook = hook_name, error = %e, "hook failed, emitting no-op");
            HookOutput::empty()
        }
        Err(_) => {
            error!(hook = hook_name, "hook panicked, emitting no-op");
            HookOutput::empty()
        }
    };
    println!("{}", output.to_json());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn managed_entries_carry_matchers() {
        let entries = managed_entries(&HookRegistry::all(), "hive-hooks");
        let pre = &entries["PreToolUse"];
        assert_eq!(pre.len(), 2);
        assert_eq!(pre[0]["matcher"], "Write|Edit|MultiEdit|NotebookEdit");
        assert_eq!(pre[0]["hooks"][0]["command"], "hive-hooks hooks run claim-file");
        assert_eq!(pre[1]["matcher"], "Task");
        assert!(entries["Stop"][0].get("matcher").is_none());
    }

    #[test]
    fn settings_json_merge_preserves_foreign_hooks() {
        let existing = json!({
            "hooks": {
                "Stop": [
                    {"hooks": [{"type": "command", "command": "my-custom-hook"}]},
                    {"hooks": [{"type": "command", "command": "hive-hooks hooks run ralph-stop --project-root /old"}]}
                ]
            },
            "other_setting": true
        });

        let merged = merge_settings(existing, &managed_entries(&HookRegistry::all(), "hive-hooks"));
        let stop = merged["hooks"]["Stop"].as_array().unwrap();
        assert_eq!(stop.len(), 2);
        assert_eq!(stop[0]["hooks"][0]["command"], "my-custom-hook");
        assert_eq!(stop[1]["hooks"][0]["command"], "hive-hooks hooks run ralph-stop");
        assert_eq!(merged["other_setting"], true);
        assert!(merged["hooks"]["SessionEnd"].is_array());
    }

    #[test]
    fn merge_is_idempotent() {
        let managed = managed_entries(&HookRegistry::all(), "hive-hooks");
        let once = merge_settings(json!({}), &managed);
        let twice = merge_settings(once.clone(), &managed);
        assert_eq!(once, twice);
    }

    #[test]
    fn reinstall_with_custom_binary_replaces_its_own_entries() {
        let managed = managed_entries(&HookRegistry::all(), "/opt/bin/hh");
        let once = merge_settings(json!({}), &managed);
        let twice = merge_settings(once.clone(), &managed);
        assert_eq!(once, twice);
        assert_eq!(twice["hooks"]["Stop"].as_array().unwrap().len(), 1);

        // switching binaries replaces rather than appends
        let moved = merge_settings(twice, &managed_entries(&HookRegistry::all(), "hive-hooks"));
        let stop = moved["hooks"]["Stop"].as_array().unwrap();
        assert_eq!(stop.len(), 1);
        assert_eq!(stop[0]["hooks"][0]["command"], "hive-hooks hooks run ralph-stop");
    }

    #[test]
    fn unrelated_hooks_run_commands_are_not_ours() {
        let foreign = json!({"hooks": [{"type": "command", "command": "other-tool hooks run lint"}]});
        assert!(!is_managed(&foreign));
    }

    #[test]
    fn audit_accepts_installed_settings() {
        let settings = merge_settings(json!({}), &managed_entries(&HookRegistry::all(), "hive-hooks"));
        assert!(audit_settings(&settings, &HookRegistry::all()).is_empty());
    }

    #[test]
    fn audit_flags_missing_hooks_and_wrong_matchers() {
        let settings = json!({
            "hooks": {
                "PreToolUse": [
                    {"matcher": "Write", "hooks": [{"type": "command", "command": "hive-hooks hooks run claim-file"}]}
                ]
            }
        });
        let issues = audit_settings(&settings, &HookRegistry::all());
        assert!(issues.iter().any(|i| i.contains("'claim-file'") && i.contains("matcher")));
        assert!(issues.iter().any(|i| i.contains("'ralph-stop' not registered for Stop")));
        assert!(issues.iter().any(|i| i.contains("'track-task' not registered for PostToolUse")));
    }
}
