use std::path::{Path, PathBuf};

use anyhow::Context;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::ExitError;

/// Project-level config file name.
pub const CONFIG_TOML: &str = ".hive-hooks.toml";
/// Per-user config file name, inside the state root.
pub const USER_CONFIG_TOML: &str = "config.toml";
/// Environment override for the state root.
pub const HOME_ENV: &str = "HIVE_HOOKS_HOME";

/// Default state root: `$HIVE_HOOKS_HOME`, else `~/.hive-hooks`.
pub fn default_state_root() -> PathBuf {
    if let Ok(home) = std::env::var(HOME_ENV)
        && !home.trim().is_empty()
    {
        return PathBuf::from(home);
    }
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".hive-hooks")
}

/// Find the config file, preferring the project file over the per-user one.
/// Returns None if neither exists.
pub fn find_config(project_dir: &Path, state_root: &Path) -> Option<PathBuf> {
    let project = project_dir.join(CONFIG_TOML);
    if project.exists() {
        return Some(project);
    }
    let user = state_root.join(USER_CONFIG_TOML);
    if user.exists() {
        return Some(user);
    }
    None
}

/// Top-level hive-hooks config.
///
/// Every field has a default, so an empty file (or no file) is valid.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct Config {
    /// Override for the state root (ignored when `HIVE_HOOKS_HOME` is set).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<PathBuf>,
    #[serde(default)]
    pub claims: ClaimsConfig,
    #[serde(default)]
    pub hive: HiveConfig,
    #[serde(default)]
    pub ralph: RalphConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ClaimsConfig {
    /// Seconds a file claim stays live without being refreshed.
    #[serde(default = "default_file_ttl")]
    pub file_ttl_secs: u64,
    /// Seconds before an untouched task claim is purged.
    #[serde(default = "default_task_ttl")]
    pub task_ttl_secs: u64,
}

impl Default for ClaimsConfig {
    fn default() -> Self {
        Self {
            file_ttl_secs: default_file_ttl(),
            task_ttl_secs: default_task_ttl(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct HiveConfig {
    #[serde(default = "default_max_agents")]
    pub max_agents: usize,
    #[serde(default = "default_stuck_timeout")]
    pub stuck_timeout_secs: u64,
    #[serde(default = "default_topology")]
    pub topology: String,
}

impl Default for HiveConfig {
    fn default() -> Self {
        Self {
            max_agents: default_max_agents(),
            stuck_timeout_secs: default_stuck_timeout(),
            topology: default_topology(),
        }
    }
}

/// Limits for the Ralph iteration loop.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RalphConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_max_budget")]
    pub max_budget_usd: f64,
    #[serde(default = "default_cost_per_iteration")]
    pub cost_per_iteration_usd: f64,
    #[serde(default = "default_max_consecutive_errors")]
    pub max_consecutive_errors: u32,
    #[serde(default = "default_max_no_progress")]
    pub max_no_progress: u32,
    #[serde(default = "default_max_ci_failures")]
    pub max_ci_failures: u32,
    #[serde(default = "default_min_interval")]
    pub min_interval_secs: u64,
    #[serde(default = "default_max_per_hour")]
    pub max_iterations_per_hour: u32,
    /// Characters of transcript tail compared for stall detection.
    #[serde(default = "default_summary_chars")]
    pub summary_chars: usize,
    /// Bytes read from the end of a transcript file.
    #[serde(default = "default_transcript_tail")]
    pub transcript_tail_bytes: u64,
    #[serde(default)]
    pub validation: ValidationConfig,
}

impl Default for RalphConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_budget_usd: default_max_budget(),
            cost_per_iteration_usd: default_cost_per_iteration(),
            max_consecutive_errors: default_max_consecutive_errors(),
            max_no_progress: default_max_no_progress(),
            max_ci_failures: default_max_ci_failures(),
            min_interval_secs: default_min_interval(),
            max_iterations_per_hour: default_max_per_hour(),
            summary_chars: default_summary_chars(),
            transcript_tail_bytes: default_transcript_tail(),
            validation: ValidationConfig::default(),
        }
    }
}

/// Commands used to re-verify an iteration.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ValidationConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lint_command: Option<String>,
    /// Detect commands from project markers when none are configured.
    #[serde(default = "default_true")]
    pub auto_detect: bool,
    #[serde(default = "default_validation_timeout")]
    pub timeout_secs: u64,
    /// Characters of command output kept in a phase result.
    #[serde(default = "default_output_limit")]
    pub output_limit: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            test_command: None,
            lint_command: None,
            auto_detect: true,
            timeout_secs: default_validation_timeout(),
            output_limit: default_output_limit(),
        }
    }
}

/// Longest span a configured TTL or interval may cover (100 years).
const MAX_SPAN_SECS: i64 = 100 * 365 * 86_400;

/// Configured seconds as a duration, clamped so timestamp arithmetic on it
/// cannot overflow.
pub fn clamped_secs(secs: u64) -> chrono::Duration {
    let secs = i64::try_from(secs).unwrap_or(i64::MAX).min(MAX_SPAN_SECS);
    chrono::Duration::seconds(secs)
}

// Default value functions for serde
fn default_file_ttl() -> u64 { 300 }
fn default_task_ttl() -> u64 { 86_400 }
fn default_max_agents() -> usize { 8 }
fn default_stuck_timeout() -> u64 { 600 }
fn default_topology() -> String { "hierarchical-mesh".into() }
fn default_max_iterations() -> u32 { 15 }
fn default_max_budget() -> f64 { 20.0 }
fn default_cost_per_iteration() -> f64 { 2.0 }
fn default_max_consecutive_errors() -> u32 { 3 }
fn default_max_no_progress() -> u32 { 5 }
fn default_max_ci_failures() -> u32 { 3 }
fn default_min_interval() -> u64 { 10 }
fn default_max_per_hour() -> u32 { 100 }
fn default_summary_chars() -> usize { 500 }
fn default_transcript_tail() -> u64 { 256 * 1024 }
fn default_validation_timeout() -> u64 { 120 }
fn default_output_limit() -> usize { 2000 }
fn default_true() -> bool { true }

impl Config {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::parse_toml(&contents)
    }

    /// Parse config from a TOML string.
    pub fn parse_toml(toml_str: &str) -> anyhow::Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| ExitError::Config(format!("invalid {CONFIG_TOML}: {e}")).into())
    }

    /// Resolve the config that applies to `project_dir`.
    ///
    /// Returns the config and the file it was read from (None means defaults).
    pub fn resolve(project_dir: &Path) -> anyhow::Result<(Self, Option<PathBuf>)> {
        match find_config(project_dir, &default_state_root()) {
            Some(path) => Ok((Self::load(&path)?, Some(path))),
            None => Ok((Self::default(), None)),
        }
    }

    /// Effective state root: `HIVE_HOOKS_HOME`, then `state_dir`, then `~/.hive-hooks`.
    pub fn state_root(&self) -> PathBuf {
        if std::env::var(HOME_ENV).is_ok_and(|v| !v.trim().is_empty()) {
            return default_state_root();
        }
        self.state_dir.clone().unwrap_or_else(default_state_root)
    }

    /// Serialize config to a TOML string with helpful comments.
    pub fn to_toml(&self) -> anyhow::Result<String> {
        let raw = toml::to_string_pretty(self).context("serializing config to TOML")?;

        let mut doc: toml_edit::DocumentMut = raw
            .parse()
            .context("parsing generated TOML for comment injection")?;

        doc.decor_mut()
            .set_prefix("# hive-hooks configuration\n# Every key is optional; omitted keys use the defaults shown here.\n\n");

        fn set_table_comment(doc: &mut toml_edit::DocumentMut, key: &str, comment: &str) {
            if let Some(tbl) = doc.get_mut(key).and_then(|item| item.as_table_mut()) {
                tbl.decor_mut().set_prefix(comment);
            }
        }

        set_table_comment(&mut doc, "claims", "\n# File and task claim expiry\n");
        set_table_comment(&mut doc, "hive", "\n# Agent tracking\n");
        set_table_comment(
            &mut doc,
            "ralph",
            "\n# Ralph loop circuit breakers (budget is iterations x cost_per_iteration_usd)\n",
        );

        Ok(doc.to_string())
    }
}
