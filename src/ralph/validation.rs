//! Independent re-verification of an iteration: tests, then lint.

use std::fmt;
use std::path::Path;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::ValidationConfig;
use crate::error::ExitError;
use crate::subprocess::{Tool, truncate_tail};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Test,
    Lint,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Test => "tests",
            Phase::Lint => "lint",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PhaseOutcome {
    Passed,
    Failed { exit_code: i32 },
    TimedOut { timeout_secs: u64 },
    /// The command could not be started at all.
    Error { message: String },
    /// No command configured or detected.
    Skipped,
}

impl PhaseOutcome {
    pub fn is_pass(&self) -> bool {
        matches!(self, PhaseOutcome::Passed | PhaseOutcome::Skipped)
    }
}

impl fmt::Display for PhaseOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PhaseOutcome::Passed => f.write_str("pass"),
            PhaseOutcome::Failed { exit_code } => write!(f, "fail (exit {exit_code})"),
            PhaseOutcome::TimedOut { timeout_secs } => write!(f, "timeout after {timeout_secs}s"),
            PhaseOutcome::Error { message } => write!(f, "error ({message})"),
            PhaseOutcome::Skipped => f.write_str("skipped"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseResult {
    pub phase: Phase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    pub outcome: PhaseOutcome,
    /// Combined output, tail-truncated.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub output: String,
    pub duration_ms: u64,
}

impl PhaseResult {
    pub fn skipped(phase: Phase) -> Self {
        Self {
            phase,
            command: None,
            outcome: PhaseOutcome::Skipped,
            output: String::new(),
            duration_ms: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ValidationReport {
    pub phases: Vec<PhaseResult>,
}

impl ValidationReport {
    pub fn passed(&self) -> bool {
        self.phases.iter().all(|p| p.outcome.is_pass())
    }

    /// Passed, and at least one phase actually ran. A report made only of
    /// skipped phases is not evidence that the work is done.
    pub fn verified(&self) -> bool {
        self.passed()
            && self
                .phases
                .iter()
                .any(|p| p.outcome == PhaseOutcome::Passed)
    }

    /// One-line summary, e.g. `tests pass, lint fail (exit 1)`.
    pub fn summary(&self) -> String {
        if self.phases.is_empty() {
            return "no checks".to_string();
        }
        self.phases
            .iter()
            .map(|p| format!("{} {}", p.phase.as_str(), p.outcome))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Runs the project's checks. Implementations never fail: problems become
/// failing phases.
pub trait Validator {
    fn validate(&self, project_dir: &Path) -> ValidationReport;
}

/// Commands discovered from project markers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetectedCommands {
    pub test: Option<String>,
    pub lint: Option<String>,
}

/// Guess test and lint commands from the files at the project root.
pub fn detect_commands(project_dir: &Path) -> DetectedCommands {
    let has = |name: &str| project_dir.join(name).is_file();

    if has("Cargo.toml") {
        return DetectedCommands {
            test: Some("cargo test --quiet".into()),
            lint: Some("cargo clippy --quiet -- -D warnings".into()),
        };
    }
    if has("package.json") {
        let scripts = std::fs::read_to_string(project_dir.join("package.json"))
            .ok()
            .and_then(|raw| serde_json::from_str::<serde_json::Value>(&raw).ok())
            .and_then(|pkg| pkg.get("scripts").cloned())
            .unwrap_or_default();
        return DetectedCommands {
            test: scripts.get("test").map(|_| "npm test --silent".into()),
            lint: scripts.get("lint").map(|_| "npm run lint --silent".into()),
        };
    }
    if has("pyproject.toml") || has("setup.py") {
        let uses_ruff = std::fs::read_to_string(project_dir.join("pyproject.toml"))
            .is_ok_and(|raw| raw.contains("ruff"));
        return DetectedCommands {
            test: Some("python -m pytest -q".into()),
            lint: uses_ruff.then(|| "ruff check .".into()),
        };
    }
    if has("go.mod") {
        return DetectedCommands {
            test: Some("go test ./...".into()),
            lint: Some("go vet ./...".into()),
        };
    }
    if has("Makefile") {
        let makefile = std::fs::read_to_string(project_dir.join("Makefile")).unwrap_or_default();
        let target = |name: &str| {
            makefile
                .lines()
                .any(|line| line.starts_with(&format!("{name}:")))
                .then(|| format!("make {name}"))
        };
        return DetectedCommands {
            test: target("test"),
            lint: target("lint"),
        };
    }
    DetectedCommands::default()
}

/// Shell-command validator driven by `[ralph.validation]`.
#[derive(Debug, Clone)]
pub struct CommandValidator {
    config: ValidationConfig,
}

impl CommandValidator {
    pub fn new(config: ValidationConfig) -> Self {
        Self { config }
    }

    /// Configured commands, falling back to detection per phase.
    pub fn commands(&self, project_dir: &Path) -> DetectedCommands {
        let detected = if self.config.auto_detect {
            detect_commands(project_dir)
        } else {
            DetectedCommands::default()
        };
        DetectedCommands {
            test: self.config.test_command.clone().or(detected.test),
            lint: self.config.lint_command.clone().or(detected.lint),
        }
    }

    fn run_phase(&self, phase: Phase, command: Option<&str>, project_dir: &Path) -> PhaseResult {
        let Some(command) = command.map(str::trim).filter(|c| !c.is_empty()) else {
            debug!(phase = phase.as_str(), "no command, skipping");
            return PhaseResult::skipped(phase);
        };

        let started = Instant::now();
        let result = Tool::shell(command)
            .current_dir(project_dir)
            .timeout(Duration::from_secs(self.config.timeout_secs))
            .run();
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let (outcome, output) = match result {
            Ok(out) if out.success() => (PhaseOutcome::Passed, out.combined()),
            Ok(out) => (
                PhaseOutcome::Failed {
                    exit_code: out.exit_code,
                },
                out.combined(),
            ),
            Err(e) => match e.downcast_ref::<ExitError>() {
                Some(ExitError::Timeout { timeout_secs, .. }) => (
                    PhaseOutcome::TimedOut {
                        timeout_secs: *timeout_secs,
                    },
                    String::new(),
                ),
                _ => (
                    PhaseOutcome::Error {
                        message: e.to_string(),
                    },
                    String::new(),
                ),
            },
        };

        if outcome.is_pass() {
            info!(phase = phase.as_str(), command, duration_ms, "validation phase passed");
        } else {
            warn!(phase = phase.as_str(), command, %outcome, duration_ms, "validation phase failed");
        }

        PhaseResult {
            phase,
            command: Some(command.to_string()),
            outcome,
            output: truncate_tail(&output, self.config.output_limit),
            duration_ms,
        }
    }
}

impl Validator for CommandValidator {
    fn validate(&self, project_dir: &Path) -> ValidationReport {
        let commands = self.commands(project_dir);
        ValidationReport {
            phases: vec![
                self.run_phase(Phase::Test, commands.test.as_deref(), project_dir),
                self.run_phase(Phase::Lint, commands.lint.as_deref(), project_dir),
            ],
        }
    }
}
