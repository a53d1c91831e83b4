use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::guards::{self, Breaker, IterationRecord, Trip};
use super::signals::{Evidence, KeywordDetector, SignalDetector};
use super::state::{LoopSource, LoopState, LoopStore};
use super::validation::{CommandValidator, PhaseResult, ValidationReport, Validator};
use crate::config::RalphConfig;
use crate::error::{FailOpen, Fault};
use crate::layout::{StateLayout, plugin_loop_state, project_hash};
use crate::store;
use crate::template::{self, ContinuationContext, PhaseLine, ProgressContext};

type Clock = Box<dyn Fn() -> DateTime<Utc>>;

/// Iteration log records older than this are dropped when a new one is
/// written. Covers the rolling hour the rate limiter looks at.
const LOG_RETENTION_HOURS: i64 = 24;

/// What the agent said when it tried to stop.
#[derive(Debug, Clone, Default)]
pub struct StopInput {
    pub text: String,
    pub exit_status: Option<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "breaker")]
pub enum StopKind {
    /// Success claimed and independently verified.
    Completed,
    Tripped(Breaker),
}

/// Result of one Stop-hook invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "decision")]
pub enum StopDecision {
    /// No active loop for this project.
    Inactive,
    /// Block the stop and feed `prompt` back to the agent.
    Continue {
        iteration: u32,
        prompt: String,
        status: String,
    },
    /// Let the agent stop; the loop has been deactivated.
    Stop {
        iteration: u32,
        kind: StopKind,
        reason: String,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum LoopError {
    #[error("a loop is already active ({source_kind:?}, iteration {iteration})")]
    AlreadyActive { source_kind: LoopSource, iteration: u32 },

    #[error(transparent)]
    Fault(#[from] Fault),
}

/// Snapshot for `ralph status`.
#[derive(Debug, Clone, Serialize)]
pub struct LoopStatus {
    pub active: bool,
    pub project: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<LoopState>,
    pub max_iterations: u32,
    pub spent_usd: f64,
    pub budget_usd: f64,
    /// `None` when unsigned, `Some(false)` when the file was edited by hand.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum_ok: Option<bool>,
    pub recent: Vec<IterationRecord>,
}

/// Drives the Ralph loop from the Stop hook.
pub struct LoopController {
    layout: StateLayout,
    config: RalphConfig,
    detector: Box<dyn SignalDetector>,
    validator: Box<dyn Validator>,
    clock: Clock,
}

impl LoopController {
    pub fn new(layout: StateLayout, config: RalphConfig) -> Self {
        let validator = CommandValidator::new(config.validation.clone());
        Self {
            layout,
            config,
            detector: Box::new(KeywordDetector),
            validator: Box::new(validator),
            clock: Box::new(Utc::now),
        }
    }

    #[must_use]
    pub fn with_validator(mut self, validator: impl Validator + 'static) -> Self {
        self.validator = Box::new(validator);
        self
    }

    #[must_use]
    pub fn with_detector(mut self, detector: impl SignalDetector + 'static) -> Self {
        self.detector = Box::new(detector);
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    fn store(&self, project_dir: &Path) -> LoopStore {
        LoopStore::new(
            plugin_loop_state(project_dir),
            self.layout.loop_state(project_dir),
        )
    }

    fn max_iterations(&self, state: &LoopState) -> u32 {
        state.max_iterations.unwrap_or(self.config.max_iterations)
    }

    /// Begin a loop for `project_dir` with internal state.
    pub fn start_loop(
        &self,
        project_dir: &Path,
        prompt: &str,
        max_iterations: Option<u32>,
        completion_promise: Option<&str>,
        force: bool,
    ) -> Result<LoopState, LoopError> {
        let loops = self.store(project_dir);
        if let Some(existing) = loops.resolve()? {
            if !force {
                return Err(LoopError::AlreadyActive {
                    source_kind: existing.source,
                    iteration: existing.iteration,
                });
            }
            loops.deactivate(existing.source)?;
        }

        let mut state = LoopState::new(prompt, (self.clock)());
        state.max_iterations = max_iterations;
        state.completion_promise = completion_promise.map(String::from);
        loops.save(&mut state)?;
        info!(project = %project_dir.display(), "ralph loop started");
        Ok(state)
    }

    /// Deactivate the active loop, returning what it looked like.
    pub fn cancel_loop(&self, project_dir: &Path) -> Result<Option<LoopState>, Fault> {
        let loops = self.store(project_dir);
        let Some(state) = loops.resolve()? else {
            return Ok(None);
        };
        loops.deactivate(state.source)?;
        self.record(project_dir, &state, "cancelled", None, Some("cancelled by user"));
        info!(project = %project_dir.display(), iteration = state.iteration, "ralph loop cancelled");
        Ok(Some(state))
    }

    /// Read-only view of the loop for `project_dir`.
    pub fn loop_status(&self, project_dir: &Path) -> Result<LoopStatus, Fault> {
        let loops = self.store(project_dir);
        let state = loops.resolve()?;
        let project = project_hash(project_dir);

        let history: Vec<IterationRecord> = store::read_jsonl(&self.layout.iteration_log())?;
        let mut recent: Vec<_> = history.into_iter().filter(|r| r.project == project).collect();
        let keep = recent.len().saturating_sub(5);
        recent.drain(..keep);

        let iteration = state.as_ref().map_or(0, |s| s.iteration);
        let budget = guards::check_budget(
            iteration,
            self.config.cost_per_iteration_usd,
            self.config.max_budget_usd,
        );

        Ok(LoopStatus {
            active: state.is_some(),
            project,
            state_file: state
                .as_ref()
                .map(|s| loops.path_for(s.source).to_path_buf()),
            max_iterations: state
                .as_ref()
                .map_or(self.config.max_iterations, |s| self.max_iterations(s)),
            spent_usd: budget.spent,
            budget_usd: budget.ceiling,
            checksum_ok: state.as_ref().and_then(LoopState::verify_checksum),
            state,
            recent,
        })
    }

    /// One Stop-hook invocation.
    pub fn on_stop(&self, project_dir: &Path, input: &StopInput) -> Result<StopDecision, Fault> {
        let loops = self.store(project_dir);
        let Some(mut state) = loops.resolve()? else {
            debug!("no active loop");
            return Ok(StopDecision::Inactive);
        };

        let now = (self.clock)();
        state.iteration += 1;
        state.updated_at = Some(now);
        let iteration = state.iteration;
        let max_iterations = self.max_iterations(&state);
        let project = project_hash(project_dir);
        let evidence = Evidence {
            text: &input.text,
            exit_status: input.exit_status,
            completion_promise: state.completion_promise.as_deref(),
        };

        let history: Vec<IterationRecord> = store::read_jsonl(&self.layout.iteration_log())
            .fail_open("read iteration log", Vec::new());
        let budget = guards::check_budget(
            iteration,
            self.config.cost_per_iteration_usd,
            self.config.max_budget_usd,
        );
        let failure = self.detector.failure(&evidence);
        let success = self.detector.success(&evidence);
        let summary = guards::summarize(&input.text, self.config.summary_chars);

        let mut trips: Vec<Trip> = Vec::new();
        trips.extend(guards::check_rate(
            &history,
            &project,
            now,
            self.config.max_iterations_per_hour,
            self.config.min_interval_secs,
        ));
        trips.extend(budget.trip());
        trips.extend(guards::check_max_iterations(iteration, max_iterations));
        trips.extend(guards::track_errors(
            &mut state,
            failure.as_deref(),
            self.config.max_consecutive_errors,
        ));
        trips.extend(guards::track_progress(
            &mut state,
            &summary,
            self.config.max_no_progress,
        ));

        let mut validation: Option<ValidationReport> = None;
        if trips.is_empty() {
            if let Some(signal) = success {
                let report = self.validator.validate(project_dir);
                if report.verified() {
                    let reason = format!(
                        "Loop complete at iteration {iteration}: agent reported \"{signal}\" and {}.",
                        report.summary()
                    );
                    info!(iteration, %signal, "ralph loop exit criteria met");
                    state.last_ci_passed = Some(true);
                    return Ok(self.finish(
                        &loops,
                        project_dir,
                        &state,
                        StopKind::Completed,
                        reason,
                        Some(&report),
                    ));
                }
                info!(iteration, %signal, checks = %report.summary(), "success claimed but checks fail");
                validation = Some(report);
            }
        }

        if let Some(trip) = trips.first() {
            warn!(iteration, breaker = %trip.breaker, detail = %trip.detail, tripped = trips.len(), "circuit breaker tripped");
            let reason = format!("Loop stopped at iteration {iteration}: {trip}.");
            return Ok(self.finish(
                &loops,
                project_dir,
                &state,
                StopKind::Tripped(trip.breaker),
                reason,
                None,
            ));
        }

        let report = validation.unwrap_or_else(|| self.validator.validate(project_dir));
        let ci_passed = report.passed();
        state.last_ci_passed = Some(ci_passed);
        if ci_passed {
            state.consecutive_ci_failures = 0;
        } else {
            state.consecutive_ci_failures += 1;
            if state.consecutive_ci_failures >= self.config.max_ci_failures {
                let trip = Trip {
                    breaker: Breaker::CiFailures,
                    detail: format!(
                        "{} consecutive failing validations ({})",
                        state.consecutive_ci_failures,
                        report.summary()
                    ),
                };
                warn!(iteration, detail = %trip.detail, "circuit breaker tripped");
                let reason = format!("Loop stopped at iteration {iteration}: {trip}.");
                return Ok(self.finish(
                    &loops,
                    project_dir,
                    &state,
                    StopKind::Tripped(Breaker::CiFailures),
                    reason,
                    Some(&report),
                ));
            }
        }

        loops.save(&mut state)?;
        self.record(project_dir, &state, "continue", Some(&report), None);

        let ctx = ContinuationContext {
            prompt: state.original_prompt.clone(),
            iteration,
            max_iterations,
            ci: ci_label(ci_passed).to_string(),
            spent: format!("{:.2}", budget.spent),
            budget: format!("{:.2}", budget.ceiling),
            failing: report
                .phases
                .iter()
                .filter(|p| !p.outcome.is_pass())
                .map(phase_line)
                .collect(),
            progress_file: Some(self.layout.loop_progress(project_dir).display().to_string()),
        };
        let status = template::status_line(&ctx);
        let prompt = template::render_continuation(&ctx).unwrap_or_else(|e| {
            warn!(error = %e, "continuation template failed, using plain prompt");
            format!("{}\n\n---\n{status}", ctx.prompt)
        });
        info!(iteration, max_iterations, ci = ci_label(ci_passed), "ralph loop continues");

        Ok(StopDecision::Continue {
            iteration,
            prompt,
            status,
        })
    }

    fn finish(
        &self,
        loops: &LoopStore,
        project_dir: &Path,
        state: &LoopState,
        kind: StopKind,
        reason: String,
        report: Option<&ValidationReport>,
    ) -> StopDecision {
        loops
            .deactivate(state.source)
            .fail_open("deactivate loop", ());
        let outcome = match kind {
            StopKind::Completed => "completed".to_string(),
            StopKind::Tripped(breaker) => format!("stopped ({breaker})"),
        };
        self.record(project_dir, state, &outcome, report, Some(&reason));
        StopDecision::Stop {
            iteration: state.iteration,
            kind,
            reason,
        }
    }

    /// Append to the iteration log and the progress file. Best effort.
    fn record(
        &self,
        project_dir: &Path,
        state: &LoopState,
        outcome: &str,
        report: Option<&ValidationReport>,
        reason: Option<&str>,
    ) {
        let now = (self.clock)();
        store::append_jsonl(
            &self.layout.iteration_log(),
            &IterationRecord {
                ts: now,
                project: project_hash(project_dir),
                iteration: state.iteration,
                outcome: Some(outcome.to_string()),
            },
        )
        .fail_open("append iteration log", ());
        let cutoff = now - chrono::Duration::hours(LOG_RETENTION_HOURS);
        store::compact_jsonl(&self.layout.iteration_log(), |r: &IterationRecord| r.ts >= cutoff)
            .fail_open("compact iteration log", 0);

        let entry = template::render_progress_entry(&ProgressContext {
            iteration: state.iteration,
            timestamp: now.to_rfc3339(),
            outcome: outcome.to_string(),
            ci: report.map_or("not run", |r| ci_label(r.passed())).to_string(),
            phases: report
                .map(|r| r.phases.iter().map(phase_line).collect())
                .unwrap_or_default(),
            reason: reason.map(String::from),
        });
        match entry {
            Ok(entry) => store::append_text(&self.layout.loop_progress(project_dir), &entry)
                .fail_open("append progress entry", ()),
            Err(e) => warn!(error = %e, "progress template failed"),
        }
    }
}

fn ci_label(passed: bool) -> &'static str {
    if passed { "pass" } else { "fail" }
}

fn phase_line(phase: &PhaseResult) -> PhaseLine {
    let detail = match &phase.command {
        Some(command) => format!("{} (`{command}`)", phase.outcome),
        None => phase.outcome.to_string(),
    };
    PhaseLine {
        name: phase.phase.as_str().to_string(),
        detail,
    }
}
