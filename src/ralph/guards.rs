//! Circuit breakers evaluated on every iteration.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::state::LoopState;
use crate::config;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Breaker {
    RateLimit,
    Budget,
    MaxIterations,
    ConsecutiveErrors,
    NoProgress,
    CiFailures,
}

impl Breaker {
    pub fn as_str(self) -> &'static str {
        match self {
            Breaker::RateLimit => "rate_limit",
            Breaker::Budget => "budget",
            Breaker::MaxIterations => "max_iterations",
            Breaker::ConsecutiveErrors => "consecutive_errors",
            Breaker::NoProgress => "no_progress",
            Breaker::CiFailures => "ci_failures",
        }
    }
}

impl fmt::Display for Breaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tripped breaker and a human-readable explanation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trip {
    pub breaker: Breaker,
    pub detail: String,
}

impl Trip {
    fn new(breaker: Breaker, detail: String) -> Self {
        Self { breaker, detail }
    }
}

impl fmt::Display for Trip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.breaker, self.detail)
    }
}

/// One line of `ralph/iterations.jsonl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    pub ts: DateTime<Utc>,
    pub project: String,
    pub iteration: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,
}

/// Rolling-hour cap plus minimum spacing, computed over this project's
/// entries in the shared iteration log.
pub fn check_rate(
    history: &[IterationRecord],
    project: &str,
    now: DateTime<Utc>,
    max_per_hour: u32,
    min_interval_secs: u64,
) -> Option<Trip> {
    let hour_ago = now - Duration::hours(1);
    let mine = history.iter().filter(|r| r.project == project);

    let mut in_last_hour = 0u32;
    let mut latest: Option<DateTime<Utc>> = None;
    for record in mine {
        if record.ts > hour_ago {
            in_last_hour += 1;
        }
        latest = latest.max(Some(record.ts));
    }

    if in_last_hour >= max_per_hour {
        return Some(Trip::new(
            Breaker::RateLimit,
            format!("{in_last_hour} iterations in the last hour (limit {max_per_hour})"),
        ));
    }

    let min_gap = config::clamped_secs(min_interval_secs);
    if let Some(last) = latest {
        let gap = now - last;
        if gap < min_gap {
            return Some(Trip::new(
                Breaker::RateLimit,
                format!(
                    "{}s since the previous iteration (minimum {min_interval_secs}s)",
                    gap.num_seconds().max(0)
                ),
            ));
        }
    }
    None
}

/// Spend so far under the flat per-iteration cost model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BudgetCheck {
    pub spent: f64,
    pub ceiling: f64,
    pub exceeded: bool,
}

pub fn check_budget(iteration: u32, cost_per_iteration: f64, ceiling: f64) -> BudgetCheck {
    let spent = f64::from(iteration) * cost_per_iteration;
    BudgetCheck {
        spent,
        ceiling,
        exceeded: spent >= ceiling,
    }
}

impl BudgetCheck {
    pub fn trip(&self) -> Option<Trip> {
        self.exceeded.then(|| {
            Trip::new(
                Breaker::Budget,
                format!("spent ${:.2} of ${:.2}", self.spent, self.ceiling),
            )
        })
    }
}

pub fn check_max_iterations(iteration: u32, max: u32) -> Option<Trip> {
    (iteration >= max).then(|| {
        Trip::new(
            Breaker::MaxIterations,
            format!("reached iteration {iteration} of {max}"),
        )
    })
}

/// A failure signal extends the streak, anything else resets it.
pub fn track_errors(state: &mut LoopState, failure: Option<&str>, max: u32) -> Option<Trip> {
    match failure {
        Some(signal) => {
            state.consecutive_errors += 1;
            (state.consecutive_errors >= max).then(|| {
                Trip::new(
                    Breaker::ConsecutiveErrors,
                    format!(
                        "{} consecutive failing iterations (last: {signal})",
                        state.consecutive_errors
                    ),
                )
            })
        }
        None => {
            state.consecutive_errors = 0;
            None
        }
    }
}

/// Compare the output tail with the stored one.
pub fn track_progress(state: &mut LoopState, summary: &str, max: u32) -> Option<Trip> {
    if summary == state.last_summary {
        state.consecutive_no_progress += 1;
        (state.consecutive_no_progress >= max).then(|| {
            Trip::new(
                Breaker::NoProgress,
                format!(
                    "output unchanged for {} iterations",
                    state.consecutive_no_progress
                ),
            )
        })
    } else {
        state.consecutive_no_progress = 0;
        state.last_summary = summary.to_string();
        None
    }
}

/// Last `chars` characters of `text`, trimmed.
pub fn summarize(text: &str, chars: usize) -> String {
    let trimmed = text.trim();
    let count = trimmed.chars().count();
    trimmed.chars().skip(count.saturating_sub(chars)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(project: &str, ts: DateTime<Utc>) -> IterationRecord {
        IterationRecord {
            ts,
            project: project.to_string(),
            iteration: 1,
            outcome: None,
        }
    }

    #[test]
    fn budget_exceeded_at_iteration_ten() {
        let check = check_budget(10, 2.0, 20.0);
        assert!(check.exceeded);
        assert!((check.spent - 20.0).abs() < f64::EPSILON);
        assert_eq!(check.trip().unwrap().breaker, Breaker::Budget);

        assert!(!check_budget(9, 2.0, 20.0).exceeded);
    }

    #[test]
    fn max_iterations_trips_at_limit() {
        assert!(check_max_iterations(14, 15).is_none());
        assert_eq!(
            check_max_iterations(15, 15).unwrap().breaker,
            Breaker::MaxIterations
        );
    }

    #[test]
    fn three_errors_trip_on_the_third() {
        let mut state = LoopState::new("p", Utc::now());
        assert!(track_errors(&mut state, Some("error:"), 3).is_none());
        assert!(track_errors(&mut state, Some("error:"), 3).is_none());
        let trip = track_errors(&mut state, Some("error:"), 3).unwrap();
        assert_eq!(trip.breaker, Breaker::ConsecutiveErrors);
    }

    #[test]
    fn clean_turn_resets_error_streak() {
        let mut state = LoopState::new("p", Utc::now());
        track_errors(&mut state, Some("failed"), 3);
        track_errors(&mut state, Some("failed"), 3);
        assert!(track_errors(&mut state, None, 3).is_none());
        assert_eq!(state.consecutive_errors, 0);
        assert!(track_errors(&mut state, Some("failed"), 3).is_none());
    }

    #[test]
    fn identical_output_counts_as_no_progress() {
        let mut state = LoopState::new("p", Utc::now());
        assert!(track_progress(&mut state, "same", 2).is_none());
        assert_eq!(state.last_summary, "same");
        assert!(track_progress(&mut state, "same", 2).is_none());
        let trip = track_progress(&mut state, "same", 2).unwrap();
        assert_eq!(trip.breaker, Breaker::NoProgress);

        assert!(track_progress(&mut state, "different", 2).is_none());
        assert_eq!(state.consecutive_no_progress, 0);
    }

    #[test]
    fn summarize_keeps_the_tail() {
        assert_eq!(summarize("  abcdef \n", 3), "def");
        assert_eq!(summarize("ab", 10), "ab");
    }

    #[test]
    fn rate_limit_enforces_minimum_gap() {
        let now = Utc::now();
        let history = vec![record("p1", now - Duration::seconds(3))];
        let trip = check_rate(&history, "p1", now, 100, 10).unwrap();
        assert_eq!(trip.breaker, Breaker::RateLimit);

        assert!(check_rate(&history, "p1", now, 100, 2).is_none());
        assert!(check_rate(&history, "other", now, 100, 10).is_none());
    }

    #[test]
    fn rate_limit_enforces_hourly_cap() {
        let now = Utc::now();
        let mut history: Vec<_> = (1..=5)
            .map(|i| record("p1", now - Duration::minutes(i * 10)))
            .collect();
        history.push(record("p1", now - Duration::hours(2)));

        assert!(check_rate(&history, "p1", now, 5, 0).is_some());
        assert!(check_rate(&history, "p1", now, 6, 0).is_none());
    }

    #[test]
    fn unbounded_minimum_gap_trips_without_panicking() {
        let now = Utc::now();
        let history = vec![record("p1", now - Duration::days(30))];
        let trip = check_rate(&history, "p1", now, 100, u64::MAX).unwrap();
        assert_eq!(trip.breaker, Breaker::RateLimit);
    }
}
