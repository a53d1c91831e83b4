//! Task claims: advisory, non-blocking ownership of a logical work item.
//!
//! A second agent claiming an already-claimed task always succeeds; the
//! registry keeps the latest owner and remembers who it was handed off from.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config;
use crate::error::Fault;
use crate::store;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskClaim {
    pub task_id: String,
    pub owner: String,
    pub claimed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_owner: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct TaskClaimsFile {
    #[serde(default)]
    pub claims: BTreeMap<String, TaskClaim>,
}

/// Registry of task claims backed by one JSON file.
#[derive(Debug, Clone)]
pub struct TaskClaimRegistry {
    path: PathBuf,
    ttl: Duration,
}

impl TaskClaimRegistry {
    pub fn new(path: impl Into<PathBuf>, ttl_secs: u64) -> Self {
        Self {
            path: path.into(),
            ttl: config::clamped_secs(ttl_secs),
        }
    }

    /// Record `owner` as the latest claimant of `task_id`. Never denies.
    pub fn claim(&self, task_id: &str, owner: &str) -> Result<TaskClaim, Fault> {
        self.claim_at(task_id, owner, Utc::now())
    }

    pub fn claim_at(
        &self,
        task_id: &str,
        owner: &str,
        now: DateTime<Utc>,
    ) -> Result<TaskClaim, Fault> {
        let ttl = self.ttl;
        store::update(&self.path, |state: &mut TaskClaimsFile| {
            state.claims.retain(|_, c| c.expires_at > now);

            let previous_owner = state
                .claims
                .get(task_id)
                .filter(|c| c.owner != owner)
                .map(|c| c.owner.clone());
            if let Some(prev) = &previous_owner {
                info!(task_id, from = %prev, to = owner, "task claim handed off");
            }

            let claimed_at = state
                .claims
                .get(task_id)
                .filter(|c| c.owner == owner)
                .map_or(now, |c| c.claimed_at);

            let claim = TaskClaim {
                task_id: task_id.to_string(),
                owner: owner.to_string(),
                claimed_at,
                expires_at: now + ttl,
                previous_owner,
            };
            state.claims.insert(task_id.to_string(), claim.clone());
            debug!(task_id, owner, "task claimed");
            claim
        })
    }

    /// Release `task_id` if `owner` is its latest claimant.
    pub fn release(&self, task_id: &str, owner: &str) -> Result<bool, Fault> {
        let mut state: TaskClaimsFile = store::load_or_default(&self.path)?;
        if !state.claims.get(task_id).is_some_and(|c| c.owner == owner) {
            return Ok(false);
        }
        state.claims.remove(task_id);
        store::save(&self.path, &state)?;
        Ok(true)
    }

    /// Current owner of `task_id`, if any.
    pub fn owner_of(&self, task_id: &str) -> Result<Option<String>, Fault> {
        let now = Utc::now();
        let state: TaskClaimsFile = store::load_or_default(&self.path)?;
        Ok(state
            .claims
            .get(task_id)
            .filter(|c| c.expires_at > now)
            .map(|c| c.owner.clone()))
    }

    pub fn list(&self) -> Result<Vec<TaskClaim>, Fault> {
        let now = Utc::now();
        let state: TaskClaimsFile = store::load_or_default(&self.path)?;
        Ok(state
            .claims
            .into_values()
            .filter(|c| c.expires_at > now)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(dir: &std::path::Path) -> TaskClaimRegistry {
        TaskClaimRegistry::new(dir.join("task-claims.json"), 3600)
    }

    #[test]
    fn second_claim_is_never_denied_and_records_handoff() {
        let temp = tempfile::tempdir().unwrap();
        let reg = registry(temp.path());

        let first = reg.claim("task-7", "agent-1").unwrap();
        assert!(first.previous_owner.is_none());

        let second = reg.claim("task-7", "agent-2").unwrap();
        assert_eq!(second.owner, "agent-2");
        assert_eq!(second.previous_owner.as_deref(), Some("agent-1"));

        let all = reg.list().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(reg.owner_of("task-7").unwrap().as_deref(), Some("agent-2"));
    }

    #[test]
    fn reclaim_by_same_owner_keeps_claimed_at() {
        let temp = tempfile::tempdir().unwrap();
        let reg = registry(temp.path());
        let t0 = Utc::now();

        reg.claim_at("task-1", "agent-1", t0).unwrap();
        let again = reg.claim_at("task-1", "agent-1", t0 + Duration::seconds(60)).unwrap();
        assert_eq!(again.claimed_at, t0);
        assert!(again.previous_owner.is_none());
    }

    #[test]
    fn stale_task_claims_are_purged() {
        let temp = tempfile::tempdir().unwrap();
        let reg = registry(temp.path());
        let t0 = Utc::now() - Duration::seconds(7200);

        reg.claim_at("old", "agent-1", t0).unwrap();
        reg.claim("new", "agent-2").unwrap();

        let all = reg.list().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].task_id, "new");
    }

    #[test]
    fn release_requires_latest_owner() {
        let temp = tempfile::tempdir().unwrap();
        let reg = registry(temp.path());

        reg.claim("task-1", "agent-1").unwrap();
        reg.claim("task-1", "agent-2").unwrap();
        assert!(!reg.release("task-1", "agent-1").unwrap());
        assert!(reg.release("task-1", "agent-2").unwrap());
        assert!(reg.owner_of("task-1").unwrap().is_none());
    }

    #[test]
    fn unbounded_ttl_is_clamped_not_overflowed() {
        let temp = tempfile::tempdir().unwrap();
        let reg = TaskClaimRegistry::new(temp.path().join("task-claims.json"), u64::MAX);
        let now = Utc::now();

        let claim = reg.claim_at("task-1", "agent-1", now).unwrap();
        assert!(claim.expires_at > now + Duration::days(365));
    }
}
