//! File claims: exclusive, TTL-bounded ownership of a file path.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config;
use crate::error::Fault;
use crate::store;

/// Ownership of one file path until `expires_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    pub file: String,
    pub owner: String,
    pub claimed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Claim {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn is_owned_by(&self, owner: &str) -> bool {
        self.owner == owner
    }
}

/// On-disk shape of `coordination/claims.json`.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ClaimsFile {
    #[serde(default)]
    pub claims: BTreeMap<String, Claim>,
}

impl ClaimsFile {
    /// Drop expired claims and return how many were removed.
    fn purge_expired(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.claims.len();
        self.claims.retain(|_, c| !c.is_expired(now));
        before - self.claims.len()
    }
}

/// Result of a claim request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClaimOutcome {
    pub granted: bool,
    pub reason: String,
    /// Current owner of the file after the call.
    pub owner: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl ClaimOutcome {
    /// Grant issued because the registry could not be consulted.
    pub fn fail_open() -> Self {
        Self {
            granted: true,
            reason: "claim registry unavailable; proceeding without a claim".to_string(),
            owner: None,
            expires_at: None,
        }
    }
}

/// Registry of file claims backed by one JSON file.
#[derive(Debug, Clone)]
pub struct FileClaimRegistry {
    path: PathBuf,
    ttl: Duration,
}

impl FileClaimRegistry {
    pub fn new(path: impl Into<PathBuf>, ttl_secs: u64) -> Self {
        Self {
            path: path.into(),
            ttl: config::clamped_secs(ttl_secs),
        }
    }

    /// Claim `file` for `owner`.
    pub fn claim(&self, file: &Path, owner: &str) -> Result<ClaimOutcome, Fault> {
        self.claim_at(file, owner, Utc::now())
    }

    pub fn claim_at(
        &self,
        file: &Path,
        owner: &str,
        now: DateTime<Utc>,
    ) -> Result<ClaimOutcome, Fault> {
        let key = normalize(file)?;
        let ttl = self.ttl;

        store::update(&self.path, |state: &mut ClaimsFile| {
            let purged = state.purge_expired(now);
            if purged > 0 {
                debug!(purged, "purged expired file claims");
            }

            if let Some(existing) = state.claims.get_mut(&key) {
                if !existing.is_owned_by(owner) {
                    info!(file = %key, owner = %existing.owner, requester = owner, "file claim denied");
                    return ClaimOutcome {
                        granted: false,
                        reason: format!(
                            "{key} is claimed by {} until {}",
                            existing.owner,
                            existing.expires_at.to_rfc3339()
                        ),
                        owner: Some(existing.owner.clone()),
                        expires_at: Some(existing.expires_at),
                    };
                }
                existing.expires_at = now + ttl;
                return ClaimOutcome {
                    granted: true,
                    reason: "claim refreshed".to_string(),
                    owner: Some(owner.to_string()),
                    expires_at: Some(existing.expires_at),
                };
            }

            let claim = Claim {
                file: key.clone(),
                owner: owner.to_string(),
                claimed_at: now,
                expires_at: now + ttl,
            };
            let expires_at = claim.expires_at;
            state.claims.insert(key.clone(), claim);
            debug!(file = %key, owner, "file claimed");
            ClaimOutcome {
                granted: true,
                reason: "claim granted".to_string(),
                owner: Some(owner.to_string()),
                expires_at: Some(expires_at),
            }
        })
    }

    /// Release `file` if `owner` holds it. Returns whether a claim was removed.
    ///
    /// Releasing someone else's claim leaves the file untouched.
    pub fn release(&self, file: &Path, owner: &str) -> Result<bool, Fault> {
        self.release_at(file, owner, Utc::now())
    }

    pub fn release_at(&self, file: &Path, owner: &str, now: DateTime<Utc>) -> Result<bool, Fault> {
        let key = normalize(file)?;
        let mut state: ClaimsFile = store::load_or_default(&self.path)?;

        let owned = state
            .claims
            .get(&key)
            .is_some_and(|c| c.is_owned_by(owner) && !c.is_expired(now));
        if !owned {
            return Ok(false);
        }

        state.claims.remove(&key);
        state.purge_expired(now);
        store::save(&self.path, &state)?;
        debug!(file = %key, owner, "file claim released");
        Ok(true)
    }

    /// Release every claim held by `owner`. Returns the released paths.
    pub fn release_all(&self, owner: &str) -> Result<Vec<String>, Fault> {
        let now = Utc::now();
        let mut state: ClaimsFile = store::load_or_default(&self.path)?;
        let released: Vec<String> = state
            .claims
            .values()
            .filter(|c| c.is_owned_by(owner))
            .map(|c| c.file.clone())
            .collect();
        let purged = state.purge_expired(now);
        if released.is_empty() && purged == 0 {
            return Ok(released);
        }
        state.claims.retain(|_, c| !c.is_owned_by(owner));
        store::save(&self.path, &state)?;
        if !released.is_empty() {
            info!(owner, count = released.len(), "released file claims");
        }
        Ok(released)
    }

    /// Live claims, without modifying the file.
    pub fn list(&self) -> Result<Vec<Claim>, Fault> {
        self.list_at(Utc::now())
    }

    pub fn list_at(&self, now: DateTime<Utc>) -> Result<Vec<Claim>, Fault> {
        let state: ClaimsFile = store::load_or_default(&self.path)?;
        Ok(state
            .claims
            .into_values()
            .filter(|c| !c.is_expired(now))
            .collect())
    }
}

/// Claims are keyed by absolute path; relative paths resolve against the
/// process working directory.
fn normalize(file: &Path) -> Result<String, Fault> {
    std::path::absolute(file)
        .map(|p| p.to_string_lossy().into_owned())
        .map_err(|e| Fault::io(file, e))
}
