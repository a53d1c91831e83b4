use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::Fault;
use crate::store;

/// Where a loop state record came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopSource {
    /// Authored by the Ralph plugin inside the project.
    Plugin,
    /// Persisted by this controller under the state root.
    #[default]
    Internal,
}

/// Per-project iteration state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopState {
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub iteration: u32,
    #[serde(default, alias = "prompt")]
    pub original_prompt: String,
    /// Per-loop override of the configured iteration ceiling.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<u32>,
    /// Phrase that, when present in the transcript, counts as a success claim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_promise: Option<String>,
    #[serde(default)]
    pub consecutive_errors: u32,
    #[serde(default)]
    pub consecutive_no_progress: u32,
    #[serde(default)]
    pub consecutive_ci_failures: u32,
    #[serde(default)]
    pub last_summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_ci_passed: Option<bool>,
    #[serde(default)]
    pub source: LoopSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(rename = "_checksum", default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

impl LoopState {
    pub fn new(prompt: &str, now: DateTime<Utc>) -> Self {
        Self {
            active: true,
            iteration: 0,
            original_prompt: prompt.to_string(),
            max_iterations: None,
            completion_promise: None,
            consecutive_errors: 0,
            consecutive_no_progress: 0,
            consecutive_ci_failures: 0,
            last_summary: String::new(),
            last_ci_passed: None,
            source: LoopSource::Internal,
            started_at: Some(now),
            updated_at: Some(now),
            checksum: None,
        }
    }

    /// Hash over every field except `_checksum`.
    pub fn compute_checksum(&self) -> String {
        let mut unsigned = self.clone();
        unsigned.checksum = None;
        let bytes = serde_json::to_vec(&unsigned).unwrap_or_default();
        let digest = format!("{:x}", Sha256::digest(&bytes));
        digest[..16].to_string()
    }

    /// `None` when the record carries no checksum (e.g. hand-written by the
    /// plugin), otherwise whether it matches.
    pub fn verify_checksum(&self) -> Option<bool> {
        self.checksum
            .as_deref()
            .map(|stored| stored == self.compute_checksum())
    }

    pub fn seal(&mut self) {
        self.checksum = Some(self.compute_checksum());
    }
}

/// The two candidate files for one project's loop state.
#[derive(Debug, Clone)]
pub struct LoopStore {
    plugin: PathBuf,
    internal: PathBuf,
}

impl LoopStore {
    pub fn new(plugin: impl Into<PathBuf>, internal: impl Into<PathBuf>) -> Self {
        Self {
            plugin: plugin.into(),
            internal: internal.into(),
        }
    }

    /// Resolve the active loop: the plugin file wins over internal state.
    ///
    /// Unparseable files are treated as absent. A checksum mismatch is logged
    /// and otherwise ignored.
    pub fn resolve(&self) -> Result<Option<LoopState>, Fault> {
        for (path, source) in [
            (&self.plugin, LoopSource::Plugin),
            (&self.internal, LoopSource::Internal),
        ] {
            let loaded = match store::load::<LoopState>(path) {
                Ok(state) => state,
                Err(Fault::Corrupt { path, source: err }) => {
                    warn!(path = %path.display(), error = %err, "unreadable loop state, ignoring");
                    None
                }
                Err(fault) => return Err(fault),
            };
            let Some(mut state) = loaded else { continue };
            if !state.active {
                continue;
            }
            if state.verify_checksum() == Some(false) {
                warn!(
                    path = %path.display(),
                    iteration = state.iteration,
                    "loop state checksum mismatch, continuing"
                );
            }
            state.source = source;
            debug!(path = %path.display(), ?source, iteration = state.iteration, "loop state resolved");
            return Ok(Some(state));
        }
        Ok(None)
    }

    /// Seal and write `state` back to the file it came from.
    pub fn save(&self, state: &mut LoopState) -> Result<(), Fault> {
        state.seal();
        store::save(self.path_for(state.source), state)
    }

    /// Remove the state file for `source`; the loop becomes inactive.
    pub fn deactivate(&self, source: LoopSource) -> Result<(), Fault> {
        store::remove(self.path_for(source))
    }

    pub fn path_for(&self, source: LoopSource) -> &std::path::Path {
        match source {
            LoopSource::Plugin => &self.plugin,
            LoopSource::Internal => &self.internal,
        }
    }
}
