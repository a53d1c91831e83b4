//! Where every piece of shared state lives on disk.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

/// Paths under the state root.
///
/// ```text
/// <root>/coordination/claims.json
/// <root>/coordination/task-claims.json
/// <root>/coordination/session_id
/// <root>/hive/state.json
/// <root>/ralph/state_<hash>.json
/// <root>/ralph/progress_<hash>.md
/// <root>/ralph/iterations.jsonl
/// ```
#[derive(Debug, Clone)]
pub struct StateLayout {
    root: PathBuf,
}

impl StateLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn claims(&self) -> PathBuf {
        self.root.join("coordination").join("claims.json")
    }

    pub fn task_claims(&self) -> PathBuf {
        self.root.join("coordination").join("task-claims.json")
    }

    pub fn session_id(&self) -> PathBuf {
        self.root.join("coordination").join("session_id")
    }

    pub fn hive_state(&self) -> PathBuf {
        self.root.join("hive").join("state.json")
    }

    pub fn loop_state(&self, project_dir: &Path) -> PathBuf {
        self.root
            .join("ralph")
            .join(format!("state_{}.json", project_hash(project_dir)))
    }

    pub fn loop_progress(&self, project_dir: &Path) -> PathBuf {
        self.root
            .join("ralph")
            .join(format!("progress_{}.md", project_hash(project_dir)))
    }

    pub fn iteration_log(&self) -> PathBuf {
        self.root.join("ralph").join("iterations.jsonl")
    }
}

/// Loop state authored by the Ralph plugin inside the project itself.
pub fn plugin_loop_state(project_dir: &Path) -> PathBuf {
    project_dir.join(".claude").join("ralph-loop.local.json")
}

/// Stable 16-hex-char key for a working directory.
pub fn project_hash(project_dir: &Path) -> String {
    let canonical = project_dir
        .canonicalize()
        .unwrap_or_else(|_| project_dir.to_path_buf());
    let mut hasher = Sha256::new();
    hasher.update(canonical.to_string_lossy().as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..16].to_string()
}
