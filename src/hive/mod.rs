//! Hive tracker: agents, tasks, and liveness for one coordination domain.

mod model;
mod tracker;

pub use model::{Agent, AgentStatus, Hive, HiveStatus, Task, TaskPriority, TaskStatus};
pub use tracker::{HiveTracker, ShutdownReport};

use crate::error::Fault;

/// Hive operation failure: a business denial or an infrastructure fault.
#[derive(Debug, thiserror::Error)]
pub enum HiveError {
    #[error("max agents reached ({max})")]
    MaxAgentsReached { max: usize },

    #[error("unknown agent: {0}")]
    UnknownAgent(String),

    #[error("unknown task: {0}")]
    UnknownTask(String),

    #[error("agent {0} is terminated")]
    AgentTerminated(String),

    #[error("tasks still in progress: {}", .0.join(", "))]
    TasksInProgress(Vec<String>),

    #[error("{0}")]
    InvalidTransition(String),

    #[error(transparent)]
    Fault(#[from] Fault),
}

impl HiveError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            HiveError::MaxAgentsReached { .. } => "max_agents_reached",
            HiveError::UnknownAgent(_) => "unknown_agent",
            HiveError::UnknownTask(_) => "unknown_task",
            HiveError::AgentTerminated(_) => "agent_terminated",
            HiveError::TasksInProgress(_) => "tasks_in_progress",
            HiveError::InvalidTransition(_) => "invalid_transition",
            HiveError::Fault(_) => "fault",
        }
    }

    /// Denials are shown to the caller; faults are swallowed.
    pub fn is_denial(&self) -> bool {
        !matches!(self, HiveError::Fault(_))
    }

    /// `{success: false, reason, code}` payload for the host.
    pub fn to_denial_json(&self) -> serde_json::Value {
        let mut value = serde_json::json!({
            "success": false,
            "code": self.code(),
            "reason": self.to_string(),
        });
        if let HiveError::TasksInProgress(ids) = self {
            value["blocking_tasks"] = serde_json::json!(ids);
        }
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn denial_json_lists_blocking_tasks() {
        let err = HiveError::TasksInProgress(vec!["task-1".into(), "task-2".into()]);
        let json = err.to_denial_json();
        assert_eq!(json["success"], false);
        assert_eq!(json["code"], "tasks_in_progress");
        assert_eq!(json["blocking_tasks"][1], "task-2");
        assert!(json["reason"].as_str().unwrap().contains("task-1, task-2"));
    }

    #[test]
    fn faults_are_not_denials() {
        let fault = HiveError::from(Fault::io("/x", std::io::Error::other("boom")));
        assert!(!fault.is_denial());
        assert!(HiveError::UnknownAgent("a".into()).is_denial());
    }
}
