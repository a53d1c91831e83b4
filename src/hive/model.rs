use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Active,
    Busy,
    Idle,
    Stuck,
    Terminated,
}

impl AgentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AgentStatus::Active => "active",
            AgentStatus::Busy => "busy",
            AgentStatus::Idle => "idle",
            AgentStatus::Stuck => "stuck",
            AgentStatus::Terminated => "terminated",
        }
    }

    /// Statuses the stuck detector watches.
    pub fn is_working(self) -> bool {
        matches!(self, AgentStatus::Active | AgentStatus::Busy)
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(AgentStatus::Active),
            "busy" => Ok(AgentStatus::Busy),
            "idle" => Ok(AgentStatus::Idle),
            "stuck" => Ok(AgentStatus::Stuck),
            "terminated" => Ok(AgentStatus::Terminated),
            other => Err(format!("unknown agent status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Assigned,
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Assigned => "assigned",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn is_finished(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub role: String,
    pub status: AgentStatus,
    pub registered_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    #[serde(default)]
    pub tasks_completed: u32,
    #[serde(default)]
    pub tasks_failed: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_task: Option<String>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Agent {
    pub fn new(id: String, role: String, now: DateTime<Utc>) -> Self {
        Self {
            id,
            role,
            status: AgentStatus::Active,
            registered_at: now,
            last_activity: now,
            tasks_completed: 0,
            tasks_failed: 0,
            current_task: None,
            metadata: serde_json::Map::new(),
        }
    }

    pub fn is_live(&self) -> bool {
        self.status != AgentStatus::Terminated
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_activity = now;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub priority: TaskPriority,
    pub status: TaskStatus,
    #[serde(default)]
    pub assigned_to: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub result: Option<String>,
}

/// Aggregate root persisted at `hive/state.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hive {
    #[serde(default)]
    pub hive_id: Option<String>,
    #[serde(default = "default_topology")]
    pub topology: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub shutdown_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub agents: BTreeMap<String, Agent>,
    #[serde(default)]
    pub tasks: BTreeMap<String, Task>,
}

fn default_topology() -> String {
    "hierarchical-mesh".to_string()
}

impl Default for Hive {
    fn default() -> Self {
        Self {
            hive_id: None,
            topology: default_topology(),
            created_at: None,
            updated_at: None,
            shutdown_at: None,
            agents: BTreeMap::new(),
            tasks: BTreeMap::new(),
        }
    }
}

impl Hive {
    pub fn is_active(&self) -> bool {
        self.hive_id.is_some()
    }

    pub fn live_agent_count(&self) -> usize {
        self.agents.values().filter(|a| a.is_live()).count()
    }

    pub fn in_progress_tasks(&self) -> Vec<String> {
        self.tasks
            .values()
            .filter(|t| t.status == TaskStatus::InProgress)
            .map(|t| t.id.clone())
            .collect()
    }
}

/// Read-only aggregate returned by `get_status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HiveStatus {
    pub hive_id: Option<String>,
    pub topology: String,
    pub active: bool,
    pub agent_count: usize,
    pub live_agents: usize,
    pub agents_by_status: BTreeMap<String, usize>,
    pub task_count: usize,
    pub tasks_by_status: BTreeMap<String, usize>,
    pub stuck_agents: Vec<String>,
    pub shutdown_at: Option<DateTime<Utc>>,
}
