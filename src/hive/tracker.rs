use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use super::HiveError;
use super::model::{Agent, AgentStatus, Hive, HiveStatus, Task, TaskPriority, TaskStatus};
use crate::config::HiveConfig;
use crate::error::Fault;
use crate::identity::generate_id;
use crate::store;

type Clock = Box<dyn Fn() -> DateTime<Utc>>;

/// Outcome of a successful shutdown.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ShutdownReport {
    pub hive_id: Option<String>,
    pub terminated_agents: Vec<String>,
    pub aborted_tasks: Vec<String>,
    pub shutdown_at: DateTime<Utc>,
}

/// Agent and task lifecycle over `hive/state.json`.
///
/// Every mutating call reloads the file, runs the stuck-agent pass, applies
/// its change, and writes the whole document back.
pub struct HiveTracker {
    path: PathBuf,
    max_agents: usize,
    stuck_timeout: Duration,
    default_topology: String,
    clock: Clock,
}

impl HiveTracker {
    pub fn new(path: impl Into<PathBuf>, config: &HiveConfig) -> Self {
        Self {
            path: path.into(),
            max_agents: config.max_agents,
            stuck_timeout: crate::config::clamped_secs(config.stuck_timeout_secs),
            default_topology: config.topology.clone(),
            clock: Box::new(Utc::now),
        }
    }

    /// Replace the time source.
    #[must_use]
    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// Create the hive, or return the id of the one already running.
    pub fn init_hive(&self, topology: Option<&str>) -> Result<String, HiveError> {
        let topology = topology.unwrap_or(&self.default_topology).to_string();
        self.mutate(|hive, now| Ok(ensure_hive(hive, &topology, now)))
    }

    /// Register a new agent. With `id`, re-registering a live agent is a
    /// no-op that refreshes its activity.
    pub fn register_agent(&self, role: &str, id: Option<&str>) -> Result<Agent, HiveError> {
        let max_agents = self.max_agents;
        let topology = self.default_topology.clone();
        self.mutate(|hive, now| {
            if let Some(existing) = id.and_then(|id| hive.agents.get_mut(id)) {
                if !existing.is_live() {
                    return Err(HiveError::AgentTerminated(existing.id.clone()));
                }
                existing.touch(now);
                return Ok(existing.clone());
            }

            let live = hive.live_agent_count();
            if live >= max_agents {
                warn!(live, max_agents, "agent registration refused");
                return Err(HiveError::MaxAgentsReached { max: max_agents });
            }

            ensure_hive(hive, &topology, now);
            let id = id.map_or_else(|| generate_id("agent"), str::to_string);
            let agent = Agent::new(id.clone(), role.to_string(), now);
            hive.agents.insert(id.clone(), agent.clone());
            info!(agent_id = %id, role, "agent registered");
            Ok(agent)
        })
    }

    /// Set an agent's status and merge `metadata` into it.
    pub fn update_agent_status(
        &self,
        id: &str,
        status: AgentStatus,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) -> Result<Agent, HiveError> {
        self.mutate(|hive, now| {
            let agent = live_agent_mut(hive, id)?;
            if status == AgentStatus::Terminated {
                return Err(HiveError::InvalidTransition(
                    "agents are only terminated by hive shutdown".to_string(),
                ));
            }
            agent.status = status;
            agent.metadata.extend(metadata);
            agent.touch(now);
            Ok(agent.clone())
        })
    }

    pub fn register_task(&self, description: &str, priority: TaskPriority) -> Result<Task, HiveError> {
        self.mutate(|hive, now| {
            let task = Task {
                id: generate_id("task"),
                description: description.to_string(),
                priority,
                status: TaskStatus::Pending,
                assigned_to: None,
                created_at: now,
                started_at: None,
                completed_at: None,
                result: None,
            };
            hive.tasks.insert(task.id.clone(), task.clone());
            debug!(task_id = %task.id, "task registered");
            Ok(task)
        })
    }

    /// Assign a pending task to an agent without starting it.
    pub fn assign_task(&self, task_id: &str, agent_id: &str) -> Result<Task, HiveError> {
        self.mutate(|hive, now| {
            live_agent_mut(hive, agent_id)?.touch(now);
            let task = task_mut(hive, task_id)?;
            if !matches!(task.status, TaskStatus::Pending | TaskStatus::Assigned) {
                return Err(HiveError::InvalidTransition(format!(
                    "task {task_id} is {} and cannot be assigned",
                    task.status
                )));
            }
            task.status = TaskStatus::Assigned;
            task.assigned_to = Some(agent_id.to_string());
            Ok(task.clone())
        })
    }

    /// Move a task to in_progress and mark its agent busy.
    pub fn start_task(&self, task_id: &str, agent_id: &str) -> Result<Task, HiveError> {
        self.mutate(|hive, now| {
            // validate both before touching either
            live_agent_mut(hive, agent_id)?;
            let task = task_mut(hive, task_id)?;
            if task.status.is_finished() || task.status == TaskStatus::InProgress {
                return Err(HiveError::InvalidTransition(format!(
                    "task {task_id} is {} and cannot be started",
                    task.status
                )));
            }
            task.status = TaskStatus::InProgress;
            task.assigned_to = Some(agent_id.to_string());
            task.started_at = Some(now);
            let task = task.clone();

            let agent = live_agent_mut(hive, agent_id)?;
            agent.status = AgentStatus::Busy;
            agent.current_task = Some(task_id.to_string());
            agent.touch(now);
            debug!(task_id, agent_id, "task started");
            Ok(task)
        })
    }

    /// Finish a task. The assigned agent goes back to idle and its
    /// completed/failed counter is bumped.
    pub fn complete_task(
        &self,
        task_id: &str,
        success: bool,
        result: Option<String>,
    ) -> Result<Task, HiveError> {
        self.mutate(|hive, now| {
            let task = task_mut(hive, task_id)?;
            if task.status.is_finished() {
                return Err(HiveError::InvalidTransition(format!(
                    "task {task_id} is already {}",
                    task.status
                )));
            }
            task.status = if success {
                TaskStatus::Completed
            } else {
                TaskStatus::Failed
            };
            task.completed_at = Some(now);
            task.result = result;
            let task = task.clone();

            if let Some(agent) = task
                .assigned_to
                .as_deref()
                .and_then(|id| hive.agents.get_mut(id))
                .filter(|a| a.is_live())
            {
                if success {
                    agent.tasks_completed += 1;
                } else {
                    agent.tasks_failed += 1;
                }
                agent.status = AgentStatus::Idle;
                if agent.current_task.as_deref() == Some(task_id) {
                    agent.current_task = None;
                }
                agent.touch(now);
            }
            info!(task_id, status = %task.status, "task finished");
            Ok(task)
        })
    }

    /// Relabel agents that have been silent past the timeout as stuck.
    /// Returns the ids relabelled by this call.
    pub fn detect_stuck_agents(&self) -> Result<Vec<String>, HiveError> {
        let now = (self.clock)();
        let mut hive: Hive = store::load_or_default(&self.path)?;
        let stuck = mark_stuck(&mut hive, now, self.stuck_timeout);
        if !stuck.is_empty() {
            hive.updated_at = Some(now);
            store::save(&self.path, &hive)?;
        }
        Ok(stuck)
    }

    /// Terminate every agent and close the hive.
    ///
    /// A graceful shutdown refuses while any task is in progress. A forced
    /// one marks those tasks failed.
    pub fn shutdown_hive(&self, graceful: bool) -> Result<ShutdownReport, HiveError> {
        self.mutate(|hive, now| {
            let in_progress = hive.in_progress_tasks();
            if graceful && !in_progress.is_empty() {
                return Err(HiveError::TasksInProgress(in_progress));
            }

            for id in &in_progress {
                if let Some(task) = hive.tasks.get_mut(id) {
                    task.status = TaskStatus::Failed;
                    task.completed_at = Some(now);
                    task.result = Some("aborted: hive shutdown".to_string());
                }
            }

            let mut terminated = Vec::new();
            for agent in hive.agents.values_mut().filter(|a| a.is_live()) {
                agent.status = AgentStatus::Terminated;
                agent.current_task = None;
                agent.touch(now);
                terminated.push(agent.id.clone());
            }

            let hive_id = hive.hive_id.take();
            hive.shutdown_at = Some(now);
            info!(hive_id = ?hive_id, agents = terminated.len(), graceful, "hive shut down");
            Ok(ShutdownReport {
                hive_id,
                terminated_agents: terminated,
                aborted_tasks: in_progress,
                shutdown_at: now,
            })
        })
    }

    /// Aggregate view. Does not write: stuck agents are computed on a copy.
    pub fn get_status(&self) -> Result<HiveStatus, Fault> {
        let now = (self.clock)();
        let mut hive: Hive = store::load_or_default(&self.path)?;
        mark_stuck(&mut hive, now, self.stuck_timeout);

        let mut agents_by_status = std::collections::BTreeMap::new();
        for agent in hive.agents.values() {
            *agents_by_status.entry(agent.status.to_string()).or_insert(0) += 1;
        }
        let mut tasks_by_status = std::collections::BTreeMap::new();
        for task in hive.tasks.values() {
            *tasks_by_status.entry(task.status.to_string()).or_insert(0) += 1;
        }
        let stuck_agents = hive
            .agents
            .values()
            .filter(|a| a.status == AgentStatus::Stuck)
            .map(|a| a.id.clone())
            .collect();

        Ok(HiveStatus {
            active: hive.is_active(),
            live_agents: hive.live_agent_count(),
            agent_count: hive.agents.len(),
            task_count: hive.tasks.len(),
            hive_id: hive.hive_id,
            topology: hive.topology,
            agents_by_status,
            tasks_by_status,
            stuck_agents,
            shutdown_at: hive.shutdown_at,
        })
    }

    /// Full snapshot of the hive document.
    pub fn snapshot(&self) -> Result<Hive, Fault> {
        store::load_or_default(&self.path)
    }

    /// Most recent unfinished task with exactly this description.
    pub fn find_open_task(&self, description: &str) -> Result<Option<Task>, Fault> {
        let hive: Hive = store::load_or_default(&self.path)?;
        Ok(hive
            .tasks
            .into_values()
            .filter(|t| t.description == description && !t.status.is_finished())
            .max_by_key(|t| t.created_at))
    }

    fn mutate<R>(
        &self,
        apply: impl FnOnce(&mut Hive, DateTime<Utc>) -> Result<R, HiveError>,
    ) -> Result<R, HiveError> {
        let now = (self.clock)();
        let mut hive: Hive = store::load_or_default(&self.path)?;
        let stuck = mark_stuck(&mut hive, now, self.stuck_timeout);

        match apply(&mut hive, now) {
            Ok(value) => {
                hive.updated_at = Some(now);
                store::save(&self.path, &hive)?;
                Ok(value)
            }
            Err(denial) => {
                if !stuck.is_empty() {
                    store::save(&self.path, &hive)?;
                }
                Err(denial)
            }
        }
    }
}

fn ensure_hive(hive: &mut Hive, topology: &str, now: DateTime<Utc>) -> String {
    if let Some(id) = &hive.hive_id {
        return id.clone();
    }
    let id = generate_id("hive");
    hive.hive_id = Some(id.clone());
    hive.topology = topology.to_string();
    hive.created_at = Some(now);
    hive.shutdown_at = None;
    info!(hive_id = %id, topology, "hive initialised");
    id
}

fn mark_stuck(hive: &mut Hive, now: DateTime<Utc>, timeout: Duration) -> Vec<String> {
    let mut stuck = Vec::new();
    for agent in hive.agents.values_mut() {
        if agent.status.is_working() && now - agent.last_activity > timeout {
            warn!(
                agent_id = %agent.id,
                idle_secs = (now - agent.last_activity).num_seconds(),
                "agent stopped reporting, marking stuck"
            );
            agent.status = AgentStatus::Stuck;
            stuck.push(agent.id.clone());
        }
    }
    stuck
}

fn live_agent_mut<'a>(hive: &'a mut Hive, id: &str) -> Result<&'a mut Agent, HiveError> {
    let agent = hive
        .agents
        .get_mut(id)
        .ok_or_else(|| HiveError::UnknownAgent(id.to_string()))?;
    if !agent.is_live() {
        return Err(HiveError::AgentTerminated(id.to_string()));
    }
    Ok(agent)
}

fn task_mut<'a>(hive: &'a mut Hive, id: &str) -> Result<&'a mut Task, HiveError> {
    hive.tasks
        .get_mut(id)
        .ok_or_else(|| HiveError::UnknownTask(id.to_string()))
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;

    fn tracker(dir: &std::path::Path, max_agents: usize) -> HiveTracker {
        let config = HiveConfig {
            max_agents,
            ..HiveConfig::default()
        };
        HiveTracker::new(dir.join("hive/state.json"), &config)
    }

    fn tracker_with_clock(
        dir: &std::path::Path,
    ) -> (HiveTracker, Rc<Cell<DateTime<Utc>>>) {
        let now = Rc::new(Cell::new(Utc::now()));
        let handle = now.clone();
        let tracker = tracker(dir, 8).with_clock(move || handle.get());
        (tracker, now)
    }

    #[test]
    fn init_hive_is_idempotent() {
        let temp = tempfile::tempdir().unwrap();
        let t = tracker(temp.path(), 8);
        let first = t.init_hive(Some("star")).unwrap();
        let second = t.init_hive(None).unwrap();
        assert_eq!(first, second);
        assert_eq!(t.get_status().unwrap().topology, "star");
    }

    #[test]
    fn register_agent_respects_cap() {
        let temp = tempfile::tempdir().unwrap();
        let t = tracker(temp.path(), 2);
        t.register_agent("worker", None).unwrap();
        t.register_agent("worker", None).unwrap();

        let err = t.register_agent("worker", None).unwrap_err();
        assert_eq!(err.code(), "max_agents_reached");
        assert_eq!(t.get_status().unwrap().live_agents, 2);
    }

    #[test]
    fn registering_known_id_is_idempotent() {
        let temp = tempfile::tempdir().unwrap();
        let t = tracker(temp.path(), 1);
        let a = t.register_agent("worker", Some("agent-x")).unwrap();
        let b = t.register_agent("worker", Some("agent-x")).unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(t.get_status().unwrap().agent_count, 1);
    }

    #[test]
    fn unknown_agent_status_update_fails() {
        let temp = tempfile::tempdir().unwrap();
        let t = tracker(temp.path(), 8);
        let err = t
            .update_agent_status("ghost", AgentStatus::Idle, serde_json::Map::new())
            .unwrap_err();
        assert_eq!(err.code(), "unknown_agent");
    }

    #[test]
    fn update_agent_status_merges_metadata() {
        let temp = tempfile::tempdir().unwrap();
        let t = tracker(temp.path(), 8);
        let agent = t.register_agent("worker", None).unwrap();

        let mut meta = serde_json::Map::new();
        meta.insert("branch".into(), serde_json::json!("feat/x"));
        t.update_agent_status(&agent.id, AgentStatus::Idle, meta).unwrap();

        let mut meta = serde_json::Map::new();
        meta.insert("note".into(), serde_json::json!("waiting"));
        let updated = t.update_agent_status(&agent.id, AgentStatus::Busy, meta).unwrap();

        assert_eq!(updated.status, AgentStatus::Busy);
        assert_eq!(updated.metadata["branch"], "feat/x");
        assert_eq!(updated.metadata["note"], "waiting");
    }

    #[test]
    fn failed_task_scenario() {
        let temp = tempfile::tempdir().unwrap();
        let t = tracker(temp.path(), 8);
        let agent = t.register_agent("worker", Some("agentX")).unwrap();
        let task = t.register_task("desc", TaskPriority::Normal).unwrap();

        let started = t.start_task(&task.id, &agent.id).unwrap();
        assert_eq!(started.status, TaskStatus::InProgress);
        assert!(started.started_at.is_some());
        assert!(started.completed_at.is_none());

        let done = t.complete_task(&task.id, false, None).unwrap();
        assert_eq!(done.status, TaskStatus::Failed);
        assert!(done.completed_at.is_some());

        let hive = t.snapshot().unwrap();
        let agent = &hive.agents["agentX"];
        assert_eq!(agent.tasks_failed, 1);
        assert_eq!(agent.tasks_completed, 0);
        assert_eq!(agent.status, AgentStatus::Idle);
        assert!(agent.current_task.is_none());
    }

    #[test]
    fn start_task_marks_agent_busy() {
        let temp = tempfile::tempdir().unwrap();
        let t = tracker(temp.path(), 8);
        let agent = t.register_agent("worker", None).unwrap();
        let task = t.register_task("build it", TaskPriority::High).unwrap();
        t.start_task(&task.id, &agent.id).unwrap();

        let hive = t.snapshot().unwrap();
        assert_eq!(hive.agents[&agent.id].status, AgentStatus::Busy);
        assert_eq!(hive.agents[&agent.id].current_task.as_deref(), Some(task.id.as_str()));

        // cannot start twice
        let err = t.start_task(&task.id, &agent.id).unwrap_err();
        assert_eq!(err.code(), "invalid_transition");
    }

    #[test]
    fn start_task_with_unknown_agent_leaves_task_pending() {
        let temp = tempfile::tempdir().unwrap();
        let t = tracker(temp.path(), 8);
        let task = t.register_task("orphan", TaskPriority::Low).unwrap();
        let err = t.start_task(&task.id, "nobody").unwrap_err();
        assert_eq!(err.code(), "unknown_agent");
        assert_eq!(t.snapshot().unwrap().tasks[&task.id].status, TaskStatus::Pending);
    }

    #[test]
    fn complete_twice_is_rejected() {
        let temp = tempfile::tempdir().unwrap();
        let t = tracker(temp.path(), 8);
        let task = t.register_task("once", TaskPriority::Normal).unwrap();
        t.complete_task(&task.id, true, Some("ok".into())).unwrap();
        let err = t.complete_task(&task.id, true, None).unwrap_err();
        assert_eq!(err.code(), "invalid_transition");
    }

    #[test]
    fn assign_then_start() {
        let temp = tempfile::tempdir().unwrap();
        let t = tracker(temp.path(), 8);
        let agent = t.register_agent("worker", None).unwrap();
        let task = t.register_task("plan", TaskPriority::Normal).unwrap();
        let assigned = t.assign_task(&task.id, &agent.id).unwrap();
        assert_eq!(assigned.status, TaskStatus::Assigned);
        assert!(assigned.started_at.is_none());
        let started = t.start_task(&task.id, &agent.id).unwrap();
        assert_eq!(started.status, TaskStatus::InProgress);
    }

    #[test]
    fn silent_agents_become_stuck() {
        let temp = tempfile::tempdir().unwrap();
        let (t, clock) = tracker_with_clock(temp.path());
        let busy = t.register_agent("worker", Some("busy-one")).unwrap();
        let idle = t.register_agent("worker", Some("idle-one")).unwrap();
        let task = t.register_task("long", TaskPriority::Normal).unwrap();
        t.start_task(&task.id, &busy.id).unwrap();
        t.update_agent_status(&idle.id, AgentStatus::Idle, serde_json::Map::new())
            .unwrap();

        clock.set(clock.get() + Duration::seconds(599));
        assert!(t.detect_stuck_agents().unwrap().is_empty());

        clock.set(clock.get() + Duration::seconds(2));
        let status = t.get_status().unwrap();
        assert_eq!(status.stuck_agents, vec!["busy-one".to_string()]);
        // get_status does not persist the relabel
        assert_eq!(t.snapshot().unwrap().agents["busy-one"].status, AgentStatus::Busy);

        let stuck = t.detect_stuck_agents().unwrap();
        assert_eq!(stuck, vec!["busy-one".to_string()]);
        assert_eq!(t.snapshot().unwrap().agents["busy-one"].status, AgentStatus::Stuck);
        assert_eq!(t.snapshot().unwrap().agents["idle-one"].status, AgentStatus::Idle);
    }

    #[test]
    fn graceful_shutdown_waits_for_in_progress_tasks() {
        let temp = tempfile::tempdir().unwrap();
        let t = tracker(temp.path(), 8);
        let agent = t.register_agent("worker", None).unwrap();
        let task = t.register_task("work", TaskPriority::Normal).unwrap();
        t.start_task(&task.id, &agent.id).unwrap();

        match t.shutdown_hive(true).unwrap_err() {
            HiveError::TasksInProgress(ids) => assert_eq!(ids, vec![task.id.clone()]),
            other => panic!("unexpected error: {other}"),
        }
        assert!(t.get_status().unwrap().active);

        t.complete_task(&task.id, true, None).unwrap();
        let report = t.shutdown_hive(true).unwrap();
        assert!(report.hive_id.is_some());
        assert_eq!(report.terminated_agents, vec![agent.id.clone()]);

        let hive = t.snapshot().unwrap();
        assert!(hive.hive_id.is_none());
        assert!(hive.shutdown_at.is_some());
        assert!(hive.agents.values().all(|a| a.status == AgentStatus::Terminated));
        // history is preserved
        assert_eq!(hive.tasks.len(), 1);
    }

    #[test]
    fn forced_shutdown_fails_running_tasks() {
        let temp = tempfile::tempdir().unwrap();
        let t = tracker(temp.path(), 8);
        let agent = t.register_agent("worker", None).unwrap();
        let task = t.register_task("work", TaskPriority::Normal).unwrap();
        t.start_task(&task.id, &agent.id).unwrap();

        let report = t.shutdown_hive(false).unwrap();
        assert_eq!(report.aborted_tasks, vec![task.id.clone()]);
        assert_eq!(t.snapshot().unwrap().tasks[&task.id].status, TaskStatus::Failed);
    }

    #[test]
    fn terminated_agents_stay_terminated() {
        let temp = tempfile::tempdir().unwrap();
        let t = tracker(temp.path(), 8);
        let agent = t.register_agent("worker", Some("a1")).unwrap();
        t.shutdown_hive(true).unwrap();

        let err = t
            .update_agent_status(&agent.id, AgentStatus::Active, serde_json::Map::new())
            .unwrap_err();
        assert_eq!(err.code(), "agent_terminated");
        assert_eq!(t.register_agent("worker", Some("a1")).unwrap_err().code(), "agent_terminated");

        // a fresh agent starts a fresh hive; terminated ones do not count
        let fresh = t.register_agent("worker", None).unwrap();
        assert_eq!(fresh.status, AgentStatus::Active);
        assert!(t.get_status().unwrap().active);
        assert_eq!(t.get_status().unwrap().live_agents, 1);
    }

    #[test]
    fn find_open_task_matches_description() {
        let temp = tempfile::tempdir().unwrap();
        let t = tracker(temp.path(), 8);
        let task = t.register_task("refactor parser", TaskPriority::Normal).unwrap();
        t.register_task("other", TaskPriority::Normal).unwrap();

        let found = t.find_open_task("refactor parser").unwrap().unwrap();
        assert_eq!(found.id, task.id);
        t.complete_task(&task.id, true, None).unwrap();
        assert!(t.find_open_task("refactor parser").unwrap().is_none());
    }
}
