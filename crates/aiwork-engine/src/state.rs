use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use aiwork_core::error::{AiworkError, Result};
use aiwork_core::types::Status;

/// Status, output, and timestamps of one task within a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub status: Status,
    pub output: Option<serde_json::Value>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskRecord {
    fn new(status: Status, now: DateTime<Utc>) -> Self {
        Self {
            status,
            output: None,
            error: None,
            started_at: now,
            updated_at: now,
            completed_at: status.is_terminal().then_some(now),
        }
    }
}

/// Ledger entry for one workflow run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    pub id: String,
    pub name: String,
    pub status: Status,
    pub tasks: BTreeMap<String, TaskRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub error: Option<String>,
}

/// In-process ledger of workflow and task state, keyed by workflow id.
///
/// Every workflow has its own lock, so concurrent runs only contend on the
/// map itself when a workflow is first created or looked up.
#[derive(Default)]
pub struct StateManager {
    workflows: RwLock<HashMap<String, Arc<Mutex<WorkflowState>>>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl StateManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn workflow(&self, id: &str) -> Result<Arc<Mutex<WorkflowState>>> {
        self.workflows
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
            .ok_or_else(|| AiworkError::WorkflowNotFound(id.to_string()))
    }

    /// Set a workflow's status, creating the record on first call.
    ///
    /// Later calls update status, error, and `updated_at` only; task records
    /// and `created_at` are kept. A workflow that has reached COMPLETED or
    /// FAILED keeps its status and error.
    pub fn set_workflow_status(
        &self,
        id: &str,
        status: Status,
        name: Option<&str>,
        error: Option<&str>,
    ) {
        let now = Utc::now();
        let entry = {
            let mut workflows = self.workflows.write().unwrap_or_else(PoisonError::into_inner);
            match workflows.get(id) {
                Some(entry) => entry.clone(),
                None => {
                    let state = WorkflowState {
                        id: id.to_string(),
                        name: name.unwrap_or_default().to_string(),
                        status,
                        tasks: BTreeMap::new(),
                        created_at: now,
                        updated_at: now,
                        error: error.map(str::to_string),
                    };
                    workflows.insert(id.to_string(), Arc::new(Mutex::new(state)));
                    debug!(workflow_id = %id, status = %status, "Workflow created");
                    return;
                }
            }
        };

        let mut state = lock(&entry);
        if state.status.is_terminal() {
            warn!(
                workflow_id = %id,
                current = %state.status,
                requested = %status,
                "Ignoring status change on finished workflow"
            );
            return;
        }
        state.status = status;
        state.updated_at = now;
        if let Some(name) = name {
            state.name = name.to_string();
        }
        if let Some(error) = error {
            state.error = Some(error.to_string());
        }
        debug!(workflow_id = %id, status = %status, "Workflow status updated");
    }

    /// Set a task's status, creating its record on first reference.
    pub fn set_task_status(
        &self,
        id: &str,
        task: &str,
        status: Status,
        error: Option<&str>,
    ) -> Result<()> {
        let entry = self.workflow(id)?;
        let now = Utc::now();
        let mut state = lock(&entry);

        let record = state
            .tasks
            .entry(task.to_string())
            .or_insert_with(|| TaskRecord::new(status, now));
        record.status = status;
        record.updated_at = now;
        if status.is_terminal() {
            record.completed_at = Some(now);
        }
        if let Some(error) = error {
            record.error = Some(error.to_string());
        }
        state.updated_at = now;
        Ok(())
    }

    /// Store a task's output. A task seen for the first time here is recorded
    /// as COMPLETED; an existing record keeps its status.
    pub fn update_task_output(
        &self,
        id: &str,
        task: &str,
        output: serde_json::Value,
    ) -> Result<()> {
        let entry = self.workflow(id)?;
        let now = Utc::now();
        let mut state = lock(&entry);

        let record = state
            .tasks
            .entry(task.to_string())
            .or_insert_with(|| TaskRecord::new(Status::Completed, now));
        record.output = Some(output);
        record.updated_at = now;
        state.updated_at = now;
        Ok(())
    }

    /// Snapshot of a workflow's state.
    pub fn get_workflow_state(&self, id: &str) -> Result<WorkflowState> {
        let entry = self.workflow(id)?;
        let state = lock(&entry).clone();
        Ok(state)
    }

    /// Status of a task; PENDING if the workflow has no record of it yet.
    pub fn get_task_status(&self, id: &str, task: &str) -> Result<Status> {
        let entry = self.workflow(id)?;
        let state = lock(&entry);
        Ok(state
            .tasks
            .get(task)
            .map(|r| r.status)
            .unwrap_or(Status::Pending))
    }

    /// Full record of a task that has been seen in this workflow.
    pub fn get_task_record(&self, id: &str, task: &str) -> Result<TaskRecord> {
        let entry = self.workflow(id)?;
        let state = lock(&entry);
        state
            .tasks
            .get(task)
            .cloned()
            .ok_or_else(|| AiworkError::TaskNotFound {
                workflow_id: id.to_string(),
                task: task.to_string(),
            })
    }

    /// Snapshots of every known workflow, newest first.
    pub fn list_workflows(&self) -> Vec<WorkflowState> {
        let entries: Vec<_> = self
            .workflows
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        let mut states: Vec<WorkflowState> = entries.iter().map(|e| lock(e).clone()).collect();
        states.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        states
    }

    pub fn contains(&self, id: &str) -> bool {
        self.workflows
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(id)
    }
}

impl std::fmt::Debug for StateManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self
            .workflows
            .read()
            .map(|w| w.len())
            .unwrap_or_default();
        f.debug_struct("StateManager")
            .field("workflows", &count)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unknown_workflow_is_not_found() {
        let sm = StateManager::new();
        let err = sm.get_workflow_state("does-not-exist").unwrap_err();
        assert!(matches!(err, AiworkError::WorkflowNotFound(ref id) if id == "does-not-exist"));
        assert!(sm.set_task_status("nope", "t", Status::Running, None).is_err());
        assert!(sm.update_task_output("nope", "t", json!(1)).is_err());
        assert!(sm.get_task_status("nope", "t").is_err());
    }

    #[test]
    fn test_workflow_creation_is_idempotent() {
        let sm = StateManager::new();
        sm.set_workflow_status("wf", Status::Running, Some("demo"), None);
        sm.set_task_status("wf", "a", Status::Running, None).unwrap();
        let created = sm.get_workflow_state("wf").unwrap().created_at;

        sm.set_workflow_status("wf", Status::Running, None, None);
        let state = sm.get_workflow_state("wf").unwrap();
        assert_eq!(state.name, "demo");
        assert_eq!(state.created_at, created);
        assert!(state.updated_at >= created);
        assert!(state.tasks.contains_key("a"));
    }

    #[test]
    fn test_task_status_defaults_to_pending() {
        let sm = StateManager::new();
        sm.set_workflow_status("wf", Status::Running, Some("demo"), None);
        assert_eq!(sm.get_task_status("wf", "later").unwrap(), Status::Pending);
        assert!(matches!(
            sm.get_task_record("wf", "later"),
            Err(AiworkError::TaskNotFound { .. })
        ));
    }

    #[test]
    fn test_task_lifecycle() {
        let sm = StateManager::new();
        sm.set_workflow_status("wf", Status::Running, Some("demo"), None);
        sm.set_task_status("wf", "a", Status::Running, None).unwrap();
        assert!(sm.get_task_record("wf", "a").unwrap().completed_at.is_none());

        sm.set_task_status("wf", "a", Status::Completed, None).unwrap();
        sm.update_task_output("wf", "a", json!("out")).unwrap();

        let record = sm.get_task_record("wf", "a").unwrap();
        assert_eq!(record.status, Status::Completed);
        assert_eq!(record.output, Some(json!("out")));
        assert!(record.completed_at.is_some());
    }

    #[test]
    fn test_output_without_status_creates_completed_record() {
        let sm = StateManager::new();
        sm.set_workflow_status("wf", Status::Running, Some("demo"), None);
        sm.update_task_output("wf", "orphan", json!({"k": 1})).unwrap();
        assert_eq!(sm.get_task_status("wf", "orphan").unwrap(), Status::Completed);

        sm.set_task_status("wf", "b", Status::Running, None).unwrap();
        sm.update_task_output("wf", "b", json!(2)).unwrap();
        assert_eq!(sm.get_task_status("wf", "b").unwrap(), Status::Running);
    }

    #[test]
    fn test_terminal_workflow_not_resurrected() {
        let sm = StateManager::new();
        sm.set_workflow_status("wf", Status::Running, Some("demo"), None);
        sm.set_workflow_status("wf", Status::Failed, Some("demo"), Some("boom"));
        sm.set_workflow_status("wf", Status::Completed, Some("demo"), None);

        let state = sm.get_workflow_state("wf").unwrap();
        assert_eq!(state.status, Status::Failed);
        assert_eq!(state.error.as_deref(), Some("boom"));

        // task-level bookkeeping is still accepted
        sm.set_task_status("wf", "cleanup", Status::Completed, None).unwrap();
        assert_eq!(sm.get_workflow_state("wf").unwrap().status, Status::Failed);
    }

    #[test]
    fn test_list_workflows() {
        let sm = StateManager::new();
        assert!(sm.list_workflows().is_empty());
        sm.set_workflow_status("one", Status::Pending, Some("a"), None);
        sm.set_workflow_status("two", Status::Pending, Some("b"), None);
        let ids: Vec<String> = sm.list_workflows().into_iter().map(|s| s.id).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&"one".to_string()) && ids.contains(&"two".to_string()));
        assert!(sm.contains("one"));
        assert!(!sm.contains("three"));
    }

    #[tokio::test]
    async fn test_concurrent_task_writes() {
        let sm = Arc::new(StateManager::new());
        sm.set_workflow_status("wf", Status::Running, Some("demo"), None);

        let mut handles = Vec::new();
        for i in 0..32 {
            let sm = sm.clone();
            handles.push(tokio::spawn(async move {
                let name = format!("t{}", i);
                sm.set_task_status("wf", &name, Status::Running, None).unwrap();
                sm.update_task_output("wf", &name, json!(i)).unwrap();
                sm.set_task_status("wf", &name, Status::Completed, None).unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let state = sm.get_workflow_state("wf").unwrap();
        assert_eq!(state.tasks.len(), 32);
        assert!(state
            .tasks
            .values()
            .all(|r| r.status == Status::Completed && r.output.is_some()));
    }
}
