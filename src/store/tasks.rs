//! Task store: single source of truth for task readiness and progress.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use chrono::Utc;
use tracing::warn;

use crate::model::{TaskId, TaskRecord, TaskStatus};
use crate::store::{read_snapshot, write_snapshot, StoreError, StoreResult};

const TASKS_FILE_NAME: &str = "tasks.json";

/// Durable table of task records keyed by id.
///
/// All status changes are compare-and-swap on the current status, so two
/// callers racing to dispatch the same task cannot both succeed.
#[derive(Debug)]
pub struct TaskStore {
    inner: RwLock<HashMap<TaskId, TaskRecord>>,
    path: Option<PathBuf>,
}

impl TaskStore {
    /// Create a store with no backing file. State is lost on drop.
    pub fn in_memory() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
            path: None,
        }
    }

    /// Open (or create) a store persisted under `state_dir`.
    pub fn open(state_dir: impl AsRef<Path>) -> StoreResult<Self> {
        let path = state_dir.as_ref().join(TASKS_FILE_NAME);
        let records: Vec<TaskRecord> = read_snapshot(&path)?.unwrap_or_default();
        let map = records.into_iter().map(|t| (t.id.clone(), t)).collect();
        Ok(Self {
            inner: RwLock::new(map),
            path: Some(path),
        })
    }

    /// Insert a new task. Rejects duplicates so planner re-invocations with
    /// an unchanged source cannot double-ingest.
    pub fn put(&self, task: TaskRecord) -> StoreResult<()> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if inner.contains_key(&task.id) {
            return Err(StoreError::DuplicateTask(task.id));
        }
        inner.insert(task.id.clone(), task);
        self.persist(&inner)
    }

    pub fn get(&self, id: &TaskId) -> Option<TaskRecord> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.get(id).cloned()
    }

    pub fn contains(&self, id: &TaskId) -> bool {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.contains_key(id)
    }

    pub fn list_all(&self) -> Vec<TaskRecord> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.values().cloned().collect()
    }

    pub fn list_by_status(&self, status: TaskStatus) -> Vec<TaskRecord> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner
            .values()
            .filter(|t| t.status == status)
            .cloned()
            .collect()
    }

    pub fn count_by_status(&self, status: TaskStatus) -> usize {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.values().filter(|t| t.status == status).count()
    }

    /// Compare-and-swap a task's status. Fails when the record is not in
    /// `expected` or when `expected -> next` is not a legal transition.
    pub fn set_status(
        &self,
        id: &TaskId,
        expected: TaskStatus,
        next: TaskStatus,
    ) -> StoreResult<TaskRecord> {
        self.mutate(id, expected, |task| {
            task.status = next;
        })
    }

    /// Move a pending task to `in_progress`: records the start timestamp and
    /// counts the attempt. The dispatcher calls this after acquiring a slot.
    pub fn begin(&self, id: &TaskId) -> StoreResult<TaskRecord> {
        self.mutate(id, TaskStatus::Pending, |task| {
            task.status = TaskStatus::InProgress;
            task.started_at = Some(Utc::now());
            task.attempt_count += 1;
        })
    }

    /// Move an in-progress task to a terminal state on executor report.
    pub fn finish(&self, id: &TaskId, terminal: TaskStatus) -> StoreResult<TaskRecord> {
        debug_assert!(terminal.is_terminal());
        self.mutate(id, TaskStatus::InProgress, |task| {
            task.status = terminal;
            task.completed_at = Some(Utc::now());
        })
    }

    /// Mark a pending task blocked because a dependency is failed/blocked.
    pub fn mark_blocked(&self, id: &TaskId) -> StoreResult<TaskRecord> {
        self.set_status(id, TaskStatus::Pending, TaskStatus::Blocked)
    }

    /// Return a blocked task to the pending pool once its dependency chain
    /// is viable again.
    pub fn unblock(&self, id: &TaskId) -> StoreResult<TaskRecord> {
        self.set_status(id, TaskStatus::Blocked, TaskStatus::Pending)
    }

    /// Explicit requeue path: return an in-progress task to `pending` after
    /// an infrastructure timeout. This bypasses the normal transition table
    /// and is always logged.
    pub fn requeue(&self, id: &TaskId) -> StoreResult<TaskRecord> {
        warn!(task = %id, "requeueing in-progress task to pending");
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let task = inner
            .get_mut(id)
            .ok_or_else(|| StoreError::UnknownTask(id.clone()))?;
        if task.status != TaskStatus::InProgress {
            return Err(StoreError::TaskStatusConflict {
                id: id.clone(),
                expected: TaskStatus::InProgress,
                actual: task.status,
            });
        }
        task.status = TaskStatus::Pending;
        task.started_at = None;
        let snapshot = task.clone();
        self.persist(&inner)?;
        Ok(snapshot)
    }

    fn mutate(
        &self,
        id: &TaskId,
        expected: TaskStatus,
        apply: impl FnOnce(&mut TaskRecord),
    ) -> StoreResult<TaskRecord> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let task = inner
            .get_mut(id)
            .ok_or_else(|| StoreError::UnknownTask(id.clone()))?;
        if task.status != expected {
            return Err(StoreError::TaskStatusConflict {
                id: id.clone(),
                expected,
                actual: task.status,
            });
        }
        let before = task.status;
        apply(task);
        if task.status != before && !before.can_transition_to(task.status) {
            let to = task.status;
            task.status = before;
            return Err(StoreError::IllegalTaskTransition {
                id: id.clone(),
                from: before,
                to,
            });
        }
        let snapshot = task.clone();
        self.persist(&inner)?;
        Ok(snapshot)
    }

    fn persist(&self, inner: &HashMap<TaskId, TaskRecord>) -> StoreResult<()> {
        if let Some(path) = &self.path {
            let mut records: Vec<&TaskRecord> = inner.values().collect();
            records.sort_by(|a, b| a.id.cmp(&b.id));
            write_snapshot(path, &records)?;
        }
        Ok(())
    }
}
