//! Issue store: durable table of reported and escalated issues.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use chrono::Utc;
use tracing::warn;

use crate::model::{IssueId, IssuePriority, IssueRecord, IssueStatus, TaskId};
use crate::store::{read_snapshot, write_snapshot, StoreError, StoreResult};

const ISSUES_FILE_NAME: &str = "issues.json";

/// Durable table of issue records keyed by id.
#[derive(Debug)]
pub struct IssueStore {
    inner: RwLock<HashMap<IssueId, IssueRecord>>,
    path: Option<PathBuf>,
}

impl IssueStore {
    /// Create a store with no backing file.
    pub fn in_memory() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
            path: None,
        }
    }

    /// Open (or create) a store persisted under `state_dir`.
    pub fn open(state_dir: impl AsRef<Path>) -> StoreResult<Self> {
        let path = state_dir.as_ref().join(ISSUES_FILE_NAME);
        let records: Vec<IssueRecord> = read_snapshot(&path)?.unwrap_or_default();
        let map = records.into_iter().map(|i| (i.id.clone(), i)).collect();
        Ok(Self {
            inner: RwLock::new(map),
            path: Some(path),
        })
    }

    /// Insert or refresh an issue record.
    pub fn put(&self, issue: IssueRecord) -> StoreResult<()> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.insert(issue.id.clone(), issue);
        self.persist(&inner)
    }

    pub fn get(&self, id: &IssueId) -> Option<IssueRecord> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.get(id).cloned()
    }

    pub fn list_all(&self) -> Vec<IssueRecord> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.values().cloned().collect()
    }

    pub fn list_by_status(&self, status: IssueStatus) -> Vec<IssueRecord> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner
            .values()
            .filter(|i| i.status == status)
            .cloned()
            .collect()
    }

    pub fn list_by_priority(&self, priority: IssuePriority) -> Vec<IssueRecord> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner
            .values()
            .filter(|i| i.priority == priority)
            .cloned()
            .collect()
    }

    pub fn count_by_status(&self, status: IssueStatus) -> usize {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.values().filter(|i| i.status == status).count()
    }

    /// Compare-and-swap an issue's status along the legal lifecycle.
    pub fn set_status(
        &self,
        id: &IssueId,
        expected: IssueStatus,
        next: IssueStatus,
    ) -> StoreResult<IssueRecord> {
        self.mutate(id, Some(expected), |issue| {
            if !issue.status.can_transition_to(next) {
                return Err(StoreError::IllegalIssueTransition {
                    id: issue.id.clone(),
                    from: issue.status,
                    to: next,
                });
            }
            issue.status = next;
            Ok(())
        })
    }

    /// Attach the task the planner created for this issue and move the
    /// issue to `in_progress`.
    pub fn link_task(&self, id: &IssueId, task_id: TaskId) -> StoreResult<IssueRecord> {
        self.mutate(id, None, |issue| {
            match issue.status {
                IssueStatus::Pending | IssueStatus::Accepted => {
                    issue.status = IssueStatus::InProgress;
                }
                IssueStatus::InProgress => {
                    // Re-plan of a stalled issue: replace the stale link.
                }
                other => {
                    return Err(StoreError::IssueStatusConflict {
                        id: issue.id.clone(),
                        expected: IssueStatus::Pending,
                        actual: other,
                    });
                }
            }
            issue.linked_task_id = Some(task_id.clone());
            Ok(())
        })
    }

    /// Explicit reset path: return an in-progress issue to `pending` and
    /// clear its stale task link, so the next critical pass re-plans it.
    /// Always logged; never reachable through `set_status`.
    pub fn reset_pending(&self, id: &IssueId) -> StoreResult<IssueRecord> {
        warn!(issue = %id, "resetting inconsistent issue to pending");
        self.mutate(id, Some(IssueStatus::InProgress), |issue| {
            issue.status = IssueStatus::Pending;
            issue.linked_task_id = None;
            Ok(())
        })
    }

    /// Count one auto-retry attempt against the issue's budget.
    pub fn bump_retry(&self, id: &IssueId) -> StoreResult<u32> {
        let updated = self.mutate(id, None, |issue| {
            issue.retry_count += 1;
            Ok(())
        })?;
        Ok(updated.retry_count)
    }

    fn mutate(
        &self,
        id: &IssueId,
        expected: Option<IssueStatus>,
        apply: impl FnOnce(&mut IssueRecord) -> StoreResult<()>,
    ) -> StoreResult<IssueRecord> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let issue = inner
            .get_mut(id)
            .ok_or_else(|| StoreError::UnknownIssue(id.clone()))?;
        if let Some(expected) = expected {
            if issue.status != expected {
                return Err(StoreError::IssueStatusConflict {
                    id: id.clone(),
                    expected,
                    actual: issue.status,
                });
            }
        }
        apply(issue)?;
        issue.updated_at = Utc::now();
        let snapshot = issue.clone();
        self.persist(&inner)?;
        Ok(snapshot)
    }

    fn persist(&self, inner: &HashMap<IssueId, IssueRecord>) -> StoreResult<()> {
        if let Some(path) = &self.path {
            let mut records: Vec<&IssueRecord> = inner.values().collect();
            records.sort_by(|a, b| a.id.cmp(&b.id));
            write_snapshot(path, &records)?;
        }
        Ok(())
    }
}
