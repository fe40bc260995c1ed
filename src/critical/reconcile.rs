//! Issue/task consistency sweep and verified issue closing.
//!
//! An issue is closed only through [`verify_resolved`], fed by the
//! completion signals a drain actually observed. A task that reads
//! `completed` in the store while its issue is still `in_progress` got
//! there without verification; that stale signal is never trusted. The
//! sweep discards it, resets the issue to `pending` with its task link
//! cleared, and counts the anomaly so the critical loop re-plans.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{info, warn};

use crate::error::EngineError;
use crate::graph::ResolvedGraph;
use crate::metrics::AnomalyCounters;
use crate::model::{IssueId, IssueStatus, TaskId, TaskStatus};
use crate::store::issues::IssueStore;

/// What one reconciliation sweep changed.
#[derive(Debug, Default)]
pub struct ReconcileReport {
    /// Issues reset to pending because their linked task claimed completion
    /// that was never verified.
    pub reset: Vec<IssueId>,
}

/// Sweep the issue table against the resolved task graph. Idempotent:
/// a second sweep over already-consistent records changes nothing.
pub fn reconcile(
    issues: &Arc<IssueStore>,
    graph: &ResolvedGraph,
    anomalies: &AnomalyCounters,
) -> Result<ReconcileReport, EngineError> {
    let mut report = ReconcileReport::default();

    for issue in issues.list_by_status(IssueStatus::InProgress) {
        let Some(task_id) = &issue.linked_task_id else {
            continue;
        };
        if graph.effective_status(task_id) == Some(TaskStatus::Completed) {
            warn!(
                issue = %issue.id,
                task = %task_id,
                "task completed without verification; resetting issue"
            );
            anomalies.record_false_completion();
            issues.reset_pending(&issue.id)?;
            report.reset.push(issue.id);
        }
    }

    Ok(report)
}

/// Close issues whose fix tasks are among `completed`: the task ids whose
/// success outcome the caller consumed directly from the executor. This is
/// the only path that moves an issue to `completed` on the engine's behalf.
pub fn verify_resolved(
    issues: &Arc<IssueStore>,
    completed: &[TaskId],
) -> Result<Vec<IssueId>, EngineError> {
    if completed.is_empty() {
        return Ok(Vec::new());
    }
    let completed: HashSet<&TaskId> = completed.iter().collect();

    let mut closed = Vec::new();
    for issue in issues.list_by_status(IssueStatus::InProgress) {
        let Some(task_id) = &issue.linked_task_id else {
            continue;
        };
        if completed.contains(task_id) {
            issues.set_status(&issue.id, IssueStatus::InProgress, IssueStatus::Completed)?;
            info!(issue = %issue.id, task = %task_id, "issue resolved by verified completion");
            closed.push(issue.id);
        }
    }

    Ok(closed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        IssuePriority, IssueRecord, IssueSource, TaskCategory, TaskRecord,
    };

    fn graph_with(tasks: Vec<(&str, TaskStatus)>) -> ResolvedGraph {
        ResolvedGraph::from_tasks(
            tasks
                .into_iter()
                .map(|(id, status)| {
                    let mut task = TaskRecord::new(id, TaskCategory::Build);
                    task.status = status;
                    task
                })
                .collect(),
        )
    }

    fn linked_issue(store: &IssueStore, id: &str, task: &str) -> IssueId {
        store
            .put(IssueRecord::new(
                id,
                IssuePriority::Critical,
                IssueSource::FailureAnalysis,
            ))
            .expect("put");
        let issue_id = IssueId::from(id);
        store
            .link_task(&issue_id, TaskId::from(task))
            .expect("link");
        issue_id
    }

    #[test]
    fn test_unverified_completion_resets_issue_to_pending() {
        let issues = Arc::new(IssueStore::in_memory());
        let id = linked_issue(&issues, "I-1", "T-1");
        let graph = graph_with(vec![("T-1", TaskStatus::Completed)]);
        let anomalies = AnomalyCounters::new();

        let report = reconcile(&issues, &graph, &anomalies).expect("reconcile");
        assert_eq!(report.reset, vec![id.clone()]);

        let issue = issues.get(&id).expect("issue");
        assert_eq!(issue.status, IssueStatus::Pending);
        assert!(issue.linked_task_id.is_none());
        assert_eq!(anomalies.snapshot().false_completions, 1);
    }

    #[test]
    fn test_verified_completion_closes_issue() {
        let issues = Arc::new(IssueStore::in_memory());
        let id = linked_issue(&issues, "I-1", "T-1");

        let closed =
            verify_resolved(&issues, &[TaskId::from("T-1")]).expect("verify");
        assert_eq!(closed, vec![id.clone()]);
        assert_eq!(issues.get(&id).expect("issue").status, IssueStatus::Completed);

        // A verified close is consistent; the next sweep leaves it alone.
        let graph = graph_with(vec![("T-1", TaskStatus::Completed)]);
        let anomalies = AnomalyCounters::new();
        let report = reconcile(&issues, &graph, &anomalies).expect("reconcile");
        assert!(report.reset.is_empty());
        assert_eq!(anomalies.snapshot().false_completions, 0);
    }

    #[test]
    fn test_verify_ignores_unrelated_completions() {
        let issues = Arc::new(IssueStore::in_memory());
        let id = linked_issue(&issues, "I-1", "T-1");

        let closed =
            verify_resolved(&issues, &[TaskId::from("OTHER")]).expect("verify");
        assert!(closed.is_empty());
        assert_eq!(issues.get(&id).expect("issue").status, IssueStatus::InProgress);
    }

    #[test]
    fn test_unfinished_task_leaves_issue_in_progress() {
        let issues = Arc::new(IssueStore::in_memory());
        let id = linked_issue(&issues, "I-1", "T-1");
        let graph = graph_with(vec![("T-1", TaskStatus::InProgress)]);
        let anomalies = AnomalyCounters::new();

        let report = reconcile(&issues, &graph, &anomalies).expect("reconcile");
        assert!(report.reset.is_empty());
        assert_eq!(issues.get(&id).expect("issue").status, IssueStatus::InProgress);
    }

    #[test]
    fn test_independently_completed_issue_is_trusted() {
        let issues = Arc::new(IssueStore::in_memory());
        let id = linked_issue(&issues, "I-1", "T-1");
        issues
            .set_status(&id, IssueStatus::InProgress, IssueStatus::Completed)
            .expect("complete");

        // The task behind it never finished; a completed issue is still
        // never reopened by the sweep.
        let graph = graph_with(vec![("T-1", TaskStatus::Failed)]);
        let anomalies = AnomalyCounters::new();
        let report = reconcile(&issues, &graph, &anomalies).expect("reconcile");
        assert!(report.reset.is_empty());
        assert_eq!(issues.get(&id).expect("issue").status, IssueStatus::Completed);
        assert_eq!(anomalies.snapshot().false_completions, 0);
    }

    #[test]
    fn test_reconcile_is_idempotent_after_reset() {
        let issues = Arc::new(IssueStore::in_memory());
        linked_issue(&issues, "I-1", "T-1");
        let graph = graph_with(vec![("T-1", TaskStatus::Completed)]);
        let anomalies = AnomalyCounters::new();

        reconcile(&issues, &graph, &anomalies).expect("first sweep");
        let second = reconcile(&issues, &graph, &anomalies).expect("second sweep");
        assert!(second.reset.is_empty());
        assert_eq!(anomalies.snapshot().false_completions, 1);
    }
}
