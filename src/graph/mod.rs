//! Dependency resolution: readiness, parallelizable sets, critical path,
//! and cycle rejection at ingestion time.

use std::collections::HashMap;

use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use thiserror::Error;
use tracing::warn;

use crate::model::{TaskId, TaskRecord, TaskStatus};

/// A dependency cycle detected while validating a planner batch.
///
/// The offending batch is rejected in full; none of its tasks reach the
/// task store.
#[derive(Debug, Clone, Error)]
#[error("dependency cycle: {}", members.iter().map(TaskId::as_str).collect::<Vec<_>>().join(" -> "))]
pub struct CycleError {
    /// Task ids participating in the cycle.
    pub members: Vec<TaskId>,
}

/// Why a task can or cannot run right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// Pending with every dependency completed.
    Ready,
    /// Pending with at least one dependency still pending or in progress.
    Waiting,
    /// At least one dependency is failed, blocked, or aborted. Distinct
    /// from waiting: this is surfaced, never silently retried.
    Blocked { dependency: TaskId },
    /// The task itself is not pending.
    NotPending,
}

/// Immutable snapshot of the task table with dependency resolution.
///
/// Dependency lookups go through the *effective* status of an id: the
/// status of the newest attempt in that id's retry chain. A dependent that
/// was blocked on a failed task becomes viable again once a retry task for
/// the same chain root is pending or completed.
#[derive(Debug)]
pub struct ResolvedGraph {
    tasks: HashMap<TaskId, TaskRecord>,
    effective: HashMap<TaskId, TaskStatus>,
}

impl ResolvedGraph {
    pub fn from_tasks(records: Vec<TaskRecord>) -> Self {
        let mut effective: HashMap<TaskId, TaskStatus> = HashMap::new();
        let mut newest: HashMap<TaskId, chrono::DateTime<chrono::Utc>> = HashMap::new();

        for record in &records {
            let root = record.chain_root().clone();
            let is_newer = newest
                .get(&root)
                .map(|ts| record.created_at >= *ts)
                .unwrap_or(true);
            if is_newer {
                newest.insert(root.clone(), record.created_at);
                effective.insert(root, record.status);
            }
        }

        let tasks = records.into_iter().map(|t| (t.id.clone(), t)).collect();
        Self { tasks, effective }
    }

    pub fn get(&self, id: &TaskId) -> Option<&TaskRecord> {
        self.tasks.get(id)
    }

    pub fn tasks(&self) -> impl Iterator<Item = &TaskRecord> {
        self.tasks.values()
    }

    /// Effective status of an id, following its retry chain.
    pub fn effective_status(&self, id: &TaskId) -> Option<TaskStatus> {
        self.effective
            .get(id)
            .or_else(|| self.tasks.get(id).map(|t| &t.status))
            .copied()
    }

    /// Compute why `task` can or cannot run right now.
    pub fn readiness(&self, task: &TaskRecord) -> Readiness {
        if task.status != TaskStatus::Pending {
            return Readiness::NotPending;
        }

        let mut waiting = false;
        for dep in &task.dependencies {
            match self.effective_status(dep) {
                Some(TaskStatus::Completed) => {}
                Some(TaskStatus::Failed | TaskStatus::Blocked | TaskStatus::Aborted) => {
                    return Readiness::Blocked {
                        dependency: dep.clone(),
                    };
                }
                Some(TaskStatus::Pending | TaskStatus::InProgress) => waiting = true,
                None => {
                    // The planner may not have ingested this id yet; treat
                    // as unsatisfied rather than satisfied.
                    warn!(task = %task.id, dependency = %dep, "dependency id not found in task store");
                    waiting = true;
                }
            }
        }

        if waiting {
            Readiness::Waiting
        } else {
            Readiness::Ready
        }
    }

    /// True iff the task is pending and every dependency is completed.
    pub fn is_ready(&self, task: &TaskRecord) -> bool {
        self.readiness(task) == Readiness::Ready
    }

    /// All tasks that could start immediately, in any relative order.
    pub fn parallelizable_set(&self) -> Vec<&TaskRecord> {
        self.tasks.values().filter(|t| self.is_ready(t)).collect()
    }

    /// Longest chain through the dependency DAG by edge count, computed by
    /// dynamic programming over a topological order. Reporting only; never
    /// used for scheduling decisions. Returns an empty path if the graph
    /// somehow contains a cycle (ingestion should have rejected it).
    pub fn critical_path(&self) -> Vec<TaskId> {
        let (graph, indices) = self.build_petgraph();
        let order = match toposort(&graph, None) {
            Ok(order) => order,
            Err(_) => return Vec::new(),
        };

        // Longest path ending at each node, with backpointers.
        let mut best: HashMap<NodeIndex, (usize, Option<NodeIndex>)> = HashMap::new();
        for node in &order {
            let mut entry = (0usize, None);
            for pred in graph.neighbors_directed(*node, petgraph::Direction::Incoming) {
                let pred_len = best.get(&pred).map(|(len, _)| *len).unwrap_or(0);
                if pred_len + 1 > entry.0 {
                    entry = (pred_len + 1, Some(pred));
                }
            }
            best.insert(*node, entry);
        }

        let Some((&tail, _)) = best.iter().max_by_key(|(_, (len, _))| *len) else {
            return Vec::new();
        };

        let mut path = Vec::new();
        let mut cursor = Some(tail);
        while let Some(node) = cursor {
            path.push(indices[&node].clone());
            cursor = best.get(&node).and_then(|(_, prev)| *prev);
        }
        path.reverse();
        path
    }

    fn build_petgraph(&self) -> (DiGraph<(), ()>, HashMap<NodeIndex, TaskId>) {
        let mut graph = DiGraph::new();
        let mut by_id: HashMap<&TaskId, NodeIndex> = HashMap::new();
        let mut by_index: HashMap<NodeIndex, TaskId> = HashMap::new();

        for id in self.tasks.keys() {
            let node = graph.add_node(());
            by_id.insert(id, node);
            by_index.insert(node, id.clone());
        }
        for task in self.tasks.values() {
            for dep in &task.dependencies {
                if let Some(&dep_node) = by_id.get(dep) {
                    graph.add_edge(dep_node, by_id[&task.id], ());
                }
            }
        }
        (graph, by_index)
    }
}

/// Validate that `batch` introduces no dependency cycle, considering edges
/// through `existing` tasks as well. Runs during planner ingestion; a
/// detected cycle rejects the whole batch.
pub fn validate_acyclic(existing: &[TaskRecord], batch: &[TaskRecord]) -> Result<(), CycleError> {
    let mut graph = DiGraph::<(), ()>::new();
    let mut by_id: HashMap<&TaskId, NodeIndex> = HashMap::new();
    let mut by_index: HashMap<NodeIndex, &TaskId> = HashMap::new();

    for task in existing.iter().chain(batch.iter()) {
        let node = graph.add_node(());
        by_id.insert(&task.id, node);
        by_index.insert(node, &task.id);
    }
    for task in existing.iter().chain(batch.iter()) {
        for dep in &task.dependencies {
            if let Some(&dep_node) = by_id.get(dep) {
                graph.add_edge(dep_node, by_id[&task.id], ());
            }
        }
    }

    if toposort(&graph, None).is_ok() {
        return Ok(());
    }

    // Name the members of one strongly connected component for the error.
    let members = tarjan_scc(&graph)
        .into_iter()
        .find(|scc| scc.len() > 1)
        .map(|scc| {
            let mut ids: Vec<TaskId> = scc.iter().map(|n| (*by_index[n]).clone()).collect();
            ids.sort();
            ids
        })
        .unwrap_or_default();

    Err(CycleError { members })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TaskCategory;

    fn task(id: &str, deps: &[&str]) -> TaskRecord {
        TaskRecord::new(id, TaskCategory::Build).with_dependencies(deps.iter().copied())
    }

    fn with_status(mut t: TaskRecord, status: TaskStatus) -> TaskRecord {
        t.status = status;
        t
    }

    #[test]
    fn test_ready_requires_all_dependencies_completed() {
        let graph = ResolvedGraph::from_tasks(vec![
            with_status(task("A", &[]), TaskStatus::Completed),
            with_status(task("B", &[]), TaskStatus::InProgress),
            task("C", &["A", "B"]),
        ]);
        let c = graph.get(&TaskId::from("C")).expect("task C");
        assert_eq!(graph.readiness(c), Readiness::Waiting);
        assert!(!graph.is_ready(c));
    }

    #[test]
    fn test_ready_when_all_completed() {
        let graph = ResolvedGraph::from_tasks(vec![
            with_status(task("A", &[]), TaskStatus::Completed),
            task("C", &["A"]),
        ]);
        let c = graph.get(&TaskId::from("C")).expect("task C");
        assert!(graph.is_ready(c));
    }

    #[test]
    fn test_failed_dependency_blocks() {
        let graph = ResolvedGraph::from_tasks(vec![
            with_status(task("A", &[]), TaskStatus::Failed),
            task("C", &["A"]),
        ]);
        let c = graph.get(&TaskId::from("C")).expect("task C");
        assert_eq!(
            graph.readiness(c),
            Readiness::Blocked {
                dependency: TaskId::from("A")
            }
        );
    }

    #[test]
    fn test_non_pending_task_is_never_ready() {
        let graph =
            ResolvedGraph::from_tasks(vec![with_status(task("A", &[]), TaskStatus::Completed)]);
        let a = graph.get(&TaskId::from("A")).expect("task A");
        assert_eq!(graph.readiness(a), Readiness::NotPending);
    }

    #[test]
    fn test_retry_chain_unblocks_dependent() {
        let failed = with_status(task("A", &[]), TaskStatus::Failed);
        let mut retry = with_status(task("A-r1", &[]), TaskStatus::Pending);
        retry.retry_of = Some(TaskId::from("A"));
        retry.created_at = failed.created_at + chrono::Duration::seconds(1);

        let graph = ResolvedGraph::from_tasks(vec![failed, retry, task("C", &["A"])]);
        let c = graph.get(&TaskId::from("C")).expect("task C");
        // The retry attempt is pending, so C waits instead of blocking.
        assert_eq!(graph.readiness(c), Readiness::Waiting);
    }

    #[test]
    fn test_completed_retry_satisfies_dependency() {
        let failed = with_status(task("A", &[]), TaskStatus::Failed);
        let mut retry = with_status(task("A-r1", &[]), TaskStatus::Completed);
        retry.retry_of = Some(TaskId::from("A"));
        retry.created_at = failed.created_at + chrono::Duration::seconds(1);

        let graph = ResolvedGraph::from_tasks(vec![failed, retry, task("C", &["A"])]);
        let c = graph.get(&TaskId::from("C")).expect("task C");
        assert!(graph.is_ready(c));
    }

    #[test]
    fn test_parallelizable_set() {
        let graph = ResolvedGraph::from_tasks(vec![
            task("A", &[]),
            task("B", &[]),
            task("C", &["A"]),
        ]);
        let mut ready: Vec<&str> = graph
            .parallelizable_set()
            .iter()
            .map(|t| t.id.as_str())
            .collect();
        ready.sort();
        assert_eq!(ready, vec!["A", "B"]);
    }

    #[test]
    fn test_critical_path_by_edge_count() {
        let graph = ResolvedGraph::from_tasks(vec![
            task("A", &[]),
            task("B", &["A"]),
            task("C", &["B"]),
            task("D", &[]),
        ]);
        let path = graph.critical_path();
        assert_eq!(
            path,
            vec![TaskId::from("A"), TaskId::from("B"), TaskId::from("C")]
        );
    }

    #[test]
    fn test_cycle_rejected() {
        let batch = vec![task("A", &["B"]), task("B", &["A"])];
        let err = validate_acyclic(&[], &batch).unwrap_err();
        assert_eq!(err.members.len(), 2);
    }

    #[test]
    fn test_cycle_through_existing_tasks_rejected() {
        let existing = vec![task("A", &["B"])];
        let batch = vec![task("B", &["A"])];
        assert!(validate_acyclic(&existing, &batch).is_err());
    }

    #[test]
    fn test_acyclic_batch_accepted() {
        let existing = vec![task("A", &[])];
        let batch = vec![task("B", &["A"]), task("C", &["B"])];
        assert!(validate_acyclic(&existing, &batch).is_ok());
    }
}
