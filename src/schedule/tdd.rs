//! Test-before-implementation ordering, layered on top of dependency
//! readiness.
//!
//! A build task can be structurally ready (all dependencies completed)
//! while lacking any test-write dependency at all; that is a planner
//! omission worth a warning, not a block. A test-write dependency that
//! exists but is incomplete holds the build task back. Test-verify work is
//! a run-wide barrier: it runs only once every build task in the run has
//! completed, because verification is evaluated holistically.

use crate::graph::ResolvedGraph;
use crate::model::{TaskCategory, TaskRecord, TaskStatus};

/// Outcome of the TDD gate for one ready task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TddDecision {
    /// Run it.
    Allow,
    /// Run it, but the planner never linked a test-write task to this
    /// build task. Logged by the dispatcher.
    AllowMissingTests,
    /// Ordering not satisfied yet; leave the task pending.
    Hold,
}

/// Evaluate the TDD gate for a task that already passed dependency
/// readiness.
pub fn evaluate(task: &TaskRecord, graph: &ResolvedGraph) -> TddDecision {
    match task.category {
        TaskCategory::Build => evaluate_build(task, graph),
        TaskCategory::TestVerify => evaluate_verify(graph),
        _ => TddDecision::Allow,
    }
}

fn evaluate_build(task: &TaskRecord, graph: &ResolvedGraph) -> TddDecision {
    let mut saw_test_write = false;
    for dep in &task.dependencies {
        let Some(dep_task) = graph.get(dep) else {
            continue;
        };
        if dep_task.category != TaskCategory::TestWrite {
            continue;
        }
        saw_test_write = true;
        if graph.effective_status(dep) != Some(TaskStatus::Completed) {
            return TddDecision::Hold;
        }
    }

    if saw_test_write {
        TddDecision::Allow
    } else {
        TddDecision::AllowMissingTests
    }
}

fn evaluate_verify(graph: &ResolvedGraph) -> TddDecision {
    let all_builds_done = graph
        .tasks()
        .filter(|t| t.category == TaskCategory::Build)
        .all(|t| graph.effective_status(t.chain_root()) == Some(TaskStatus::Completed));

    if all_builds_done {
        TddDecision::Allow
    } else {
        TddDecision::Hold
    }
}
