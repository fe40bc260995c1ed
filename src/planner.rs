//! The narrow interface the decomposition capability presents to the
//! engine: turning a requirements source or a set of issues into task
//! records, and analyzing failures into issue drafts.

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

use crate::executor::OutcomeMetadata;
use crate::model::{IssueRecord, TaskId, TaskRecord};

/// Errors surfaced by a planner implementation.
#[derive(Debug, Error)]
pub enum PlannerError {
    #[error("failed to read planning source: {0}")]
    Source(String),

    #[error("planner produced an invalid task batch: {0}")]
    InvalidBatch(String),
}

/// Planning mode, restricting what the planner may draw tasks from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanMode {
    /// Decompose the initial requirements source into tasks.
    Initial,
    /// Convert open non-critical issues into tasks.
    ConvertIssues,
    /// Critical-loop pass: create tasks solely from critical issues,
    /// ignoring all other backlog.
    CriticalOnly,
}

/// What the planner decomposes.
#[derive(Debug, Clone)]
pub enum PlanSource {
    /// A requirements document on disk.
    Document(PathBuf),
    /// Open issues, each with the task whose failure produced it (when
    /// that task is known) so retries can mirror its shape.
    Issues(Vec<IssueContext>),
}

/// One issue handed to the planner, with its failure context.
#[derive(Debug, Clone)]
pub struct IssueContext {
    pub issue: IssueRecord,
    pub origin_task: Option<TaskRecord>,
}

/// A problem description produced by failure analysis, before it becomes
/// an issue record.
#[derive(Debug, Clone)]
pub struct IssueDraft {
    pub title: String,
    pub detail: Option<String>,
}

/// Converts requirements and issues into task records.
///
/// `decompose` must be idempotent enough that re-invocation with an
/// unchanged source does not duplicate already-created tasks; the engine
/// additionally drops batch entries whose ids already exist in the store.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn decompose(
        &self,
        source: &PlanSource,
        mode: PlanMode,
    ) -> Result<Vec<TaskRecord>, PlannerError>;

    /// Analyze a failed task into one or more issue drafts. The escalation
    /// subsystem turns each draft into a critical, failure-analysis issue.
    async fn analyze_failure(
        &self,
        task: &TaskRecord,
        metadata: &OutcomeMetadata,
    ) -> Result<Vec<IssueDraft>, PlannerError>;
}

/// Retry task id for the next attempt of `original`, derived from the
/// issue's retry count so re-planning is deterministic.
pub fn retry_task_id(original: &TaskId, attempt: u32) -> TaskId {
    TaskId::new(format!("{}-r{}", original, attempt))
}
