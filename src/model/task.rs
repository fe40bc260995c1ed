//! Task records and the task status state machine.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::issue::IssueId;

/// Stable, unique identifier for a task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for TaskId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// What kind of work a task represents.
///
/// The category drives TDD ordering: `build` work is gated behind its
/// `test-write` dependencies, and `test-verify` runs only after every build
/// task in the run has completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskCategory {
    TestWrite,
    Build,
    TestVerify,
    Docs,
    Other,
}

impl TaskCategory {
    pub fn as_label(&self) -> &'static str {
        match self {
            TaskCategory::TestWrite => "test-write",
            TaskCategory::Build => "build",
            TaskCategory::TestVerify => "test-verify",
            TaskCategory::Docs => "docs",
            TaskCategory::Other => "other",
        }
    }
}

/// Sizing hint consumed by executors; the engine never branches on it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskComplexity {
    Easy,
    #[default]
    Normal,
    Complex,
}

impl TaskComplexity {
    pub fn as_label(&self) -> &'static str {
        match self {
            TaskComplexity::Easy => "easy",
            TaskComplexity::Normal => "normal",
            TaskComplexity::Complex => "complex",
        }
    }
}

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created, waiting for dependencies and a slot.
    Pending,
    /// Holding a concurrency slot, executor invoked.
    InProgress,
    /// Executor reported success. Terminal.
    Completed,
    /// Executor reported failure. Terminal for this attempt; a retry is a
    /// new task, never a mutation of this record.
    Failed,
    /// A dependency is failed/blocked/aborted. Surfaced to operators,
    /// re-evaluated each scheduling tick.
    Blocked,
    /// Abandoned by an operator abort. Terminal.
    Aborted,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Aborted
        )
    }

    pub fn as_label(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Blocked => "blocked",
            TaskStatus::Aborted => "aborted",
        }
    }

    /// Whether a direct transition `self -> next` is legal.
    ///
    /// The requeue path (`in_progress -> pending` after an infrastructure
    /// timeout) is deliberately absent here; it goes through the store's
    /// explicit, logged requeue operation instead.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, InProgress)
                | (Pending, Blocked)
                | (Pending, Aborted)
                | (Blocked, Pending)
                | (Blocked, Aborted)
                | (InProgress, Completed)
                | (InProgress, Failed)
                | (InProgress, Aborted)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// A unit of dispatchable work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub category: TaskCategory,
    pub status: TaskStatus,
    #[serde(default)]
    pub complexity: TaskComplexity,
    /// Ids of tasks that must be `completed` before this one may start.
    #[serde(default)]
    pub dependencies: BTreeSet<TaskId>,
    /// Original task this record retries, if any. Dependency resolution
    /// follows retry chains so dependents of the original unblock once a
    /// retry attempt lands.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_of: Option<TaskId>,
    /// Issue this task was created to resolve, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_issue: Option<IssueId>,
    /// Short human-readable objective. Opaque to the engine.
    #[serde(default)]
    pub title: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Number of times this record has been handed to an executor.
    #[serde(default)]
    pub attempt_count: u32,
}

impl TaskRecord {
    pub fn new(id: impl Into<TaskId>, category: TaskCategory) -> Self {
        Self {
            id: id.into(),
            category,
            status: TaskStatus::Pending,
            complexity: TaskComplexity::default(),
            dependencies: BTreeSet::new(),
            retry_of: None,
            source_issue: None,
            title: String::new(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            attempt_count: 0,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_complexity(mut self, complexity: TaskComplexity) -> Self {
        self.complexity = complexity;
        self
    }

    pub fn with_dependencies<I, T>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<TaskId>,
    {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn retrying(mut self, original: TaskId) -> Self {
        self.retry_of = Some(original);
        self
    }

    pub fn for_issue(mut self, issue: IssueId) -> Self {
        self.source_issue = Some(issue);
        self
    }

    /// The original id this record ultimately stands in for: the root of its
    /// retry chain, or its own id when it is not a retry.
    pub fn chain_root(&self) -> &TaskId {
        self.retry_of.as_ref().unwrap_or(&self.id)
    }
}
