//! Core data model: task and issue records with their state machines.

pub mod issue;
pub mod task;

pub use issue::{IssueId, IssuePriority, IssueRecord, IssueSource, IssueStatus};
pub use task::{TaskCategory, TaskComplexity, TaskId, TaskRecord, TaskStatus};
