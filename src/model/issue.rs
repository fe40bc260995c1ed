//! Issue records: reported or discovered problems that may spawn tasks.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::task::TaskId;

/// Stable, unique identifier for an issue.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IssueId(String);

impl IssueId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IssueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for IssueId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for IssueId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Issue priority. `Critical` suspends ordinary scheduling until resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssuePriority {
    Critical,
    High,
    Medium,
    Low,
}

/// Where an issue came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IssueSource {
    User,
    Generated,
    FailureAnalysis,
}

/// Lifecycle state of an issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueStatus {
    Pending,
    Accepted,
    InProgress,
    Completed,
    WontFix,
}

impl IssueStatus {
    pub fn as_label(&self) -> &'static str {
        match self {
            IssueStatus::Pending => "pending",
            IssueStatus::Accepted => "accepted",
            IssueStatus::InProgress => "in_progress",
            IssueStatus::Completed => "completed",
            IssueStatus::WontFix => "wont_fix",
        }
    }

    /// Whether a direct transition `self -> next` is legal.
    ///
    /// `wont_fix` is reachable only from `pending`/`accepted`, never from
    /// `in_progress` or `completed`. The false-completion reset
    /// (`in_progress -> pending`) goes through the store's explicit,
    /// logged reset operation.
    pub fn can_transition_to(&self, next: IssueStatus) -> bool {
        use IssueStatus::*;
        matches!(
            (self, next),
            (Pending, Accepted)
                | (Pending, InProgress)
                | (Pending, WontFix)
                | (Accepted, InProgress)
                | (Accepted, WontFix)
                | (InProgress, Completed)
        )
    }
}

impl fmt::Display for IssueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// A reported or discovered problem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueRecord {
    pub id: IssueId,
    pub priority: IssuePriority,
    pub status: IssueStatus,
    pub source: IssueSource,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Task created to resolve this issue, once the planner has produced one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linked_task_id: Option<TaskId>,
    /// Task whose failure produced this issue (failure-analysis issues only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_task_id: Option<TaskId>,
    #[serde(default)]
    pub retry_count: u32,
    pub max_retries: u32,
    pub auto_retry: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl IssueRecord {
    pub fn new(id: impl Into<IssueId>, priority: IssuePriority, source: IssueSource) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            priority,
            status: IssueStatus::Pending,
            source,
            title: String::new(),
            detail: None,
            linked_task_id: None,
            origin_task_id: None,
            retry_count: 0,
            max_retries: 3,
            auto_retry: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_origin_task(mut self, task: TaskId) -> Self {
        self.origin_task_id = Some(task);
        self
    }

    pub fn with_auto_retry(mut self, max_retries: u32) -> Self {
        self.auto_retry = true;
        self.max_retries = max_retries;
        self
    }

    pub fn is_critical(&self) -> bool {
        self.priority == IssuePriority::Critical
    }

    /// Whether another retry task may be planned for this issue.
    pub fn retry_allowed(&self) -> bool {
        self.auto_retry && self.retry_count < self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wont_fix_only_from_pending_or_accepted() {
        assert!(IssueStatus::Pending.can_transition_to(IssueStatus::WontFix));
        assert!(IssueStatus::Accepted.can_transition_to(IssueStatus::WontFix));
        assert!(!IssueStatus::InProgress.can_transition_to(IssueStatus::WontFix));
        assert!(!IssueStatus::Completed.can_transition_to(IssueStatus::WontFix));
    }

    #[test]
    fn test_completed_only_from_in_progress() {
        assert!(IssueStatus::InProgress.can_transition_to(IssueStatus::Completed));
        assert!(!IssueStatus::Pending.can_transition_to(IssueStatus::Completed));
        assert!(!IssueStatus::Accepted.can_transition_to(IssueStatus::Completed));
    }

    #[test]
    fn test_reset_is_not_a_plain_transition() {
        assert!(!IssueStatus::InProgress.can_transition_to(IssueStatus::Pending));
    }

    #[test]
    fn test_retry_allowed_bounds() {
        let mut issue = IssueRecord::new("I-1", IssuePriority::Critical, IssueSource::FailureAnalysis)
            .with_auto_retry(3);
        assert!(issue.retry_allowed());
        issue.retry_count = 3;
        assert!(!issue.retry_allowed());

        let manual = IssueRecord::new("I-2", IssuePriority::High, IssueSource::User);
        assert!(!manual.retry_allowed());
    }

    #[test]
    fn test_source_serde_labels() {
        let json = serde_json::to_string(&IssueSource::FailureAnalysis).expect("serialize");
        assert_eq!(json, "\"failure-analysis\"");
    }
}
