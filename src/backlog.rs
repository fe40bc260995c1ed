//! File-backed planner: decomposes a JSON backlog document into tasks and
//! converts issues into fix or retry tasks.
//!
//! Intended for runs driven from a prepared backlog; richer planners
//! implement the same trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::executor::OutcomeMetadata;
use crate::model::{TaskCategory, TaskComplexity, TaskId, TaskRecord};
use crate::planner::{
    retry_task_id, IssueContext, IssueDraft, PlanMode, PlanSource, Planner, PlannerError,
};

/// On-disk backlog document.
#[derive(Debug, Serialize, Deserialize)]
pub struct BacklogDocument {
    #[serde(default)]
    pub tasks: Vec<BacklogEntry>,
}

/// One task in a backlog document.
#[derive(Debug, Serialize, Deserialize)]
pub struct BacklogEntry {
    pub id: String,
    pub category: TaskCategory,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub complexity: TaskComplexity,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl BacklogEntry {
    fn into_task(self) -> TaskRecord {
        TaskRecord::new(self.id, self.category)
            .with_title(self.title)
            .with_complexity(self.complexity)
            .with_dependencies(self.dependencies)
    }
}

/// Planner over a prepared backlog file.
#[derive(Debug, Default)]
pub struct FileBacklogPlanner;

impl FileBacklogPlanner {
    pub fn new() -> Self {
        Self
    }

    /// Fix task for one issue. A failure-analysis issue with a known origin
    /// task gets a retry mirroring the origin's shape; anything else gets a
    /// fresh fix task.
    ///
    /// Retries always chain to the ROOT of the origin's retry chain, so
    /// dependents of the original task resolve against the newest attempt.
    fn fix_task(context: &IssueContext) -> TaskRecord {
        let issue = &context.issue;
        match &context.origin_task {
            Some(origin) => {
                let root = origin.chain_root().clone();
                // Attempt number: one past the origin's own attempt suffix,
                // further offset by this issue's retry count so re-plans of
                // the same issue never collide.
                let base = origin
                    .id
                    .as_str()
                    .strip_prefix(&format!("{root}-r"))
                    .and_then(|s| s.parse::<u32>().ok())
                    .unwrap_or(0);
                let attempt = base + issue.retry_count + 1;
                let mut task = TaskRecord::new(retry_task_id(&root, attempt), origin.category)
                    .with_title(format!("Retry: {}", origin.title))
                    .with_complexity(origin.complexity)
                    .retrying(root)
                    .for_issue(issue.id.clone());
                task.dependencies = origin.dependencies.clone();
                task
            }
            None => {
                let id = if issue.retry_count == 0 {
                    format!("fix-{}", issue.id)
                } else {
                    format!("fix-{}-r{}", issue.id, issue.retry_count)
                };
                TaskRecord::new(id, TaskCategory::Other)
                    .with_title(issue.title.clone())
                    .for_issue(issue.id.clone())
            }
        }
    }
}

#[async_trait]
impl Planner for FileBacklogPlanner {
    async fn decompose(
        &self,
        source: &PlanSource,
        mode: PlanMode,
    ) -> Result<Vec<TaskRecord>, PlannerError> {
        match (source, mode) {
            (PlanSource::Document(path), PlanMode::Initial) => {
                let raw = tokio::fs::read_to_string(path)
                    .await
                    .map_err(|e| PlannerError::Source(format!("{}: {e}", path.display())))?;
                let document: BacklogDocument = serde_json::from_str(&raw)
                    .map_err(|e| PlannerError::Source(format!("{}: {e}", path.display())))?;
                debug!(path = %path.display(), tasks = document.tasks.len(), "parsed backlog");
                Ok(document.tasks.into_iter().map(BacklogEntry::into_task).collect())
            }
            (PlanSource::Issues(contexts), PlanMode::ConvertIssues | PlanMode::CriticalOnly) => {
                Ok(contexts.iter().map(Self::fix_task).collect())
            }
            _ => Err(PlannerError::InvalidBatch(
                "planning source does not match mode".to_string(),
            )),
        }
    }

    async fn analyze_failure(
        &self,
        task: &TaskRecord,
        metadata: &OutcomeMetadata,
    ) -> Result<Vec<IssueDraft>, PlannerError> {
        let detail = metadata
            .detail
            .clone()
            .unwrap_or_else(|| "executor reported failure without detail".to_string());
        Ok(vec![IssueDraft {
            title: format!("Task {} ({}) failed", task.id, task.category.as_label()),
            detail: Some(detail),
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{IssuePriority, IssueRecord, IssueSource};
    use std::collections::BTreeSet;
    use std::path::PathBuf;

    fn write_backlog(dir: &tempfile::TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("backlog.json");
        std::fs::write(&path, body).expect("write backlog");
        path
    }

    #[tokio::test]
    async fn test_initial_decompose_reads_document() {
        let dir = tempfile::TempDir::new().expect("temp dir");
        let path = write_backlog(
            &dir,
            r#"{
                "tasks": [
                    {"id": "TEST-1", "category": "test-write", "title": "write tests"},
                    {"id": "BUILD-1", "category": "build", "dependencies": ["TEST-1"]}
                ]
            }"#,
        );

        let planner = FileBacklogPlanner::new();
        let batch = planner
            .decompose(&PlanSource::Document(path), PlanMode::Initial)
            .await
            .expect("decompose");

        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].id, TaskId::from("TEST-1"));
        assert_eq!(batch[0].category, TaskCategory::TestWrite);
        assert!(batch[1].dependencies.contains(&TaskId::from("TEST-1")));
    }

    #[tokio::test]
    async fn test_missing_document_is_source_error() {
        let planner = FileBacklogPlanner::new();
        let err = planner
            .decompose(
                &PlanSource::Document(PathBuf::from("/nonexistent/backlog.json")),
                PlanMode::Initial,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PlannerError::Source(_)));
    }

    #[tokio::test]
    async fn test_issue_with_origin_becomes_retry_task() {
        let origin = TaskRecord::new("BUILD-1", TaskCategory::Build)
            .with_title("build the thing")
            .with_dependencies(["TEST-1"]);
        let mut issue =
            IssueRecord::new("I-1", IssuePriority::Critical, IssueSource::FailureAnalysis)
                .with_origin_task(origin.id.clone());
        issue.retry_count = 1;

        let planner = FileBacklogPlanner::new();
        let batch = planner
            .decompose(
                &PlanSource::Issues(vec![IssueContext {
                    issue,
                    origin_task: Some(origin),
                }]),
                PlanMode::CriticalOnly,
            )
            .await
            .expect("decompose");

        assert_eq!(batch.len(), 1);
        let retry = &batch[0];
        assert_eq!(retry.id, TaskId::from("BUILD-1-r2"));
        assert_eq!(retry.category, TaskCategory::Build);
        assert_eq!(retry.retry_of, Some(TaskId::from("BUILD-1")));
        assert_eq!(
            retry.dependencies,
            BTreeSet::from([TaskId::from("TEST-1")])
        );
        assert_eq!(retry.source_issue.as_ref().map(|i| i.as_str()), Some("I-1"));
    }

    #[tokio::test]
    async fn test_retry_of_a_retry_chains_to_root() {
        let origin = TaskRecord::new("BUILD-1-r1", TaskCategory::Build)
            .retrying(TaskId::from("BUILD-1"));
        let issue =
            IssueRecord::new("I-2", IssuePriority::Critical, IssueSource::FailureAnalysis)
                .with_origin_task(origin.id.clone());

        let planner = FileBacklogPlanner::new();
        let batch = planner
            .decompose(
                &PlanSource::Issues(vec![IssueContext {
                    issue,
                    origin_task: Some(origin),
                }]),
                PlanMode::CriticalOnly,
            )
            .await
            .expect("decompose");

        assert_eq!(batch[0].id, TaskId::from("BUILD-1-r2"));
        assert_eq!(batch[0].retry_of, Some(TaskId::from("BUILD-1")));
    }

    #[tokio::test]
    async fn test_user_issue_becomes_fix_task() {
        let issue = IssueRecord::new("I-9", IssuePriority::Medium, IssueSource::User)
            .with_title("tighten validation");

        let planner = FileBacklogPlanner::new();
        let batch = planner
            .decompose(
                &PlanSource::Issues(vec![IssueContext {
                    issue,
                    origin_task: None,
                }]),
                PlanMode::ConvertIssues,
            )
            .await
            .expect("decompose");

        assert_eq!(batch[0].id, TaskId::from("fix-I-9"));
        assert_eq!(batch[0].category, TaskCategory::Other);
        assert!(batch[0].retry_of.is_none());
    }

    #[tokio::test]
    async fn test_mismatched_source_and_mode_rejected() {
        let planner = FileBacklogPlanner::new();
        let err = planner
            .decompose(
                &PlanSource::Issues(Vec::new()),
                PlanMode::Initial,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PlannerError::InvalidBatch(_)));
    }

    #[tokio::test]
    async fn test_analyze_failure_produces_one_draft() {
        let planner = FileBacklogPlanner::new();
        let task = TaskRecord::new("BUILD-1", TaskCategory::Build);
        let drafts = planner
            .analyze_failure(&task, &OutcomeMetadata::with_detail("linker error"))
            .await
            .expect("analyze");

        assert_eq!(drafts.len(), 1);
        assert!(drafts[0].title.contains("BUILD-1"));
        assert_eq!(drafts[0].detail.as_deref(), Some("linker error"));
    }
}
