//! Failure escalation: the only path by which a plain task failure becomes
//! visible to the scheduling loop as something requiring prioritized
//! attention.
//!
//! On executor failure the planner's failure-analysis capability converts
//! the failure into one or more critical issues. Auto-retry is bounded two
//! ways: a per-run global budget, and a per-issue `retry_count < max_retries`
//! check applied when the critical loop re-plans a stalled issue.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tracing::{info, warn};

use crate::error::EngineError;
use crate::executor::OutcomeMetadata;
use crate::model::{IssueId, IssuePriority, IssueRecord, IssueSource, TaskRecord};
use crate::planner::Planner;
use crate::store::issues::IssueStore;

/// Per-run auto-retry budget. Once exhausted, escalation keeps creating
/// issues but marks them ineligible for auto-retry, preventing infinite
/// flap on a systematically broken task.
#[derive(Debug)]
pub struct RetryBudget {
    ceiling: u32,
    used: AtomicU32,
}

impl RetryBudget {
    pub fn new(ceiling: u32) -> Self {
        Self {
            ceiling,
            used: AtomicU32::new(0),
        }
    }

    /// Consume one retry from the budget. Returns false when the ceiling
    /// has been reached; the caller must stop auto-retrying.
    pub fn charge(&self) -> bool {
        let mut current = self.used.load(Ordering::Relaxed);
        loop {
            if current >= self.ceiling {
                return false;
            }
            match self.used.compare_exchange_weak(
                current,
                current + 1,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    pub fn used(&self) -> u32 {
        self.used.load(Ordering::Relaxed)
    }

    pub fn remaining(&self) -> u32 {
        self.ceiling.saturating_sub(self.used())
    }

    pub fn exhausted(&self) -> bool {
        self.used() >= self.ceiling
    }
}

/// Converts executor failures into critical issues via planner analysis.
pub struct FailureEscalator {
    planner: Arc<dyn Planner>,
    issues: Arc<IssueStore>,
    budget: Arc<RetryBudget>,
    default_max_retries: u32,
}

impl FailureEscalator {
    pub fn new(
        planner: Arc<dyn Planner>,
        issues: Arc<IssueStore>,
        budget: Arc<RetryBudget>,
        default_max_retries: u32,
    ) -> Self {
        Self {
            planner,
            issues,
            budget,
            default_max_retries,
        }
    }

    pub fn budget(&self) -> &RetryBudget {
        &self.budget
    }

    /// Escalate one failed task into critical issues.
    pub async fn escalate(
        &self,
        task: &TaskRecord,
        metadata: &OutcomeMetadata,
    ) -> Result<Vec<IssueId>, EngineError> {
        let drafts = self.planner.analyze_failure(task, metadata).await?;
        if drafts.is_empty() {
            warn!(task = %task.id, "failure analysis produced no issues");
            return Ok(Vec::new());
        }

        let auto_retry = self.budget.charge();
        if !auto_retry {
            warn!(
                task = %task.id,
                ceiling = self.budget.ceiling,
                "auto-retry budget exhausted; escalated issues will not retry automatically"
            );
        }

        let mut created = Vec::with_capacity(drafts.len());
        for (index, draft) in drafts.into_iter().enumerate() {
            let id = IssueId::new(format!("{}-f{}-{}", task.id, task.attempt_count, index + 1));
            let mut issue = IssueRecord::new(
                id.clone(),
                IssuePriority::Critical,
                IssueSource::FailureAnalysis,
            )
            .with_title(draft.title)
            .with_origin_task(task.id.clone());
            if let Some(detail) = draft.detail {
                issue = issue.with_detail(detail);
            }
            if auto_retry {
                issue = issue.with_auto_retry(self.default_max_retries);
            } else {
                issue.max_retries = self.default_max_retries;
            }

            self.issues.put(issue)?;
            info!(task = %task.id, issue = %id, "escalated task failure to critical issue");
            created.push(id);
        }

        Ok(created)
    }
}
