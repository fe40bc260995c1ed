//! Critical-issue resolution loop.
//!
//! Whenever critical issues exist, ordinary scheduling is suspended and
//! this loop takes over: scan, plan fixes from critical issues only,
//! dispatch them, verify, repeat. The backlog is declared clear only after
//! two consecutive scans find zero open critical issues.

pub mod reconcile;

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::EngineError;
use crate::escalation::RetryBudget;
use crate::graph::{validate_acyclic, ResolvedGraph};
use crate::metrics::AnomalyCounters;
use crate::model::{IssueId, IssuePriority, IssueRecord, IssueStatus, TaskId, TaskStatus};
use crate::planner::{IssueContext, PlanMode, PlanSource, Planner};
use crate::schedule::{DispatchFilter, Dispatcher};
use crate::store::issues::IssueStore;
use crate::store::tasks::TaskStore;

/// Phase of the resolution loop, for logging and status reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Scanning the issue table for open critical issues.
    Scanning,
    /// Planning and dispatching fix tasks for the issues found.
    Resolving,
    /// Two consecutive scans found nothing; ordinary scheduling resumes.
    Clear,
}

/// How a resolution loop invocation ended, short of a fatal error.
#[derive(Debug)]
pub enum CriticalOutcome {
    /// The critical backlog is clear.
    Clear { passes: u32 },
    /// Stalled issues remain whose retry budget is spent. The run should
    /// halt and surface them rather than loop forever.
    Exhausted { issues: Vec<IssueId>, passes: u32 },
}

/// Drives critical issues to resolution, one pass at a time.
pub struct CriticalLoopController {
    tasks: Arc<TaskStore>,
    issues: Arc<IssueStore>,
    planner: Arc<dyn Planner>,
    budget: Arc<RetryBudget>,
    anomalies: Arc<AnomalyCounters>,
    pass_limit: u32,
}

impl CriticalLoopController {
    pub fn new(
        tasks: Arc<TaskStore>,
        issues: Arc<IssueStore>,
        planner: Arc<dyn Planner>,
        budget: Arc<RetryBudget>,
        anomalies: Arc<AnomalyCounters>,
        pass_limit: u32,
    ) -> Self {
        Self {
            tasks,
            issues,
            planner,
            budget,
            anomalies,
            pass_limit,
        }
    }

    /// True when any critical issue is open, which obliges the caller to
    /// run `resolve` before any ordinary dispatch.
    pub fn has_open_critical(&self) -> bool {
        self.issues
            .list_by_priority(IssuePriority::Critical)
            .iter()
            .any(|i| {
                matches!(
                    i.status,
                    IssueStatus::Pending | IssueStatus::Accepted | IssueStatus::InProgress
                )
            })
    }

    /// Run scan/resolve passes until the backlog clears, retries run out,
    /// or a fatal condition stops the run.
    pub async fn resolve(
        &self,
        dispatcher: &mut Dispatcher,
    ) -> Result<CriticalOutcome, EngineError> {
        let mut clear_scans = 0u32;

        for pass in 1..=self.pass_limit {
            debug!(pass, state = ?LoopState::Scanning, "critical loop pass");
            let graph = ResolvedGraph::from_tasks(self.tasks.list_all());
            reconcile::reconcile(&self.issues, &graph, &self.anomalies)?;

            let scan = self.scan(&graph)?;
            if !scan.exhausted.is_empty() {
                warn!(
                    issues = scan.exhausted.len(),
                    "critical issues stalled with retries exhausted"
                );
                return Ok(CriticalOutcome::Exhausted {
                    issues: scan.exhausted,
                    passes: pass,
                });
            }

            if scan.actionable.is_empty() && !scan.in_flight {
                clear_scans += 1;
                if clear_scans >= 2 {
                    info!(pass, state = ?LoopState::Clear, "critical backlog clear");
                    return Ok(CriticalOutcome::Clear { passes: pass });
                }
                continue;
            }
            clear_scans = 0;

            debug!(
                pass,
                state = ?LoopState::Resolving,
                actionable = scan.actionable.len(),
                "resolving critical issues"
            );

            if !scan.actionable.is_empty() {
                self.plan_fixes(&scan.actionable).await?;
            }

            let filter = self.critical_task_filter();
            let summary = dispatcher.drain(DispatchFilter::Only(filter)).await?;
            let closed = reconcile::verify_resolved(&self.issues, &summary.completed)?;
            debug!(
                pass,
                completed = summary.completed.len(),
                failed = summary.failed.len(),
                resolved = closed.len(),
                "critical pass drained"
            );
            if summary.aborted_run {
                // Treat an operator abort as exhaustion of this loop; the
                // run layer decides what to report.
                return Ok(CriticalOutcome::Exhausted {
                    issues: Vec::new(),
                    passes: pass,
                });
            }
        }

        Err(EngineError::CriticalLoopCeiling {
            limit: self.pass_limit,
        })
    }

    /// Classify open critical issues: plannable now, still executing, or
    /// stalled beyond their retry budget.
    fn scan(&self, graph: &ResolvedGraph) -> Result<ScanResult, EngineError> {
        let mut result = ScanResult::default();

        for issue in self.issues.list_by_priority(IssuePriority::Critical) {
            match issue.status {
                IssueStatus::Pending | IssueStatus::Accepted => result.actionable.push(issue),
                IssueStatus::InProgress => {
                    let effective = issue
                        .linked_task_id
                        .as_ref()
                        .and_then(|t| graph.effective_status(t));
                    match effective {
                        Some(TaskStatus::Pending | TaskStatus::InProgress) => {
                            result.in_flight = true;
                        }
                        Some(TaskStatus::Completed) => {
                            // Reconcile reset these to pending before the
                            // scan; nothing reaches here within a pass.
                        }
                        Some(
                            TaskStatus::Failed | TaskStatus::Blocked | TaskStatus::Aborted,
                        )
                        | None => {
                            if !issue.retry_allowed() {
                                result.exhausted.push(issue.id);
                            } else if !self.budget.charge() {
                                warn!(
                                    issue = %issue.id,
                                    "run auto-retry ceiling reached; not re-planning"
                                );
                                result.exhausted.push(issue.id);
                            } else {
                                let count = self.issues.bump_retry(&issue.id)?;
                                let reopened = self.issues.reset_pending(&issue.id)?;
                                info!(
                                    issue = %issue.id,
                                    retry = count,
                                    max = issue.max_retries,
                                    "re-planning stalled critical issue"
                                );
                                result.actionable.push(reopened);
                            }
                        }
                    }
                }
                IssueStatus::Completed | IssueStatus::WontFix => {}
            }
        }

        Ok(result)
    }

    /// Ask the planner for fix tasks from critical issues only, validate
    /// the batch, and ingest it with issue links.
    async fn plan_fixes(&self, actionable: &[IssueRecord]) -> Result<(), EngineError> {
        let contexts: Vec<IssueContext> = actionable
            .iter()
            .map(|issue| IssueContext {
                issue: issue.clone(),
                origin_task: issue
                    .origin_task_id
                    .as_ref()
                    .and_then(|id| self.tasks.get(id)),
            })
            .collect();

        let mut batch = self
            .planner
            .decompose(&PlanSource::Issues(contexts), PlanMode::CriticalOnly)
            .await?;
        if batch.is_empty() {
            self.anomalies.record_planning_fault();
            return Err(EngineError::PlanningFault {
                open_critical: actionable.len(),
            });
        }

        batch.retain(|task| !self.tasks.contains(&task.id));
        if batch.is_empty() {
            // The planner answered, but with tasks already in the store.
            // Not a planning fault; the pass ceiling bounds any repeat.
            warn!("critical fix batch contained only known tasks");
            return Ok(());
        }

        let existing = self.tasks.list_all();
        if let Err(cycle) = validate_acyclic(&existing, &batch) {
            self.anomalies.record_cycle_rejection();
            warn!(error = %cycle, "rejecting critical fix batch");
            return Err(cycle.into());
        }

        for task in batch {
            if let Some(issue_id) = task.source_issue.clone() {
                self.issues.link_task(&issue_id, task.id.clone())?;
            }
            info!(task = %task.id, issue = ?task.source_issue, "ingesting critical fix task");
            self.tasks.put(task)?;
        }

        Ok(())
    }

    /// Non-terminal tasks tied to open critical issues; the only tasks a
    /// critical pass may dispatch.
    fn critical_task_filter(&self) -> HashSet<TaskId> {
        let open: HashSet<IssueId> = self
            .issues
            .list_by_priority(IssuePriority::Critical)
            .into_iter()
            .filter(|i| {
                matches!(
                    i.status,
                    IssueStatus::Pending | IssueStatus::Accepted | IssueStatus::InProgress
                )
            })
            .map(|i| i.id)
            .collect();

        self.tasks
            .list_all()
            .into_iter()
            .filter(|t| !t.status.is_terminal())
            .filter(|t| {
                t.source_issue
                    .as_ref()
                    .map(|id| open.contains(id))
                    .unwrap_or(false)
            })
            .map(|t| t.id)
            .collect()
    }
}

#[derive(Debug, Default)]
struct ScanResult {
    actionable: Vec<IssueRecord>,
    /// True when some critical issue still has a live fix task.
    in_flight: bool,
    exhausted: Vec<IssueId>,
}
