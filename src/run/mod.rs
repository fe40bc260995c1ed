//! One orchestration run, end to end.
//!
//! Wires the stores, planner, executor, dispatcher, escalation, and the
//! critical loop together: seed tasks from a requirements source, then
//! alternate between critical resolution, issue conversion, and ordinary
//! dispatch until nothing remains or the run halts.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::critical::{reconcile, CriticalLoopController, CriticalOutcome};
use crate::error::EngineError;
use crate::escalation::{FailureEscalator, RetryBudget};
use crate::executor::Executor;
use crate::graph::validate_acyclic;
use crate::metrics::{AnomalyCounters, AnomalySnapshot};
use crate::model::{IssueId, IssueStatus, TaskRecord, TaskStatus};
use crate::planner::{IssueContext, PlanMode, PlanSource, Planner};
use crate::schedule::{DispatchFilter, Dispatcher, DispatcherConfig, SlotTable};
use crate::store::issues::IssueStore;
use crate::store::tasks::TaskStore;
use crate::store::{read_snapshot, write_snapshot};

const CHECKPOINT_FILE_NAME: &str = "checkpoint.json";

/// Cancels a run from outside its task, e.g. from a signal handler.
#[derive(Clone)]
pub struct AbortHandle {
    cancel: Arc<watch::Sender<bool>>,
}

impl AbortHandle {
    pub fn abort(&self) {
        let _ = self.cancel.send(true);
    }
}

/// Why a run stopped.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum RunHalt {
    /// Every task terminal, every issue closed.
    Completed,
    /// Operator abort.
    Aborted,
    /// Critical issues remain whose retry budget is spent.
    RetriesExhausted { issues: Vec<IssueId> },
    /// Unrunnable work remains and nothing can make progress.
    Stalled { unrunnable: usize },
    /// The requested number of scheduling loops ran; rerun against the same
    /// state directory to continue.
    LoopLimit,
}

/// Final report for one run.
#[derive(Debug, Serialize)]
pub struct RunReport {
    pub halt: RunHalt,
    pub tasks_completed: usize,
    pub tasks_failed: usize,
    pub tasks_aborted: usize,
    pub issues_resolved: usize,
    pub issues_open: usize,
    pub retries_used: u32,
    pub checkpoints: u32,
    pub anomalies: AnomalySnapshot,
}

/// Periodic progress snapshot, persisted alongside the stores. The loop
/// number carries across process restarts; a later run resumes counting
/// where the persisted state left off.
#[derive(Debug, Serialize, Deserialize)]
struct RunCheckpoint {
    at: DateTime<Utc>,
    loop_number: u32,
    sequence: u32,
    tasks_completed: usize,
    tasks_failed: usize,
    issues_open: usize,
    anomalies: AnomalySnapshot,
}

/// One orchestration run over a pair of stores.
pub struct Run {
    config: EngineConfig,
    tasks: Arc<TaskStore>,
    issues: Arc<IssueStore>,
    planner: Arc<dyn Planner>,
    executor: Arc<dyn Executor>,
    slots: Arc<SlotTable>,
    budget: Arc<RetryBudget>,
    anomalies: Arc<AnomalyCounters>,
    escalator: FailureEscalator,
    controller: CriticalLoopController,
    cancel: Arc<watch::Sender<bool>>,
    /// Monotonic across restarts; restored from the last checkpoint.
    loop_number: u32,
    /// Stop after this many scheduling loops in one `execute` call.
    loop_limit: Option<u32>,
}

impl Run {
    pub fn new(
        config: EngineConfig,
        planner: Arc<dyn Planner>,
        executor: Arc<dyn Executor>,
    ) -> Result<Self, EngineError> {
        let (tasks, issues) = match &config.state_dir {
            Some(dir) => (
                Arc::new(TaskStore::open(dir)?),
                Arc::new(IssueStore::open(dir)?),
            ),
            None => (
                Arc::new(TaskStore::in_memory()),
                Arc::new(IssueStore::in_memory()),
            ),
        };

        let slots = Arc::new(SlotTable::new(config.max_concurrent));
        let budget = Arc::new(RetryBudget::new(config.retry_ceiling));
        let anomalies = Arc::new(AnomalyCounters::new());
        let escalator = FailureEscalator::new(
            planner.clone(),
            issues.clone(),
            budget.clone(),
            config.max_retries,
        );
        let controller = CriticalLoopController::new(
            tasks.clone(),
            issues.clone(),
            planner.clone(),
            budget.clone(),
            anomalies.clone(),
            config.critical_pass_limit,
        );
        let (cancel, _) = watch::channel(false);
        let loop_number = config
            .state_dir
            .as_deref()
            .map(last_loop_number)
            .unwrap_or(0);

        Ok(Self {
            config,
            tasks,
            issues,
            planner,
            executor,
            slots,
            budget,
            anomalies,
            escalator,
            controller,
            cancel: Arc::new(cancel),
            loop_number,
            loop_limit: None,
        })
    }

    /// Stop `execute` after `loops` scheduling loops instead of running to
    /// a halt; rerunning against the same state directory continues.
    pub fn with_loop_limit(mut self, loops: u32) -> Self {
        self.loop_limit = Some(loops);
        self
    }

    pub fn loop_number(&self) -> u32 {
        self.loop_number
    }

    pub fn tasks(&self) -> &Arc<TaskStore> {
        &self.tasks
    }

    pub fn issues(&self) -> &Arc<IssueStore> {
        &self.issues
    }

    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle {
            cancel: self.cancel.clone(),
        }
    }

    /// Decompose the requirements document into the initial task batch.
    pub async fn seed(&self, document: impl Into<PathBuf>) -> Result<usize, EngineError> {
        let batch = self
            .planner
            .decompose(&PlanSource::Document(document.into()), PlanMode::Initial)
            .await?;
        let ingested = self.ingest_batch(batch)?;
        info!(tasks = ingested, "seeded initial task batch");
        Ok(ingested)
    }

    /// Validate and ingest one planner batch: drop ids that already exist,
    /// reject the whole batch on a dependency cycle, link issue-sourced
    /// tasks to their issues.
    pub fn ingest_batch(&self, mut batch: Vec<TaskRecord>) -> Result<usize, EngineError> {
        batch.retain(|task| !self.tasks.contains(&task.id));
        if batch.is_empty() {
            return Ok(0);
        }

        let existing = self.tasks.list_all();
        if let Err(cycle) = validate_acyclic(&existing, &batch) {
            self.anomalies.record_cycle_rejection();
            warn!(error = %cycle, "rejecting task batch");
            return Err(cycle.into());
        }

        let count = batch.len();
        for task in batch {
            if let Some(issue_id) = task.source_issue.clone() {
                self.issues.link_task(&issue_id, task.id.clone())?;
            }
            self.tasks.put(task)?;
        }
        Ok(count)
    }

    /// Drive the run to a halt and report.
    pub async fn execute(&mut self) -> Result<RunReport, EngineError> {
        let mut dispatcher = Dispatcher::new(
            self.tasks.clone(),
            self.slots.clone(),
            self.executor.clone(),
            self.budget.clone(),
            self.anomalies.clone(),
            self.cancel.subscribe(),
            DispatcherConfig {
                executor_timeout: self.config.executor_timeout(),
                abort_grace: self.config.abort_grace(),
            },
        );
        let mut checkpoints = 0u32;
        let mut loops_this_call = 0u32;

        let halt = loop {
            if *self.cancel.borrow() {
                break RunHalt::Aborted;
            }
            if let Some(limit) = self.loop_limit {
                if loops_this_call >= limit {
                    info!(limit, loop_number = self.loop_number, "requested loops ran; pausing");
                    break RunHalt::LoopLimit;
                }
            }
            loops_this_call += 1;
            self.loop_number += 1;

            if self.controller.has_open_critical() {
                match self.controller.resolve(&mut dispatcher).await? {
                    CriticalOutcome::Clear { passes } => {
                        info!(passes, "critical backlog resolved");
                    }
                    CriticalOutcome::Exhausted { issues, .. } => {
                        if *self.cancel.borrow() {
                            break RunHalt::Aborted;
                        }
                        break RunHalt::RetriesExhausted { issues };
                    }
                }
            }

            let converted = self.convert_pending_issues().await?;
            let summary = dispatcher.drain(DispatchFilter::All).await?;
            let closed = reconcile::verify_resolved(&self.issues, &summary.completed)?;
            let escalated = self.escalate_failures(&summary.failed).await?;

            checkpoints += 1;
            self.checkpoint(checkpoints)?;

            if summary.aborted_run {
                break RunHalt::Aborted;
            }
            if escalated > 0 {
                // Fresh critical issues; the next iteration enters the
                // resolution loop before any ordinary dispatch.
                continue;
            }

            let progressed = converted > 0
                || !closed.is_empty()
                || !summary.completed.is_empty()
                || !summary.failed.is_empty()
                || !summary.timed_out.is_empty();
            if progressed {
                continue;
            }

            let unrunnable = self.tasks.count_by_status(TaskStatus::Pending)
                + self.tasks.count_by_status(TaskStatus::Blocked);
            if unrunnable == 0 && !self.has_open_issues() {
                break RunHalt::Completed;
            }
            warn!(unrunnable, "run stalled with unrunnable work remaining");
            break RunHalt::Stalled { unrunnable };
        };

        let report = self.report(halt, checkpoints);
        info!(
            halt = ?report.halt,
            completed = report.tasks_completed,
            failed = report.tasks_failed,
            anomalies = report.anomalies.total(),
            "run finished"
        );
        Ok(report)
    }

    /// Turn open non-critical issues into tasks.
    async fn convert_pending_issues(&self) -> Result<usize, EngineError> {
        let contexts: Vec<IssueContext> = self
            .issues
            .list_all()
            .into_iter()
            .filter(|i| {
                !i.is_critical()
                    && matches!(i.status, IssueStatus::Pending | IssueStatus::Accepted)
            })
            .map(|issue| IssueContext {
                origin_task: issue
                    .origin_task_id
                    .as_ref()
                    .and_then(|id| self.tasks.get(id)),
                issue,
            })
            .collect();
        if contexts.is_empty() {
            return Ok(0);
        }

        let batch = self
            .planner
            .decompose(&PlanSource::Issues(contexts), PlanMode::ConvertIssues)
            .await?;
        self.ingest_batch(batch)
    }

    /// Escalate plain task failures into critical issues. Failures of
    /// issue-sourced tasks are skipped; their issue is already open and the
    /// critical loop owns its retry accounting.
    async fn escalate_failures(
        &self,
        failed: &[(crate::model::TaskId, crate::executor::OutcomeMetadata)],
    ) -> Result<usize, EngineError> {
        let mut escalated = 0;
        for (id, metadata) in failed {
            let Some(task) = self.tasks.get(id) else {
                continue;
            };
            if task.source_issue.is_some() {
                continue;
            }
            escalated += self.escalator.escalate(&task, metadata).await?.len();
        }
        Ok(escalated)
    }

    fn has_open_issues(&self) -> bool {
        self.issues.list_all().iter().any(|i| {
            matches!(
                i.status,
                IssueStatus::Pending | IssueStatus::Accepted | IssueStatus::InProgress
            )
        })
    }

    fn checkpoint(&self, sequence: u32) -> Result<(), EngineError> {
        let checkpoint = RunCheckpoint {
            at: Utc::now(),
            loop_number: self.loop_number,
            sequence,
            tasks_completed: self.tasks.count_by_status(TaskStatus::Completed),
            tasks_failed: self.tasks.count_by_status(TaskStatus::Failed),
            issues_open: self.issues.count_by_status(IssueStatus::Pending)
                + self.issues.count_by_status(IssueStatus::Accepted)
                + self.issues.count_by_status(IssueStatus::InProgress),
            anomalies: self.anomalies.snapshot(),
        };
        info!(
            sequence,
            loop_number = checkpoint.loop_number,
            completed = checkpoint.tasks_completed,
            failed = checkpoint.tasks_failed,
            issues_open = checkpoint.issues_open,
            anomalies = checkpoint.anomalies.total(),
            "checkpoint"
        );
        if let Some(dir) = &self.config.state_dir {
            write_snapshot(&dir.join(CHECKPOINT_FILE_NAME), &checkpoint)
                .map_err(EngineError::Store)?;
        }
        Ok(())
    }

    fn report(&self, halt: RunHalt, checkpoints: u32) -> RunReport {
        RunReport {
            halt,
            tasks_completed: self.tasks.count_by_status(TaskStatus::Completed),
            tasks_failed: self.tasks.count_by_status(TaskStatus::Failed),
            tasks_aborted: self.tasks.count_by_status(TaskStatus::Aborted),
            issues_resolved: self.issues.count_by_status(IssueStatus::Completed),
            issues_open: self.issues.count_by_status(IssueStatus::Pending)
                + self.issues.count_by_status(IssueStatus::Accepted)
                + self.issues.count_by_status(IssueStatus::InProgress),
            retries_used: self.budget.used(),
            checkpoints,
            anomalies: self.anomalies.snapshot(),
        }
    }
}

/// Loop number recorded by the last checkpoint under `state_dir`, or zero.
/// A checkpoint that cannot be read is informational loss, not a reason to
/// refuse the run.
fn last_loop_number(state_dir: &Path) -> u32 {
    match read_snapshot::<RunCheckpoint>(&state_dir.join(CHECKPOINT_FILE_NAME)) {
        Ok(Some(checkpoint)) => checkpoint.loop_number,
        Ok(None) => 0,
        Err(err) => {
            warn!(error = %err, "ignoring unreadable checkpoint");
            0
        }
    }
}
