//! The scheduling loop.
//!
//! Each tick scans the task store for pending work, filters by dependency
//! readiness and TDD ordering, acquires concurrency slots, and hands tasks
//! to the executor. Executors run out of the loop's thread of control and
//! report back through a completion channel; the loop's own decision logic
//! stays single-threaded so status transitions never race.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::EngineError;
use crate::escalation::RetryBudget;
use crate::executor::{Executor, OutcomeMetadata};
use crate::graph::{Readiness, ResolvedGraph};
use crate::metrics::AnomalyCounters;
use crate::model::{TaskId, TaskRecord, TaskStatus};
use crate::schedule::slots::SlotTable;
use crate::schedule::tdd::{self, TddDecision};
use crate::store::tasks::TaskStore;
use crate::store::StoreError;

/// Restricts which pending tasks a drain may dispatch.
#[derive(Debug, Clone)]
pub enum DispatchFilter {
    /// Everything in the store.
    All,
    /// Only the named tasks (critical-loop passes).
    Only(HashSet<TaskId>),
}

impl DispatchFilter {
    fn admits(&self, id: &TaskId) -> bool {
        match self {
            DispatchFilter::All => true,
            DispatchFilter::Only(ids) => ids.contains(id),
        }
    }
}

/// What one drain accomplished.
#[derive(Debug, Default)]
pub struct DispatchSummary {
    pub completed: Vec<TaskId>,
    /// Failed tasks with their outcome metadata, for escalation.
    pub failed: Vec<(TaskId, OutcomeMetadata)>,
    /// Tasks newly marked blocked by a failed/blocked dependency.
    pub blocked: Vec<TaskId>,
    /// Tasks requeued after an infrastructure timeout.
    pub timed_out: Vec<TaskId>,
    /// Tasks abandoned by an operator abort.
    pub aborted: Vec<TaskId>,
    /// Pending tasks left unrunnable when the drain returned (held by the
    /// TDD barrier or waiting on work outside the filter).
    pub stalled: usize,
    /// True when the drain ended because the run was aborted.
    pub aborted_run: bool,
}

/// One completion signal from a spawned executor invocation.
#[derive(Debug)]
struct CompletionSignal {
    task_id: TaskId,
    result: CompletionResult,
}

#[derive(Debug)]
enum CompletionResult {
    Finished { success: bool, metadata: OutcomeMetadata },
    Faulted(String),
    TimedOut,
}

/// Configuration subset the dispatcher needs.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub executor_timeout: Duration,
    pub abort_grace: Duration,
}

/// The scheduling loop over one task store.
pub struct Dispatcher {
    tasks: Arc<TaskStore>,
    slots: Arc<SlotTable>,
    executor: Arc<dyn Executor>,
    budget: Arc<RetryBudget>,
    anomalies: Arc<AnomalyCounters>,
    cancel: watch::Receiver<bool>,
    config: DispatcherConfig,
    completion_tx: mpsc::UnboundedSender<CompletionSignal>,
    completion_rx: mpsc::UnboundedReceiver<CompletionSignal>,
    in_flight: HashSet<TaskId>,
}

impl Dispatcher {
    pub fn new(
        tasks: Arc<TaskStore>,
        slots: Arc<SlotTable>,
        executor: Arc<dyn Executor>,
        budget: Arc<RetryBudget>,
        anomalies: Arc<AnomalyCounters>,
        cancel: watch::Receiver<bool>,
        config: DispatcherConfig,
    ) -> Self {
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        Self {
            tasks,
            slots,
            executor,
            budget,
            anomalies,
            cancel,
            config,
            completion_tx,
            completion_rx,
            in_flight: HashSet::new(),
        }
    }

    /// Run scheduling ticks until every admissible task reaches a terminal
    /// or unrunnable state, or the run is aborted.
    pub async fn drain(&mut self, filter: DispatchFilter) -> Result<DispatchSummary, EngineError> {
        let mut summary = DispatchSummary::default();

        loop {
            if *self.cancel.borrow() {
                self.wind_down(&mut summary).await?;
                summary.aborted_run = true;
                return Ok(summary);
            }

            let snapshot = self.tasks.list_all();
            let graph = ResolvedGraph::from_tasks(snapshot);

            // Restart the tick on any unblock so it runs against a fresh
            // snapshot instead of the one that still shows the task blocked.
            if self.revisit_blocked(&graph, &filter)? > 0 {
                continue;
            }

            let mut dispatched = 0usize;
            let mut held = 0usize;
            let mut slot_starved = false;

            let mut pending: Vec<&TaskRecord> = graph
                .tasks()
                .filter(|t| t.status == TaskStatus::Pending && filter.admits(&t.id))
                .filter(|t| !self.in_flight.contains(&t.id))
                .collect();
            // No FIFO guarantee is promised, but a stable order keeps logs
            // and tests readable.
            pending.sort_by(|a, b| a.id.cmp(&b.id));

            for task in pending {
                match graph.readiness(task) {
                    Readiness::NotPending => {}
                    Readiness::Waiting => held += 1,
                    Readiness::Blocked { dependency } => {
                        match self.tasks.mark_blocked(&task.id) {
                            Ok(_) => {
                                warn!(
                                    task = %task.id,
                                    dependency = %dependency,
                                    "task blocked by unresolved dependency"
                                );
                                self.anomalies.record_blocked_task();
                                summary.blocked.push(task.id.clone());
                            }
                            Err(StoreError::TaskStatusConflict { .. }) => {}
                            Err(err) => return Err(err.into()),
                        }
                    }
                    Readiness::Ready => match tdd::evaluate(task, &graph) {
                        TddDecision::Hold => held += 1,
                        decision => {
                            if decision == TddDecision::AllowMissingTests {
                                warn!(
                                    task = %task.id,
                                    "build task has no test-write dependency; dispatching anyway"
                                );
                            }
                            if self.try_dispatch(task)? {
                                dispatched += 1;
                            } else {
                                held += 1;
                                slot_starved = true;
                            }
                        }
                    },
                }
            }

            if self.in_flight.is_empty() {
                if held == 0 {
                    return Ok(summary);
                }
                if dispatched == 0 && !slot_starved {
                    // Nothing running, nothing startable: the remaining
                    // pending tasks wait on work this drain cannot perform
                    // (outside the filter, or behind a permanent barrier).
                    debug!(held, "drain stalled with unrunnable pending tasks");
                    summary.stalled = held;
                    return Ok(summary);
                }
            }

            // Block on a completion signal, or on a slot release when the
            // tick had ready work but the table was full, instead of
            // busy-polling. Every spawned invocation is bounded by the
            // executor timeout, so a signal always arrives.
            tokio::select! {
                signal = self.completion_rx.recv() => {
                    if let Some(signal) = signal {
                        self.handle_completion(signal, &mut summary)?;
                    }
                }
                _ = self.slots.released(), if slot_starved => {
                    // A slot opened up; rescan for the starved tasks.
                }
                changed = self.cancel.changed() => {
                    if changed.is_err() {
                        // Abort sender gone; only completions can arrive now.
                        if let Some(signal) = self.completion_rx.recv().await {
                            self.handle_completion(signal, &mut summary)?;
                        }
                    }
                }
            }
        }
    }

    /// Re-check blocked tasks each tick; a retry landing in the store can
    /// make a blocked dependent viable again. Returns how many unblocked.
    fn revisit_blocked(
        &self,
        graph: &ResolvedGraph,
        filter: &DispatchFilter,
    ) -> Result<usize, EngineError> {
        let mut unblocked = 0;
        for task in graph
            .tasks()
            .filter(|t| t.status == TaskStatus::Blocked && filter.admits(&t.id))
        {
            let still_blocked = task.dependencies.iter().any(|dep| {
                matches!(
                    graph.effective_status(dep),
                    Some(TaskStatus::Failed | TaskStatus::Blocked | TaskStatus::Aborted)
                )
            });
            if !still_blocked {
                match self.tasks.unblock(&task.id) {
                    Ok(_) => {
                        info!(task = %task.id, "blocked task returned to pending");
                        unblocked += 1;
                    }
                    Err(StoreError::TaskStatusConflict { .. }) => {}
                    Err(err) => return Err(err.into()),
                }
            }
        }
        Ok(unblocked)
    }

    /// Acquire a slot and start the executor for one ready task.
    fn try_dispatch(&mut self, task: &TaskRecord) -> Result<bool, EngineError> {
        if !self.slots.acquire(&task.id) {
            return Ok(false);
        }

        let started = match self.tasks.begin(&task.id) {
            Ok(record) => record,
            Err(StoreError::TaskStatusConflict { .. }) => {
                // Lost the CAS to a concurrent writer; give the slot back.
                self.slots.release(&task.id);
                return Ok(false);
            }
            Err(err) => {
                self.slots.release(&task.id);
                return Err(err.into());
            }
        };

        debug!(task = %started.id, attempt = started.attempt_count, "dispatching task");
        self.in_flight.insert(started.id.clone());

        let executor = self.executor.clone();
        let tx = self.completion_tx.clone();
        let timeout = self.config.executor_timeout;
        let task_id = started.id.clone();

        tokio::spawn(async move {
            let started_at = Instant::now();
            let result = match tokio::time::timeout(timeout, executor.execute(started)).await {
                Ok(Ok(mut outcome)) => {
                    if outcome.metadata.duration.is_zero() {
                        outcome.metadata.duration = started_at.elapsed();
                    }
                    CompletionResult::Finished {
                        success: outcome.success,
                        metadata: outcome.metadata,
                    }
                }
                Ok(Err(err)) => CompletionResult::Faulted(err.to_string()),
                Err(_) => CompletionResult::TimedOut,
            };
            // The dispatcher may have gone away on abort; nothing to do then.
            let _ = tx.send(CompletionSignal { task_id, result });
        });

        Ok(true)
    }

    /// Apply one executor completion signal to the store.
    fn handle_completion(
        &mut self,
        signal: CompletionSignal,
        summary: &mut DispatchSummary,
    ) -> Result<(), EngineError> {
        let id = signal.task_id;
        self.slots.release(&id);
        if !self.in_flight.remove(&id) {
            // Duplicate signal; the slot release above was a no-op too.
            debug!(task = %id, "ignoring duplicate completion signal");
            return Ok(());
        }

        let Some(current) = self.tasks.get(&id) else {
            warn!(task = %id, "completion signal for unknown task");
            return Ok(());
        };
        if current.status == TaskStatus::Aborted {
            debug!(task = %id, "discarding completion signal for aborted task");
            return Ok(());
        }

        match signal.result {
            CompletionResult::Finished { success: true, metadata } => {
                self.tasks.finish(&id, TaskStatus::Completed)?;
                info!(
                    task = %id,
                    duration_ms = metadata.duration.as_millis() as u64,
                    "task completed"
                );
                summary.completed.push(id);
            }
            CompletionResult::Finished { success: false, metadata } => {
                self.tasks.finish(&id, TaskStatus::Failed)?;
                self.anomalies.record_task_failure();
                warn!(task = %id, detail = ?metadata.detail, "task failed");
                summary.failed.push((id, metadata));
            }
            CompletionResult::Faulted(message) => {
                self.tasks.finish(&id, TaskStatus::Failed)?;
                self.anomalies.record_task_failure();
                warn!(task = %id, error = %message, "executor fault");
                summary.failed.push((id, OutcomeMetadata::with_detail(message)));
            }
            CompletionResult::TimedOut => {
                // Infrastructure fault, not a task failure: no signal within
                // the bound. Requeue for re-dispatch, charged against the
                // retry budget.
                self.anomalies.record_infra_timeout();
                if self.budget.charge() {
                    warn!(task = %id, "no completion signal within timeout; requeueing");
                    self.tasks.requeue(&id)?;
                    summary.timed_out.push(id);
                } else {
                    warn!(
                        task = %id,
                        "no completion signal within timeout and retry budget exhausted; failing"
                    );
                    self.tasks.finish(&id, TaskStatus::Failed)?;
                    summary.failed.push((
                        id,
                        OutcomeMetadata::with_detail("no completion signal within timeout"),
                    ));
                }
            }
        }

        Ok(())
    }

    /// Abort path: stop acquiring, give in-flight executors a grace period
    /// to report, then abandon whatever is left. Slots are always released.
    async fn wind_down(&mut self, summary: &mut DispatchSummary) -> Result<(), EngineError> {
        if self.in_flight.is_empty() {
            return Ok(());
        }

        info!(
            in_flight = self.in_flight.len(),
            grace_secs = self.config.abort_grace.as_secs(),
            "aborting; waiting for in-flight executors"
        );
        let deadline = Instant::now() + self.config.abort_grace;

        while !self.in_flight.is_empty() {
            match tokio::time::timeout_at(deadline, self.completion_rx.recv()).await {
                Ok(Some(signal)) => {
                    let id = signal.task_id;
                    self.slots.release(&id);
                    self.in_flight.remove(&id);
                    // Result discarded: the run is aborting.
                    self.abort_task(&id, summary)?;
                }
                Ok(None) => break,
                Err(_) => break,
            }
        }

        // Force-terminate whatever missed the grace period.
        let leftovers: Vec<TaskId> = self.in_flight.drain().collect();
        for id in leftovers {
            self.slots.release(&id);
            self.abort_task(&id, summary)?;
        }

        Ok(())
    }

    fn abort_task(&self, id: &TaskId, summary: &mut DispatchSummary) -> Result<(), EngineError> {
        match self.tasks.set_status(id, TaskStatus::InProgress, TaskStatus::Aborted) {
            Ok(_) => {
                warn!(task = %id, "task aborted");
                summary.aborted.push(id.clone());
                Ok(())
            }
            Err(StoreError::TaskStatusConflict { .. }) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{ExecutorError, Outcome};
    use crate::model::TaskCategory;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Executor that records the highest observed concurrency and the
    /// order in which tasks started.
    struct RecordingExecutor {
        active: AtomicUsize,
        peak: AtomicUsize,
        started: Mutex<Vec<TaskId>>,
        delay: Duration,
        fail: HashSet<TaskId>,
    }

    impl RecordingExecutor {
        fn new(delay: Duration) -> Self {
            Self {
                active: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                started: Mutex::new(Vec::new()),
                delay,
                fail: HashSet::new(),
            }
        }

        fn failing(mut self, ids: &[&str]) -> Self {
            self.fail = ids.iter().map(|id| TaskId::from(*id)).collect();
            self
        }
    }

    #[async_trait]
    impl Executor for RecordingExecutor {
        async fn execute(&self, task: TaskRecord) -> Result<Outcome, ExecutorError> {
            let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(active, Ordering::SeqCst);
            self.started.lock().unwrap().push(task.id.clone());

            tokio::time::sleep(self.delay).await;
            self.active.fetch_sub(1, Ordering::SeqCst);

            if self.fail.contains(&task.id) {
                Ok(Outcome::failure("synthetic failure"))
            } else {
                Ok(Outcome::success())
            }
        }
    }

    fn dispatcher(
        tasks: Arc<TaskStore>,
        executor: Arc<dyn Executor>,
        max_concurrent: usize,
    ) -> (Dispatcher, watch::Sender<bool>) {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let dispatcher = Dispatcher::new(
            tasks,
            Arc::new(SlotTable::new(max_concurrent)),
            executor,
            Arc::new(RetryBudget::new(5)),
            Arc::new(AnomalyCounters::new()),
            cancel_rx,
            DispatcherConfig {
                executor_timeout: Duration::from_secs(5),
                abort_grace: Duration::from_millis(200),
            },
        );
        (dispatcher, cancel_tx)
    }

    fn seed(store: &TaskStore, id: &str, deps: &[&str]) {
        store
            .put(TaskRecord::new(id, TaskCategory::Other).with_dependencies(deps.iter().copied()))
            .expect("seed task");
    }

    #[tokio::test]
    async fn test_drain_completes_independent_tasks() {
        let tasks = Arc::new(TaskStore::in_memory());
        for id in ["A", "B", "C"] {
            seed(&tasks, id, &[]);
        }
        let executor = Arc::new(RecordingExecutor::new(Duration::from_millis(5)));
        let (mut dispatcher, _cancel) = dispatcher(tasks.clone(), executor, 10);

        let summary = dispatcher.drain(DispatchFilter::All).await.expect("drain");
        assert_eq!(summary.completed.len(), 3);
        assert_eq!(tasks.count_by_status(TaskStatus::Completed), 3);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_concurrency_never_exceeds_cap() {
        let tasks = Arc::new(TaskStore::in_memory());
        for i in 0..8 {
            seed(&tasks, &format!("T-{i}"), &[]);
        }
        let executor = Arc::new(RecordingExecutor::new(Duration::from_millis(20)));
        let (mut dispatcher, _cancel) = dispatcher(tasks.clone(), executor.clone(), 2);

        dispatcher.drain(DispatchFilter::All).await.expect("drain");
        assert!(executor.peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(tasks.count_by_status(TaskStatus::Completed), 8);
    }

    #[tokio::test]
    async fn test_chain_respects_dependency_order() {
        let tasks = Arc::new(TaskStore::in_memory());
        seed(&tasks, "A", &[]);
        seed(&tasks, "B", &["A"]);
        seed(&tasks, "C", &["B"]);
        let executor = Arc::new(RecordingExecutor::new(Duration::from_millis(5)));
        let (mut dispatcher, _cancel) = dispatcher(tasks.clone(), executor.clone(), 10);

        dispatcher.drain(DispatchFilter::All).await.expect("drain");

        let order = executor.started.lock().unwrap().clone();
        assert_eq!(
            order,
            vec![TaskId::from("A"), TaskId::from("B"), TaskId::from("C")]
        );
    }

    #[tokio::test]
    async fn test_failed_dependency_blocks_dependent() {
        let tasks = Arc::new(TaskStore::in_memory());
        seed(&tasks, "A", &[]);
        seed(&tasks, "B", &["A"]);
        let executor = Arc::new(RecordingExecutor::new(Duration::from_millis(5)).failing(&["A"]));
        let (mut dispatcher, _cancel) = dispatcher(tasks.clone(), executor, 10);

        let summary = dispatcher.drain(DispatchFilter::All).await.expect("drain");
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.blocked, vec![TaskId::from("B")]);
        assert_eq!(
            tasks.get(&TaskId::from("B")).expect("task B").status,
            TaskStatus::Blocked
        );
    }

    #[tokio::test]
    async fn test_build_waits_for_test_write() {
        let tasks = Arc::new(TaskStore::in_memory());
        tasks
            .put(TaskRecord::new("TEST-1", TaskCategory::TestWrite))
            .expect("put");
        tasks
            .put(
                TaskRecord::new("BUILD-1", TaskCategory::Build)
                    .with_dependencies(["TEST-1"]),
            )
            .expect("put");

        let executor = Arc::new(RecordingExecutor::new(Duration::from_millis(5)));
        let (mut dispatcher, _cancel) = dispatcher(tasks.clone(), executor.clone(), 10);
        dispatcher.drain(DispatchFilter::All).await.expect("drain");

        let order = executor.started.lock().unwrap().clone();
        assert_eq!(order, vec![TaskId::from("TEST-1"), TaskId::from("BUILD-1")]);
    }

    #[tokio::test]
    async fn test_timeout_requeues_and_charges_budget() {
        struct NeverExecutor;

        #[async_trait]
        impl Executor for NeverExecutor {
            async fn execute(&self, _task: TaskRecord) -> Result<Outcome, ExecutorError> {
                // Never reports within the dispatcher's timeout.
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(Outcome::success())
            }
        }

        let tasks = Arc::new(TaskStore::in_memory());
        seed(&tasks, "T-1", &[]);

        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let budget = Arc::new(RetryBudget::new(1));
        let mut dispatcher = Dispatcher::new(
            tasks.clone(),
            Arc::new(SlotTable::new(1)),
            Arc::new(NeverExecutor),
            budget.clone(),
            Arc::new(AnomalyCounters::new()),
            cancel_rx,
            DispatcherConfig {
                executor_timeout: Duration::from_millis(20),
                abort_grace: Duration::from_millis(20),
            },
        );

        let summary = dispatcher.drain(DispatchFilter::All).await.expect("drain");
        // First timeout requeues; the second exhausts the budget and fails.
        assert_eq!(summary.timed_out, vec![TaskId::from("T-1")]);
        assert_eq!(summary.failed.len(), 1);
        assert!(budget.exhausted());
        assert_eq!(
            tasks.get(&TaskId::from("T-1")).expect("task").status,
            TaskStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_slot_release_wakes_starved_drain() {
        let tasks = Arc::new(TaskStore::in_memory());
        seed(&tasks, "A", &[]);

        // The only slot is held outside the dispatcher; the drain must park
        // on the release event rather than return stalled.
        let slots = Arc::new(SlotTable::new(1));
        assert!(slots.acquire(&TaskId::from("warmup")));

        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let mut dispatcher = Dispatcher::new(
            tasks.clone(),
            slots.clone(),
            Arc::new(RecordingExecutor::new(Duration::from_millis(5))),
            Arc::new(RetryBudget::new(5)),
            Arc::new(AnomalyCounters::new()),
            cancel_rx,
            DispatcherConfig {
                executor_timeout: Duration::from_secs(5),
                abort_grace: Duration::from_millis(50),
            },
        );

        let holder = {
            let slots = slots.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                slots.release(&TaskId::from("warmup"));
            })
        };

        let summary = dispatcher.drain(DispatchFilter::All).await.expect("drain");
        holder.await.expect("holder");

        assert_eq!(summary.completed, vec![TaskId::from("A")]);
        assert_eq!(summary.stalled, 0);
    }

    #[tokio::test]
    async fn test_abort_releases_slots_and_leaves_pending() {
        let tasks = Arc::new(TaskStore::in_memory());
        seed(&tasks, "A", &[]);
        seed(&tasks, "B", &[]);
        seed(&tasks, "C", &["A", "B"]);

        let slots = Arc::new(SlotTable::new(2));
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let mut dispatcher = Dispatcher::new(
            tasks.clone(),
            slots.clone(),
            Arc::new(RecordingExecutor::new(Duration::from_secs(3600))),
            Arc::new(RetryBudget::new(5)),
            Arc::new(AnomalyCounters::new()),
            cancel_rx,
            DispatcherConfig {
                executor_timeout: Duration::from_secs(7200),
                abort_grace: Duration::from_millis(50),
            },
        );

        let abort = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let _ = cancel_tx.send(true);
            cancel_tx
        });

        let summary = dispatcher.drain(DispatchFilter::All).await.expect("drain");
        let _cancel_tx = abort.await.expect("abort task");

        assert!(summary.aborted_run);
        assert_eq!(summary.aborted.len(), 2);
        assert_eq!(slots.running_count(), 0);
        assert_eq!(tasks.count_by_status(TaskStatus::Aborted), 2);
        assert_eq!(
            tasks.get(&TaskId::from("C")).expect("task C").status,
            TaskStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_filter_restricts_dispatch() {
        let tasks = Arc::new(TaskStore::in_memory());
        seed(&tasks, "A", &[]);
        seed(&tasks, "B", &[]);

        let executor = Arc::new(RecordingExecutor::new(Duration::from_millis(5)));
        let (mut dispatcher, _cancel) = dispatcher(tasks.clone(), executor, 10);

        let only: HashSet<TaskId> = [TaskId::from("A")].into_iter().collect();
        let summary = dispatcher
            .drain(DispatchFilter::Only(only))
            .await
            .expect("drain");

        assert_eq!(summary.completed, vec![TaskId::from("A")]);
        assert_eq!(
            tasks.get(&TaskId::from("B")).expect("task B").status,
            TaskStatus::Pending
        );
    }
}
