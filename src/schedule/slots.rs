//! Concurrency slot table: the global cap on simultaneously executing tasks.
//!
//! This exists to prevent unbounded parallel fan-out when many tasks become
//! ready at once, e.g. a whole category unblocking in one tick.

use std::collections::HashSet;
use std::sync::Mutex;

use tokio::sync::Notify;

use crate::model::TaskId;

/// Fixed-capacity registry of running task ids.
///
/// `acquire` never blocks; callers that fail to acquire await [`SlotTable::released`]
/// instead of busy-polling the task list. `release` is unconditionally
/// idempotent to tolerate duplicate completion signals.
#[derive(Debug)]
pub struct SlotTable {
    max_concurrent: usize,
    running: Mutex<HashSet<TaskId>>,
    release_event: Notify,
}

impl SlotTable {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            max_concurrent: max_concurrent.max(1),
            running: Mutex::new(HashSet::new()),
            release_event: Notify::new(),
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Take a slot for `task_id`. Returns false when the table is full.
    /// Re-acquiring an id that already holds a slot is a no-op success.
    pub fn acquire(&self, task_id: &TaskId) -> bool {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        if running.contains(task_id) {
            return true;
        }
        if running.len() >= self.max_concurrent {
            return false;
        }
        running.insert(task_id.clone());
        true
    }

    /// Return a slot. Releasing a non-member is a no-op, not an error.
    /// Any release wakes every waiter so the dispatcher can rescan.
    pub fn release(&self, task_id: &TaskId) {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        running.remove(task_id);
        drop(running);
        self.release_event.notify_waiters();
    }

    pub fn running_count(&self) -> usize {
        let running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        running.len()
    }

    pub fn is_running(&self, task_id: &TaskId) -> bool {
        let running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        running.contains(task_id)
    }

    /// Snapshot of the ids currently holding slots.
    pub fn running_set(&self) -> Vec<TaskId> {
        let running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        running.iter().cloned().collect()
    }

    /// Wait until some slot is released.
    pub async fn released(&self) {
        self.release_event.notified().await;
    }
}
