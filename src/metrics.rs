//! Per-run anomaly counters.
//!
//! Every entry of the error taxonomy gets a counter; the run reports a
//! snapshot at each checkpoint and in the final report.

use std::sync::atomic::{AtomicU32, Ordering};

use serde::{Deserialize, Serialize};

/// Shared, lock-free anomaly counters for one run.
#[derive(Debug, Default)]
pub struct AnomalyCounters {
    task_failures: AtomicU32,
    blocked_tasks: AtomicU32,
    false_completions: AtomicU32,
    infra_timeouts: AtomicU32,
    planning_faults: AtomicU32,
    cycle_rejections: AtomicU32,
}

impl AnomalyCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_task_failure(&self) {
        self.task_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_blocked_task(&self) {
        self.blocked_tasks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_false_completion(&self) {
        self.false_completions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_infra_timeout(&self) {
        self.infra_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_planning_fault(&self) {
        self.planning_faults.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cycle_rejection(&self) {
        self.cycle_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> AnomalySnapshot {
        AnomalySnapshot {
            task_failures: self.task_failures.load(Ordering::Relaxed),
            blocked_tasks: self.blocked_tasks.load(Ordering::Relaxed),
            false_completions: self.false_completions.load(Ordering::Relaxed),
            infra_timeouts: self.infra_timeouts.load(Ordering::Relaxed),
            planning_faults: self.planning_faults.load(Ordering::Relaxed),
            cycle_rejections: self.cycle_rejections.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of the anomaly counters, reported at checkpoints.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnomalySnapshot {
    pub task_failures: u32,
    pub blocked_tasks: u32,
    pub false_completions: u32,
    pub infra_timeouts: u32,
    pub planning_faults: u32,
    pub cycle_rejections: u32,
}

impl AnomalySnapshot {
    pub fn total(&self) -> u32 {
        self.task_failures
            + self.blocked_tasks
            + self.false_completions
            + self.infra_timeouts
            + self.planning_faults
            + self.cycle_rejections
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let counters = AnomalyCounters::new();
        counters.record_task_failure();
        counters.record_task_failure();
        counters.record_false_completion();

        let snapshot = counters.snapshot();
        assert_eq!(snapshot.task_failures, 2);
        assert_eq!(snapshot.false_completions, 1);
        assert_eq!(snapshot.total(), 3);
    }

    #[test]
    fn test_snapshot_is_stable_copy() {
        let counters = AnomalyCounters::new();
        counters.record_infra_timeout();
        let before = counters.snapshot();
        counters.record_infra_timeout();
        assert_eq!(before.infra_timeouts, 1);
        assert_eq!(counters.snapshot().infra_timeouts, 2);
    }
}
