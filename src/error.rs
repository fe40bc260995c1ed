//! Engine-level error taxonomy.
//!
//! Only task failures (via escalation) and planning faults may alter
//! scheduling mode; everything else is corrected in place and logged.

use thiserror::Error;

use crate::executor::ExecutorError;
use crate::graph::CycleError;
use crate::planner::PlannerError;
use crate::store::StoreError;

/// Fatal or propagated failures of the orchestration engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A planner batch introduced a dependency cycle and was rejected.
    #[error(transparent)]
    Cycle(#[from] CycleError),

    /// Critical issues were present but the planner produced zero tasks on
    /// the pass that should have created them. Halts the run.
    #[error("planning fault: {open_critical} open critical issue(s) but planner produced no tasks")]
    PlanningFault { open_critical: usize },

    /// The critical resolution loop exceeded its pass ceiling.
    #[error("critical resolution loop exceeded {limit} passes")]
    CriticalLoopCeiling { limit: u32 },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Planner(#[from] PlannerError),

    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error("configuration error: {0}")]
    Config(String),
}
