//! Conductor: a task orchestration engine.
//!
//! Tasks and issues live in durable stores with explicit state machines.
//! A dispatcher runs ready tasks under a concurrency cap, honoring
//! dependency readiness and TDD ordering. Failures escalate into critical
//! issues; whenever critical issues exist, a dedicated resolution loop
//! suspends ordinary scheduling until the backlog is clear.

pub mod agent;
pub mod backlog;
pub mod config;
pub mod critical;
pub mod error;
pub mod escalation;
pub mod executor;
pub mod graph;
pub mod metrics;
pub mod model;
pub mod planner;
pub mod run;
pub mod schedule;
pub mod store;

pub use agent::CommandExecutor;
pub use backlog::FileBacklogPlanner;
pub use config::EngineConfig;
pub use error::EngineError;
pub use executor::{Executor, Outcome, OutcomeMetadata};
pub use model::{
    IssueId, IssuePriority, IssueRecord, IssueSource, IssueStatus, TaskCategory, TaskComplexity,
    TaskId, TaskRecord, TaskStatus,
};
pub use planner::{PlanMode, PlanSource, Planner};
pub use run::{AbortHandle, Run, RunHalt, RunReport};
