//! Scheduling: concurrency slots, TDD ordering, and the dispatch loop.

pub mod dispatcher;
pub mod slots;
pub mod tdd;

pub use dispatcher::{DispatchFilter, DispatchSummary, Dispatcher, DispatcherConfig};
pub use slots::SlotTable;
pub use tdd::TddDecision;
