//! The narrow interface workers present to the engine.
//!
//! The dispatcher never inspects task content; it hands a task spec to an
//! executor and consumes exactly one outcome per invocation: a success flag
//! plus structured metadata for reporting.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::TaskRecord;

/// Errors an executor can surface instead of an outcome.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// The worker process could not be started at all.
    #[error("failed to start worker: {0}")]
    Spawn(String),

    /// The worker started but the invocation infrastructure failed.
    #[error("worker infrastructure fault: {0}")]
    Infrastructure(String),
}

/// Structured metadata accompanying an outcome. Consumed for reporting
/// only, never for scheduling decisions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutcomeMetadata {
    #[serde(default)]
    pub files_touched: Vec<String>,
    #[serde(default)]
    pub duration: Duration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl OutcomeMetadata {
    pub fn with_detail(detail: impl Into<String>) -> Self {
        Self {
            detail: Some(detail.into()),
            ..Self::default()
        }
    }
}

/// Result of one executor invocation.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub success: bool,
    pub metadata: OutcomeMetadata,
}

impl Outcome {
    pub fn success() -> Self {
        Self {
            success: true,
            metadata: OutcomeMetadata::default(),
        }
    }

    pub fn failure(detail: impl Into<String>) -> Self {
        Self {
            success: false,
            metadata: OutcomeMetadata::with_detail(detail),
        }
    }
}

/// Performs the actual work for one task and reports the outcome.
///
/// Invoked asynchronously; the dispatcher requires exactly one outcome (or
/// error) per invocation. A missing signal is an infrastructure fault
/// handled by the dispatcher's timeout, not by the executor.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, task: TaskRecord) -> Result<Outcome, ExecutorError>;
}
