//! Subprocess-backed executor.
//!
//! Runs a configured worker command once per task, passing the task's
//! identity through environment variables. The worker's exit status is the
//! outcome; stderr is carried back as failure detail.

use std::time::Instant;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::executor::{Executor, ExecutorError, Outcome, OutcomeMetadata};
use crate::model::TaskRecord;

/// How much worker stderr to keep as failure detail.
const DETAIL_LIMIT: usize = 2048;

/// Executes tasks by spawning a worker command.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    program: String,
    args: Vec<String>,
}

impl CommandExecutor {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }
}

#[async_trait]
impl Executor for CommandExecutor {
    async fn execute(&self, task: TaskRecord) -> Result<Outcome, ExecutorError> {
        let started = Instant::now();
        debug!(task = %task.id, program = %self.program, "spawning worker");

        let output = Command::new(&self.program)
            .args(&self.args)
            .env("CONDUCTOR_TASK_ID", task.id.as_str())
            .env("CONDUCTOR_TASK_CATEGORY", task.category.as_label())
            .env("CONDUCTOR_TASK_COMPLEXITY", task.complexity.as_label())
            .env("CONDUCTOR_TASK_TITLE", &task.title)
            .env("CONDUCTOR_TASK_ATTEMPT", task.attempt_count.to_string())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ExecutorError::Spawn(format!("{}: {e}", self.program)))?;

        let mut metadata = OutcomeMetadata::default();
        metadata.duration = started.elapsed();

        if output.status.success() {
            Ok(Outcome {
                success: true,
                metadata,
            })
        } else {
            let mut stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            stderr.truncate(DETAIL_LIMIT);
            let detail = if stderr.trim().is_empty() {
                format!("worker exited with {}", output.status)
            } else {
                stderr
            };
            metadata.detail = Some(detail);
            Ok(Outcome {
                success: false,
                metadata,
            })
        }
    }
}

#[cfg(test)]
#[cfg(unix)]
mod tests {
    use super::*;
    use crate::model::{TaskCategory, TaskComplexity};

    #[tokio::test]
    async fn test_zero_exit_is_success() {
        let executor = CommandExecutor::new("true");
        let outcome = executor
            .execute(TaskRecord::new("T-1", TaskCategory::Other))
            .await
            .expect("execute");
        assert!(outcome.success);
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_failure_with_detail() {
        let executor = CommandExecutor::new("sh").with_args(["-c", "echo boom >&2; exit 3"]);
        let outcome = executor
            .execute(TaskRecord::new("T-1", TaskCategory::Other))
            .await
            .expect("execute");
        assert!(!outcome.success);
        assert!(outcome
            .metadata
            .detail
            .as_deref()
            .expect("detail")
            .contains("boom"));
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let executor = CommandExecutor::new("/nonexistent/worker");
        let err = executor
            .execute(TaskRecord::new("T-1", TaskCategory::Other))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::Spawn(_)));
    }

    #[tokio::test]
    async fn test_task_identity_reaches_worker_env() {
        let executor = CommandExecutor::new("sh").with_args([
            "-c",
            r#"[ "$CONDUCTOR_TASK_ID" = "T-7" ] \
                && [ "$CONDUCTOR_TASK_CATEGORY" = "build" ] \
                && [ "$CONDUCTOR_TASK_COMPLEXITY" = "complex" ]"#,
        ]);
        let outcome = executor
            .execute(
                TaskRecord::new("T-7", TaskCategory::Build)
                    .with_complexity(TaskComplexity::Complex),
            )
            .await
            .expect("execute");
        assert!(outcome.success);
    }
}
