//! Durable task and issue tables.
//!
//! Both stores keep records in memory behind a lock and snapshot the full
//! table to a JSON file after every mutation, written atomically via a
//! temp file and rename. Status changes go through compare-and-swap
//! operations so concurrent callers can never double-dispatch a record.

pub mod issues;
pub mod tasks;

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use serde::Serialize;
use thiserror::Error;

use crate::model::{IssueId, IssueStatus, TaskId, TaskStatus};

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// IO error during snapshot persistence.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Referenced task does not exist.
    #[error("unknown task {0}")]
    UnknownTask(TaskId),

    /// Referenced issue does not exist.
    #[error("unknown issue {0}")]
    UnknownIssue(IssueId),

    /// A task id was inserted twice.
    #[error("task {0} already exists")]
    DuplicateTask(TaskId),

    /// Compare-and-swap lost: the record was not in the expected status.
    #[error("task {id} is {actual}, expected {expected}")]
    TaskStatusConflict {
        id: TaskId,
        expected: TaskStatus,
        actual: TaskStatus,
    },

    /// Compare-and-swap lost on an issue record.
    #[error("issue {id} is {actual}, expected {expected}")]
    IssueStatusConflict {
        id: IssueId,
        expected: IssueStatus,
        actual: IssueStatus,
    },

    /// The requested transition is not legal for the record's state machine.
    #[error("illegal task transition {from} -> {to} for {id}")]
    IllegalTaskTransition {
        id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },

    /// The requested transition is not legal for the issue lifecycle.
    #[error("illegal issue transition {from} -> {to} for {id}")]
    IllegalIssueTransition {
        id: IssueId,
        from: IssueStatus,
        to: IssueStatus,
    },
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Write `value` as pretty JSON to `path` atomically (temp file + rename).
pub(crate) fn write_snapshot<T: Serialize>(path: &Path, value: &T) -> StoreResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string_pretty(value)?;
    let temp_path = path.with_extension("json.tmp");

    let mut file = fs::File::create(&temp_path)?;
    file.write_all(json.as_bytes())?;
    file.sync_all()?;
    fs::rename(&temp_path, path)?;

    Ok(())
}

/// Read a JSON snapshot, returning `None` when the file does not exist yet.
pub(crate) fn read_snapshot<T: serde::de::DeserializeOwned>(path: &Path) -> StoreResult<Option<T>> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(StoreError::Io(err)),
    }
}
