//! Error taxonomy for task execution.
//!
//! The worker's retry decision is a function of [`TaskError::retryable`],
//! never of message parsing. Handlers classify their failures at the point
//! where the cause is known.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type TaskResult<T> = std::result::Result<T, TaskError>;

/// Failure class for a task attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskErrorKind {
    /// Payload or options violate invariants. Fatal, no retry.
    Validation,
    /// KV / transport / blob I/O failure. Retried under backoff.
    Transient,
    /// A required lock is held elsewhere. Retried under backoff.
    LockContention,
    /// Checksum mismatch or malformed serialized record. Fatal.
    Integrity,
    /// The handler exceeded the task timeout. Retried under backoff.
    Timeout,
}

/// Error produced by a task attempt, carrying its retry classification.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct TaskError {
    pub kind: TaskErrorKind,
    pub message: String,
}

impl TaskError {
    pub fn new(kind: TaskErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(TaskErrorKind::Validation, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(TaskErrorKind::Transient, message)
    }

    pub fn lock_contention(message: impl Into<String>) -> Self {
        Self::new(TaskErrorKind::LockContention, message)
    }

    pub fn integrity(message: impl Into<String>) -> Self {
        Self::new(TaskErrorKind::Integrity, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(TaskErrorKind::Timeout, message)
    }

    /// Whether the scheduler should retry this attempt (attempts permitting).
    pub fn retryable(&self) -> bool {
        matches!(
            self.kind,
            TaskErrorKind::Transient | TaskErrorKind::LockContention | TaskErrorKind::Timeout
        )
    }
}

impl From<serde_json::Error> for TaskError {
    fn from(e: serde_json::Error) -> Self {
        TaskError::integrity(format!("malformed record: {}", e))
    }
}
