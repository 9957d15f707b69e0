//! Error types for the queue layer.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, QueueError>;

#[derive(Error, Debug)]
pub enum QueueError {
    /// KV substrate failure (connection, command)
    #[error("KV error: {0}")]
    Kv(#[from] mailvane_kv::KvError),

    /// Enqueue input violates the contract
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Task id has no record
    #[error("Task not found: {0}")]
    NotFound(String),

    /// Malformed serialized record
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Task-level failure (validation, integrity, etc.)
    #[error("Task error: {0}")]
    Task(#[from] mailvane_protocol::TaskError),
}

impl QueueError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }
}
