//! Error types for the monitor layer.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, MonitorError>;

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("KV error: {0}")]
    Kv(#[from] mailvane_kv::KvError),

    #[error("Queue error: {0}")]
    Queue(#[from] mailvane_queue::QueueError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Alert not found: {0}")]
    NotFound(String),
}
