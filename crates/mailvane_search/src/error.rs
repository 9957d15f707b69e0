//! Error types for the search layer.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SearchError>;

#[derive(Error, Debug)]
pub enum SearchError {
    /// KV substrate failure
    #[error("KV error: {0}")]
    Kv(#[from] mailvane_kv::KvError),

    /// Malformed serialized record
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A required lock is held elsewhere; the caller should retry
    #[error("Lock contention: {0}")]
    LockContention(String),
}

impl SearchError {
    pub fn lock_contention(msg: impl Into<String>) -> Self {
        Self::LockContention(msg.into())
    }
}
