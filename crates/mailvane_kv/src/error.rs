//! Error types for the KV layer.

use thiserror::Error;

/// KV operation result type.
pub type Result<T> = std::result::Result<T, KvError>;

/// KV errors. All of these are transient from the task taxonomy's point of
/// view except `WrongType`, which indicates a corrupted key layout.
#[derive(Error, Debug)]
pub enum KvError {
    /// Redis error (connection, command, decode)
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Backend could not be reached
    #[error("KV connection error: {0}")]
    Connection(String),

    /// A key holds a value of an unexpected type
    #[error("Wrong type for key {key}: expected {expected}")]
    WrongType {
        key: String,
        expected: &'static str,
    },
}

impl KvError {
    pub fn wrong_type(key: impl Into<String>, expected: &'static str) -> Self {
        Self::WrongType {
            key: key.into(),
            expected,
        }
    }
}
