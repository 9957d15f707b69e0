//! Task handlers, one module per kind.

pub mod analytics;
pub mod attachments;
pub mod cleanup;
pub mod index_search;
pub mod notification;
pub mod process_email;
pub mod send_email;
pub mod update_thread;

use mailvane_protocol::TaskError;
use mailvane_search::SearchError;

/// Collaborator I/O failures are transient by default.
pub(crate) fn infra_err(e: anyhow::Error) -> TaskError {
    TaskError::transient(e.to_string())
}

pub(crate) fn queue_err(e: mailvane_queue::QueueError) -> TaskError {
    match e {
        mailvane_queue::QueueError::InvalidArgument(msg) => TaskError::validation(msg),
        other => TaskError::transient(other.to_string()),
    }
}

pub(crate) fn search_err(e: SearchError) -> TaskError {
    match e {
        SearchError::LockContention(msg) => TaskError::lock_contention(msg),
        SearchError::Serialization(e) => TaskError::integrity(e.to_string()),
        SearchError::Kv(e) => TaskError::transient(e.to_string()),
    }
}
