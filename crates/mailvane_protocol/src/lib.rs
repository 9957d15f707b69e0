//! Shared protocol types for Mailvane.
//!
//! Everything that crosses a crate boundary lives here: the durable task
//! record and its codec, the typed per-kind payloads, the error taxonomy the
//! worker's retry decision is based on, identifier wrappers, and the system
//! configuration read from the environment.

pub mod config;
pub mod defaults;
pub mod error;
pub mod ids;
pub mod payload;
pub mod task;

pub use config::SystemConfig;
pub use error::{TaskError, TaskErrorKind, TaskResult};
pub use ids::{AlertId, CorrelationId, TaskId};
pub use payload::TaskPayload;
pub use task::{EnqueueOptions, Priority, StatusRecord, Task, TaskKind, TaskStatus};
