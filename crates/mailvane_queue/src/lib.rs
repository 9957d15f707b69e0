//! Durable task queue: partitions, scheduler, locks, retries, DLQ.
//!
//! State lives entirely in the KV substrate. Four sorted-set partitions hold
//! serialized task records (`ready`, `scheduled`, `processing`, `failed`),
//! a `status` hash mirrors every task's lifecycle for observers, and
//! `job:{id}` keeps a byte-identical copy of the partition member for random
//! access. Transitions between partitions ride on pipelined writes so a task
//! id is never visible in two partitions at once.

pub mod backoff;
pub mod error;
pub mod keys;
pub mod metrics;
pub mod reaper;
pub mod scheduler;

pub use backoff::{BackoffPolicy, BackoffStrategy};
pub use error::{QueueError, Result};
pub use reaper::LeaseReaper;
pub use scheduler::{QueueStats, Scheduler, SchedulerConfig};
