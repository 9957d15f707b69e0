//! Key-value substrate for the queue and search subsystems.
//!
//! The only durable coordination medium in the core. [`Kv`] exposes the
//! primitives the rest of the system relies on: strings with
//! SET-if-absent-with-expiry, hashes, sorted sets, pattern scans, and
//! pipelined multi-op writes (the atomicity unit for partition transitions).
//!
//! Two backends: [`MemoryKv`] for tests and local development, [`RedisKv`]
//! for production.

pub mod error;
pub mod lock;
pub mod memory;
pub mod redis_store;
pub mod store;

pub use error::{KvError, Result};
pub use lock::{LockManager, LockToken};
pub use memory::MemoryKv;
pub use redis_store::RedisKv;
pub use store::{KeyType, Kv, KvOp};
