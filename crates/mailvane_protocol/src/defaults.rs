//! Canonical default values shared across the queue and search subsystems.

pub const DEFAULT_KV_URL: &str = "redis://127.0.0.1:6379";

/// Per-attempt execution budget.
pub const DEFAULT_TASK_TIMEOUT_MS: u64 = 5 * 60 * 1000;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BACKOFF_INITIAL_MS: u64 = 1_000;
pub const DEFAULT_BACKOFF_CAP_MS: u64 = 30_000;

/// Idle wait between empty lease polls.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;
/// A `processing` entry older than this is considered abandoned.
pub const DEFAULT_LEASE_TIMEOUT_MS: u64 = 10 * 60 * 1000;

pub const DOC_LOCK_TTL_SECS: u64 = 30;
pub const OPTIMIZER_LOCK_TTL_SECS: u64 = 60 * 60;

pub const DEFAULT_CHUNK_SIZE: usize = 1_000;
pub const CHUNK_VECTOR_DIMS: usize = 1_536;
/// Vocabulary snapshot reuse window for fuzzy expansion.
pub const VOCAB_CACHE_TTL_SECS: u64 = 60;

pub const OPTIMIZER_BATCH_SIZE: usize = 50;
pub const OPTIMIZER_BATCH_PAUSE_MS: u64 = 100;

pub const DEFAULT_ATTACHMENT_SIZE_LIMIT: u64 = 25 * 1024 * 1024;

pub const WORKER_STOPPED_MESSAGE: &str = "worker stopped";
