//! The `Kv` trait and the pipelined write operations.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// Type of the value stored at a key, as reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    String,
    Hash,
    SortedSet,
    /// Key does not exist.
    None,
    /// A type this layer does not use.
    Other,
}

/// One mutation in a pipelined batch.
///
/// A pipeline is applied as a unit: partition transitions
/// (remove-from-one-set, add-to-another, update status) ride on this so a
/// task id is never observable in two partitions at once.
#[derive(Debug, Clone)]
pub enum KvOp {
    Set {
        key: String,
        value: String,
    },
    SetEx {
        key: String,
        value: String,
        ttl: Duration,
    },
    Del {
        key: String,
    },
    HSet {
        key: String,
        field: String,
        value: String,
    },
    HDel {
        key: String,
        field: String,
    },
    HIncrBy {
        key: String,
        field: String,
        delta: i64,
    },
    ZAdd {
        key: String,
        member: String,
        score: f64,
    },
    ZRem {
        key: String,
        member: String,
    },
    Expire {
        key: String,
        ttl: Duration,
    },
}

/// Key-value substrate primitives.
///
/// Scores are f64 to match the backing store's sorted sets; callers that
/// score by epoch milliseconds convert explicitly.
#[async_trait]
pub trait Kv: Send + Sync {
    // -- strings ------------------------------------------------------------

    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
    /// SET key value NX EX ttl. Returns true when the key was set, false
    /// when it already existed. The lock manager's acquire primitive.
    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;
    async fn del(&self, key: &str) -> Result<()>;
    /// Set or refresh a key's TTL. Returns false when the key is missing.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;
    /// Remaining TTL, `None` when the key is missing or has no expiry.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>>;
    async fn key_type(&self, key: &str) -> Result<KeyType>;

    // -- hashes -------------------------------------------------------------

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>>;
    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()>;
    async fn hdel(&self, key: &str, field: &str) -> Result<()>;
    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>>;
    async fn hlen(&self, key: &str) -> Result<u64>;
    /// Add `delta` to an integer hash field, creating it at zero first.
    async fn hincrby(&self, key: &str, field: &str, delta: i64) -> Result<i64>;

    // -- sorted sets --------------------------------------------------------

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<()>;
    /// Returns true when the member was present.
    async fn zrem(&self, key: &str, member: &str) -> Result<bool>;
    async fn zcard(&self, key: &str) -> Result<u64>;
    async fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>>;
    /// Range by rank, redis semantics: negative indexes count from the end,
    /// `stop` is inclusive. `rev` reverses the (score, member) order.
    async fn zrange(
        &self,
        key: &str,
        start: i64,
        stop: i64,
        rev: bool,
    ) -> Result<Vec<(String, f64)>>;
    async fn zrange_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
        limit: Option<usize>,
    ) -> Result<Vec<(String, f64)>>;
    /// Pop the member with the smallest (score, member).
    async fn zpop_min(&self, key: &str) -> Result<Option<(String, f64)>>;

    // -- scans and batches --------------------------------------------------

    /// All keys matching a `*`-wildcard pattern.
    async fn scan(&self, pattern: &str) -> Result<Vec<String>>;
    /// Apply a batch of mutations as one atomic unit.
    async fn pipeline(&self, ops: Vec<KvOp>) -> Result<()>;
    /// Reachability probe.
    async fn ping(&self) -> Result<()>;
}

/// `*`-wildcard matcher with redis `KEYS`-style semantics (only `*` is
/// special). Shared by the memory backend and callers filtering scan output.
pub fn glob_match(pattern: &str, key: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == key;
    }
    let mut rest = key;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            match rest.strip_prefix(part) {
                Some(r) => rest = r,
                None => return false,
            }
        } else if i == parts.len() - 1 {
            return rest.ends_with(part);
        } else {
            match rest.find(part) {
                Some(pos) => rest = &rest[pos + part.len()..],
                None => return false,
            }
        }
    }
    // Pattern ended with '*'.
    true
}
