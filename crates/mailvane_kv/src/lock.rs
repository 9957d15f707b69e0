//! Distributed locks over the KV substrate.
//!
//! A lock is a string key `lock:{name}` holding a fencing token with a TTL.
//! Acquisition is SET-if-absent-with-expiry; release and renewal compare the
//! fencing token first, so a holder whose lease expired cannot stomp on the
//! next owner. Holders: the index optimizer (1 h), per-document indexing
//! (30 s), and the queue's lease supervision.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::store::Kv;

fn lock_key(name: &str) -> String {
    format!("lock:{}", name)
}

/// Fencing token proving lock ownership.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken(String);

impl LockToken {
    fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Named, fenced, timed-out leases.
#[derive(Clone)]
pub struct LockManager {
    kv: Arc<dyn Kv>,
}

impl LockManager {
    pub fn new(kv: Arc<dyn Kv>) -> Self {
        Self { kv }
    }

    /// Try to take the named lock. Returns the fencing token on success,
    /// `None` when another holder has it.
    pub async fn acquire(&self, name: &str, ttl: Duration) -> Result<Option<LockToken>> {
        let token = LockToken::new();
        let acquired = self
            .kv
            .set_nx_ex(&lock_key(name), token.as_str(), ttl)
            .await?;
        if acquired {
            debug!("Acquired lock {} (ttl {:?})", name, ttl);
            Ok(Some(token))
        } else {
            debug!("Lock {} held elsewhere", name);
            Ok(None)
        }
    }

    /// Release the lock if we still own it. A mismatched or missing token is
    /// a no-op: the lease expired and someone else may hold the lock now.
    pub async fn release(&self, name: &str, token: &LockToken) -> Result<()> {
        let key = lock_key(name);
        match self.kv.get(&key).await? {
            Some(current) if current == token.as_str() => {
                self.kv.del(&key).await?;
                debug!("Released lock {}", name);
            }
            Some(_) => {
                warn!("Lock {} owned by another token; not releasing", name);
            }
            None => {}
        }
        Ok(())
    }

    /// Extend the lease if we still own it.
    pub async fn renew(&self, name: &str, token: &LockToken, ttl: Duration) -> Result<bool> {
        let key = lock_key(name);
        match self.kv.get(&key).await? {
            Some(current) if current == token.as_str() => Ok(self.kv.expire(&key, ttl).await?),
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryKv;

    fn manager() -> LockManager {
        LockManager::new(Arc::new(MemoryKv::new()))
    }

    #[tokio::test]
    async fn test_acquire_release_cycle() {
        let locks = manager();
        let token = locks
            .acquire("doc:1", Duration::from_secs(30))
            .await
            .unwrap()
            .unwrap();
        assert!(locks
            .acquire("doc:1", Duration::from_secs(30))
            .await
            .unwrap()
            .is_none());
        locks.release("doc:1", &token).await.unwrap();
        assert!(locks
            .acquire("doc:1", Duration::from_secs(30))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_release_with_stale_token_is_noop() {
        let locks = manager();
        let first = locks
            .acquire("opt", Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Lease expired; a second holder takes over.
        let second = locks
            .acquire("opt", Duration::from_secs(30))
            .await
            .unwrap()
            .unwrap();

        // The stale holder must not free the new lease.
        locks.release("opt", &first).await.unwrap();
        assert!(locks
            .acquire("opt", Duration::from_secs(30))
            .await
            .unwrap()
            .is_none());
        locks.release("opt", &second).await.unwrap();
    }

    #[tokio::test]
    async fn test_renew_only_for_owner() {
        let locks = manager();
        let token = locks
            .acquire("doc:2", Duration::from_secs(30))
            .await
            .unwrap()
            .unwrap();
        assert!(locks
            .renew("doc:2", &token, Duration::from_secs(60))
            .await
            .unwrap());

        let stranger = LockToken::new();
        assert!(!locks
            .renew("doc:2", &stranger, Duration::from_secs(60))
            .await
            .unwrap());
    }
}
