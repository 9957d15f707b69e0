//! Background index maintenance.
//!
//! Three passes, all gated by one global lock so only a single optimizer
//! runs at a time: drop empty posting lists, recalibrate posting scores
//! with IDF, and compact metadata records. Every pass works in small
//! batches with a pause in between to keep pressure off the KV.
//!
//! Rescoring recomputes each member's base score from the stored document
//! rather than from the member's current score, so running the pass twice
//! yields the same numbers (modulo concurrent index writes).

use std::time::Duration;

use serde_json::Value;
use tracing::{debug, error, info};

use mailvane_kv::{KvOp, LockManager};
use mailvane_protocol::defaults;

use crate::error::Result;
use crate::indexer::language_of;
use crate::store::{split_member, IndexStore};
use crate::tokenize::{content_score, tokenize};

/// Global optimizer critical section.
const OPTIMIZATION_LOCK: &str = "search:optimization";
const MAX_META_STRING_CHARS: usize = 1_000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OptimizeReport {
    /// Another optimizer held the lock; nothing ran.
    pub skipped: bool,
    pub empty_postings_removed: usize,
    pub postings_rescored: usize,
    pub orphan_members_removed: usize,
    pub metadata_entries_compacted: usize,
}

pub struct Optimizer {
    store: IndexStore,
    locks: LockManager,
    batch_pause: Duration,
}

impl Optimizer {
    pub fn new(store: IndexStore, locks: LockManager) -> Self {
        Self {
            store,
            locks,
            batch_pause: Duration::from_millis(defaults::OPTIMIZER_BATCH_PAUSE_MS),
        }
    }

    /// Run all passes under the global lock. When the lock is held
    /// elsewhere the run is skipped, not queued.
    pub async fn run(&self) -> Result<OptimizeReport> {
        let ttl = Duration::from_secs(defaults::OPTIMIZER_LOCK_TTL_SECS);
        let Some(token) = self.locks.acquire(OPTIMIZATION_LOCK, ttl).await? else {
            info!("Optimization already running elsewhere; skipping");
            return Ok(OptimizeReport {
                skipped: true,
                ..Default::default()
            });
        };
        let result = self.run_locked().await;
        self.locks.release(OPTIMIZATION_LOCK, &token).await?;
        result
    }

    async fn run_locked(&self) -> Result<OptimizeReport> {
        let mut report = OptimizeReport::default();
        report.empty_postings_removed = self.cleanup_empty_postings().await?;
        let (rescored, orphans) = self.recompute_scores().await?;
        report.postings_rescored = rescored;
        report.orphan_members_removed = orphans;
        report.metadata_entries_compacted = self.compact_metadata().await?;
        info!(
            "Optimization done: {} empty postings removed, {} postings rescored, {} orphans dropped, {} metadata entries compacted",
            report.empty_postings_removed,
            report.postings_rescored,
            report.orphan_members_removed,
            report.metadata_entries_compacted
        );
        Ok(report)
    }

    /// Pass 1: delete posting lists with zero members.
    async fn cleanup_empty_postings(&self) -> Result<usize> {
        let kv = self.store.kv();
        let keys = kv.scan("posting:*").await?;
        let mut removed = 0;
        for batch in keys.chunks(defaults::OPTIMIZER_BATCH_SIZE) {
            let mut ops = Vec::new();
            for key in batch {
                if kv.zcard(key).await? == 0 {
                    ops.push(KvOp::Del { key: key.clone() });
                    removed += 1;
                }
            }
            if !ops.is_empty() {
                self.store.apply(ops).await?;
            }
            tokio::time::sleep(self.batch_pause).await;
        }
        debug!("Removed {} empty postings", removed);
        Ok(removed)
    }

    /// Pass 2: recalibrate every member score to
    /// `(base / n) * ln(n + 1)` where `base` is recomputed from the stored
    /// document and `n` is the posting's member count. Members whose
    /// document is gone are dropped.
    async fn recompute_scores(&self) -> Result<(usize, usize)> {
        let kv = self.store.kv();
        let keys = kv.scan("posting:*").await?;
        let mut rescored = 0;
        let mut orphans = 0;
        for batch in keys.chunks(defaults::OPTIMIZER_BATCH_SIZE) {
            for key in batch {
                let Some(term) = key.strip_prefix("posting:") else {
                    continue;
                };
                let members = kv.zrange(key, 0, -1, false).await?;
                let n = members.len();
                if n == 0 {
                    continue;
                }
                let idf = ((n + 1) as f64).ln();

                let mut ops = Vec::with_capacity(n);
                for (posting_member, _score) in members {
                    let Some((doc_type, id)) = split_member(&posting_member) else {
                        error!("Malformed posting member {}; dropping", posting_member);
                        orphans += 1;
                        ops.push(KvOp::ZRem {
                            key: key.clone(),
                            member: posting_member,
                        });
                        continue;
                    };
                    let Some(doc) = self.store.get_document(doc_type, id).await? else {
                        orphans += 1;
                        ops.push(KvOp::ZRem {
                            key: key.clone(),
                            member: posting_member,
                        });
                        continue;
                    };
                    let tokens = tokenize(&doc.content, language_of(&doc));
                    let tf = tokens.iter().filter(|t| *t == term).count();
                    let base = content_score(tf, doc.content.chars().count());
                    ops.push(KvOp::ZAdd {
                        key: key.clone(),
                        member: posting_member,
                        score: (base / n as f64) * idf,
                    });
                }
                self.store.apply(ops).await?;
                rescored += 1;
            }
            tokio::time::sleep(self.batch_pause).await;
        }
        debug!("Rescored {} postings ({} orphans)", rescored, orphans);
        Ok((rescored, orphans))
    }

    /// Pass 3: strip nulls and ellipsize oversized strings in every metadata
    /// record, rewriting each hash as a pipelined delete-then-set.
    async fn compact_metadata(&self) -> Result<usize> {
        let kv = self.store.kv();
        let keys = kv.scan("meta:*").await?;
        let mut compacted = 0;
        for batch in keys.chunks(defaults::OPTIMIZER_BATCH_SIZE) {
            for key in batch {
                let entries = kv.hgetall(key).await?;
                if entries.is_empty() {
                    continue;
                }
                let mut ops = vec![KvOp::Del { key: key.clone() }];
                for (id, raw) in entries {
                    let value = match serde_json::from_str::<Value>(&raw) {
                        Ok(Value::Object(map)) => {
                            let compact: serde_json::Map<String, Value> = map
                                .into_iter()
                                .filter(|(_, v)| !v.is_null())
                                .map(|(k, v)| (k, truncate_value(v)))
                                .collect();
                            compacted += 1;
                            serde_json::to_string(&Value::Object(compact))?
                        }
                        Ok(other) => {
                            compacted += 1;
                            serde_json::to_string(&truncate_value(other))?
                        }
                        Err(e) => {
                            // Keep the original bytes rather than destroy a
                            // record we cannot read.
                            error!("Malformed metadata entry {}/{}: {}", key, id, e);
                            raw
                        }
                    };
                    ops.push(KvOp::HSet {
                        key: key.clone(),
                        field: id,
                        value,
                    });
                }
                self.store.apply(ops).await?;
            }
            tokio::time::sleep(self.batch_pause).await;
        }
        debug!("Compacted {} metadata entries", compacted);
        Ok(compacted)
    }
}

fn truncate_value(value: Value) -> Value {
    match value {
        Value::String(s) if s.chars().count() > MAX_META_STRING_CHARS => {
            let kept: String = s.chars().take(MAX_META_STRING_CHARS - 3).collect();
            Value::String(format!("{}...", kept))
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::Indexer;
    use crate::store::IndexedDocument;
    use mailvane_kv::{Kv, MemoryKv};
    use mailvane_protocol::payload::Language;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn setup() -> (Optimizer, Indexer, Arc<dyn Kv>) {
        let kv: Arc<dyn Kv> = Arc::new(MemoryKv::new());
        let store = IndexStore::new(Arc::clone(&kv));
        let locks = LockManager::new(Arc::clone(&kv));
        let mut optimizer = Optimizer::new(store.clone(), locks.clone());
        optimizer.batch_pause = Duration::from_millis(0);
        (optimizer, Indexer::new(store, locks), kv)
    }

    fn doc(id: &str, content: &str) -> IndexedDocument {
        IndexedDocument {
            id: id.to_string(),
            doc_type: "email".to_string(),
            content: content.to_string(),
            metadata: HashMap::new(),
            vector: None,
        }
    }

    #[tokio::test]
    async fn test_cleanup_removes_empty_postings() {
        let (optimizer, _indexer, kv) = setup();
        kv.zadd("posting:ghost", "email:d1", 0.5).await.unwrap();
        kv.zrem("posting:ghost", "email:d1").await.unwrap();
        kv.zadd("posting:alive", "email:d2", 0.5).await.unwrap();
        kv.hset("doc:email", "d2", &serde_json::to_string(&doc("d2", "alive")).unwrap())
            .await
            .unwrap();

        let report = optimizer.run().await.unwrap();
        assert!(!report.skipped);
        assert_eq!(report.empty_postings_removed, 1);
        assert_eq!(kv.key_type("posting:ghost").await.unwrap(), mailvane_kv::KeyType::None);
        assert_eq!(kv.zcard("posting:alive").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_rescore_is_idempotent() {
        let (optimizer, indexer, kv) = setup();
        indexer
            .index_document(doc("d1", "hello world hello"), Language::En)
            .await
            .unwrap();
        indexer
            .index_document(doc("d2", "hello again friend"), Language::En)
            .await
            .unwrap();

        optimizer.run().await.unwrap();
        let first = kv.zscore("posting:hello", "email:d1").await.unwrap().unwrap();

        optimizer.run().await.unwrap();
        let second = kv.zscore("posting:hello", "email:d1").await.unwrap().unwrap();
        assert!((first - second).abs() < 1e-12);

        // n = 2 members for "hello": score is the recomputed base scaled by
        // ln(3)/2.
        let base = 3.0f64.ln() / 17.0f64.sqrt();
        let expected = (base / 2.0) * 3.0f64.ln();
        assert!((first - expected).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_rescore_drops_orphan_members() {
        let (optimizer, indexer, kv) = setup();
        indexer
            .index_document(doc("d1", "orphan hello"), Language::En)
            .await
            .unwrap();
        // Remove the document body but leave the postings.
        kv.hdel("doc:email", "d1").await.unwrap();

        let report = optimizer.run().await.unwrap();
        assert!(report.orphan_members_removed >= 1);
        assert_eq!(kv.zscore("posting:hello", "email:d1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_compact_strips_nulls_and_truncates() {
        let (optimizer, _indexer, kv) = setup();
        let meta = json!({
            "keep": "value",
            "drop": null,
            "long": "y".repeat(2000),
        });
        kv.hset("meta:email", "d1", &meta.to_string()).await.unwrap();

        optimizer.run().await.unwrap();

        let raw = kv.hget("meta:email", "d1").await.unwrap().unwrap();
        let compacted: HashMap<String, Value> = serde_json::from_str(&raw).unwrap();
        assert_eq!(compacted.get("keep"), Some(&json!("value")));
        assert!(!compacted.contains_key("drop"));
        let long = compacted["long"].as_str().unwrap();
        assert_eq!(long.chars().count(), MAX_META_STRING_CHARS);
        assert!(long.ends_with("..."));
    }

    #[tokio::test]
    async fn test_run_skips_when_lock_held() {
        let (optimizer, _indexer, kv) = setup();
        let locks = LockManager::new(kv);
        let _held = locks
            .acquire(OPTIMIZATION_LOCK, Duration::from_secs(3600))
            .await
            .unwrap()
            .unwrap();
        let report = optimizer.run().await.unwrap();
        assert!(report.skipped);
    }
}
