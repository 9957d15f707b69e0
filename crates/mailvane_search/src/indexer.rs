//! Document indexing.
//!
//! Every mutation of a document's postings happens under `lock:doc:{id}`
//! (30 s TTL). The full write for a document is one pipelined batch: the
//! document body, one posting member per term, the merged metadata, and the
//! counter bump, so postings never point at a document that is not there.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, info};

use mailvane_kv::{KvOp, LockManager};
use mailvane_protocol::defaults;
use mailvane_protocol::payload::Language;

use crate::error::{Result, SearchError};
use crate::store::{self, IndexStore, IndexedDocument};
use crate::tokenize::{content_score, term_frequencies, tokenize};

pub struct Indexer {
    store: IndexStore,
    locks: LockManager,
}

/// Synthetic chunk document id.
pub fn chunk_id(doc_id: &str, position: usize) -> String {
    format!("{}_chunk_{}", doc_id, position)
}

/// Fixed-size character chunks; the last one may be short.
pub fn chunk_content(content: &str, chunk_size: usize) -> Vec<String> {
    let chars: Vec<char> = content.chars().collect();
    chars
        .chunks(chunk_size.max(1))
        .map(|chunk| chunk.iter().collect())
        .collect()
}

/// Dense bag-of-words frequency vector for a chunk: one slot per distinct
/// term in first-appearance order, truncated or zero-padded to the fixed
/// dimension count, then L2-normalized.
pub fn chunk_vector(tokens: &[String]) -> Vec<f32> {
    let mut dims = vec![0f32; defaults::CHUNK_VECTOR_DIMS];
    let mut slots: HashMap<&str, usize> = HashMap::new();
    let mut next_slot = 0usize;
    for token in tokens {
        let slot = match slots.get(token.as_str()) {
            Some(&slot) => slot,
            None => {
                if next_slot >= defaults::CHUNK_VECTOR_DIMS {
                    continue;
                }
                slots.insert(token, next_slot);
                next_slot += 1;
                next_slot - 1
            }
        };
        dims[slot] += 1.0;
    }
    let norm: f32 = dims.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in &mut dims {
            *v /= norm;
        }
    }
    dims
}

impl Indexer {
    pub fn new(store: IndexStore, locks: LockManager) -> Self {
        Self { store, locks }
    }

    fn doc_lock_ttl() -> Duration {
        Duration::from_secs(defaults::DOC_LOCK_TTL_SECS)
    }

    /// Index a document under its lock. Lock contention is reported to the
    /// caller, who retries.
    pub async fn index_document(&self, doc: IndexedDocument, language: Language) -> Result<()> {
        let lock_name = format!("doc:{}", doc.id);
        let Some(token) = self.locks.acquire(&lock_name, Self::doc_lock_ttl()).await? else {
            return Err(SearchError::lock_contention(format!(
                "document {} is being indexed elsewhere",
                doc.id
            )));
        };
        let result = self.index_locked(doc, language).await;
        self.locks.release(&lock_name, &token).await?;
        result
    }

    /// Remove a document and every posting that references it. Returns false
    /// when the document was not indexed.
    pub async fn delete_document(&self, doc_type: &str, id: &str) -> Result<bool> {
        let lock_name = format!("doc:{}", id);
        let Some(token) = self.locks.acquire(&lock_name, Self::doc_lock_ttl()).await? else {
            return Err(SearchError::lock_contention(format!(
                "document {} is being indexed elsewhere",
                id
            )));
        };
        let result = self.delete_locked(doc_type, id).await;
        self.locks.release(&lock_name, &token).await?;
        result
    }

    /// Content changed: delete then index under one lock acquisition.
    pub async fn reindex_document(&self, doc: IndexedDocument, language: Language) -> Result<()> {
        let lock_name = format!("doc:{}", doc.id);
        let Some(token) = self.locks.acquire(&lock_name, Self::doc_lock_ttl()).await? else {
            return Err(SearchError::lock_contention(format!(
                "document {} is being indexed elsewhere",
                doc.id
            )));
        };
        let result = async {
            self.delete_locked(&doc.doc_type, &doc.id).await?;
            self.index_locked(doc, language).await
        }
        .await;
        self.locks.release(&lock_name, &token).await?;
        result
    }

    /// Build the synthetic chunk document for `index_document`. The chunk
    /// carries its parent id, position, and dense vector.
    pub fn chunk_document(
        &self,
        parent_id: &str,
        position: usize,
        chunk: String,
        base_metadata: &HashMap<String, Value>,
        language: Language,
    ) -> IndexedDocument {
        let tokens = tokenize(&chunk, language);
        let mut metadata = base_metadata.clone();
        metadata.insert("parent_id".to_string(), json!(parent_id));
        metadata.insert("position".to_string(), json!(position));
        IndexedDocument {
            id: chunk_id(parent_id, position),
            doc_type: store::CHUNK_TYPE.to_string(),
            content: chunk,
            metadata,
            vector: Some(chunk_vector(&tokens)),
        }
    }

    async fn index_locked(&self, mut doc: IndexedDocument, language: Language) -> Result<()> {
        let existed = self
            .store
            .get_document(&doc.doc_type, &doc.id)
            .await?
            .is_some();

        // Stamp the language so deletion re-tokenizes identically.
        doc.metadata
            .insert("language".to_string(), json!(language.as_str()));

        let tokens = tokenize(&doc.content, language);
        let tf = term_frequencies(&tokens);
        let content_len = doc.content.chars().count();
        let doc_member = store::member(&doc.doc_type, &doc.id);

        let mut meta = doc.metadata.clone();
        meta.insert(
            "last_indexed".to_string(),
            json!(Utc::now().timestamp_millis()),
        );

        let mut ops = Vec::with_capacity(tf.len() + 3);
        ops.push(KvOp::HSet {
            key: store::doc_key(&doc.doc_type),
            field: doc.id.clone(),
            value: serde_json::to_string(&doc)?,
        });
        for (term, freq) in &tf {
            ops.push(KvOp::ZAdd {
                key: store::posting_key(term),
                member: doc_member.clone(),
                score: content_score(*freq, content_len),
            });
        }
        ops.push(KvOp::HSet {
            key: store::meta_key(&doc.doc_type),
            field: doc.id.clone(),
            value: serde_json::to_string(&meta)?,
        });
        if !existed {
            ops.push(KvOp::HIncrBy {
                key: store::STATS.to_string(),
                field: format!("docs:{}", doc.doc_type),
                delta: 1,
            });
        }
        self.store.apply(ops).await?;

        debug!(
            "Indexed {} ({} terms, {} chars)",
            doc_member,
            tf.len(),
            content_len
        );
        Ok(())
    }

    async fn delete_locked(&self, doc_type: &str, id: &str) -> Result<bool> {
        let Some(existing) = self.store.get_document(doc_type, id).await? else {
            return Ok(false);
        };

        let language = language_of(&existing);
        let tokens = tokenize(&existing.content, language);
        let tf = term_frequencies(&tokens);
        let doc_member = store::member(doc_type, id);

        let mut ops = Vec::with_capacity(tf.len() + 3);
        for term in tf.keys() {
            ops.push(KvOp::ZRem {
                key: store::posting_key(term),
                member: doc_member.clone(),
            });
        }
        ops.push(KvOp::HDel {
            key: store::doc_key(doc_type),
            field: id.to_string(),
        });
        ops.push(KvOp::HDel {
            key: store::meta_key(doc_type),
            field: id.to_string(),
        });
        ops.push(KvOp::HIncrBy {
            key: store::STATS.to_string(),
            field: format!("docs:{}", doc_type),
            delta: -1,
        });
        self.store.apply(ops).await?;

        info!("Deleted {} from index ({} terms)", doc_member, tf.len());
        Ok(true)
    }
}

/// Language a document was indexed with, stamped into its metadata.
pub(crate) fn language_of(doc: &IndexedDocument) -> Language {
    doc.metadata
        .get("language")
        .and_then(Value::as_str)
        .and_then(|s| s.parse().ok())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mailvane_kv::{Kv, MemoryKv};
    use std::sync::Arc;

    fn indexer() -> (Indexer, Arc<dyn Kv>) {
        let kv: Arc<dyn Kv> = Arc::new(MemoryKv::new());
        let store = IndexStore::new(Arc::clone(&kv));
        let locks = LockManager::new(Arc::clone(&kv));
        (Indexer::new(store, locks), kv)
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
    async fn test_index_writes_postings_and_meta() {
        let (indexer, kv) = indexer();
        indexer
            .index_document(doc("d1", "Hello world hello"), Language::En)
            .await
            .unwrap();

        let score = kv
            .zscore("posting:hello", "email:d1")
            .await
            .unwrap()
            .unwrap();
        let expected = 3.0f64.ln() / 17.0f64.sqrt();
        assert!((score - expected).abs() < 1e-9);

        let store = IndexStore::new(kv);
        let meta = store.get_meta("email", "d1").await.unwrap().unwrap();
        assert!(meta.contains_key("last_indexed"));
        assert_eq!(meta["language"], "en");
        assert_eq!(store.document_count("email").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_reindex_does_not_double_count() {
        let (indexer, kv) = indexer();
        indexer
            .index_document(doc("d1", "alpha beta"), Language::En)
            .await
            .unwrap();
        indexer
            .reindex_document(doc("d1", "gamma delta"), Language::En)
            .await
            .unwrap();

        let store = IndexStore::new(Arc::clone(&kv));
        assert_eq!(store.document_count("email").await.unwrap(), 1);
        // Old terms are gone after the reindex.
        assert_eq!(
            kv.zscore("posting:alpha", "email:d1").await.unwrap(),
            None
        );
        assert!(kv
            .zscore("posting:gamma", "email:d1")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_delete_clears_every_posting() {
        let (indexer, kv) = indexer();
        indexer
            .index_document(doc("d1", "unique terms everywhere"), Language::En)
            .await
            .unwrap();
        assert!(indexer.delete_document("email", "d1").await.unwrap());

        for term in ["unique", "terms", "everywhere"] {
            assert_eq!(
                kv.zscore(&format!("posting:{}", term), "email:d1")
                    .await
                    .unwrap(),
                None
            );
        }
        let store = IndexStore::new(kv);
        assert!(store.get_document("email", "d1").await.unwrap().is_none());
        assert!(store.get_meta("email", "d1").await.unwrap().is_none());
        assert_eq!(store.document_count("email").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delete_missing_document_is_false() {
        let (indexer, _kv) = indexer();
        assert!(!indexer.delete_document("email", "ghost").await.unwrap());
    }

    #[tokio::test]
    async fn test_index_under_held_lock_is_contention() {
        let (indexer, kv) = indexer();
        let locks = LockManager::new(kv);
        let _held = locks
            .acquire("doc:d1", Duration::from_secs(30))
            .await
            .unwrap()
            .unwrap();
        let err = indexer
            .index_document(doc("d1", "content"), Language::En)
            .await
            .unwrap_err();
        assert!(matches!(err, SearchError::LockContention(_)));
    }

    #[test]
    fn test_chunk_content_fixed_size() {
        let chunks = chunk_content("abcdefghij", 4);
        assert_eq!(chunks, vec!["abcd", "efgh", "ij"]);
    }

    #[test]
    fn test_chunk_vector_normalized() {
        let tokens: Vec<String> = ["alpha", "beta", "alpha"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let vector = chunk_vector(&tokens);
        assert_eq!(vector.len(), defaults::CHUNK_VECTOR_DIMS);
        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
        // alpha appeared twice, beta once.
        assert!(vector[0] > vector[1]);
        assert_eq!(vector[2], 0.0);
    }

    #[test]
    fn test_chunk_vector_empty_tokens() {
        let vector = chunk_vector(&[]);
        assert!(vector.iter().all(|v| *v == 0.0));
    }
}
