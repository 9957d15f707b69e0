//! Thin shared interface over the index key prefixes.
//!
//! The indexer, query engine, and optimizer all reach into the same keys;
//! this is the one place their layout is defined.
//!
//! | Key | Type | Contents |
//! |-----|------|----------|
//! | `posting:{term}` | zset | member `"type:id"`, score = term-in-doc score |
//! | `doc:{type}` | hash | doc id -> serialized document |
//! | `meta:{type}` | hash | doc id -> serialized metadata |
//! | `search:stats` | hash | document counters |

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use mailvane_kv::{Kv, KvOp};

use crate::error::Result;

/// Counter hash for the index.
pub const STATS: &str = "search:stats";
/// Cached health report key.
pub const HEALTH_REPORT: &str = "search:health";
/// Synthetic document type used for chunked indexing.
pub const CHUNK_TYPE: &str = "document_chunk";

pub fn posting_key(term: &str) -> String {
    format!("posting:{}", term)
}

pub fn meta_key(doc_type: &str) -> String {
    format!("meta:{}", doc_type)
}

pub fn doc_key(doc_type: &str) -> String {
    format!("doc:{}", doc_type)
}

/// Posting member for a document.
pub fn member(doc_type: &str, id: &str) -> String {
    format!("{}:{}", doc_type, id)
}

/// Split a posting member back into (type, id). Ids may contain colons;
/// types never do.
pub fn split_member(member: &str) -> Option<(&str, &str)> {
    member.split_once(':')
}

/// A document as stored in the index, content plus metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedDocument {
    pub id: String,
    #[serde(rename = "type")]
    pub doc_type: String,
    pub content: String,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    /// Dense bag-of-words vector, present on chunk documents only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector: Option<Vec<f32>>,
}

#[derive(Clone)]
pub struct IndexStore {
    kv: Arc<dyn Kv>,
}

impl IndexStore {
    pub fn new(kv: Arc<dyn Kv>) -> Self {
        Self { kv }
    }

    pub fn kv(&self) -> Arc<dyn Kv> {
        Arc::clone(&self.kv)
    }

    pub async fn get_document(
        &self,
        doc_type: &str,
        id: &str,
    ) -> Result<Option<IndexedDocument>> {
        match self.kv.hget(&doc_key(doc_type), id).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Raw metadata JSON; callers decide how to treat malformed entries.
    pub async fn get_meta_raw(&self, doc_type: &str, id: &str) -> Result<Option<String>> {
        Ok(self.kv.hget(&meta_key(doc_type), id).await?)
    }

    pub async fn get_meta(
        &self,
        doc_type: &str,
        id: &str,
    ) -> Result<Option<HashMap<String, Value>>> {
        match self.get_meta_raw(doc_type, id).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// All members of a term's posting list with scores.
    pub async fn postings(&self, term: &str) -> Result<Vec<(String, f64)>> {
        Ok(self.kv.zrange(&posting_key(term), 0, -1, false).await?)
    }

    /// Every term with a posting list. O(vocabulary); callers cache.
    pub async fn vocabulary(&self) -> Result<Vec<String>> {
        let keys = self.kv.scan("posting:*").await?;
        Ok(keys
            .into_iter()
            .filter_map(|key| key.strip_prefix("posting:").map(str::to_string))
            .collect())
    }

    pub async fn document_count(&self, doc_type: &str) -> Result<u64> {
        Ok(self.kv.hlen(&doc_key(doc_type)).await?)
    }

    pub async fn apply(&self, ops: Vec<KvOp>) -> Result<()> {
        Ok(self.kv.pipeline(ops).await?)
    }
}
