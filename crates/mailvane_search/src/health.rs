//! Index health analysis.
//!
//! Walks the posting and document keyspaces to produce term/document
//! totals, frequency buckets, and a storage estimate from a bounded key
//! sample. The report is cached in the KV for an hour; callers that need a
//! fresh view use [`HealthAnalyzer::analyze_fresh`].

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use mailvane_kv::{KeyType, KvOp};

use crate::error::Result;
use crate::store::{self, IndexStore};

const REPORT_TTL: Duration = Duration::from_secs(60 * 60);
/// Keys sampled for the storage estimate.
const STORAGE_SAMPLE: usize = 100;
const STORAGE_LIMIT_BYTES: u64 = 1024 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexHealthReport {
    pub status: HealthStatus,
    pub issues: Vec<String>,
    pub total_terms: u64,
    pub total_documents: u64,
    /// Mean posting-list size across terms.
    pub avg_term_frequency: f64,
    pub high_frequency_terms: u64,
    pub medium_frequency_terms: u64,
    pub low_frequency_terms: u64,
    pub postings_bytes_estimate: u64,
    pub metadata_bytes_estimate: u64,
    pub generated_at: DateTime<Utc>,
}

pub struct HealthAnalyzer {
    store: IndexStore,
}

impl HealthAnalyzer {
    pub fn new(store: IndexStore) -> Self {
        Self { store }
    }

    /// Cached report; recomputed at most once per hour.
    pub async fn analyze(&self) -> Result<IndexHealthReport> {
        let kv = self.store.kv();
        if let Some(raw) = kv.get(store::HEALTH_REPORT).await? {
            match serde_json::from_str(&raw) {
                Ok(report) => return Ok(report),
                Err(e) => warn!("Discarding unreadable cached health report: {}", e),
            }
        }
        let report = self.analyze_fresh().await?;
        kv.pipeline(vec![KvOp::SetEx {
            key: store::HEALTH_REPORT.to_string(),
            value: serde_json::to_string(&report)?,
            ttl: REPORT_TTL,
        }])
        .await?;
        Ok(report)
    }

    pub async fn analyze_fresh(&self) -> Result<IndexHealthReport> {
        let kv = self.store.kv();

        let posting_keys = kv.scan("posting:*").await?;
        let total_terms = posting_keys.len() as u64;

        let mut counts = Vec::with_capacity(posting_keys.len());
        let mut total_members: u64 = 0;
        for key in &posting_keys {
            let n = kv.zcard(key).await?;
            total_members += n;
            counts.push(n);
        }
        let avg_term_frequency = if total_terms > 0 {
            total_members as f64 / total_terms as f64
        } else {
            0.0
        };

        let mut high = 0u64;
        let mut medium = 0u64;
        let mut low = 0u64;
        for n in counts {
            let n = n as f64;
            if n >= avg_term_frequency * 2.0 {
                high += 1;
            } else if n < avg_term_frequency * 0.5 {
                low += 1;
            } else {
                medium += 1;
            }
        }

        let doc_keys = kv.scan("doc:*").await?;
        let mut total_documents = 0u64;
        for key in &doc_keys {
            total_documents += kv.hlen(key).await?;
        }

        let postings_bytes_estimate = self.estimate_bytes(&posting_keys).await?;
        let meta_keys = kv.scan("meta:*").await?;
        let metadata_bytes_estimate = self.estimate_bytes(&meta_keys).await?;

        let mut issues = Vec::new();
        if total_terms > 0 && avg_term_frequency < 1.0 {
            issues.push("low average term frequency".to_string());
        }
        if high > 2 * medium && total_terms > 0 {
            issues.push("unbalanced term distribution".to_string());
        }
        if postings_bytes_estimate + metadata_bytes_estimate > STORAGE_LIMIT_BYTES {
            issues.push("high storage usage".to_string());
        }
        let status = match issues.len() {
            0 => HealthStatus::Healthy,
            1 => HealthStatus::Degraded,
            _ => HealthStatus::Unhealthy,
        };

        debug!(
            "Index health: {} terms, {} docs, avg freq {:.2}, {} issue(s)",
            total_terms,
            total_documents,
            avg_term_frequency,
            issues.len()
        );
        Ok(IndexHealthReport {
            status,
            issues,
            total_terms,
            total_documents,
            avg_term_frequency,
            high_frequency_terms: high,
            medium_frequency_terms: medium,
            low_frequency_terms: low,
            postings_bytes_estimate,
            metadata_bytes_estimate,
            generated_at: Utc::now(),
        })
    }

    /// Size proxy from a bounded sample, extrapolated to the full keyspace:
    /// key length plus value length according to the key's type.
    async fn estimate_bytes(&self, keys: &[String]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let kv = self.store.kv();
        let sample: &[String] = &keys[..keys.len().min(STORAGE_SAMPLE)];
        let mut sampled_bytes: u64 = 0;
        for key in sample {
            let mut size = key.len() as u64;
            match kv.key_type(key).await? {
                KeyType::SortedSet => {
                    for (member, _score) in kv.zrange(key, 0, -1, false).await? {
                        size += member.len() as u64 + 8;
                    }
                }
                KeyType::Hash => {
                    for (field, value) in kv.hgetall(key).await? {
                        size += field.len() as u64 + value.len() as u64;
                    }
                }
                KeyType::String => {
                    if let Some(value) = kv.get(key).await? {
                        size += value.len() as u64;
                    }
                }
                KeyType::None | KeyType::Other => {}
            }
            sampled_bytes += size;
        }
        let avg = sampled_bytes as f64 / sample.len() as f64;
        Ok((avg * keys.len() as f64) as u64)
    }
}
