//! Storage cleanup.
//!
//! Deletes blobs, KV cache entries, and document-store rows older than the
//! cutoff. Exclude patterns always win over target selection. Dry runs
//! compute the same statistics without deleting anything, and either way
//! the stats land under a short-lived `metrics:` key.

use async_trait::async_trait;
use serde::Serialize;
use tracing::info;

use mailvane_kv::store::glob_match;
use mailvane_kv::KvOp;
use mailvane_protocol::payload::CleanupTarget;
use mailvane_protocol::{TaskError, TaskPayload, TaskResult};

use crate::env::WorkerEnv;
use crate::handlers::infra_err;
use crate::registry::{TaskContext, TaskHandler};

use std::time::Duration;

const STATS_TTL: Duration = Duration::from_secs(60 * 60);
const ATTACHMENT_PREFIX: &str = "attachments/";
const CACHE_PATTERN: &str = "cache:*";

#[derive(Debug, Default, Serialize)]
struct CleanupStats {
    dry_run: bool,
    blobs_deleted: u64,
    blob_bytes_reclaimed: u64,
    cache_keys_deleted: u64,
    db_rows_deleted: u64,
}

pub struct CleanupStorageHandler;

#[async_trait]
impl TaskHandler for CleanupStorageHandler {
    async fn handle(&self, ctx: &TaskContext, env: &WorkerEnv) -> TaskResult<()> {
        ctx.task.payload.validate()?;
        let TaskPayload::CleanupStorage(payload) = &ctx.task.payload else {
            return Err(TaskError::validation("payload kind mismatch"));
        };

        let mut stats = CleanupStats {
            dry_run: payload.dry_run,
            ..Default::default()
        };

        for target in &payload.targets {
            ctx.cancel.checkpoint()?;
            match target {
                CleanupTarget::Blobs => {
                    let heads = env
                        .blobs
                        .list(ATTACHMENT_PREFIX)
                        .await
                        .map_err(infra_err)?;
                    for head in heads {
                        if head.uploaded_at >= payload.cutoff {
                            continue;
                        }
                        if excluded(&head.key, &payload.exclude_patterns) {
                            continue;
                        }
                        if !payload.dry_run {
                            env.blobs.delete(&head.key).await.map_err(infra_err)?;
                        }
                        stats.blobs_deleted += 1;
                        stats.blob_bytes_reclaimed += head.size;
                    }
                }
                CleanupTarget::Cache => {
                    // Cache entries are transient by contract; age is
                    // bounded by their own TTLs, so the sweep takes every
                    // non-excluded key.
                    let keys = env
                        .kv
                        .scan(CACHE_PATTERN)
                        .await
                        .map_err(|e| TaskError::transient(e.to_string()))?;
                    for key in keys {
                        if excluded(&key, &payload.exclude_patterns) {
                            continue;
                        }
                        if !payload.dry_run {
                            env.kv
                                .del(&key)
                                .await
                                .map_err(|e| TaskError::transient(e.to_string()))?;
                        }
                        stats.cache_keys_deleted += 1;
                    }
                }
                CleanupTarget::Database => {
                    stats.db_rows_deleted += if payload.dry_run {
                        env.docs
                            .count_records_older_than(payload.cutoff)
                            .await
                            .map_err(infra_err)?
                    } else {
                        env.docs
                            .delete_records_older_than(payload.cutoff)
                            .await
                            .map_err(infra_err)?
                    };
                }
            }
        }

        env.kv
            .pipeline(vec![KvOp::SetEx {
                key: "metrics:cleanup:last".to_string(),
                value: serde_json::to_string(&stats)?,
                ttl: STATS_TTL,
            }])
            .await
            .map_err(|e| TaskError::transient(e.to_string()))?;

        info!(
            "Cleanup{}: {} blobs ({} bytes), {} cache keys, {} db rows",
            if stats.dry_run { " (dry run)" } else { "" },
            stats.blobs_deleted,
            stats.blob_bytes_reclaimed,
            stats.cache_keys_deleted,
            stats.db_rows_deleted
        );
        Ok(())
    }
}

fn excluded(key: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|pattern| glob_match(pattern, key))
}
