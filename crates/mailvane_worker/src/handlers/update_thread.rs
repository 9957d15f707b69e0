//! Thread mutation.
//!
//! Applies a partial change set under the thread's lock (compare-and-set by
//! lock, not by version) and optionally re-enqueues indexing of the updated
//! thread.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use mailvane_kv::LockManager;
use mailvane_protocol::payload::{IndexOptions, IndexSearchPayload};
use mailvane_protocol::{defaults, EnqueueOptions, TaskError, TaskPayload, TaskResult};

use crate::env::WorkerEnv;
use crate::handlers::{infra_err, queue_err};
use crate::registry::{TaskContext, TaskHandler};

pub struct UpdateThreadHandler;

#[async_trait]
impl TaskHandler for UpdateThreadHandler {
    async fn handle(&self, ctx: &TaskContext, env: &WorkerEnv) -> TaskResult<()> {
        ctx.task.payload.validate()?;
        let TaskPayload::UpdateThread(payload) = &ctx.task.payload else {
            return Err(TaskError::validation("payload kind mismatch"));
        };

        let locks = LockManager::new(env.kv.clone());
        let lock_name = format!("thread:{}", payload.thread_id);
        let ttl = Duration::from_secs(defaults::DOC_LOCK_TTL_SECS);
        let Some(token) = locks
            .acquire(&lock_name, ttl)
            .await
            .map_err(|e| TaskError::transient(e.to_string()))?
        else {
            return Err(TaskError::lock_contention(format!(
                "thread {} is being updated elsewhere",
                payload.thread_id
            )));
        };

        let updated = env
            .docs
            .update_thread(&payload.thread_id, &payload.changes)
            .await
            .map_err(infra_err);
        locks
            .release(&lock_name, &token)
            .await
            .map_err(|e| TaskError::transient(e.to_string()))?;

        let Some(thread) = updated? else {
            return Err(TaskError::validation(format!(
                "unknown thread: {}",
                payload.thread_id
            )));
        };
        info!(
            "Updated thread {} ({} field(s))",
            thread.id,
            payload.changes.len()
        );

        if payload.reindex {
            let mut metadata = HashMap::new();
            metadata.insert("thread".to_string(), json!(true));
            let content = format!("{}\n{}", thread.subject, thread.participants.join(" "));
            env.scheduler
                .enqueue(
                    TaskPayload::IndexSearch(IndexSearchPayload {
                        doc_id: thread.id.clone(),
                        doc_type: "thread".to_string(),
                        content,
                        metadata,
                        options: IndexOptions::default(),
                    }),
                    EnqueueOptions {
                        correlation_id: Some(ctx.task.correlation_id.clone()),
                        ..Default::default()
                    },
                )
                .await
                .map_err(queue_err)?;
        }
        Ok(())
    }
}
