//! Search indexing.
//!
//! Short content is indexed as one document; long content is split into
//! fixed-size chunks indexed as synthetic `document_chunk` documents, with
//! progress reported after each chunk and cancellation observed between
//! chunks. Lock contention on the document is retryable.

use async_trait::async_trait;
use tracing::{info, warn};

use mailvane_protocol::defaults;
use mailvane_protocol::{TaskError, TaskPayload, TaskResult};
use mailvane_search::indexer::chunk_content;
use mailvane_search::IndexedDocument;

use crate::env::WorkerEnv;
use crate::handlers::search_err;
use crate::registry::{TaskContext, TaskHandler};

pub struct IndexSearchHandler;

#[async_trait]
impl TaskHandler for IndexSearchHandler {
    async fn handle(&self, ctx: &TaskContext, env: &WorkerEnv) -> TaskResult<()> {
        ctx.task.payload.validate()?;
        let TaskPayload::IndexSearch(payload) = &ctx.task.payload else {
            return Err(TaskError::validation("payload kind mismatch"));
        };

        let language = payload.options.language;
        let chunk_size = payload
            .options
            .chunk_size
            .unwrap_or(defaults::DEFAULT_CHUNK_SIZE);

        if payload.content.chars().count() <= chunk_size {
            let doc = IndexedDocument {
                id: payload.doc_id.clone(),
                doc_type: payload.doc_type.clone(),
                content: payload.content.clone(),
                metadata: payload.metadata.clone(),
                vector: None,
            };
            env.indexer
                .reindex_document(doc, language)
                .await
                .map_err(search_err)?;
            let _ = env.scheduler.update_progress(&ctx.task.id, 100).await;
            info!("Indexed {}:{}", payload.doc_type, payload.doc_id);
            return Ok(());
        }

        let chunks = chunk_content(&payload.content, chunk_size);
        let total = chunks.len();
        for (position, chunk) in chunks.into_iter().enumerate() {
            ctx.cancel.checkpoint()?;
            let doc = env.indexer.chunk_document(
                &payload.doc_id,
                position,
                chunk,
                &payload.metadata,
                language,
            );
            env.indexer
                .reindex_document(doc, language)
                .await
                .map_err(search_err)?;
            let percent = ((position + 1) * 100 / total) as u8;
            if let Err(e) = env.scheduler.update_progress(&ctx.task.id, percent).await {
                warn!("Progress update for {} failed: {}", ctx.task.id, e);
            }
        }
        info!(
            "Indexed {}:{} as {} chunk(s)",
            payload.doc_type, payload.doc_id, total
        );
        Ok(())
    }
}
