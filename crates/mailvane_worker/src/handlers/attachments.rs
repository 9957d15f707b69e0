//! Attachment validation and storage.
//!
//! Rejects anything outside the MIME whitelist or over the size limit,
//! sanitizes filenames, verifies checksums when the sender supplied one,
//! and stores each blob under `attachments/{email_id}/{filename}` so a
//! replay overwrites rather than duplicates.

use std::collections::HashMap;

use async_trait::async_trait;
use base64::Engine;
use sha2::{Digest, Sha256};
use tracing::info;

use mailvane_protocol::{TaskError, TaskPayload, TaskResult};

use crate::env::WorkerEnv;
use crate::handlers::infra_err;
use crate::registry::{TaskContext, TaskHandler};

const ALLOWED_MIME_TYPES: &[&str] = &[
    "image/png",
    "image/jpeg",
    "image/gif",
    "image/webp",
    "application/pdf",
    "text/plain",
    "text/csv",
    "text/html",
    "application/zip",
    "application/json",
    "application/msword",
    "application/vnd.ms-excel",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
];

const MAX_FILENAME_CHARS: usize = 128;

pub struct ProcessAttachmentsHandler;

#[async_trait]
impl TaskHandler for ProcessAttachmentsHandler {
    async fn handle(&self, ctx: &TaskContext, env: &WorkerEnv) -> TaskResult<()> {
        ctx.task.payload.validate()?;
        let TaskPayload::ProcessAttachments(payload) = &ctx.task.payload else {
            return Err(TaskError::validation("payload kind mismatch"));
        };

        let total = payload.attachments.len();
        for (i, attachment) in payload.attachments.iter().enumerate() {
            ctx.cancel.checkpoint()?;

            if !ALLOWED_MIME_TYPES.contains(&attachment.mime_type.as_str()) {
                return Err(TaskError::validation(format!(
                    "mime type not allowed: {}",
                    attachment.mime_type
                )));
            }
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(&attachment.content)
                .map_err(|e| TaskError::validation(format!("invalid base64 content: {}", e)))?;
            if bytes.len() as u64 > env.config.attachment_size_limit {
                return Err(TaskError::validation(format!(
                    "attachment {} exceeds size limit ({} bytes)",
                    attachment.filename,
                    bytes.len()
                )));
            }

            let digest = sha256_hex(&bytes);
            if let Some(expected) = &attachment.checksum {
                if !expected.eq_ignore_ascii_case(&digest) {
                    return Err(TaskError::integrity(format!(
                        "checksum mismatch for {}",
                        attachment.filename
                    )));
                }
            }

            let filename = sanitize_filename(&attachment.filename);
            let key = format!("attachments/{}/{}", payload.email_id, filename);
            let mut metadata = HashMap::new();
            metadata.insert("email_id".to_string(), payload.email_id.clone());
            metadata.insert("checksum".to_string(), digest);
            metadata.insert(
                "original_filename".to_string(),
                attachment.filename.clone(),
            );
            env.blobs
                .put(&key, bytes, &attachment.mime_type, metadata)
                .await
                .map_err(infra_err)?;

            let percent = ((i + 1) * 100 / total) as u8;
            let _ = env.scheduler.update_progress(&ctx.task.id, percent).await;
        }

        info!(
            "Stored {} attachment(s) for email {}",
            total, payload.email_id
        );
        Ok(())
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut hex = String::with_capacity(64);
    for byte in digest {
        hex.push_str(&format!("{:02x}", byte));
    }
    hex
}

/// Keep alphanumerics, dots, dashes, and underscores; everything else
/// becomes an underscore. No leading dots, bounded length.
fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '.' || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim_start_matches('.');
    let bounded: String = trimmed.chars().take(MAX_FILENAME_CHARS).collect();
    if bounded.is_empty() {
        "attachment".to_string()
    } else {
        bounded
    }
}
