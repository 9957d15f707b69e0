//! Default local collaborator adapters.
//!
//! The document store, blob store, mail transport, and notification
//! channels are external services in production. When none is configured,
//! these KV-backed adapters keep a single-node deployment fully functional:
//! records live under `docstore:*` and `blob:*` keys, outbound mail lands
//! in an `outbox` sorted set for the operator to drain, and notifications
//! are delivered to per-user `inbox:{user}` hashes (the in-app channel).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::info;

use mailvane_kv::{Kv, KvOp};
use mailvane_protocol::payload::NotificationChannel;
use mailvane_worker::{
    AnalyticsRecord, BlobHead, BlobStore, DocumentStore, EmailRecord, MailTransport,
    NotificationGateway, NotificationPrefs, OutboundMessage, ThreadRecord,
};

const EMAILS: &str = "docstore:emails";
const EMAILS_BY_MESSAGE_ID: &str = "docstore:emails_by_message_id";
const THREADS: &str = "docstore:threads";
const ANALYTICS: &str = "docstore:analytics";
const OUTBOX: &str = "outbox";

fn io_err(e: mailvane_kv::KvError) -> anyhow::Error {
    anyhow::anyhow!(e)
}

// ============================================================================
// Document store over the KV
// ============================================================================

pub struct KvDocumentStore {
    kv: Arc<dyn Kv>,
}

impl KvDocumentStore {
    pub fn new(kv: Arc<dyn Kv>) -> Self {
        Self { kv }
    }
}

#[async_trait]
impl DocumentStore for KvDocumentStore {
    async fn get_email_by_message_id(
        &self,
        message_id: &str,
    ) -> anyhow::Result<Option<EmailRecord>> {
        let Some(id) = self
            .kv
            .hget(EMAILS_BY_MESSAGE_ID, message_id)
            .await
            .map_err(io_err)?
        else {
            return Ok(None);
        };
        match self.kv.hget(EMAILS, &id).await.map_err(io_err)? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn insert_email(&self, email: EmailRecord) -> anyhow::Result<()> {
        let raw = serde_json::to_string(&email)?;
        self.kv
            .pipeline(vec![
                KvOp::HSet {
                    key: EMAILS.to_string(),
                    field: email.id.clone(),
                    value: raw,
                },
                KvOp::HSet {
                    key: EMAILS_BY_MESSAGE_ID.to_string(),
                    field: email.message_id.clone(),
                    value: email.id.clone(),
                },
            ])
            .await
            .map_err(io_err)?;
        Ok(())
    }

    async fn find_thread_by_message_ids(
        &self,
        message_ids: &[String],
    ) -> anyhow::Result<Option<ThreadRecord>> {
        for (_, raw) in self.kv.hgetall(THREADS).await.map_err(io_err)? {
            let thread: ThreadRecord = match serde_json::from_str(&raw) {
                Ok(thread) => thread,
                Err(_) => continue,
            };
            if thread.message_ids.iter().any(|id| message_ids.contains(id)) {
                return Ok(Some(thread));
            }
        }
        Ok(None)
    }

    async fn get_thread(&self, id: &str) -> anyhow::Result<Option<ThreadRecord>> {
        match self.kv.hget(THREADS, id).await.map_err(io_err)? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn upsert_thread(&self, thread: ThreadRecord) -> anyhow::Result<()> {
        self.kv
            .hset(THREADS, &thread.id, &serde_json::to_string(&thread)?)
            .await
            .map_err(io_err)?;
        Ok(())
    }

    async fn update_thread(
        &self,
        id: &str,
        changes: &HashMap<String, Value>,
    ) -> anyhow::Result<Option<ThreadRecord>> {
        let Some(mut thread) = self.get_thread(id).await? else {
            return Ok(None);
        };
        for (key, value) in changes {
            match key.as_str() {
                "subject" => {
                    if let Some(s) = value.as_str() {
                        thread.subject = s.to_string();
                    }
                }
                "last_activity" => {
                    if let Some(s) = value.as_str() {
                        if let Ok(ts) = s.parse::<DateTime<Utc>>() {
                            thread.last_activity = ts;
                        }
                    }
                }
                other => {
                    thread.metadata.insert(other.to_string(), value.clone());
                }
            }
        }
        self.upsert_thread(thread.clone()).await?;
        Ok(Some(thread))
    }

    async fn insert_analytics(&self, record: AnalyticsRecord) -> anyhow::Result<()> {
        self.kv
            .hset(ANALYTICS, &record.id, &serde_json::to_string(&record)?)
            .await
            .map_err(io_err)?;
        Ok(())
    }

    async fn count_emails_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<u64> {
        let mut count = 0;
        for (_, raw) in self.kv.hgetall(EMAILS).await.map_err(io_err)? {
            if let Ok(email) = serde_json::from_str::<EmailRecord>(&raw) {
                if email.received_at >= start && email.received_at < end {
                    count += 1;
                }
            }
        }
        Ok(count)
    }

    async fn count_threads_active_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<u64> {
        let mut count = 0;
        for (_, raw) in self.kv.hgetall(THREADS).await.map_err(io_err)? {
            if let Ok(thread) = serde_json::from_str::<ThreadRecord>(&raw) {
                if thread.last_activity >= start && thread.last_activity < end {
                    count += 1;
                }
            }
        }
        Ok(count)
    }

    async fn count_records_older_than(&self, cutoff: DateTime<Utc>) -> anyhow::Result<u64> {
        let mut count = 0;
        for (_, raw) in self.kv.hgetall(EMAILS).await.map_err(io_err)? {
            if let Ok(email) = serde_json::from_str::<EmailRecord>(&raw) {
                if email.received_at < cutoff {
                    count += 1;
                }
            }
        }
        Ok(count)
    }

    async fn delete_records_older_than(&self, cutoff: DateTime<Utc>) -> anyhow::Result<u64> {
        let mut ops = Vec::new();
        let mut deleted = 0;
        for (id, raw) in self.kv.hgetall(EMAILS).await.map_err(io_err)? {
            if let Ok(email) = serde_json::from_str::<EmailRecord>(&raw) {
                if email.received_at < cutoff {
                    ops.push(KvOp::HDel {
                        key: EMAILS.to_string(),
                        field: id,
                    });
                    ops.push(KvOp::HDel {
                        key: EMAILS_BY_MESSAGE_ID.to_string(),
                        field: email.message_id.clone(),
                    });
                    deleted += 1;
                }
            }
        }
        if !ops.is_empty() {
            self.kv.pipeline(ops).await.map_err(io_err)?;
        }
        Ok(deleted)
    }

    async fn ping(&self) -> anyhow::Result<()> {
        self.kv.ping().await.map_err(io_err)
    }
}

// ============================================================================
// Blob store over the KV
// ============================================================================

pub struct KvBlobStore {
    kv: Arc<dyn Kv>,
}

impl KvBlobStore {
    pub fn new(kv: Arc<dyn Kv>) -> Self {
        Self { kv }
    }

    fn data_key(key: &str) -> String {
        format!("blob:{}", key)
    }

    fn head_key(key: &str) -> String {
        format!("blobhead:{}", key)
    }
}

#[derive(serde::Serialize, serde::Deserialize)]
struct StoredHead {
    size: u64,
    uploaded_at: DateTime<Utc>,
    content_type: String,
    custom_metadata: HashMap<String, String>,
}

#[async_trait]
impl BlobStore for KvBlobStore {
    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
        custom_metadata: HashMap<String, String>,
    ) -> anyhow::Result<()> {
        let head = StoredHead {
            size: bytes.len() as u64,
            uploaded_at: Utc::now(),
            content_type: content_type.to_string(),
            custom_metadata,
        };
        let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
        self.kv
            .pipeline(vec![
                KvOp::Set {
                    key: Self::data_key(key),
                    value: encoded,
                },
                KvOp::Set {
                    key: Self::head_key(key),
                    value: serde_json::to_string(&head)?,
                },
            ])
            .await
            .map_err(io_err)?;
        Ok(())
    }

    async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        match self.kv.get(&Self::data_key(key)).await.map_err(io_err)? {
            Some(encoded) => Ok(Some(
                base64::engine::general_purpose::STANDARD.decode(encoded)?,
            )),
            None => Ok(None),
        }
    }

    async fn head(&self, key: &str) -> anyhow::Result<Option<BlobHead>> {
        match self.kv.get(&Self::head_key(key)).await.map_err(io_err)? {
            Some(raw) => {
                let stored: StoredHead = serde_json::from_str(&raw)?;
                Ok(Some(BlobHead {
                    key: key.to_string(),
                    size: stored.size,
                    uploaded_at: stored.uploaded_at,
                    custom_metadata: stored.custom_metadata,
                }))
            }
            None => Ok(None),
        }
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        self.kv
            .pipeline(vec![
                KvOp::Del {
                    key: Self::data_key(key),
                },
                KvOp::Del {
                    key: Self::head_key(key),
                },
            ])
            .await
            .map_err(io_err)?;
        Ok(())
    }

    async fn list(&self, prefix: &str) -> anyhow::Result<Vec<BlobHead>> {
        let pattern = format!("blobhead:{}*", prefix);
        let mut heads = Vec::new();
        for full_key in self.kv.scan(&pattern).await.map_err(io_err)? {
            let Some(key) = full_key.strip_prefix("blobhead:") else {
                continue;
            };
            if let Some(head) = self.head(key).await? {
                heads.push(head);
            }
        }
        heads.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(heads)
    }
}

// ============================================================================
// Outbox mail transport
// ============================================================================

/// Queues outbound messages in the KV for an external drain; delivery to a
/// real transport is an integration concern.
pub struct OutboxMailTransport {
    kv: Arc<dyn Kv>,
}

impl OutboxMailTransport {
    pub fn new(kv: Arc<dyn Kv>) -> Self {
        Self { kv }
    }
}

#[async_trait]
impl MailTransport for OutboxMailTransport {
    async fn send(&self, message: OutboundMessage) -> anyhow::Result<()> {
        let now = Utc::now();
        self.kv
            .zadd(
                OUTBOX,
                &serde_json::to_string(&message)?,
                now.timestamp_millis() as f64,
            )
            .await
            .map_err(io_err)?;
        info!("Outbox accepted \"{}\"", message.subject);
        Ok(())
    }
}

// ============================================================================
// In-app notification gateway
// ============================================================================

/// Delivers the in-app channel to `inbox:{user}` hashes; other channels are
/// accepted and logged for external relays to pick up from the log stream.
pub struct KvNotificationGateway {
    kv: Arc<dyn Kv>,
}

impl KvNotificationGateway {
    pub fn new(kv: Arc<dyn Kv>) -> Self {
        Self { kv }
    }
}

#[async_trait]
impl NotificationGateway for KvNotificationGateway {
    async fn preferences(&self, user_id: &str) -> anyhow::Result<NotificationPrefs> {
        let key = format!("prefs:{}", user_id);
        match self.kv.get(&key).await.map_err(io_err)? {
            Some(raw) => {
                let value: Value = serde_json::from_str(&raw)?;
                let mut prefs = NotificationPrefs::default();
                if let Some(channels) = value["channels"].as_array() {
                    prefs.enabled_channels = channels
                        .iter()
                        .filter_map(|c| {
                            serde_json::from_value::<NotificationChannel>(c.clone()).ok()
                        })
                        .collect();
                }
                if let (Some(start), Some(end)) = (
                    value["quiet_start"].as_u64(),
                    value["quiet_end"].as_u64(),
                ) {
                    prefs.quiet_hours = Some((start as u8, end as u8));
                }
                Ok(prefs)
            }
            None => Ok(NotificationPrefs::default()),
        }
    }

    async fn deliver(
        &self,
        user_id: &str,
        channel: NotificationChannel,
        title: &str,
        body: &str,
        data: Option<&Value>,
    ) -> anyhow::Result<()> {
        match channel {
            NotificationChannel::InApp => {
                let entry = serde_json::json!({
                    "title": title,
                    "body": body,
                    "data": data,
                    "delivered_at": Utc::now().to_rfc3339(),
                });
                self.kv
                    .hset(
                        &format!("inbox:{}", user_id),
                        uuid::Uuid::new_v4().to_string().as_str(),
                        &entry.to_string(),
                    )
                    .await
                    .map_err(io_err)?;
            }
            other => {
                info!(
                    "Notification for {} via {:?}: {} (relayed externally)",
                    user_id, other, title
                );
            }
        }
        Ok(())
    }
}
