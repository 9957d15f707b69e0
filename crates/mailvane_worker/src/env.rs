//! External collaborators and the handler environment.
//!
//! The core never talks to the document store, blob store, mail transport,
//! or notification channels directly; handlers go through these narrow
//! traits. Production wiring lives in the binary; tests use the in-memory
//! fakes from `mailvane_test_utils`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use mailvane_kv::Kv;
use mailvane_protocol::payload::NotificationChannel;
use mailvane_protocol::SystemConfig;
use mailvane_queue::Scheduler;
use mailvane_search::{Indexer, QueryEngine};

// ============================================================================
// Document store records
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailRecord {
    pub id: String,
    pub message_id: String,
    pub thread_id: String,
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub text_content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html_content: Option<String>,
    pub categories: Vec<String>,
    pub spam_score: f64,
    pub priority: String,
    pub has_attachments: bool,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadRecord {
    pub id: String,
    pub subject: String,
    pub participants: Vec<String>,
    /// Message-IDs in the thread, oldest first.
    pub message_ids: Vec<String>,
    pub last_activity: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsRecord {
    /// Deterministic per window, so re-running a window overwrites rather
    /// than duplicates.
    pub id: String,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub emails_received: u64,
    pub threads_active: u64,
    pub generated_at: DateTime<Utc>,
}

/// CRUD over emails, threads, and analytics. External collaborator.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get_email_by_message_id(&self, message_id: &str)
        -> anyhow::Result<Option<EmailRecord>>;
    async fn insert_email(&self, email: EmailRecord) -> anyhow::Result<()>;
    /// Find the thread containing any of the given Message-IDs.
    async fn find_thread_by_message_ids(
        &self,
        message_ids: &[String],
    ) -> anyhow::Result<Option<ThreadRecord>>;
    async fn get_thread(&self, id: &str) -> anyhow::Result<Option<ThreadRecord>>;
    async fn upsert_thread(&self, thread: ThreadRecord) -> anyhow::Result<()>;
    /// Apply a partial mutation; returns the updated record, `None` when the
    /// thread does not exist.
    async fn update_thread(
        &self,
        id: &str,
        changes: &HashMap<String, Value>,
    ) -> anyhow::Result<Option<ThreadRecord>>;
    async fn insert_analytics(&self, record: AnalyticsRecord) -> anyhow::Result<()>;
    async fn count_emails_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<u64>;
    async fn count_threads_active_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<u64>;
    async fn count_records_older_than(&self, cutoff: DateTime<Utc>) -> anyhow::Result<u64>;
    async fn delete_records_older_than(&self, cutoff: DateTime<Utc>) -> anyhow::Result<u64>;
    async fn ping(&self) -> anyhow::Result<()>;
}

// ============================================================================
// Blob store
// ============================================================================

#[derive(Debug, Clone)]
pub struct BlobHead {
    pub key: String,
    pub size: u64,
    pub uploaded_at: DateTime<Utc>,
    pub custom_metadata: HashMap<String, String>,
}

/// Attachment blobs. External collaborator.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
        custom_metadata: HashMap<String, String>,
    ) -> anyhow::Result<()>;
    async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>>;
    async fn head(&self, key: &str) -> anyhow::Result<Option<BlobHead>>;
    async fn delete(&self, key: &str) -> anyhow::Result<()>;
    async fn list(&self, prefix: &str) -> anyhow::Result<Vec<BlobHead>>;
}

// ============================================================================
// Outbound mail
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageAddress {
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Personalization {
    pub to: Vec<MessageAddress>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub cc: Vec<MessageAddress>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub bcc: Vec<MessageAddress>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageContent {
    #[serde(rename = "type")]
    pub content_type: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageAttachment {
    pub filename: String,
    #[serde(rename = "type")]
    pub mime_type: String,
    /// Base64-encoded content.
    pub content: String,
}

/// Wire shape for the outbound transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub personalizations: Vec<Personalization>,
    pub from: MessageAddress,
    pub subject: String,
    pub content: Vec<MessageContent>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub attachments: Vec<MessageAttachment>,
    #[serde(skip_serializing_if = "HashMap::is_empty", default)]
    pub headers: HashMap<String, String>,
}

#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, message: OutboundMessage) -> anyhow::Result<()>;
}

// ============================================================================
// Notifications
// ============================================================================

#[derive(Debug, Clone)]
pub struct NotificationPrefs {
    pub enabled_channels: Vec<NotificationChannel>,
    /// Quiet window as (start_hour, end_hour) UTC; may wrap midnight.
    pub quiet_hours: Option<(u8, u8)>,
}

impl Default for NotificationPrefs {
    fn default() -> Self {
        Self {
            enabled_channels: vec![
                NotificationChannel::Email,
                NotificationChannel::Push,
                NotificationChannel::Sms,
                NotificationChannel::InApp,
            ],
            quiet_hours: None,
        }
    }
}

#[async_trait]
pub trait NotificationGateway: Send + Sync {
    async fn preferences(&self, user_id: &str) -> anyhow::Result<NotificationPrefs>;
    async fn deliver(
        &self,
        user_id: &str,
        channel: NotificationChannel,
        title: &str,
        body: &str,
        data: Option<&Value>,
    ) -> anyhow::Result<()>;
}

// ============================================================================
// Handler environment
// ============================================================================

/// Everything a handler may touch, passed explicitly; there is no
/// process-wide state.
#[derive(Clone)]
pub struct WorkerEnv {
    pub kv: Arc<dyn Kv>,
    pub scheduler: Arc<Scheduler>,
    pub indexer: Arc<Indexer>,
    pub query: Arc<QueryEngine>,
    pub docs: Arc<dyn DocumentStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub mail: Arc<dyn MailTransport>,
    pub notifications: Arc<dyn NotificationGateway>,
    pub config: SystemConfig,
}
