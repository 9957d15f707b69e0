//! In-memory fakes for the external collaborators plus a ready-made worker
//! environment. Everything here is test support; nothing talks to a real
//! backend.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};

use mailvane_kv::{Kv, LockManager, MemoryKv};
use mailvane_protocol::payload::NotificationChannel;
use mailvane_protocol::SystemConfig;
use mailvane_queue::{Scheduler, SchedulerConfig};
use mailvane_search::{IndexStore, Indexer, QueryEngine};
use mailvane_worker::{
    AnalyticsRecord, BlobHead, BlobStore, DocumentStore, EmailRecord, MailTransport,
    NotificationGateway, NotificationPrefs, OutboundMessage, ThreadRecord, WorkerEnv,
};

// ============================================================================
// Document store fake
// ============================================================================

#[derive(Default)]
struct DocState {
    emails: Vec<EmailRecord>,
    threads: HashMap<String, ThreadRecord>,
    analytics: HashMap<String, AnalyticsRecord>,
}

#[derive(Default)]
pub struct MemoryDocumentStore {
    state: RwLock<DocState>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn emails(&self) -> Vec<EmailRecord> {
        self.state.read().await.emails.clone()
    }

    pub async fn threads(&self) -> Vec<ThreadRecord> {
        self.state.read().await.threads.values().cloned().collect()
    }

    pub async fn analytics(&self) -> Vec<AnalyticsRecord> {
        self.state.read().await.analytics.values().cloned().collect()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get_email_by_message_id(
        &self,
        message_id: &str,
    ) -> anyhow::Result<Option<EmailRecord>> {
        Ok(self
            .state
            .read()
            .await
            .emails
            .iter()
            .find(|e| e.message_id == message_id)
            .cloned())
    }

    async fn insert_email(&self, email: EmailRecord) -> anyhow::Result<()> {
        let mut state = self.state.write().await;
        state.emails.retain(|e| e.message_id != email.message_id);
        state.emails.push(email);
        Ok(())
    }

    async fn find_thread_by_message_ids(
        &self,
        message_ids: &[String],
    ) -> anyhow::Result<Option<ThreadRecord>> {
        Ok(self
            .state
            .read()
            .await
            .threads
            .values()
            .find(|t| t.message_ids.iter().any(|id| message_ids.contains(id)))
            .cloned())
    }

    async fn get_thread(&self, id: &str) -> anyhow::Result<Option<ThreadRecord>> {
        Ok(self.state.read().await.threads.get(id).cloned())
    }

    async fn upsert_thread(&self, thread: ThreadRecord) -> anyhow::Result<()> {
        self.state
            .write()
            .await
            .threads
            .insert(thread.id.clone(), thread);
        Ok(())
    }

    async fn update_thread(
        &self,
        id: &str,
        changes: &HashMap<String, Value>,
    ) -> anyhow::Result<Option<ThreadRecord>> {
        let mut state = self.state.write().await;
        let Some(thread) = state.threads.get_mut(id) else {
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
        Ok(Some(thread.clone()))
    }

    async fn insert_analytics(&self, record: AnalyticsRecord) -> anyhow::Result<()> {
        self.state
            .write()
            .await
            .analytics
            .insert(record.id.clone(), record);
        Ok(())
    }

    async fn count_emails_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<u64> {
        Ok(self
            .state
            .read()
            .await
            .emails
            .iter()
            .filter(|e| e.received_at >= start && e.received_at < end)
            .count() as u64)
    }

    async fn count_threads_active_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<u64> {
        Ok(self
            .state
            .read()
            .await
            .threads
            .values()
            .filter(|t| t.last_activity >= start && t.last_activity < end)
            .count() as u64)
    }

    async fn count_records_older_than(&self, cutoff: DateTime<Utc>) -> anyhow::Result<u64> {
        Ok(self
            .state
            .read()
            .await
            .emails
            .iter()
            .filter(|e| e.received_at < cutoff)
            .count() as u64)
    }

    async fn delete_records_older_than(&self, cutoff: DateTime<Utc>) -> anyhow::Result<u64> {
        let mut state = self.state.write().await;
        let before = state.emails.len();
        state.emails.retain(|e| e.received_at >= cutoff);
        Ok((before - state.emails.len()) as u64)
    }

    async fn ping(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

// ============================================================================
// Blob store fake
// ============================================================================

#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<String, (Vec<u8>, BlobHead)>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backdate a blob so cleanup tests can age it.
    pub async fn set_uploaded_at(&self, key: &str, uploaded_at: DateTime<Utc>) {
        if let Some((_, head)) = self.blobs.write().await.get_mut(key) {
            head.uploaded_at = uploaded_at;
        }
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        _content_type: &str,
        custom_metadata: HashMap<String, String>,
    ) -> anyhow::Result<()> {
        let head = BlobHead {
            key: key.to_string(),
            size: bytes.len() as u64,
            uploaded_at: Utc::now(),
            custom_metadata,
        };
        self.blobs
            .write()
            .await
            .insert(key.to_string(), (bytes, head));
        Ok(())
    }

    async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self
            .blobs
            .read()
            .await
            .get(key)
            .map(|(bytes, _)| bytes.clone()))
    }

    async fn head(&self, key: &str) -> anyhow::Result<Option<BlobHead>> {
        Ok(self.blobs.read().await.get(key).map(|(_, head)| head.clone()))
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        self.blobs.write().await.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> anyhow::Result<Vec<BlobHead>> {
        let mut heads: Vec<BlobHead> = self
            .blobs
            .read()
            .await
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(_, (_, head))| head.clone())
            .collect();
        heads.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(heads)
    }
}

// ============================================================================
// Mail transport fake
// ============================================================================

#[derive(Default)]
pub struct RecordingMailTransport {
    sent: Mutex<Vec<OutboundMessage>>,
}

impl RecordingMailTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl MailTransport for RecordingMailTransport {
    async fn send(&self, message: OutboundMessage) -> anyhow::Result<()> {
        self.sent.lock().await.push(message);
        Ok(())
    }
}

// ============================================================================
// Notification gateway fake
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct DeliveredNotification {
    pub user_id: String,
    pub channel: NotificationChannel,
    pub title: String,
    pub body: String,
}

#[derive(Default)]
pub struct StubNotificationGateway {
    prefs: RwLock<HashMap<String, NotificationPrefs>>,
    delivered: Mutex<Vec<DeliveredNotification>>,
}

impl StubNotificationGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_prefs(&self, user_id: &str, prefs: NotificationPrefs) {
        self.prefs.write().await.insert(user_id.to_string(), prefs);
    }

    pub async fn delivered(&self) -> Vec<DeliveredNotification> {
        self.delivered.lock().await.clone()
    }
}

#[async_trait]
impl NotificationGateway for StubNotificationGateway {
    async fn preferences(&self, user_id: &str) -> anyhow::Result<NotificationPrefs> {
        Ok(self
            .prefs
            .read()
            .await
            .get(user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn deliver(
        &self,
        user_id: &str,
        channel: NotificationChannel,
        title: &str,
        body: &str,
        _data: Option<&Value>,
    ) -> anyhow::Result<()> {
        self.delivered.lock().await.push(DeliveredNotification {
            user_id: user_id.to_string(),
            channel,
            title: title.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }
}

// ============================================================================
// Environment builders
// ============================================================================

/// A complete in-memory worker environment plus handles on the fakes so
/// tests can inspect side effects.
pub struct TestHarness {
    pub env: WorkerEnv,
    pub kv: Arc<dyn Kv>,
    pub scheduler: Arc<Scheduler>,
    pub docs: Arc<MemoryDocumentStore>,
    pub blobs: Arc<MemoryBlobStore>,
    pub mail: Arc<RecordingMailTransport>,
    pub notifications: Arc<StubNotificationGateway>,
}

pub fn harness() -> TestHarness {
    let kv: Arc<dyn Kv> = Arc::new(MemoryKv::new());
    let scheduler = Arc::new(Scheduler::new(Arc::clone(&kv), SchedulerConfig::default()));
    let store = IndexStore::new(Arc::clone(&kv));
    let locks = LockManager::new(Arc::clone(&kv));
    let indexer = Arc::new(Indexer::new(store.clone(), locks));
    let query = Arc::new(QueryEngine::new(store));

    let docs = Arc::new(MemoryDocumentStore::new());
    let blobs = Arc::new(MemoryBlobStore::new());
    let mail = Arc::new(RecordingMailTransport::new());
    let notifications = Arc::new(StubNotificationGateway::new());

    let env = WorkerEnv {
        kv: Arc::clone(&kv),
        scheduler: Arc::clone(&scheduler),
        indexer,
        query,
        docs: docs.clone(),
        blobs: blobs.clone(),
        mail: mail.clone(),
        notifications: notifications.clone(),
        config: SystemConfig::default(),
    };
    TestHarness {
        env,
        kv,
        scheduler,
        docs,
        blobs,
        mail,
        notifications,
    }
}

/// Just the environment, for tests that do not inspect collaborators.
pub fn test_env() -> WorkerEnv {
    harness().env
}
