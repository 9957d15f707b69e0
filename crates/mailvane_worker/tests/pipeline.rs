//! Full pipeline tests: a real worker loop draining the queue against the
//! in-memory KV and collaborator fakes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use chrono::Utc;

use mailvane_protocol::payload::{
    AttachmentInput, EmailAddress, NotificationChannel, ProcessEmailPayload,
    SendEmailPayload, SendNotificationPayload,
};
use mailvane_protocol::{EnqueueOptions, TaskPayload, TaskStatus};
use mailvane_search::SearchOptions;
use mailvane_test_utils::{harness, TestHarness};
use mailvane_worker::{default_registry, BlobStore, NotificationPrefs, Worker, WorkerConfig};

async fn wait_until<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..250 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out waiting for {}", what);
}

fn spawn_worker(h: &TestHarness) -> (tokio::task::JoinHandle<()>, mailvane_worker::CancellationToken) {
    let worker = Worker::new(
        WorkerConfig {
            worker_id: "test-worker".to_string(),
            poll_interval: Duration::from_millis(10),
        },
        h.env.clone(),
        default_registry(),
    );
    let shutdown = worker.shutdown_token();
    let handle = tokio::spawn(async move {
        let _ = worker.run().await;
    });
    (handle, shutdown)
}

fn inbound_email() -> TaskPayload {
    let content = b"fake pdf bytes".to_vec();
    TaskPayload::ProcessEmail(ProcessEmailPayload {
        message_id: "<m1@example.com>".to_string(),
        from: "alice@example.com".to_string(),
        to: vec!["team@example.com".to_string()],
        cc: vec![],
        bcc: vec![],
        subject: "Quarterly projections".to_string(),
        text_content: "The quarterly projections are attached for review".to_string(),
        html_content: None,
        headers: HashMap::new(),
        references: vec![],
        attachments: vec![AttachmentInput {
            filename: "projections.pdf".to_string(),
            mime_type: "application/pdf".to_string(),
            size_bytes: content.len() as u64,
            content: base64::engine::general_purpose::STANDARD.encode(&content),
            checksum: None,
        }],
        received_at: Utc::now(),
    })
}

#[tokio::test]
async fn inbound_email_flows_through_thread_blob_and_index() {
    let h = harness();
    let (handle, shutdown) = spawn_worker(&h);

    h.scheduler
        .enqueue(inbound_email(), EnqueueOptions::default())
        .await
        .unwrap();

    // Email record lands with classification applied.
    wait_until("email record", || async {
        !h.docs.emails().await.is_empty()
    })
    .await;
    let email = h.docs.emails().await.remove(0);
    assert_eq!(email.message_id, "<m1@example.com>");
    assert!(email.has_attachments);
    assert_eq!(email.priority, "normal");

    // Thread created for the new reference chain.
    let threads = h.docs.threads().await;
    assert_eq!(threads.len(), 1);
    assert_eq!(threads[0].subject, "Quarterly projections");
    assert!(threads[0].participants.contains(&"alice@example.com".to_string()));

    // Attachment stored under the deterministic email id.
    wait_until("attachment blob", || async {
        !h.blobs.list("attachments/").await.unwrap().is_empty()
    })
    .await;
    let heads = h.blobs.list("attachments/").await.unwrap();
    assert_eq!(heads.len(), 1);
    assert!(heads[0].key.starts_with(&format!("attachments/{}/", email.id)));
    assert!(heads[0].key.ends_with("projections.pdf"));
    assert_eq!(heads[0].custom_metadata["email_id"], email.id);

    // Content is searchable once the follow-up indexing task ran.
    wait_until("searchable email", || async {
        h.env
            .query
            .search("projections", &SearchOptions::default())
            .await
            .map(|r| r.total > 0)
            .unwrap_or(false)
    })
    .await;
    let results = h
        .env
        .query
        .search("projections", &SearchOptions::default())
        .await
        .unwrap();
    assert_eq!(results.hits[0].doc_id, email.id);

    // Replaying the same message is a no-op.
    h.scheduler
        .enqueue(inbound_email(), EnqueueOptions::default())
        .await
        .unwrap();
    wait_until("replay drained", || async {
        let stats = h.scheduler.stats().await.unwrap();
        stats.ready == 0 && stats.processing == 0 && stats.scheduled == 0
    })
    .await;
    assert_eq!(h.docs.emails().await.len(), 1);
    assert_eq!(h.docs.threads().await.len(), 1);

    shutdown.cancel();
    let _ = handle.await;
}

#[tokio::test]
async fn send_email_carries_stable_message_id() {
    let h = harness();
    let (handle, shutdown) = spawn_worker(&h);

    let payload = TaskPayload::SendEmail(SendEmailPayload {
        to: vec![EmailAddress {
            email: "bob@example.com".to_string(),
            name: None,
        }],
        cc: vec![],
        bcc: vec![],
        from: None,
        subject: "Welcome".to_string(),
        text_body: "Hello Bob".to_string(),
        html_body: None,
        headers: HashMap::new(),
        attachments: vec![],
    });
    h.scheduler
        .enqueue(payload, EnqueueOptions::default())
        .await
        .unwrap();

    wait_until("mail sent", || async { !h.mail.sent().await.is_empty() }).await;
    let sent = h.mail.sent().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].from.email, "noreply@localhost");
    let message_id = &sent[0].headers["Message-ID"];
    assert!(message_id.starts_with('<') && message_id.ends_with('>'));

    shutdown.cancel();
    let _ = handle.await;
}

#[tokio::test]
async fn disabled_channel_skips_delivery_but_completes() {
    let h = harness();
    h.notifications
        .set_prefs(
            "muted-user",
            NotificationPrefs {
                enabled_channels: vec![NotificationChannel::Email],
                quiet_hours: None,
            },
        )
        .await;
    let (handle, shutdown) = spawn_worker(&h);

    let id = h
        .scheduler
        .enqueue(
            TaskPayload::SendNotification(SendNotificationPayload {
                user_id: "muted-user".to_string(),
                channel: NotificationChannel::Push,
                title: "ping".to_string(),
                body: "pong".to_string(),
                data: None,
            }),
            EnqueueOptions::default(),
        )
        .await
        .unwrap();

    wait_until("notification task finished", || async {
        h.scheduler
            .get_status(&id)
            .await
            .ok()
            .flatten()
            .map(|s| s.status == TaskStatus::Completed)
            .unwrap_or(false)
    })
    .await;
    assert!(h.notifications.delivered().await.is_empty());

    shutdown.cancel();
    let _ = handle.await;
}
