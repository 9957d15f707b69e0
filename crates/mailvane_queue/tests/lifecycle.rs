//! End-to-end task lifecycle scenarios against the in-memory KV.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use mailvane_kv::{Kv, MemoryKv};
use mailvane_protocol::payload::{NotificationChannel, SendNotificationPayload};
use mailvane_protocol::{EnqueueOptions, Priority, TaskError, TaskPayload, TaskStatus};
use mailvane_queue::{BackoffPolicy, BackoffStrategy, Scheduler, SchedulerConfig};

fn notification(user: &str) -> TaskPayload {
    TaskPayload::SendNotification(SendNotificationPayload {
        user_id: user.to_string(),
        channel: NotificationChannel::InApp,
        title: "title".to_string(),
        body: "body".to_string(),
        data: None,
    })
}

fn fast_scheduler(kv: Arc<dyn Kv>) -> Scheduler {
    // Millisecond backoff so retry chains run without real waits.
    Scheduler::new(
        kv,
        SchedulerConfig {
            backoff: BackoffPolicy {
                strategy: BackoffStrategy::Exponential,
                initial: Duration::from_millis(50),
                cap: Duration::from_secs(30),
            },
            ..Default::default()
        },
    )
}

/// A task id is in at most one partition at any observation point.
async fn assert_partitions_disjoint(kv: &Arc<dyn Kv>, id: &str) {
    let mut containing = 0;
    for partition in ["ready", "scheduled", "processing", "failed"] {
        let members = kv.zrange(partition, 0, -1, false).await.unwrap();
        if members.iter().any(|(m, _)| m.contains(id)) {
            containing += 1;
        }
    }
    assert!(containing <= 1, "task {} in {} partitions", id, containing);
}

#[tokio::test]
async fn happy_path_enqueue_lease_complete() {
    let kv: Arc<dyn Kv> = Arc::new(MemoryKv::new());
    let scheduler = fast_scheduler(Arc::clone(&kv));

    let id = scheduler
        .enqueue(
            notification("u1"),
            EnqueueOptions {
                priority: Some(Priority::Normal),
                max_attempts: Some(3),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let status = scheduler.get_status(&id).await.unwrap().unwrap();
    assert_eq!(status.status, TaskStatus::Pending);

    let task = scheduler.lease().await.unwrap().unwrap();
    assert_eq!(task.id, id);
    assert_partitions_disjoint(&kv, id.as_str()).await;

    scheduler.complete(&task).await.unwrap();

    let status = scheduler.get_status(&id).await.unwrap().unwrap();
    assert_eq!(status.status, TaskStatus::Completed);
    let stats = scheduler.stats().await.unwrap();
    assert_eq!(
        (stats.ready, stats.scheduled, stats.processing, stats.failed),
        (0, 0, 0, 0)
    );
}

#[tokio::test]
async fn retry_with_exponential_backoff_then_success() {
    let kv: Arc<dyn Kv> = Arc::new(MemoryKv::new());
    let scheduler = fast_scheduler(Arc::clone(&kv));

    let id = scheduler
        .enqueue(notification("u1"), EnqueueOptions::default())
        .await
        .unwrap();

    // Attempt 1 fails: rescheduled ~initial later.
    let task = scheduler.lease().await.unwrap().unwrap();
    assert_eq!(task.attempts, 1);
    let before = Utc::now();
    scheduler
        .fail(&task, &TaskError::transient("flaky"))
        .await
        .unwrap();
    let stored = scheduler.get_task(&id).await.unwrap().unwrap();
    let delay1 = (stored.scheduled_for - before).num_milliseconds();
    assert!((50..=120).contains(&delay1), "first delay {}", delay1);
    assert_partitions_disjoint(&kv, id.as_str()).await;

    // Attempt 2 fails: delay doubles.
    tokio::time::sleep(Duration::from_millis(140)).await;
    let task = scheduler.lease().await.unwrap().unwrap();
    assert_eq!(task.attempts, 2);
    let before = Utc::now();
    scheduler
        .fail(&task, &TaskError::transient("flaky again"))
        .await
        .unwrap();
    let stored = scheduler.get_task(&id).await.unwrap().unwrap();
    let delay2 = (stored.scheduled_for - before).num_milliseconds();
    assert!((100..=220).contains(&delay2), "second delay {}", delay2);

    // Attempt 3 succeeds.
    tokio::time::sleep(Duration::from_millis(260)).await;
    let task = scheduler.lease().await.unwrap().unwrap();
    assert_eq!(task.attempts, 3);
    scheduler.complete(&task).await.unwrap();

    let status = scheduler.get_status(&id).await.unwrap().unwrap();
    assert_eq!(status.status, TaskStatus::Completed);
    assert_eq!(status.attempts, 3);
}

#[tokio::test]
async fn persistent_failure_dead_letters() {
    let kv: Arc<dyn Kv> = Arc::new(MemoryKv::new());
    let scheduler = fast_scheduler(Arc::clone(&kv));

    let id = scheduler
        .enqueue(
            notification("u1"),
            EnqueueOptions {
                max_attempts: Some(2),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    for wait_ms in [0u64, 140] {
        tokio::time::sleep(Duration::from_millis(wait_ms)).await;
        let task = scheduler.lease().await.unwrap().unwrap();
        scheduler
            .fail(&task, &TaskError::transient("always broken"))
            .await
            .unwrap();
    }

    let stats = scheduler.stats().await.unwrap();
    assert_eq!(stats.ready, 0);
    assert_eq!(stats.scheduled, 0);
    assert_eq!(stats.processing, 0);
    assert_eq!(stats.failed, 1);

    let status = scheduler.get_status(&id).await.unwrap().unwrap();
    assert_eq!(status.status, TaskStatus::Failed);
    assert_eq!(status.attempts, 2);
    assert!(status.error.is_some());

    let page = scheduler.list_failed(0, 10, true).await.unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].id, id);
}

#[tokio::test]
async fn priority_preemption() {
    let kv: Arc<dyn Kv> = Arc::new(MemoryKv::new());
    let scheduler = fast_scheduler(kv);

    let low = scheduler
        .enqueue(
            notification("low"),
            EnqueueOptions::with_priority(Priority::Low),
        )
        .await
        .unwrap();
    let high = scheduler
        .enqueue(
            notification("high"),
            EnqueueOptions::with_priority(Priority::High),
        )
        .await
        .unwrap();

    assert_eq!(scheduler.lease().await.unwrap().unwrap().id, high);
    assert_eq!(scheduler.lease().await.unwrap().unwrap().id, low);
    assert!(scheduler.lease().await.unwrap().is_none());
}

#[tokio::test]
async fn attempts_are_monotone_across_lifecycle() {
    let kv: Arc<dyn Kv> = Arc::new(MemoryKv::new());
    let scheduler = fast_scheduler(Arc::clone(&kv));

    let id = scheduler
        .enqueue(notification("u1"), EnqueueOptions::default())
        .await
        .unwrap();

    let mut last_attempts = 0;
    for _ in 0..2 {
        tokio::time::sleep(Duration::from_millis(140)).await;
        let task = scheduler.lease().await.unwrap().unwrap();
        assert!(task.attempts > last_attempts);
        last_attempts = task.attempts;
        scheduler
            .fail(&task, &TaskError::transient("again"))
            .await
            .unwrap();
        let status = scheduler.get_status(&id).await.unwrap().unwrap();
        assert_eq!(status.attempts, last_attempts);
    }
}

#[tokio::test]
async fn scheduled_task_not_leasable_until_due() {
    let kv: Arc<dyn Kv> = Arc::new(MemoryKv::new());
    let scheduler = fast_scheduler(kv);

    scheduler
        .enqueue(
            notification("u1"),
            EnqueueOptions {
                scheduled_for: Some(Utc::now() + chrono::Duration::milliseconds(120)),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert!(scheduler.lease().await.unwrap().is_none());
    tokio::time::sleep(Duration::from_millis(160)).await;
    let task = scheduler.lease().await.unwrap();
    assert!(task.is_some());
}
