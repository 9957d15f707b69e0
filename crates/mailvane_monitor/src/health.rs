//! Periodic health checks.
//!
//! Each sweep probes the KV, the document store, queue depths, and the
//! cached index health report, converting violations into alerts. The
//! dead-letter check also scans the newest DLQ page for high-priority
//! tasks, which always alert.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{error, info};

use mailvane_kv::Kv;
use mailvane_protocol::Priority;
use mailvane_queue::Scheduler;
use mailvane_worker::DocumentStore;

use crate::alerts::{AlertSeverity, AlertStore};
use crate::error::Result;

/// Index health report cache key, written by the search crate.
const INDEX_HEALTH_KEY: &str = "search:health";
const DLQ_SCAN_PAGE: usize = 50;

#[derive(Debug, Clone, Copy)]
pub struct HealthThresholds {
    /// Ready backlog above this raises a medium alert.
    pub max_ready: u64,
    /// DLQ depth above this raises a medium alert.
    pub max_failed: u64,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            max_ready: 1_000,
            max_failed: 25,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CheckOutcome {
    pub name: &'static str,
    pub ok: bool,
    pub detail: String,
}

impl CheckOutcome {
    fn ok(name: &'static str, detail: impl Into<String>) -> Self {
        Self {
            name,
            ok: true,
            detail: detail.into(),
        }
    }

    fn violated(name: &'static str, detail: impl Into<String>) -> Self {
        Self {
            name,
            ok: false,
            detail: detail.into(),
        }
    }
}

pub struct HealthMonitor {
    kv: Arc<dyn Kv>,
    scheduler: Arc<Scheduler>,
    docs: Arc<dyn DocumentStore>,
    alerts: AlertStore,
    thresholds: HealthThresholds,
}

impl HealthMonitor {
    pub fn new(
        kv: Arc<dyn Kv>,
        scheduler: Arc<Scheduler>,
        docs: Arc<dyn DocumentStore>,
        thresholds: HealthThresholds,
    ) -> Self {
        let alerts = AlertStore::new(Arc::clone(&kv));
        Self {
            kv,
            scheduler,
            docs,
            alerts,
            thresholds,
        }
    }

    pub fn alerts(&self) -> &AlertStore {
        &self.alerts
    }

    /// One sweep over every registered check.
    pub async fn run_checks(&self) -> Result<Vec<CheckOutcome>> {
        let mut outcomes = Vec::new();
        outcomes.push(self.check_kv().await?);
        outcomes.push(self.check_docstore().await?);
        outcomes.extend(self.check_queue().await?);
        outcomes.push(self.check_index_health().await?);
        Ok(outcomes)
    }

    /// Sweep forever at the given interval. Spawned by the binary, aborted
    /// at shutdown.
    pub async fn run(self, interval: Duration) {
        info!("Health monitor running (interval {:?})", interval);
        loop {
            match self.run_checks().await {
                Ok(outcomes) => {
                    let violations = outcomes.iter().filter(|o| !o.ok).count();
                    if violations > 0 {
                        info!("Health sweep found {} violation(s)", violations);
                    }
                }
                Err(e) => error!("Health sweep failed: {}", e),
            }
            tokio::time::sleep(interval).await;
        }
    }

    async fn check_kv(&self) -> Result<CheckOutcome> {
        match self.kv.ping().await {
            Ok(()) => Ok(CheckOutcome::ok("kv", "reachable")),
            Err(e) => {
                let detail = format!("KV unreachable: {}", e);
                self.alerts
                    .raise("kv", &detail, AlertSeverity::Critical)
                    .await?;
                Ok(CheckOutcome::violated("kv", detail))
            }
        }
    }

    async fn check_docstore(&self) -> Result<CheckOutcome> {
        match self.docs.ping().await {
            Ok(()) => Ok(CheckOutcome::ok("docstore", "reachable")),
            Err(e) => {
                let detail = format!("document store unreachable: {}", e);
                self.alerts
                    .raise("docstore", &detail, AlertSeverity::High)
                    .await?;
                Ok(CheckOutcome::violated("docstore", detail))
            }
        }
    }

    async fn check_queue(&self) -> Result<Vec<CheckOutcome>> {
        let stats = self.scheduler.stats().await?;
        let mut outcomes = Vec::new();

        if stats.ready > self.thresholds.max_ready {
            let detail = format!(
                "ready backlog {} exceeds {}",
                stats.ready, self.thresholds.max_ready
            );
            self.alerts
                .raise("queue_depth", &detail, AlertSeverity::Medium)
                .await?;
            outcomes.push(CheckOutcome::violated("queue_depth", detail));
        } else {
            outcomes.push(CheckOutcome::ok(
                "queue_depth",
                format!("{} ready", stats.ready),
            ));
        }

        // High-priority dead letters always alert; bulk DLQ growth alerts
        // at the threshold.
        let newest_failed = self.scheduler.list_failed(0, DLQ_SCAN_PAGE, true).await?;
        let high_priority = newest_failed
            .iter()
            .filter(|t| t.priority == Priority::High)
            .count();
        if high_priority > 0 {
            let detail = format!("{} high-priority task(s) in dead letter", high_priority);
            self.alerts
                .raise("dead_letter_high", &detail, AlertSeverity::High)
                .await?;
            outcomes.push(CheckOutcome::violated("dead_letter_high", detail));
        }
        if stats.failed > self.thresholds.max_failed {
            let detail = format!(
                "dead letter depth {} exceeds {}",
                stats.failed, self.thresholds.max_failed
            );
            self.alerts
                .raise("dead_letter_depth", &detail, AlertSeverity::Medium)
                .await?;
            outcomes.push(CheckOutcome::violated("dead_letter_depth", detail));
        } else {
            outcomes.push(CheckOutcome::ok(
                "dead_letter_depth",
                format!("{} failed", stats.failed),
            ));
        }
        Ok(outcomes)
    }

    /// Reads the hourly index health report the search subsystem caches;
    /// an absent report is not a violation.
    async fn check_index_health(&self) -> Result<CheckOutcome> {
        let Some(raw) = self.kv.get(INDEX_HEALTH_KEY).await? else {
            return Ok(CheckOutcome::ok("index_health", "no cached report"));
        };
        let report: Value = match serde_json::from_str(&raw) {
            Ok(report) => report,
            Err(e) => {
                return Ok(CheckOutcome::ok(
                    "index_health",
                    format!("unreadable report ignored: {}", e),
                ))
            }
        };
        let status = report["status"].as_str().unwrap_or("unknown");
        if status == "unhealthy" {
            let issues = report["issues"].to_string();
            let detail = format!("index unhealthy: {}", issues);
            self.alerts
                .raise("index_health", &detail, AlertSeverity::High)
                .await?;
            return Ok(CheckOutcome::violated("index_health", detail));
        }
        Ok(CheckOutcome::ok("index_health", status.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mailvane_protocol::payload::{NotificationChannel, SendNotificationPayload};
    use mailvane_protocol::{EnqueueOptions, TaskError, TaskPayload};

    fn notification() -> TaskPayload {
        TaskPayload::SendNotification(SendNotificationPayload {
            user_id: "u".to_string(),
            channel: NotificationChannel::InApp,
            title: "t".to_string(),
            body: "b".to_string(),
            data: None,
        })
    }

    fn monitor() -> (HealthMonitor, Arc<Scheduler>) {
        let harness = mailvane_test_utils::harness();
        let scheduler = Arc::clone(&harness.scheduler);
        let monitor = HealthMonitor::new(
            harness.kv,
            Arc::clone(&scheduler),
            harness.docs,
            HealthThresholds {
                max_ready: 2,
                max_failed: 1,
            },
        );
        (monitor, scheduler)
    }

    #[tokio::test]
    async fn test_healthy_sweep_raises_nothing() {
        let (monitor, _scheduler) = monitor();
        let outcomes = monitor.run_checks().await.unwrap();
        assert!(outcomes.iter().all(|o| o.ok));
        assert!(monitor.alerts().list(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ready_backlog_alerts() {
        let (monitor, scheduler) = monitor();
        for _ in 0..3 {
            scheduler
                .enqueue(notification(), EnqueueOptions::default())
                .await
                .unwrap();
        }
        let outcomes = monitor.run_checks().await.unwrap();
        assert!(outcomes.iter().any(|o| o.name == "queue_depth" && !o.ok));
        let alerts = monitor.alerts().list(10).await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, AlertSeverity::Medium);
    }

    #[tokio::test]
    async fn test_high_priority_dead_letter_alerts() {
        let (monitor, scheduler) = monitor();
        scheduler
            .enqueue(
                notification(),
                EnqueueOptions::with_priority(Priority::High),
            )
            .await
            .unwrap();
        let task = scheduler.lease().await.unwrap().unwrap();
        scheduler
            .fail(&task, &TaskError::validation("broken"))
            .await
            .unwrap();

        let outcomes = monitor.run_checks().await.unwrap();
        assert!(outcomes
            .iter()
            .any(|o| o.name == "dead_letter_high" && !o.ok));
        let alerts = monitor.alerts().list(10).await.unwrap();
        assert!(alerts
            .iter()
            .any(|a| a.source == "dead_letter_high" && a.severity == AlertSeverity::High));
    }
}
