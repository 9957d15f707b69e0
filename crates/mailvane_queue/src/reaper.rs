//! Stale-lease supervisor.
//!
//! A worker that crashes mid-task leaves its record in `processing`. The
//! reaper scans that partition for entries whose lease is older than the
//! configured timeout and returns them to `scheduled` for another attempt.
//! The attempt counter was already advanced at lease time, so the crash
//! consumed one attempt; entries that used their last attempt dead-letter.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info, warn};

use mailvane_kv::{Kv, KvOp, LockManager};
use mailvane_protocol::{StatusRecord, Task, TaskStatus};

use crate::error::Result;
use crate::keys;
use crate::metrics::{Metrics, METRICS};

const LEASE_EXPIRED_MESSAGE: &str = "lease expired";
const REAPER_LOCK: &str = "queue:reaper";
const REAPER_LOCK_TTL: Duration = Duration::from_secs(60);

pub struct LeaseReaper {
    kv: Arc<dyn Kv>,
    locks: LockManager,
    lease_timeout: Duration,
}

impl LeaseReaper {
    pub fn new(kv: Arc<dyn Kv>, lease_timeout: Duration) -> Self {
        let locks = LockManager::new(Arc::clone(&kv));
        Self {
            kv,
            locks,
            lease_timeout,
        }
    }

    /// One sweep over `processing`. Returns how many entries were reclaimed.
    /// Skips the sweep entirely when another reaper holds the lock.
    pub async fn reap_once(&self) -> Result<usize> {
        let Some(token) = self.locks.acquire(REAPER_LOCK, REAPER_LOCK_TTL).await? else {
            return Ok(0);
        };
        let result = self.sweep().await;
        self.locks.release(REAPER_LOCK, &token).await?;
        result
    }

    async fn sweep(&self) -> Result<usize> {
        let now = Utc::now();
        let cutoff =
            (now - chrono::Duration::milliseconds(self.lease_timeout.as_millis() as i64))
                .timestamp_millis() as f64;
        let stale = self
            .kv
            .zrange_by_score(keys::PROCESSING, f64::MIN, cutoff, None)
            .await?;
        if stale.is_empty() {
            return Ok(0);
        }

        let mut reclaimed = 0;
        for (member, _lease_time) in stale {
            let mut task = match Task::from_json(&member) {
                Ok(task) => task,
                Err(e) => {
                    error!("Dropping unreadable processing member: {}", e);
                    self.kv
                        .pipeline(vec![KvOp::ZRem {
                            key: keys::PROCESSING.to_string(),
                            member,
                        }])
                        .await?;
                    continue;
                }
            };

            task.error = Some(LEASE_EXPIRED_MESSAGE.to_string());
            let exhausted = task.attempts >= task.max_attempts;
            let (partition, score) = if exhausted {
                task.status = TaskStatus::Failed;
                (keys::FAILED, now.timestamp_millis() as f64)
            } else {
                task.status = TaskStatus::Scheduled;
                task.scheduled_for = now;
                (keys::SCHEDULED, now.timestamp_millis() as f64)
            };

            let json = serde_json::to_string(&task)?;
            let status_json = serde_json::to_string(&StatusRecord::from_task(&task))?;
            self.kv
                .pipeline(vec![
                    KvOp::ZRem {
                        key: keys::PROCESSING.to_string(),
                        member,
                    },
                    KvOp::ZAdd {
                        key: partition.to_string(),
                        member: json.clone(),
                        score,
                    },
                    KvOp::Set {
                        key: keys::job(&task.id),
                        value: json,
                    },
                    KvOp::HSet {
                        key: keys::STATUS.to_string(),
                        field: task.id.as_str().to_string(),
                        value: status_json,
                    },
                ])
                .await?;

            Metrics::inc(&METRICS.leases_reaped);
            if exhausted {
                warn!(
                    "Reaped task {} after attempt {}/{}; dead-lettered",
                    task.id, task.attempts, task.max_attempts
                );
            } else {
                warn!(
                    "Reaped task {} (attempt {}/{}); rescheduled",
                    task.id, task.attempts, task.max_attempts
                );
            }
            reclaimed += 1;
        }
        Ok(reclaimed)
    }

    /// Sweep forever at the given interval. Intended to be spawned as its
    /// own tokio task and aborted at shutdown.
    pub async fn run(self, interval: Duration) {
        info!(
            "Lease reaper running (timeout {:?}, interval {:?})",
            self.lease_timeout, interval
        );
        loop {
            if let Err(e) = self.reap_once().await {
                error!("Lease sweep failed: {}", e);
            }
            tokio::time::sleep(interval).await;
        }
    }
}
