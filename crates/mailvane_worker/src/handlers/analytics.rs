//! Analytics aggregation over a half-open time window.
//!
//! Pure over its inputs at execution time; the record id is derived from
//! the window bounds, so re-running a window overwrites its own aggregate.

use async_trait::async_trait;
use chrono::Utc;
use tracing::info;

use mailvane_kv::KvOp;
use mailvane_protocol::{TaskError, TaskPayload, TaskResult};

use crate::env::{AnalyticsRecord, WorkerEnv};
use crate::handlers::infra_err;
use crate::registry::{TaskContext, TaskHandler};

use std::time::Duration;

const SUMMARY_TTL: Duration = Duration::from_secs(60 * 60);

pub struct GenerateAnalyticsHandler;

#[async_trait]
impl TaskHandler for GenerateAnalyticsHandler {
    async fn handle(&self, ctx: &TaskContext, env: &WorkerEnv) -> TaskResult<()> {
        ctx.task.payload.validate()?;
        let TaskPayload::GenerateAnalytics(payload) = &ctx.task.payload else {
            return Err(TaskError::validation("payload kind mismatch"));
        };

        let emails_received = env
            .docs
            .count_emails_between(payload.window_start, payload.window_end)
            .await
            .map_err(infra_err)?;
        ctx.cancel.checkpoint()?;
        let threads_active = env
            .docs
            .count_threads_active_between(payload.window_start, payload.window_end)
            .await
            .map_err(infra_err)?;

        let record = AnalyticsRecord {
            id: format!(
                "analytics_{}_{}",
                payload.window_start.timestamp_millis(),
                payload.window_end.timestamp_millis()
            ),
            window_start: payload.window_start,
            window_end: payload.window_end,
            emails_received,
            threads_active,
            generated_at: Utc::now(),
        };

        env.docs
            .insert_analytics(record.clone())
            .await
            .map_err(infra_err)?;

        // Short-lived summary for dashboards polling the KV.
        let summary = serde_json::to_string(&record)?;
        env.kv
            .pipeline(vec![KvOp::SetEx {
                key: "metrics:analytics:last".to_string(),
                value: summary,
                ttl: SUMMARY_TTL,
            }])
            .await
            .map_err(|e| TaskError::transient(e.to_string()))?;

        info!(
            "Aggregated window [{} .. {}): {} emails, {} active threads",
            payload.window_start, payload.window_end, emails_received, threads_active
        );
        Ok(())
    }
}
