//! User notification delivery.
//!
//! Respects user channel preferences and quiet hours; a skipped delivery
//! is a success, not a failure.

use async_trait::async_trait;
use chrono::{Timelike, Utc};
use tracing::info;

use mailvane_protocol::{TaskError, TaskPayload, TaskResult};

use crate::env::WorkerEnv;
use crate::handlers::infra_err;
use crate::registry::{TaskContext, TaskHandler};

pub struct SendNotificationHandler;

#[async_trait]
impl TaskHandler for SendNotificationHandler {
    async fn handle(&self, ctx: &TaskContext, env: &WorkerEnv) -> TaskResult<()> {
        ctx.task.payload.validate()?;
        let TaskPayload::SendNotification(payload) = &ctx.task.payload else {
            return Err(TaskError::validation("payload kind mismatch"));
        };

        let prefs = env
            .notifications
            .preferences(&payload.user_id)
            .await
            .map_err(infra_err)?;

        if !prefs.enabled_channels.contains(&payload.channel) {
            info!(
                "User {} has {:?} disabled; notification skipped",
                payload.user_id, payload.channel
            );
            return Ok(());
        }
        if let Some((start, end)) = prefs.quiet_hours {
            let hour = Utc::now().hour() as u8;
            if in_quiet_hours(hour, start, end) {
                info!(
                    "Quiet hours for user {}; notification skipped",
                    payload.user_id
                );
                return Ok(());
            }
        }

        env.notifications
            .deliver(
                &payload.user_id,
                payload.channel,
                &payload.title,
                &payload.body,
                payload.data.as_ref(),
            )
            .await
            .map_err(infra_err)?;
        info!(
            "Delivered {:?} notification to user {}",
            payload.channel, payload.user_id
        );
        Ok(())
    }
}

/// Quiet window may wrap midnight: (22, 7) covers 22:00..07:00.
fn in_quiet_hours(hour: u8, start: u8, end: u8) -> bool {
    if start <= end {
        hour >= start && hour < end
    } else {
        hour >= start || hour < end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quiet_hours_simple_window() {
        assert!(in_quiet_hours(10, 9, 17));
        assert!(!in_quiet_hours(8, 9, 17));
        assert!(!in_quiet_hours(17, 9, 17));
    }

    #[test]
    fn test_quiet_hours_wrapping_window() {
        assert!(in_quiet_hours(23, 22, 7));
        assert!(in_quiet_hours(3, 22, 7));
        assert!(!in_quiet_hours(12, 22, 7));
    }

    #[test]
    fn test_quiet_hours_empty_window() {
        assert!(!in_quiet_hours(5, 6, 6));
    }
}
