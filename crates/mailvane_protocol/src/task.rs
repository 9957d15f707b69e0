//! The durable task record and its codec.
//!
//! A task is serialized to JSON and stored as a sorted-set member in exactly
//! one queue partition, with a random-access mirror under `job:{id}` and an
//! observability record in the `status` hash.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{TaskError, TaskResult};
use crate::ids::{CorrelationId, TaskId};
use crate::payload::TaskPayload;

// ============================================================================
// Canonical enums
// ============================================================================

/// Closed set of task kinds the system knows how to execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    ProcessEmail,
    SendEmail,
    ProcessAttachments,
    GenerateAnalytics,
    CleanupStorage,
    IndexSearch,
    UpdateThread,
    SendNotification,
}

impl TaskKind {
    pub const ALL: [TaskKind; 8] = [
        TaskKind::ProcessEmail,
        TaskKind::SendEmail,
        TaskKind::ProcessAttachments,
        TaskKind::GenerateAnalytics,
        TaskKind::CleanupStorage,
        TaskKind::IndexSearch,
        TaskKind::UpdateThread,
        TaskKind::SendNotification,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::ProcessEmail => "process_email",
            TaskKind::SendEmail => "send_email",
            TaskKind::ProcessAttachments => "process_attachments",
            TaskKind::GenerateAnalytics => "generate_analytics",
            TaskKind::CleanupStorage => "cleanup_storage",
            TaskKind::IndexSearch => "index_search",
            TaskKind::UpdateThread => "update_thread",
            TaskKind::SendNotification => "send_notification",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = TaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| TaskError::validation(format!("unknown task kind: {}", s)))
    }
}

/// Scheduling class. Weights separate classes in the ready-set ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Normal,
    Low,
}

impl Priority {
    /// Class-separation weight. Subtracted from the ready score, so a larger
    /// weight pops sooner.
    pub fn weight(&self) -> i64 {
        match self {
            Priority::High => 1_000_000,
            Priority::Normal => 100_000,
            Priority::Low => 10_000,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Scheduled,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Scheduled => "scheduled",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Task record
// ============================================================================

/// Durable task record. Invariant: `attempts <= max_attempts`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub payload: TaskPayload,
    pub priority: Priority,
    pub status: TaskStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    /// Per-attempt execution budget in milliseconds.
    pub timeout_ms: u64,
    pub created_at: DateTime<Utc>,
    pub scheduled_for: DateTime<Utc>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    /// Assigned at enqueue, preserved across retries and dependents.
    pub correlation_id: CorrelationId,
    pub metadata: HashMap<String, Value>,
}

impl Task {
    pub fn kind(&self) -> TaskKind {
        self.payload.kind()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Serialize for storage as a sorted-set member / `job:{id}` mirror.
    pub fn to_json(&self) -> TaskResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> TaskResult<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Follow-up tasks to enqueue when this one completes, read from
    /// `metadata.dependent_tasks`. Entries that fail to decode are skipped
    /// by the caller.
    pub fn dependent_tasks(&self) -> Option<&Value> {
        self.metadata.get("dependent_tasks")
    }
}

/// Options accepted at enqueue time.
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    pub priority: Option<Priority>,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub max_attempts: Option<u32>,
    pub timeout: Option<Duration>,
    pub metadata: Option<HashMap<String, Value>>,
    /// Reuse a correlation id (dependents, re-enqueued work).
    pub correlation_id: Option<CorrelationId>,
}

impl EnqueueOptions {
    pub fn with_priority(priority: Priority) -> Self {
        Self {
            priority: Some(priority),
            ..Default::default()
        }
    }
}

/// Observability record kept in the `status` hash, one entry per task id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusRecord {
    pub status: TaskStatus,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_attempt_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StatusRecord {
    pub fn from_task(task: &Task) -> Self {
        Self {
            status: task.status,
            attempts: task.attempts,
            progress: None,
            last_attempt_at: task.last_attempt_at,
            completed_at: task.completed_at,
            error: task.error.clone(),
        }
    }
}
