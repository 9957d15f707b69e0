//! Typed per-kind task payloads.
//!
//! The wire form is adjacently tagged (`{"kind": ..., "data": ...}`) so a
//! record decodes straight into the right variant; a payload that does not
//! match its kind's schema fails at decode time rather than inside a handler.
//!
//! Validation here covers structure. Semantic checks that need configuration
//! (size limits, MIME whitelists) live with the handlers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{TaskError, TaskResult};
use crate::task::TaskKind;

/// Languages with a stop-word set. English is the fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    En,
    Es,
    Fr,
    De,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Es => "es",
            Language::Fr => "fr",
            Language::De => "de",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = TaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "en" => Ok(Language::En),
            "es" => Ok(Language::Es),
            "fr" => Ok(Language::Fr),
            "de" => Ok(Language::De),
            other => Err(TaskError::validation(format!(
                "unsupported language: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EmailAddress {
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Attachment as it arrives on an inbound email, content still inline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentInput {
    pub filename: String,
    pub mime_type: String,
    pub size_bytes: u64,
    /// Base64-encoded content.
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessEmailPayload {
    pub message_id: String,
    pub from: String,
    pub to: Vec<String>,
    #[serde(default)]
    pub cc: Vec<String>,
    #[serde(default)]
    pub bcc: Vec<String>,
    pub subject: String,
    #[serde(default)]
    pub text_content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html_content: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Message-IDs of ancestors, oldest first. Drives thread detection.
    #[serde(default)]
    pub references: Vec<String>,
    #[serde(default)]
    pub attachments: Vec<AttachmentInput>,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutgoingAttachment {
    pub filename: String,
    pub mime_type: String,
    /// Base64-encoded content.
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendEmailPayload {
    pub to: Vec<EmailAddress>,
    #[serde(default)]
    pub cc: Vec<EmailAddress>,
    #[serde(default)]
    pub bcc: Vec<EmailAddress>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<EmailAddress>,
    pub subject: String,
    #[serde(default)]
    pub text_body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html_body: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub attachments: Vec<OutgoingAttachment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessAttachmentsPayload {
    /// Owning email document id.
    pub email_id: String,
    pub attachments: Vec<AttachmentInput>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateAnalyticsPayload {
    /// Inclusive window start.
    pub window_start: DateTime<Utc>,
    /// Exclusive window end.
    pub window_end: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupTarget {
    Blobs,
    Cache,
    Database,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupStoragePayload {
    /// Entries strictly older than this are eligible for deletion.
    pub cutoff: DateTime<Utc>,
    pub targets: Vec<CleanupTarget>,
    /// Glob-style patterns; a match always wins over target selection.
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct IndexOptions {
    #[serde(default)]
    pub language: Language,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_size: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexSearchPayload {
    pub doc_id: String,
    pub doc_type: String,
    pub content: String,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    #[serde(default)]
    pub options: IndexOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateThreadPayload {
    pub thread_id: String,
    /// Partial mutation applied field-by-field under the thread lock.
    pub changes: HashMap<String, Value>,
    #[serde(default)]
    pub reindex: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationChannel {
    Email,
    Push,
    Sms,
    InApp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendNotificationPayload {
    pub user_id: String,
    pub channel: NotificationChannel,
    pub title: String,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Tagged union of every payload the queue can carry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum TaskPayload {
    ProcessEmail(ProcessEmailPayload),
    SendEmail(SendEmailPayload),
    ProcessAttachments(ProcessAttachmentsPayload),
    GenerateAnalytics(GenerateAnalyticsPayload),
    CleanupStorage(CleanupStoragePayload),
    IndexSearch(IndexSearchPayload),
    UpdateThread(UpdateThreadPayload),
    SendNotification(SendNotificationPayload),
}

impl TaskPayload {
    pub fn kind(&self) -> TaskKind {
        match self {
            TaskPayload::ProcessEmail(_) => TaskKind::ProcessEmail,
            TaskPayload::SendEmail(_) => TaskKind::SendEmail,
            TaskPayload::ProcessAttachments(_) => TaskKind::ProcessAttachments,
            TaskPayload::GenerateAnalytics(_) => TaskKind::GenerateAnalytics,
            TaskPayload::CleanupStorage(_) => TaskKind::CleanupStorage,
            TaskPayload::IndexSearch(_) => TaskKind::IndexSearch,
            TaskPayload::UpdateThread(_) => TaskKind::UpdateThread,
            TaskPayload::SendNotification(_) => TaskKind::SendNotification,
        }
    }

    /// Structural validation. Invalid payloads are fatal, never retried.
    pub fn validate(&self) -> TaskResult<()> {
        match self {
            TaskPayload::ProcessEmail(p) => {
                if p.message_id.trim().is_empty() {
                    return Err(TaskError::validation("process_email: empty message_id"));
                }
                if p.from.trim().is_empty() {
                    return Err(TaskError::validation("process_email: empty from address"));
                }
                if p.to.is_empty() {
                    return Err(TaskError::validation("process_email: no recipients"));
                }
            }
            TaskPayload::SendEmail(p) => {
                if p.to.is_empty() {
                    return Err(TaskError::validation("send_email: no recipients"));
                }
                if p.subject.trim().is_empty() {
                    return Err(TaskError::validation("send_email: empty subject"));
                }
                if p.text_body.is_empty() && p.html_body.is_none() {
                    return Err(TaskError::validation("send_email: no body"));
                }
            }
            TaskPayload::ProcessAttachments(p) => {
                if p.email_id.trim().is_empty() {
                    return Err(TaskError::validation("process_attachments: empty email_id"));
                }
                if p.attachments.is_empty() {
                    return Err(TaskError::validation(
                        "process_attachments: no attachments",
                    ));
                }
                for a in &p.attachments {
                    if a.filename.trim().is_empty() {
                        return Err(TaskError::validation(
                            "process_attachments: attachment without filename",
                        ));
                    }
                }
            }
            TaskPayload::GenerateAnalytics(p) => {
                if p.window_end <= p.window_start {
                    return Err(TaskError::validation(
                        "generate_analytics: window_end must be after window_start",
                    ));
                }
            }
            TaskPayload::CleanupStorage(p) => {
                if p.targets.is_empty() {
                    return Err(TaskError::validation("cleanup_storage: no targets"));
                }
                if p.cutoff > Utc::now() {
                    return Err(TaskError::validation(
                        "cleanup_storage: cutoff in the future",
                    ));
                }
            }
            TaskPayload::IndexSearch(p) => {
                if p.doc_id.trim().is_empty() {
                    return Err(TaskError::validation("index_search: empty doc_id"));
                }
                if p.doc_type.trim().is_empty() {
                    return Err(TaskError::validation("index_search: empty doc_type"));
                }
                if let Some(size) = p.options.chunk_size {
                    if size == 0 {
                        return Err(TaskError::validation("index_search: zero chunk_size"));
                    }
                }
            }
            TaskPayload::UpdateThread(p) => {
                if p.thread_id.trim().is_empty() {
                    return Err(TaskError::validation("update_thread: empty thread_id"));
                }
                if p.changes.is_empty() {
                    return Err(TaskError::validation("update_thread: empty change set"));
                }
            }
            TaskPayload::SendNotification(p) => {
                if p.user_id.trim().is_empty() {
                    return Err(TaskError::validation("send_notification: empty user_id"));
                }
                if p.title.trim().is_empty() && p.body.trim().is_empty() {
                    return Err(TaskError::validation(
                        "send_notification: empty title and body",
                    ));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_wire_form_is_adjacently_tagged() {
        let payload = TaskPayload::SendNotification(SendNotificationPayload {
            user_id: "u1".to_string(),
            channel: NotificationChannel::Push,
            title: "t".to_string(),
            body: "b".to_string(),
            data: None,
        });
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["kind"], "send_notification");
        assert_eq!(json["data"]["channel"], "push");
    }

    #[test]
    fn test_decode_rejects_mismatched_schema() {
        // send_email data under a process_email kind must not decode.
        let raw = r#"{"kind":"process_email","data":{"to":[],"subject":"x"}}"#;
        assert!(serde_json::from_str::<TaskPayload>(raw).is_err());
    }

    #[test]
    fn test_validate_rejects_empty_message_id() {
        let payload = TaskPayload::ProcessEmail(ProcessEmailPayload {
            message_id: " ".to_string(),
            from: "a@example.com".to_string(),
            to: vec!["b@example.com".to_string()],
            cc: vec![],
            bcc: vec![],
            subject: "s".to_string(),
            text_content: String::new(),
            html_content: None,
            headers: HashMap::new(),
            references: vec![],
            attachments: vec![],
            received_at: Utc::now(),
        });
        let err = payload.validate().unwrap_err();
        assert!(!err.retryable());
    }

    #[test]
    fn test_validate_rejects_inverted_analytics_window() {
        let now = Utc::now();
        let payload = TaskPayload::GenerateAnalytics(GenerateAnalyticsPayload {
            window_start: now,
            window_end: now,
        });
        assert!(payload.validate().is_err());
    }

    #[test]
    fn test_language_parsing() {
        assert_eq!("de".parse::<Language>().unwrap(), Language::De);
        assert!("zz".parse::<Language>().is_err());
    }
}
