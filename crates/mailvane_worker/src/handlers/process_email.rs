//! Inbound email normalization.
//!
//! Detects the thread from the reference chain, classifies the message,
//! stores the email record, and fans out attachment processing and content
//! indexing as follow-up tasks. Idempotent on `message_id`: a replay that
//! finds the email already stored does nothing.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::info;
use uuid::Uuid;

use mailvane_protocol::payload::{
    IndexOptions, IndexSearchPayload, ProcessAttachmentsPayload, ProcessEmailPayload,
};
use mailvane_protocol::{EnqueueOptions, TaskError, TaskPayload, TaskResult};

use crate::env::{EmailRecord, ThreadRecord, WorkerEnv};
use crate::handlers::{infra_err, queue_err};
use crate::registry::{TaskContext, TaskHandler};

pub struct ProcessEmailHandler;

#[async_trait]
impl TaskHandler for ProcessEmailHandler {
    async fn handle(&self, ctx: &TaskContext, env: &WorkerEnv) -> TaskResult<()> {
        ctx.task.payload.validate()?;
        let TaskPayload::ProcessEmail(payload) = &ctx.task.payload else {
            return Err(TaskError::validation("payload kind mismatch"));
        };

        if env
            .docs
            .get_email_by_message_id(&payload.message_id)
            .await
            .map_err(infra_err)?
            .is_some()
        {
            info!("Email {} already processed; skipping", payload.message_id);
            return Ok(());
        }
        ctx.cancel.checkpoint()?;

        let email_id = email_id_for(&payload.message_id);
        let thread = self.resolve_thread(payload, env).await?;
        let classification = classify(payload);
        let _ = env.scheduler.update_progress(&ctx.task.id, 40).await;

        // Fan out before the email record lands: both follow-ups are
        // idempotent, and the message_id check above must not hide them
        // from a replay that failed between these steps.
        if !payload.attachments.is_empty() {
            env.scheduler
                .enqueue(
                    TaskPayload::ProcessAttachments(ProcessAttachmentsPayload {
                        email_id: email_id.clone(),
                        attachments: payload.attachments.clone(),
                    }),
                    EnqueueOptions {
                        correlation_id: Some(ctx.task.correlation_id.clone()),
                        ..Default::default()
                    },
                )
                .await
                .map_err(queue_err)?;
        }

        let mut index_metadata = HashMap::new();
        index_metadata.insert("from".to_string(), json!(payload.from));
        index_metadata.insert("thread_id".to_string(), json!(thread.id));
        index_metadata.insert(
            "categories".to_string(),
            json!(classification.categories),
        );
        env.scheduler
            .enqueue(
                TaskPayload::IndexSearch(IndexSearchPayload {
                    doc_id: email_id.clone(),
                    doc_type: "email".to_string(),
                    content: format!("{}\n{}", payload.subject, payload.text_content),
                    metadata: index_metadata,
                    options: IndexOptions::default(),
                }),
                EnqueueOptions {
                    correlation_id: Some(ctx.task.correlation_id.clone()),
                    ..Default::default()
                },
            )
            .await
            .map_err(queue_err)?;
        let _ = env.scheduler.update_progress(&ctx.task.id, 80).await;

        let email = EmailRecord {
            id: email_id,
            message_id: payload.message_id.clone(),
            thread_id: thread.id.clone(),
            from: payload.from.clone(),
            to: payload.to.clone(),
            subject: payload.subject.clone(),
            text_content: payload.text_content.clone(),
            html_content: payload.html_content.clone(),
            categories: classification.categories,
            spam_score: classification.spam_score,
            priority: classification.priority,
            has_attachments: !payload.attachments.is_empty(),
            received_at: payload.received_at,
        };
        env.docs.insert_email(email).await.map_err(infra_err)?;
        let _ = env.scheduler.update_progress(&ctx.task.id, 100).await;
        Ok(())
    }
}

impl ProcessEmailHandler {
    /// One thread per reference chain: join the thread holding any ancestor
    /// Message-ID, or start a new one.
    async fn resolve_thread(
        &self,
        payload: &ProcessEmailPayload,
        env: &WorkerEnv,
    ) -> TaskResult<ThreadRecord> {
        let mut chain = payload.references.clone();
        chain.push(payload.message_id.clone());

        let existing = env
            .docs
            .find_thread_by_message_ids(&chain)
            .await
            .map_err(infra_err)?;

        let thread = match existing {
            Some(mut thread) => {
                if !thread.message_ids.contains(&payload.message_id) {
                    thread.message_ids.push(payload.message_id.clone());
                }
                for participant in std::iter::once(&payload.from).chain(payload.to.iter()) {
                    if !thread.participants.contains(participant) {
                        thread.participants.push(participant.clone());
                    }
                }
                thread.last_activity = payload.received_at;
                thread
            }
            None => ThreadRecord {
                id: Uuid::new_v4().to_string(),
                subject: base_subject(&payload.subject),
                participants: std::iter::once(payload.from.clone())
                    .chain(payload.to.iter().cloned())
                    .collect(),
                message_ids: vec![payload.message_id.clone()],
                last_activity: payload.received_at,
                metadata: HashMap::new(),
            },
        };
        env.docs
            .upsert_thread(thread.clone())
            .await
            .map_err(infra_err)?;
        Ok(thread)
    }
}

/// Deterministic email id so replays and follow-up tasks converge on the
/// same record and blob keys.
fn email_id_for(message_id: &str) -> String {
    let digest = Sha256::digest(message_id.as_bytes());
    let mut hex = String::with_capacity(32);
    for byte in digest.iter().take(16) {
        hex.push_str(&format!("{:02x}", byte));
    }
    format!("em_{}", hex)
}

/// Strip reply/forward prefixes for thread subjects.
fn base_subject(subject: &str) -> String {
    let mut s = subject.trim();
    loop {
        let lower = s.to_lowercase();
        let stripped = ["re:", "fwd:", "fw:"]
            .iter()
            .find(|prefix| lower.starts_with(**prefix))
            .map(|prefix| s[prefix.len()..].trim_start());
        match stripped {
            Some(rest) => s = rest,
            None => return s.to_string(),
        }
    }
}

struct Classification {
    priority: String,
    categories: Vec<String>,
    spam_score: f64,
}

const CATEGORY_KEYWORDS: &[(&str, &[&str])] = &[
    ("finance", &["invoice", "payment", "billing", "receipt"]),
    ("meetings", &["meeting", "calendar", "schedule", "call"]),
    ("support", &["help", "issue", "error", "bug", "broken"]),
    ("marketing", &["unsubscribe", "offer", "sale", "discount"]),
];

const SPAM_KEYWORDS: &[&str] = &[
    "winner",
    "lottery",
    "free money",
    "click here",
    "act now",
    "guaranteed",
];

fn classify(payload: &ProcessEmailPayload) -> Classification {
    let text = format!("{}\n{}", payload.subject, payload.text_content).to_lowercase();

    let priority = if ["urgent", "asap", "immediately", "critical"]
        .iter()
        .any(|word| text.contains(word))
    {
        "high"
    } else if text.contains("unsubscribe") || text.contains("newsletter") {
        "low"
    } else {
        "normal"
    };

    let categories: Vec<String> = CATEGORY_KEYWORDS
        .iter()
        .filter(|(_, words)| words.iter().any(|word| text.contains(word)))
        .map(|(name, _)| name.to_string())
        .collect();

    let mut spam_score: f64 = 0.0;
    if SPAM_KEYWORDS.iter().any(|word| text.contains(word)) {
        spam_score += 0.4;
    }
    let letters: Vec<char> = payload.subject.chars().filter(|c| c.is_alphabetic()).collect();
    if !letters.is_empty() {
        let upper = letters.iter().filter(|c| c.is_uppercase()).count();
        if upper as f64 / letters.len() as f64 > 0.6 {
            spam_score += 0.3;
        }
    }
    if payload.subject.matches('!').count() >= 3 {
        spam_score += 0.2;
    }

    Classification {
        priority: priority.to_string(),
        categories,
        spam_score: spam_score.min(1.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn payload(subject: &str, text: &str) -> ProcessEmailPayload {
        ProcessEmailPayload {
            message_id: "<m1@example.com>".to_string(),
            from: "alice@example.com".to_string(),
            to: vec!["bob@example.com".to_string()],
            cc: vec![],
            bcc: vec![],
            subject: subject.to_string(),
            text_content: text.to_string(),
            html_content: None,
            headers: HashMap::new(),
            references: vec![],
            attachments: vec![],
            received_at: Utc::now(),
        }
    }

    #[test]
    fn test_email_id_is_deterministic() {
        assert_eq!(email_id_for("<m1@x>"), email_id_for("<m1@x>"));
        assert_ne!(email_id_for("<m1@x>"), email_id_for("<m2@x>"));
        assert!(email_id_for("<m1@x>").starts_with("em_"));
    }

    #[test]
    fn test_base_subject_strips_reply_prefixes() {
        assert_eq!(base_subject("Re: Re: Budget"), "Budget");
        assert_eq!(base_subject("FWD: plans"), "plans");
        assert_eq!(base_subject("plain subject"), "plain subject");
    }

    #[test]
    fn test_classify_priority() {
        assert_eq!(payload_priority("URGENT: server down", ""), "high");
        assert_eq!(
            payload_priority("Weekly newsletter", "click unsubscribe below"),
            "low"
        );
        assert_eq!(payload_priority("lunch?", "see you at noon"), "normal");
    }

    fn payload_priority(subject: &str, text: &str) -> String {
        classify(&payload(subject, text)).priority
    }

    #[test]
    fn test_classify_categories() {
        let c = classify(&payload("Invoice #42", "payment due friday"));
        assert!(c.categories.contains(&"finance".to_string()));
        assert!(!c.categories.contains(&"support".to_string()));
    }

    #[test]
    fn test_spam_score_accumulates() {
        let clean = classify(&payload("lunch plans", "noon works"));
        assert_eq!(clean.spam_score, 0.0);

        let spammy = classify(&payload("YOU ARE A WINNER!!!", "click here for free money"));
        assert!(spammy.spam_score >= 0.8);
        assert!(spammy.spam_score <= 1.0);
    }
}
