//! Outbound email delivery.
//!
//! At-least-once: the Message-ID header is derived from the task's
//! correlation id, so every retry carries the same id and the sink can
//! collapse duplicates.

use std::collections::HashMap;

use async_trait::async_trait;
use tracing::info;

use mailvane_protocol::payload::{EmailAddress, SendEmailPayload};
use mailvane_protocol::{TaskError, TaskPayload, TaskResult};

use crate::env::{
    MessageAddress, MessageAttachment, MessageContent, OutboundMessage, Personalization,
    WorkerEnv,
};
use crate::handlers::infra_err;
use crate::registry::{TaskContext, TaskHandler};

pub struct SendEmailHandler;

#[async_trait]
impl TaskHandler for SendEmailHandler {
    async fn handle(&self, ctx: &TaskContext, env: &WorkerEnv) -> TaskResult<()> {
        ctx.task.payload.validate()?;
        let TaskPayload::SendEmail(payload) = &ctx.task.payload else {
            return Err(TaskError::validation("payload kind mismatch"));
        };

        let message = build_message(
            payload,
            &env.config.default_from,
            &env.config.email_domain,
            ctx.task.correlation_id.as_str(),
        );
        env.mail.send(message).await.map_err(infra_err)?;
        info!(
            "Sent email \"{}\" to {} recipient(s)",
            payload.subject,
            payload.to.len()
        );
        Ok(())
    }
}

fn address(a: &EmailAddress) -> MessageAddress {
    MessageAddress {
        email: a.email.clone(),
        name: a.name.clone(),
    }
}

fn build_message(
    payload: &SendEmailPayload,
    default_from: &str,
    domain: &str,
    correlation_id: &str,
) -> OutboundMessage {
    let mut content = Vec::new();
    if !payload.text_body.is_empty() {
        content.push(MessageContent {
            content_type: "text/plain".to_string(),
            value: payload.text_body.clone(),
        });
    }
    if let Some(html) = &payload.html_body {
        content.push(MessageContent {
            content_type: "text/html".to_string(),
            value: html.clone(),
        });
    }

    let mut headers: HashMap<String, String> = payload.headers.clone();
    headers
        .entry("Message-ID".to_string())
        .or_insert_with(|| format!("<{}@{}>", correlation_id, domain));

    OutboundMessage {
        personalizations: vec![Personalization {
            to: payload.to.iter().map(address).collect(),
            cc: payload.cc.iter().map(address).collect(),
            bcc: payload.bcc.iter().map(address).collect(),
        }],
        from: payload
            .from
            .as_ref()
            .map(address)
            .unwrap_or_else(|| MessageAddress {
                email: default_from.to_string(),
                name: None,
            }),
        subject: payload.subject.clone(),
        content,
        attachments: payload
            .attachments
            .iter()
            .map(|a| MessageAttachment {
                filename: a.filename.clone(),
                mime_type: a.mime_type.clone(),
                content: a.content.clone(),
            })
            .collect(),
        headers,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> SendEmailPayload {
        SendEmailPayload {
            to: vec![EmailAddress {
                email: "bob@example.com".to_string(),
                name: Some("Bob".to_string()),
            }],
            cc: vec![],
            bcc: vec![],
            from: None,
            subject: "hello".to_string(),
            text_body: "body".to_string(),
            html_body: Some("<p>body</p>".to_string()),
            headers: HashMap::new(),
            attachments: vec![],
        }
    }

    #[test]
    fn test_message_id_derived_from_correlation() {
        let m1 = build_message(&payload(), "noreply@x", "x.com", "corr-1");
        let m2 = build_message(&payload(), "noreply@x", "x.com", "corr-1");
        assert_eq!(m1.headers["Message-ID"], m2.headers["Message-ID"]);
        assert_eq!(m1.headers["Message-ID"], "<corr-1@x.com>");
    }

    #[test]
    fn test_explicit_message_id_preserved() {
        let mut p = payload();
        p.headers
            .insert("Message-ID".to_string(), "<given@y>".to_string());
        let m = build_message(&p, "noreply@x", "x.com", "corr-1");
        assert_eq!(m.headers["Message-ID"], "<given@y>");
    }

    #[test]
    fn test_default_from_applied() {
        let m = build_message(&payload(), "noreply@x.com", "x.com", "c");
        assert_eq!(m.from.email, "noreply@x.com");
        assert_eq!(m.content.len(), 2);
        assert_eq!(m.content[0].content_type, "text/plain");
    }
}
