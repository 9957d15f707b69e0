//! System configuration shared across the queue, worker, and search crates.

use std::time::Duration;

use crate::defaults;

/// Canonical system configuration used by the binary and the worker.
#[derive(Debug, Clone)]
pub struct SystemConfig {
    /// KV connection URL (redis://...)
    pub kv_url: String,
    /// Document store URL (external collaborator)
    pub docstore_url: String,
    /// Blob bucket name for attachments
    pub blob_bucket: String,
    /// Outbound mail transport endpoint
    pub mail_transport_url: String,
    /// Outbound mail transport credential
    pub mail_transport_token: String,
    /// Default from-address for outbound mail
    pub default_from: String,
    /// Domain stamped into generated Message-ID headers
    pub email_domain: String,
    /// Idle wait between empty lease polls
    pub poll_interval: Duration,
    /// Age at which a `processing` entry is considered abandoned
    pub lease_timeout: Duration,
    /// Attachment size limit in bytes
    pub attachment_size_limit: u64,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            kv_url: defaults::DEFAULT_KV_URL.to_string(),
            docstore_url: String::new(),
            blob_bucket: "mailvane-attachments".to_string(),
            mail_transport_url: String::new(),
            mail_transport_token: String::new(),
            default_from: "noreply@localhost".to_string(),
            email_domain: "localhost".to_string(),
            poll_interval: Duration::from_millis(defaults::DEFAULT_POLL_INTERVAL_MS),
            lease_timeout: Duration::from_millis(defaults::DEFAULT_LEASE_TIMEOUT_MS),
            attachment_size_limit: defaults::DEFAULT_ATTACHMENT_SIZE_LIMIT,
        }
    }
}

impl SystemConfig {
    /// Build from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("MAILVANE_KV_URL") {
            config.kv_url = url;
        }
        if let Ok(url) = std::env::var("MAILVANE_DOCSTORE_URL") {
            config.docstore_url = url;
        }
        if let Ok(bucket) = std::env::var("MAILVANE_BLOB_BUCKET") {
            config.blob_bucket = bucket;
        }
        if let Ok(url) = std::env::var("MAILVANE_MAIL_URL") {
            config.mail_transport_url = url;
        }
        if let Ok(token) = std::env::var("MAILVANE_MAIL_TOKEN") {
            config.mail_transport_token = token;
        }
        if let Ok(from) = std::env::var("MAILVANE_MAIL_FROM") {
            config.default_from = from;
        }
        if let Ok(domain) = std::env::var("MAILVANE_MAIL_DOMAIN") {
            config.email_domain = domain;
        }
        if let Some(ms) = env_u64("MAILVANE_POLL_INTERVAL_MS") {
            config.poll_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = env_u64("MAILVANE_LEASE_TIMEOUT_MS") {
            config.lease_timeout = Duration::from_millis(ms);
        }
        if let Some(bytes) = env_u64("MAILVANE_ATTACHMENT_LIMIT_BYTES") {
            config.attachment_size_limit = bytes;
        }
        config
    }
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok()?.parse().ok()
}
