//! Alert records over the KV substrate.
//!
//! `alerts` is a sorted set of alert ids scored by creation time; details
//! live in an `alert:{id}` hash, one field per attribute. One active alert
//! per source: raising again while the source's alert is open is a no-op,
//! tracked through an `alert:open:{source}` marker key.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use mailvane_kv::{Kv, KvOp};
use mailvane_protocol::AlertId;

use crate::error::{MonitorError, Result};

const ALERTS: &str = "alerts";

fn alert_key(id: &AlertId) -> String {
    format!("alert:{}", id)
}

fn open_marker(source: &str) -> String {
    format!("alert:open:{}", source)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Low => "low",
            AlertSeverity::Medium => "medium",
            AlertSeverity::High => "high",
            AlertSeverity::Critical => "critical",
        }
    }
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertSeverity {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "low" => Ok(AlertSeverity::Low),
            "medium" => Ok(AlertSeverity::Medium),
            "high" => Ok(AlertSeverity::High),
            "critical" => Ok(AlertSeverity::Critical),
            other => Err(MonitorError::NotFound(format!(
                "unknown severity: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertState {
    Active,
    Acknowledged,
    Resolved,
}

impl AlertState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertState::Active => "active",
            AlertState::Acknowledged => "acknowledged",
            AlertState::Resolved => "resolved",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Alert {
    pub id: AlertId,
    pub source: String,
    pub message: String,
    pub severity: AlertSeverity,
    pub state: AlertState,
    pub created_at: DateTime<Utc>,
    pub acknowledged_by: Option<String>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Alert {
    fn from_fields(id: AlertId, fields: &HashMap<String, String>) -> Option<Self> {
        Some(Self {
            id,
            source: fields.get("source")?.clone(),
            message: fields.get("message")?.clone(),
            severity: fields.get("severity")?.parse().ok()?,
            state: match fields.get("state")?.as_str() {
                "active" => AlertState::Active,
                "acknowledged" => AlertState::Acknowledged,
                "resolved" => AlertState::Resolved,
                _ => return None,
            },
            created_at: fields.get("created_at")?.parse().ok()?,
            acknowledged_by: fields.get("acknowledged_by").cloned(),
            acknowledged_at: fields
                .get("acknowledged_at")
                .and_then(|s| s.parse().ok()),
            resolved_at: fields.get("resolved_at").and_then(|s| s.parse().ok()),
        })
    }
}

#[derive(Clone)]
pub struct AlertStore {
    kv: Arc<dyn Kv>,
}

impl AlertStore {
    pub fn new(kv: Arc<dyn Kv>) -> Self {
        Self { kv }
    }

    /// Raise an alert unless the source already has an open one. Returns the
    /// id of the new alert, or `None` when deduplicated.
    pub async fn raise(
        &self,
        source: &str,
        message: &str,
        severity: AlertSeverity,
    ) -> Result<Option<AlertId>> {
        if let Some(open_id) = self.kv.get(&open_marker(source)).await? {
            info!("Alert for {} already open ({}); not raising", source, open_id);
            return Ok(None);
        }

        let id = AlertId::new();
        let now = Utc::now();
        let key = alert_key(&id);
        let fields = [
            ("source", source.to_string()),
            ("message", message.to_string()),
            ("severity", severity.as_str().to_string()),
            ("state", AlertState::Active.as_str().to_string()),
            ("created_at", now.to_rfc3339()),
        ];
        let mut ops: Vec<KvOp> = fields
            .into_iter()
            .map(|(field, value)| KvOp::HSet {
                key: key.clone(),
                field: field.to_string(),
                value,
            })
            .collect();
        ops.push(KvOp::ZAdd {
            key: ALERTS.to_string(),
            member: id.as_str().to_string(),
            score: now.timestamp_millis() as f64,
        });
        ops.push(KvOp::Set {
            key: open_marker(source),
            value: id.as_str().to_string(),
        });
        self.kv.pipeline(ops).await?;

        warn!("Alert raised [{}] {}: {}", severity, source, message);
        Ok(Some(id))
    }

    pub async fn get(&self, id: &AlertId) -> Result<Option<Alert>> {
        let fields = self.kv.hgetall(&alert_key(id)).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        Ok(Alert::from_fields(id.clone(), &fields))
    }

    /// Record who acknowledged and when. Returns false when the alert is
    /// not active.
    pub async fn acknowledge(&self, id: &AlertId, who: &str) -> Result<bool> {
        let Some(alert) = self.get(id).await? else {
            return Err(MonitorError::NotFound(id.to_string()));
        };
        if alert.state != AlertState::Active {
            return Ok(false);
        }
        let key = alert_key(id);
        self.kv
            .pipeline(vec![
                KvOp::HSet {
                    key: key.clone(),
                    field: "state".to_string(),
                    value: AlertState::Acknowledged.as_str().to_string(),
                },
                KvOp::HSet {
                    key: key.clone(),
                    field: "acknowledged_by".to_string(),
                    value: who.to_string(),
                },
                KvOp::HSet {
                    key,
                    field: "acknowledged_at".to_string(),
                    value: Utc::now().to_rfc3339(),
                },
            ])
            .await?;
        info!("Alert {} acknowledged by {}", id, who);
        Ok(true)
    }

    /// Terminal. Clears the source's open marker so the next violation
    /// raises a fresh alert.
    pub async fn resolve(&self, id: &AlertId) -> Result<bool> {
        let Some(alert) = self.get(id).await? else {
            return Err(MonitorError::NotFound(id.to_string()));
        };
        if alert.state == AlertState::Resolved {
            return Ok(false);
        }
        let key = alert_key(id);
        self.kv
            .pipeline(vec![
                KvOp::HSet {
                    key: key.clone(),
                    field: "state".to_string(),
                    value: AlertState::Resolved.as_str().to_string(),
                },
                KvOp::HSet {
                    key,
                    field: "resolved_at".to_string(),
                    value: Utc::now().to_rfc3339(),
                },
                KvOp::Del {
                    key: open_marker(&alert.source),
                },
            ])
            .await?;
        info!("Alert {} resolved", id);
        Ok(true)
    }

    /// Most recent alerts first. Unreadable records are skipped.
    pub async fn list(&self, limit: usize) -> Result<Vec<Alert>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let ids = self.kv.zrange(ALERTS, 0, limit as i64 - 1, true).await?;
        let mut alerts = Vec::with_capacity(ids.len());
        for (raw_id, _score) in ids {
            let Ok(id) = AlertId::parse(&raw_id) else {
                warn!("Skipping malformed alert id {}", raw_id);
                continue;
            };
            match self.get(&id).await? {
                Some(alert) => alerts.push(alert),
                None => warn!("Alert {} listed but has no record", id),
            }
        }
        Ok(alerts)
    }
}
