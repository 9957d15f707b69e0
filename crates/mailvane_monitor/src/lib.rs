//! Health monitoring and alerting.
//!
//! Periodic checks over the KV, the document store, queue depths, and the
//! cached index health report. Threshold violations become alert records in
//! the `alerts` sorted set with detail hashes under `alert:{id}`.

pub mod alerts;
pub mod error;
pub mod health;

pub use alerts::{Alert, AlertSeverity, AlertState, AlertStore};
pub use error::{MonitorError, Result};
pub use health::{CheckOutcome, HealthMonitor, HealthThresholds};
