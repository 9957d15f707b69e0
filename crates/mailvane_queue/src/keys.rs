//! Persisted key layout for the queue.

use mailvane_protocol::TaskId;

/// Ready partition: score = priority score, pop-min order.
pub const READY: &str = "ready";
/// Scheduled partition: score = due time in epoch ms.
pub const SCHEDULED: &str = "scheduled";
/// Processing partition: score = lease acquisition time in epoch ms.
pub const PROCESSING: &str = "processing";
/// Dead-letter partition: score = failure time in epoch ms.
pub const FAILED: &str = "failed";
/// Observability hash: task id -> status record JSON.
pub const STATUS: &str = "status";

/// Random-access mirror. Holds a byte-identical copy of the partition
/// member so transitions can ZREM the exact stored bytes.
pub fn job(id: &TaskId) -> String {
    format!("job:{}", id)
}
