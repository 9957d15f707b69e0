use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use mailvane_protocol::{defaults, TaskError, TaskResult};

/// Token for cooperative cancellation of task execution.
///
/// Uses an AtomicBool internally. Clone is cheap and shares state.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a new cancellation token (not cancelled).
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Check if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Handler-side check at a suspension point. Returns a retryable error
    /// so the scheduler reschedules the interrupted attempt.
    pub fn checkpoint(&self) -> TaskResult<()> {
        if self.is_cancelled() {
            Err(TaskError::transient(defaults::WORKER_STOPPED_MESSAGE))
        } else {
            Ok(())
        }
    }
}
