//! Worker loop.
//!
//! Single cooperative loop per worker; horizontal scaling is just more
//! workers against the same KV. Correctness rests on the scheduler's
//! pipelined partition transitions plus the per-resource locks handlers
//! take themselves.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{error, info, warn};

use mailvane_protocol::{defaults, Task, TaskError};
use mailvane_queue::Scheduler;

use crate::cancel::CancellationToken;
use crate::env::WorkerEnv;
use crate::registry::{HandlerRegistry, TaskContext};

/// Worker configuration (plain data).
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_id: String,
    /// Idle wait between empty lease polls.
    pub poll_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("worker-{}", std::process::id()),
            poll_interval: Duration::from_millis(defaults::DEFAULT_POLL_INTERVAL_MS),
        }
    }
}

pub struct Worker {
    config: WorkerConfig,
    scheduler: Arc<Scheduler>,
    registry: HandlerRegistry,
    env: WorkerEnv,
    shutdown: CancellationToken,
}

impl Worker {
    pub fn new(config: WorkerConfig, env: WorkerEnv, registry: HandlerRegistry) -> Self {
        Self {
            config,
            scheduler: Arc::clone(&env.scheduler),
            registry,
            env,
            shutdown: CancellationToken::new(),
        }
    }

    /// Token that stops the loop; shared with handlers so they can abort at
    /// their next suspension point.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Main loop: lease, dispatch, record. Runs until the shutdown token
    /// fires; the in-flight task is failed as "worker stopped" by its own
    /// cancellation checkpoint and retried by the scheduler.
    pub async fn run(&self) -> Result<()> {
        info!("Worker {} entering loop", self.config.worker_id);

        while !self.shutdown.is_cancelled() {
            match self.scheduler.lease().await {
                Ok(Some(task)) => self.execute(task).await,
                Ok(None) => tokio::time::sleep(self.config.poll_interval).await,
                Err(e) => {
                    error!("Lease failed: {}", e);
                    tokio::time::sleep(self.config.poll_interval).await;
                }
            }
        }

        info!("Worker {} stopped", self.config.worker_id);
        Ok(())
    }

    pub async fn execute(&self, task: Task) {
        let kind = task.kind();
        let Some(handler) = self.registry.get(kind) else {
            warn!("No handler for kind {}; dead-lettering {}", kind, task.id);
            let err = TaskError::validation(format!("unsupported kind: {}", kind));
            self.record_failure(&task, &err).await;
            return;
        };

        let ctx = TaskContext {
            task: task.clone(),
            cancel: self.shutdown.clone(),
        };
        let outcome =
            match tokio::time::timeout(task.timeout(), handler.handle(&ctx, &self.env)).await {
                Ok(result) => result,
                Err(_) => Err(TaskError::timeout(format!(
                    "handler exceeded {:?}",
                    task.timeout()
                ))),
            };

        match outcome {
            Ok(()) => {
                if let Err(e) = self.scheduler.complete(&task).await {
                    error!("Failed to record completion of {}: {}", task.id, e);
                }
            }
            Err(err) => self.record_failure(&task, &err).await,
        }
    }

    async fn record_failure(&self, task: &Task, err: &TaskError) {
        if let Err(e) = self.scheduler.fail(task, err).await {
            error!("Failed to record failure of {}: {}", task.id, e);
        }
    }
}

