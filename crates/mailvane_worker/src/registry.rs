//! Kind-to-handler dispatch table.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use mailvane_protocol::{Task, TaskKind, TaskResult};

use crate::cancel::CancellationToken;
use crate::env::WorkerEnv;
use crate::handlers;

/// A leased task plus the cancellation signal for this attempt.
#[derive(Clone)]
pub struct TaskContext {
    pub task: Task,
    pub cancel: CancellationToken,
}

/// One task kind's execution logic.
///
/// Contract: validate the payload at entry (invalid payloads are fatal,
/// never retried), stay idempotent under replay, emit progress for long
/// work, and take per-resource locks before mutating shared state.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, ctx: &TaskContext, env: &WorkerEnv) -> TaskResult<()>;
}

#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<TaskKind, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: TaskKind, handler: Arc<dyn TaskHandler>) {
        self.handlers.insert(kind, handler);
    }

    pub fn get(&self, kind: TaskKind) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(&kind).cloned()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Registry with every known kind wired to its handler.
pub fn default_registry() -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry.register(
        TaskKind::ProcessEmail,
        Arc::new(handlers::process_email::ProcessEmailHandler),
    );
    registry.register(
        TaskKind::SendEmail,
        Arc::new(handlers::send_email::SendEmailHandler),
    );
    registry.register(
        TaskKind::ProcessAttachments,
        Arc::new(handlers::attachments::ProcessAttachmentsHandler),
    );
    registry.register(
        TaskKind::GenerateAnalytics,
        Arc::new(handlers::analytics::GenerateAnalyticsHandler),
    );
    registry.register(
        TaskKind::CleanupStorage,
        Arc::new(handlers::cleanup::CleanupStorageHandler),
    );
    registry.register(
        TaskKind::IndexSearch,
        Arc::new(handlers::index_search::IndexSearchHandler),
    );
    registry.register(
        TaskKind::UpdateThread,
        Arc::new(handlers::update_thread::UpdateThreadHandler),
    );
    registry.register(
        TaskKind::SendNotification,
        Arc::new(handlers::notification::SendNotificationHandler),
    );
    registry
}
