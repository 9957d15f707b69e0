//! Worker loop, handler registry, and the task handlers.
//!
//! A worker is a single cooperative loop: lease, dispatch to the typed
//! handler for the task's kind, record the outcome. Handlers are idempotent
//! under replay, validate their payloads at entry (invalid payloads never
//! retry), and poll the cancellation token at their own suspension points.

pub mod cancel;
pub mod env;
pub mod handlers;
pub mod registry;
pub mod worker;

pub use cancel::CancellationToken;
pub use env::{
    AnalyticsRecord, BlobHead, BlobStore, DocumentStore, EmailRecord, MailTransport,
    NotificationGateway, NotificationPrefs, OutboundMessage, ThreadRecord, WorkerEnv,
};
pub use registry::{default_registry, HandlerRegistry, TaskContext, TaskHandler};
pub use worker::{Worker, WorkerConfig};
