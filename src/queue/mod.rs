//! Durable queue adapter.
//!
//! This module contains:
//! - `MessageQueue` trait: named queues with delayed redelivery
//! - `QueueHandler` trait: consumer callback, acknowledged on `Ok`
//! - Queue name constants for the broker's two queues
//! - Implementations: filesystem spool (durable), in-memory channels
//!
//! The broker stages every routed message on the **accept** queue before
//! its first delivery attempt, and parks failed deliveries on the
//! **redeliver** queue with a visibility delay. Durability survives
//! broker restart if and only if the backend persists.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::Deserialize;
use tracing::info;

use crate::message::Message;

pub mod memory;
pub mod spool;

pub use memory::ChannelQueue;
pub use spool::SpoolQueue;

/// Queue of messages awaiting their first delivery attempt.
pub const ACCEPT_QUEUE: &str = "accept";

/// Queue of messages awaiting a delivery retry.
pub const REDELIVER_QUEUE: &str = "redeliver";

/// Result type for queue operations.
pub type Result<T> = std::result::Result<T, QueueError>;

/// Errors that can occur during queue operations.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Failed to enqueue to '{queue}': {message}")]
    Enqueue { queue: String, message: String },

    #[error("Failed to subscribe to '{queue}': {message}")]
    Subscribe { queue: String, message: String },

    #[error("Queue backend error: {0}")]
    Backend(String),

    #[error("Handler failed: {0}")]
    Handler(String),
}

/// Options for enqueueing a message.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnqueueOptions {
    /// Delay before the message becomes visible to consumers.
    pub delay: Option<Duration>,
}

impl EnqueueOptions {
    /// Immediately visible.
    pub fn immediate() -> Self {
        Self::default()
    }

    /// Visible after `delay`.
    pub fn delayed(delay: Duration) -> Self {
        Self { delay: Some(delay) }
    }
}

/// Handler for messages consumed from a queue.
///
/// Each invocation runs on its own worker. Returning `Ok` acknowledges
/// the message; an `Err` is logged by the worker and the message is
/// dropped (per-message faults never escape their worker).
pub trait QueueHandler: Send + Sync {
    fn handle(&self, message: Message) -> BoxFuture<'static, Result<()>>;
}

/// Interface to a durable queue backend with named queues and delayed
/// visibility.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Enqueue a message, optionally with a visibility delay.
    async fn enqueue(&self, queue: &str, message: Message, options: EnqueueOptions) -> Result<()>;

    /// Spawn `parallelism` consumers for a queue, each draining into the
    /// handler.
    async fn subscribe(
        &self,
        queue: &str,
        handler: Arc<dyn QueueHandler>,
        parallelism: usize,
    ) -> Result<()>;
}

/// Queue backend discriminator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueType {
    /// Filesystem spool (durable).
    #[default]
    Spool,
    /// In-memory channels (single process, volatile).
    Memory,
}

/// Queue configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Queue backend discriminator.
    #[serde(rename = "type")]
    pub queue_type: QueueType,
}

/// Initialize the queue backend based on configuration.
///
/// A backend fault here is fatal to broker start.
pub fn init_queue(config: &QueueConfig, spool_path: &Path) -> Result<Arc<dyn MessageQueue>> {
    match config.queue_type {
        QueueType::Spool => {
            let queue = SpoolQueue::open(spool_path)?;
            info!(queue_type = "spool", path = %spool_path.display(), "Queue backend initialized");
            Ok(Arc::new(queue))
        }
        QueueType::Memory => {
            info!(queue_type = "memory", "Queue backend initialized");
            Ok(Arc::new(ChannelQueue::new()))
        }
    }
}
