//! Delivery worker pool.
//!
//! A fixed pool of workers performs the socket writes. Each submitted
//! message carries its chosen target; the worker resolves the target
//! session, writes one encoded frame under the per-session write lock,
//! and on any failure hands the message to the redeliver queue with a
//! delay of half the remaining time-to-live (1-second floor). An
//! expired message is never written.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

use crate::message::{Message, STAGE_DELIVER, STAGE_REDELIVERY};
use crate::queue::{EnqueueOptions, MessageQueue, REDELIVER_QUEUE};
use crate::registry::ConnectionRegistry;

/// Capacity of the channel feeding the workers.
const SUBMIT_CAPACITY: usize = 1024;

/// Floor for the redelivery delay.
const MIN_RETRY_DELAY_MS: i64 = 1_000;

/// Fixed-size pool executing delivery tasks.
pub struct DeliveryPool {
    registry: Arc<ConnectionRegistry>,
    queue: Arc<dyn MessageQueue>,
    workers: usize,
    tx: mpsc::Sender<Message>,
    rx: Mutex<Option<mpsc::Receiver<Message>>>,
}

impl DeliveryPool {
    /// Create a pool; workers spawn on [`DeliveryPool::start`].
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        queue: Arc<dyn MessageQueue>,
        workers: usize,
    ) -> Self {
        let (tx, rx) = mpsc::channel(SUBMIT_CAPACITY);
        Self {
            registry,
            queue,
            workers: workers.max(1),
            tx,
            rx: Mutex::new(Some(rx)),
        }
    }

    /// Spawn the worker tasks. Subsequent calls are no-ops.
    pub async fn start(&self) {
        let Some(rx) = self.rx.lock().await.take() else {
            return;
        };
        let rx = Arc::new(Mutex::new(rx));

        for _ in 0..self.workers {
            let rx = Arc::clone(&rx);
            let registry = Arc::clone(&self.registry);
            let queue = Arc::clone(&self.queue);
            tokio::spawn(async move {
                loop {
                    let message = { rx.lock().await.recv().await };
                    match message {
                        Some(message) => deliver(&registry, &queue, message).await,
                        None => break,
                    }
                }
            });
        }

        info!(workers = self.workers, "Delivery pool started");
    }

    /// Submit a target-resolved message for delivery.
    pub async fn submit(&self, message: Message) {
        if self.tx.send(message).await.is_err() {
            error!("Delivery pool is not running; message dropped");
        }
    }
}

/// One delivery attempt.
async fn deliver(registry: &ConnectionRegistry, queue: &Arc<dyn MessageQueue>, mut message: Message) {
    let Some(target) = message.target.clone() else {
        error!(id = %message.id, "Delivery submitted without a target; dropping");
        return;
    };

    // Never write an expired message, regardless of which queue it came
    // from.
    if message.expired() {
        warn!(id = %message.id, target = %target, "Dropping expired message before delivery");
        record_outcome("expired");
        return;
    }

    let Some(handle) = registry.lookup(&target).await else {
        fail(queue, message, &target, "not connected").await;
        return;
    };

    message.add_hop(STAGE_DELIVER);
    let frame = match message.encode() {
        Ok(frame) => frame,
        Err(e) => {
            error!(id = %message.id, error = %e, "Failed to encode message; dropping");
            return;
        }
    };

    match handle.send_serialized(&frame).await {
        Ok(()) => {
            debug!(id = %message.id, target = %target, "Message delivered");
            record_outcome("delivered");
        }
        Err(e) => fail(queue, message, &target, &e.to_string()).await,
    }
}

/// Delivery-failure path: drop when expired, otherwise park on the
/// redeliver queue with half the remaining TTL (1-second floor).
async fn fail(queue: &Arc<dyn MessageQueue>, mut message: Message, target: &str, reason: &str) {
    let Some(remaining) = message.ttl_remaining() else {
        warn!(id = %message.id, target = %target, reason = %reason,
            "Dropping expired message after delivery failure");
        record_outcome("expired");
        return;
    };

    let delay_ms = (remaining.num_milliseconds() / 2).max(MIN_RETRY_DELAY_MS);
    info!(id = %message.id, target = %target, reason = %reason, delay_ms = delay_ms,
        "Delivery failed, scheduling redelivery");

    message.add_hop(STAGE_REDELIVERY);
    message.target = Some(target.to_string());
    record_outcome("redelivered");

    if let Err(e) = queue
        .enqueue(
            REDELIVER_QUEUE,
            message,
            EnqueueOptions::delayed(Duration::from_millis(delay_ms as u64)),
        )
        .await
    {
        error!(error = %e, "Failed to enqueue redelivery; message lost");
    }
}

#[cfg(feature = "otel")]
fn record_outcome(outcome: &'static str) {
    use opentelemetry::KeyValue;
    crate::metrics::DELIVERY_TOTAL.add(1, &[KeyValue::new("outcome", outcome)]);
}

#[cfg(not(feature = "otel"))]
fn record_outcome(_outcome: &'static str) {}
