//! Broker construction and lifecycle.
//!
//! `Broker` wires the inventory, connection registry, delivery pool,
//! and router over an injected queue backend, and exposes the surface
//! the transport layer drives: `handle_open` on websocket upgrade,
//! `handle_frame` per received frame, `handle_close` on disconnect.
//! All state lives in this value; nothing is process-global.

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::Config;
use crate::delivery::DeliveryPool;
use crate::inventory::Inventory;
use crate::message::Message;
use crate::queue::{MessageQueue, QueueError, ACCEPT_QUEUE, REDELIVER_QUEUE};
use crate::registry::ConnectionRegistry;
use crate::router::{AcceptConsumer, RedeliverConsumer, Router};
use crate::session::{Session, SessionId};

/// Errors fatal to broker startup.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("Queue subscription failed: {0}")]
    Queue(#[from] QueueError),
}

/// The message broker.
pub struct Broker {
    config: Config,
    registry: Arc<ConnectionRegistry>,
    inventory: Arc<Inventory>,
    router: Arc<Router>,
}

impl Broker {
    /// Wire a broker over the given queue backend. Consumers start on
    /// [`Broker::start`].
    pub fn new(config: Config, queue: Arc<dyn MessageQueue>) -> Self {
        let inventory = Arc::new(Inventory::new());
        let registry = Arc::new(ConnectionRegistry::new(Arc::clone(&inventory)));
        let pool = DeliveryPool::new(
            Arc::clone(&registry),
            Arc::clone(&queue),
            config.broker.delivery_consumers,
        );
        let router = Arc::new(Router::new(
            Arc::clone(&registry),
            Arc::clone(&inventory),
            queue,
            pool,
        ));

        Self {
            config,
            registry,
            inventory,
            router,
        }
    }

    /// Start the delivery pool and the queue consumers.
    ///
    /// Queue faults here are fatal; per-message faults later are not.
    pub async fn start(&self) -> Result<(), BrokerError> {
        self.router.start_pool().await;

        let queue = self.router.queue();
        queue
            .subscribe(
                ACCEPT_QUEUE,
                Arc::new(AcceptConsumer::new(Arc::clone(&self.router))),
                self.config.broker.accept_consumers,
            )
            .await?;
        queue
            .subscribe(
                REDELIVER_QUEUE,
                Arc::new(RedeliverConsumer::new(Arc::clone(&self.router))),
                self.config.broker.delivery_consumers,
            )
            .await?;

        info!(
            accept_consumers = self.config.broker.accept_consumers,
            delivery_consumers = self.config.broker.delivery_consumers,
            "Broker started"
        );
        Ok(())
    }

    /// Register a session after transport upgrade.
    pub async fn handle_open(&self, session: Arc<dyn Session>) {
        self.registry.add(session).await;
    }

    /// Process one frame received from a session.
    pub async fn handle_frame(&self, id: SessionId, frame: &[u8]) {
        match Message::decode(frame) {
            Ok(message) => self.router.ingress(Some(id), message).await,
            Err(e) => {
                warn!(session = %id, error = %e, "Dropping undecodable frame");
            }
        }
    }

    /// Tear down a session after its socket closed.
    pub async fn handle_close(&self, id: SessionId) {
        self.registry.remove(id).await;
    }

    /// The connection registry (for operational surfaces and tests).
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// The URI inventory (for operational surfaces and tests).
    pub fn inventory(&self) -> &Inventory {
        &self.inventory
    }

    /// Broker configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }
}
