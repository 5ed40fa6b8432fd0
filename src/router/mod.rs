//! Message routing: the ingress pipeline and queue consumers.
//!
//! Every message enters through [`Router::ingress`]: frames received
//! from sessions with `origin = Some(id)`, broker-originated responses
//! with `origin = None` (which bypass the authentication gate). The
//! pipeline: expiry check, envelope validation, authentication gate,
//! sender stamping, then dispatch to the server-message handlers or the
//! accept queue. Accept consumers expand targets against the inventory
//! and fan one copy per target into the delivery pool; redeliver
//! consumers resubmit without re-expansion.

use std::sync::Arc;
use std::time::Instant;

use futures::future::BoxFuture;
use tracing::{debug, error, warn};

use crate::delivery::DeliveryPool;
use crate::handlers;
use crate::inventory::Inventory;
use crate::message::{Message, STAGE_ACCEPT};
use crate::queue::{EnqueueOptions, MessageQueue, QueueHandler, ACCEPT_QUEUE};
use crate::registry::{ConnectionRegistry, ConnectionStatus};
use crate::session::SessionId;
use crate::validation;

/// Routing core shared by the transport surface and the queue
/// consumers.
pub struct Router {
    registry: Arc<ConnectionRegistry>,
    inventory: Arc<Inventory>,
    queue: Arc<dyn MessageQueue>,
    pool: DeliveryPool,
}

impl Router {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        inventory: Arc<Inventory>,
        queue: Arc<dyn MessageQueue>,
        pool: DeliveryPool,
    ) -> Self {
        Self {
            registry,
            inventory,
            queue,
            pool,
        }
    }

    pub(crate) fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub(crate) fn inventory(&self) -> &Inventory {
        &self.inventory
    }

    pub(crate) fn queue(&self) -> &Arc<dyn MessageQueue> {
        &self.queue
    }

    /// Spawn the delivery pool workers.
    pub(crate) async fn start_pool(&self) {
        self.pool.start().await;
    }

    /// Single entry point for inbound messages.
    ///
    /// `origin` is the receiving session, or `None` for broker-originated
    /// messages re-entering the pipeline. Boxed because server-message
    /// handlers feed synthesized responses back through here.
    pub fn ingress<'a>(&'a self, origin: Option<SessionId>, mut message: Message) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            // Expired messages drop before any other processing.
            if message.expired() {
                warn!(id = %message.id, message_type = %message.message_type,
                    "Dropping expired message on ingress");
                return;
            }

            if let Err(e) = validation::validate_envelope(&message) {
                warn!(id = %message.id, error = %e, "Dropping invalid message");
                return;
            }

            if let Some(id) = origin {
                let Some(state) = self.registry.state(id).await else {
                    warn!(session = %id, "Dropping message from unknown session");
                    return;
                };

                match state.status {
                    ConnectionStatus::Connected => {
                        // Only a login may pass before the session is bound.
                        if message.is_login() {
                            handlers::handle_server_message(self, origin, message).await;
                        } else {
                            warn!(session = %id, message_type = %message.message_type,
                                "Dropping message from session that has not logged in");
                        }
                        return;
                    }
                    ConnectionStatus::Closing => {
                        debug!(session = %id, "Dropping message from closing session");
                        return;
                    }
                    ConnectionStatus::Ready => {
                        // Peer-routed messages carry the session's bound
                        // URI as sender.
                        if let Some(uri) = state.uri {
                            message.sender = uri;
                        }
                    }
                }
            }

            if message.is_server_bound() {
                handlers::handle_server_message(self, origin, message).await;
            } else {
                self.accept(message).await;
            }
        })
    }

    /// Stage a message on the accept queue for delivery.
    async fn accept(&self, mut message: Message) {
        let id = message.id;
        message.add_hop(STAGE_ACCEPT);

        let started = Instant::now();
        match self
            .queue
            .enqueue(ACCEPT_QUEUE, message, EnqueueOptions::immediate())
            .await
        {
            Ok(()) => {
                let elapsed = started.elapsed();
                #[cfg(feature = "otel")]
                crate::metrics::ACCEPT_ENQUEUE_DURATION.record(elapsed.as_secs_f64(), &[]);
                debug!(id = %id, elapsed_us = elapsed.as_micros() as u64,
                    "Message enqueued for delivery");
            }
            Err(e) => error!(id = %id, error = %e, "Failed to enqueue message"),
        }
    }

    /// Accept-queue consumer: expand targets, report, fan out.
    pub(crate) async fn consume_accept(&self, message: Message) {
        if message.expired() {
            warn!(id = %message.id, "Dropping expired message from accept queue");
            return;
        }

        let expanded = self.inventory.find(&message.targets).await;
        debug!(id = %message.id, targets = expanded.len(), "Expanded delivery targets");

        if message.destination_report {
            let report = Message::destination_report(&message, &expanded);
            self.ingress(None, report).await;
        }

        for target in expanded {
            let mut copy = message.clone();
            copy.target = Some(target);
            self.pool.submit(copy).await;
        }
    }

    /// Redeliver-queue consumer: the target was chosen before the first
    /// attempt, so the message goes straight back to the pool.
    pub(crate) async fn consume_redeliver(&self, message: Message) {
        self.pool.submit(message).await;
    }
}

/// Accept-queue subscription handler.
pub struct AcceptConsumer {
    router: Arc<Router>,
}

impl AcceptConsumer {
    pub fn new(router: Arc<Router>) -> Self {
        Self { router }
    }
}

impl QueueHandler for AcceptConsumer {
    fn handle(&self, message: Message) -> BoxFuture<'static, crate::queue::Result<()>> {
        let router = Arc::clone(&self.router);
        Box::pin(async move {
            router.consume_accept(message).await;
            Ok(())
        })
    }
}

/// Redeliver-queue subscription handler.
pub struct RedeliverConsumer {
    router: Arc<Router>,
}

impl RedeliverConsumer {
    pub fn new(router: Arc<Router>) -> Self {
        Self { router }
    }
}

impl QueueHandler for RedeliverConsumer {
    fn handle(&self, message: Message) -> BoxFuture<'static, crate::queue::Result<()>> {
        let router = Arc::clone(&self.router);
        Box::pin(async move {
            router.consume_redeliver(message).await;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::{Duration as ChronoDuration, Utc};
    use tokio::sync::mpsc as tokio_mpsc;

    use super::*;
    use crate::message::LOGIN_SCHEMA;
    use crate::queue::ChannelQueue;
    use crate::session::{MockSession, Session};
    use crate::uri::SERVER_URI;

    /// Router wired to a channel queue whose accept stream is tapped
    /// instead of consumed, so tests can observe enqueue activity.
    async fn router_fixture() -> (Arc<Router>, tokio_mpsc::UnboundedReceiver<Message>) {
        let inventory = Arc::new(Inventory::new());
        let registry = Arc::new(ConnectionRegistry::new(Arc::clone(&inventory)));
        let queue = Arc::new(ChannelQueue::new());
        let pool = DeliveryPool::new(
            Arc::clone(&registry),
            queue.clone() as Arc<dyn MessageQueue>,
            2,
        );
        let router = Arc::new(Router::new(
            registry,
            inventory,
            queue.clone() as Arc<dyn MessageQueue>,
            pool,
        ));

        struct Tap(tokio_mpsc::UnboundedSender<Message>);
        impl QueueHandler for Tap {
            fn handle(&self, message: Message) -> BoxFuture<'static, crate::queue::Result<()>> {
                let tx = self.0.clone();
                Box::pin(async move {
                    let _ = tx.send(message);
                    Ok(())
                })
            }
        }

        let (tx, rx) = tokio_mpsc::unbounded_channel();
        queue
            .subscribe(ACCEPT_QUEUE, Arc::new(Tap(tx)), 1)
            .await
            .unwrap();

        (router, rx)
    }

    fn peer_message(sender: &str, targets: Vec<&str>, ttl_secs: i64) -> Message {
        Message::new(
            sender,
            targets.into_iter().map(String::from).collect(),
            "cth:///schema/demo",
            Utc::now() + ChronoDuration::seconds(ttl_secs),
        )
    }

    async fn ready_session(router: &Router, common_name: &str) -> Arc<MockSession> {
        let session = Arc::new(MockSession::new(common_name));
        router.registry().add(session.clone()).await;
        router
            .registry()
            .bind(session.id(), "agent")
            .await
            .unwrap();
        session
    }

    async fn assert_no_enqueue(rx: &mut tokio_mpsc::UnboundedReceiver<Message>) {
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_ready_session_message_is_enqueued_with_hop_and_stamped_sender() {
        let (router, mut accepted) = router_fixture().await;
        let session = ready_session(&router, "agent-1").await;

        let message = peer_message("cth://spoofed/agent", vec!["cth://agent-2/agent"], 30);
        router.ingress(Some(session.id()), message).await;

        let staged = accepted.recv().await.unwrap();
        assert_eq!(staged.sender, "cth://agent-1/agent");
        assert_eq!(staged.hops.len(), 1);
        assert_eq!(staged.hops[0].stage, STAGE_ACCEPT);
    }

    #[tokio::test]
    async fn test_expired_message_dropped_before_validation() {
        let (router, mut accepted) = router_fixture().await;
        let session = ready_session(&router, "agent-1").await;

        // Invalid envelope (no targets) AND expired: the expiry check
        // runs first, so no validation warning path is reached either
        // way and nothing is enqueued.
        let mut message = peer_message("cth://agent-1/agent", vec![], 30);
        message.expires = Utc::now() - ChronoDuration::seconds(1);
        router.ingress(Some(session.id()), message).await;

        assert_no_enqueue(&mut accepted).await;
    }

    #[tokio::test]
    async fn test_invalid_envelope_dropped() {
        let (router, mut accepted) = router_fixture().await;
        let session = ready_session(&router, "agent-1").await;

        let message = peer_message("cth://agent-1/agent", vec!["garbage"], 30);
        router.ingress(Some(session.id()), message).await;

        assert_no_enqueue(&mut accepted).await;
    }

    #[tokio::test]
    async fn test_pre_login_message_dropped_session_stays_connected() {
        let (router, mut accepted) = router_fixture().await;
        let session = Arc::new(MockSession::new("agent-1"));
        router.registry().add(session.clone()).await;

        let message = peer_message("", vec!["cth://agent-2/agent"], 30);
        router.ingress(Some(session.id()), message).await;

        assert_no_enqueue(&mut accepted).await;
        assert!(!session.is_closed());
        assert_eq!(
            router.registry().state(session.id()).await.unwrap().status,
            ConnectionStatus::Connected
        );
    }

    #[tokio::test]
    async fn test_pre_login_login_message_binds_session() {
        let (router, _accepted) = router_fixture().await;
        let session = Arc::new(MockSession::new("agent-1"));
        router.registry().add(session.clone()).await;

        let mut login = peer_message("", vec![SERVER_URI], 30);
        login.message_type = LOGIN_SCHEMA.to_string();
        login.data = serde_json::json!({ "type": "agent" });
        router.ingress(Some(session.id()), login).await;

        let state = router.registry().state(session.id()).await.unwrap();
        assert_eq!(state.status, ConnectionStatus::Ready);
        assert_eq!(state.uri.as_deref(), Some("cth://agent-1/agent"));
    }

    #[tokio::test]
    async fn test_unknown_session_message_dropped() {
        let (router, mut accepted) = router_fixture().await;
        let message = peer_message("", vec!["cth://agent-2/agent"], 30);
        router.ingress(Some(crate::session::SessionId::next()), message).await;
        assert_no_enqueue(&mut accepted).await;
    }

    #[tokio::test]
    async fn test_broker_originated_bypasses_gate() {
        let (router, mut accepted) = router_fixture().await;

        let message = Message::server_message(
            "cth://agent-1/agent".to_string(),
            "cth:///schema/demo",
            serde_json::Value::Null,
        );
        router.ingress(None, message).await;

        let staged = accepted.recv().await.unwrap();
        assert_eq!(staged.sender, SERVER_URI);
    }

    #[tokio::test]
    async fn test_consume_accept_fans_out_per_expanded_target() {
        let (router, _accepted) = router_fixture().await;
        router.start_pool().await;

        let a = ready_session(&router, "a").await;
        let b = ready_session(&router, "b").await;

        let message = peer_message("cth://a/agent", vec!["cth://*/agent"], 30);
        router.consume_accept(message).await;

        for session in [&a, &b] {
            let session = Arc::clone(session);
            tokio::time::timeout(Duration::from_secs(2), async move {
                while session.sent_frames().await.is_empty() {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            })
            .await
            .unwrap();
        }
    }

    #[tokio::test]
    async fn test_consume_accept_emits_destination_report() {
        let (router, mut accepted) = router_fixture().await;
        let _a = ready_session(&router, "a").await;

        let mut message = peer_message("cth://sender/agent", vec!["cth://*/agent"], 30);
        message.destination_report = true;
        router.consume_accept(message).await;

        // The report re-enters ingress and lands on the accept queue.
        let report = accepted.recv().await.unwrap();
        assert_eq!(report.message_type, crate::message::DESTINATION_REPORT_SCHEMA);
        assert_eq!(report.targets, vec!["cth://sender/agent".to_string()]);
        assert_eq!(
            report.data["targets"],
            serde_json::json!(["cth://a/agent"])
        );
    }

    #[tokio::test]
    async fn test_consume_accept_drops_expired() {
        let (router, _accepted) = router_fixture().await;
        router.start_pool().await;
        let a = ready_session(&router, "a").await;

        let mut message = peer_message("cth://a/agent", vec!["cth://a/agent"], 30);
        message.expires = Utc::now() - ChronoDuration::seconds(1);
        router.consume_accept(message).await;

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(a.sent_frames().await.is_empty());
    }
}
