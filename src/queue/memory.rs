//! In-memory channel-based queue for standalone mode and tests.
//!
//! Delayed entries are parked on a timer task before they reach the
//! channel; consumers share one receiver so `parallelism` workers drain
//! a single queue concurrently. Contents do not survive restart.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error};

use super::{EnqueueOptions, MessageQueue, QueueHandler, Result};
use crate::message::Message;

type SharedReceiver = Arc<Mutex<mpsc::UnboundedReceiver<Message>>>;

struct Channel {
    tx: mpsc::UnboundedSender<Message>,
    rx: SharedReceiver,
}

impl Channel {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
        }
    }
}

/// In-memory queue backed by tokio channels.
#[derive(Default)]
pub struct ChannelQueue {
    channels: Mutex<HashMap<String, Channel>>,
}

impl ChannelQueue {
    /// Create an empty queue backend.
    pub fn new() -> Self {
        Self::default()
    }

    async fn channel(&self, queue: &str) -> (mpsc::UnboundedSender<Message>, SharedReceiver) {
        let mut channels = self.channels.lock().await;
        let channel = channels
            .entry(queue.to_string())
            .or_insert_with(Channel::new);
        (channel.tx.clone(), Arc::clone(&channel.rx))
    }
}

#[async_trait]
impl MessageQueue for ChannelQueue {
    async fn enqueue(&self, queue: &str, message: Message, options: EnqueueOptions) -> Result<()> {
        let (tx, _) = self.channel(queue).await;

        match options.delay {
            None => {
                // Send failure means no subscriber will ever exist; drop.
                let _ = tx.send(message);
            }
            Some(delay) => {
                debug!(queue = %queue, id = %message.id, delay_ms = delay.as_millis() as u64,
                    "Parking message until visible");
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = tx.send(message);
                });
            }
        }

        Ok(())
    }

    async fn subscribe(
        &self,
        queue: &str,
        handler: Arc<dyn QueueHandler>,
        parallelism: usize,
    ) -> Result<()> {
        let (_, rx) = self.channel(queue).await;

        for _ in 0..parallelism {
            let rx = Arc::clone(&rx);
            let handler = Arc::clone(&handler);
            let queue = queue.to_string();

            tokio::spawn(async move {
                loop {
                    // The receiver lock is released as soon as a message
                    // arrives, so other workers can take the next one
                    // while this one runs the handler.
                    let message = { rx.lock().await.recv().await };
                    match message {
                        Some(message) => {
                            if let Err(e) = handler.handle(message).await {
                                error!(queue = %queue, error = %e, "Queue handler failed");
                            }
                        }
                        None => break,
                    }
                }
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    use chrono::{Duration as ChronoDuration, Utc};
    use futures::future::BoxFuture;
    use tokio::sync::mpsc as tokio_mpsc;

    use super::*;
    use crate::queue::QueueError;

    fn test_message() -> Message {
        Message::new(
            "cth://a/agent",
            vec!["cth://b/agent".to_string()],
            "cth:///schema/demo",
            Utc::now() + ChronoDuration::seconds(30),
        )
    }

    struct CollectingHandler {
        tx: tokio_mpsc::UnboundedSender<Message>,
    }

    impl QueueHandler for CollectingHandler {
        fn handle(&self, message: Message) -> BoxFuture<'static, Result<()>> {
            let tx = self.tx.clone();
            Box::pin(async move {
                let _ = tx.send(message);
                Ok(())
            })
        }
    }

    struct CountingFailHandler {
        count: Arc<AtomicUsize>,
    }

    impl QueueHandler for CountingFailHandler {
        fn handle(&self, _message: Message) -> BoxFuture<'static, Result<()>> {
            let count = Arc::clone(&self.count);
            Box::pin(async move {
                count.fetch_add(1, Ordering::SeqCst);
                Err(QueueError::Handler("boom".to_string()))
            })
        }
    }

    #[tokio::test]
    async fn test_enqueue_then_consume() {
        let queue = ChannelQueue::new();
        let (tx, mut rx) = tokio_mpsc::unbounded_channel();
        queue
            .subscribe("accept", Arc::new(CollectingHandler { tx }), 2)
            .await
            .unwrap();

        let message = test_message();
        queue
            .enqueue("accept", message.clone(), EnqueueOptions::immediate())
            .await
            .unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.id, message.id);
    }

    #[tokio::test]
    async fn test_delay_defers_visibility() {
        let queue = ChannelQueue::new();
        let (tx, mut rx) = tokio_mpsc::unbounded_channel();
        queue
            .subscribe("redeliver", Arc::new(CollectingHandler { tx }), 1)
            .await
            .unwrap();

        let started = Instant::now();
        queue
            .enqueue(
                "redeliver",
                test_message(),
                EnqueueOptions::delayed(Duration::from_millis(200)),
            )
            .await
            .unwrap();

        rx.recv().await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_queues_are_independent() {
        let queue = ChannelQueue::new();
        let (tx, mut rx) = tokio_mpsc::unbounded_channel();
        queue
            .subscribe("accept", Arc::new(CollectingHandler { tx }), 1)
            .await
            .unwrap();

        queue
            .enqueue("redeliver", test_message(), EnqueueOptions::immediate())
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_handler_error_is_absorbed() {
        let queue = ChannelQueue::new();
        let count = Arc::new(AtomicUsize::new(0));
        queue
            .subscribe(
                "accept",
                Arc::new(CountingFailHandler {
                    count: Arc::clone(&count),
                }),
                1,
            )
            .await
            .unwrap();

        for _ in 0..3 {
            queue
                .enqueue("accept", test_message(), EnqueueOptions::immediate())
                .await
                .unwrap();
        }

        // All three are attempted despite the handler failing each time.
        tokio::time::timeout(Duration::from_secs(2), async {
            while count.load(Ordering::SeqCst) < 3 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }
}
