//! Mock session for tests.
//!
//! Records every frame written to it and supports injected transport
//! failures, so delivery and redelivery paths can be exercised without
//! a socket.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{Session, SessionError, SessionId};
use crate::message::Message;

/// In-memory session that collects sent frames.
pub struct MockSession {
    id: SessionId,
    common_name: String,
    sent: Mutex<Vec<Vec<u8>>>,
    closed: AtomicBool,
    fail_sends: AtomicBool,
}

impl MockSession {
    /// Create a mock session for a peer with the given common name.
    pub fn new(common_name: impl Into<String>) -> Self {
        Self {
            id: SessionId::next(),
            common_name: common_name.into(),
            sent: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            fail_sends: AtomicBool::new(false),
        }
    }

    /// Make subsequent `send` calls fail with a transport error.
    pub fn set_fail_on_send(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Raw frames written so far.
    pub async fn sent_frames(&self) -> Vec<Vec<u8>> {
        self.sent.lock().await.clone()
    }

    /// Frames written so far, decoded as messages.
    pub async fn sent_messages(&self) -> Vec<Message> {
        self.sent
            .lock()
            .await
            .iter()
            .filter_map(|frame| Message::decode(frame).ok())
            .collect()
    }
}

#[async_trait]
impl Session for MockSession {
    fn id(&self) -> SessionId {
        self.id
    }

    fn common_name(&self) -> &str {
        &self.common_name
    }

    async fn send(&self, frame: &[u8]) -> Result<(), SessionError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SessionError::Closed);
        }
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(SessionError::Write("injected failure".to_string()));
        }
        self.sent.lock().await.push(frame.to_vec());
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_records_frames() {
        let session = MockSession::new("agent-1");
        session.send(b"one").await.unwrap();
        session.send(b"two").await.unwrap();
        assert_eq!(session.sent_frames().await, vec![b"one".to_vec(), b"two".to_vec()]);
    }

    #[tokio::test]
    async fn test_mock_injected_failure() {
        let session = MockSession::new("agent-1");
        session.set_fail_on_send(true);
        assert!(matches!(
            session.send(b"x").await,
            Err(SessionError::Write(_))
        ));
        assert!(session.sent_frames().await.is_empty());
    }

    #[tokio::test]
    async fn test_mock_close_rejects_writes() {
        let session = MockSession::new("agent-1");
        assert!(!session.is_closed());
        session.close().await;
        assert!(session.is_closed());
        assert!(matches!(session.send(b"x").await, Err(SessionError::Closed)));
    }
}
