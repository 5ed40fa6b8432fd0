//! Socket session abstraction.
//!
//! The transport layer (websocket handshake, TLS client auth, framing)
//! owns the connection; the core sees an opaque handle that can send
//! one encoded frame at a time, close, and report the peer's
//! certificate common name.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;

pub mod mock;

pub use mock::MockSession;

/// Errors surfaced by a session transport.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Transport write failed: {0}")]
    Write(String),

    #[error("Session is closed")]
    Closed,
}

/// Process-unique identifier for a live session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

impl SessionId {
    /// Allocate the next session id.
    pub fn next() -> Self {
        Self(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A live bidirectional socket connection with an authenticated peer.
///
/// `send` is not required to be safe for concurrent callers; the broker
/// serializes writes per session with its own lock.
#[async_trait]
pub trait Session: Send + Sync {
    /// Identifier assigned at upgrade time.
    fn id(&self) -> SessionId;

    /// Common name from the peer's TLS client certificate.
    fn common_name(&self) -> &str;

    /// Write one encoded frame to the peer.
    async fn send(&self, frame: &[u8]) -> Result<(), SessionError>;

    /// Close the connection. The transport layer reports the close back
    /// through `Broker::handle_close`.
    async fn close(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_ids_are_unique() {
        let a = SessionId::next();
        let b = SessionId::next();
        assert_ne!(a, b);
    }
}
