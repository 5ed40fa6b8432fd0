//! Connection registry: per-session state machine and URI bindings.
//!
//! Two maps live under one lock so add, bind, remove, and lookup are
//! linearizable with respect to each other: at most one session is ever
//! bound to a URI, and a `Ready` session always has a URI that points
//! back at it. The registry lock is never held across I/O; socket
//! writes are serialized by a per-session leaf lock handed out inside
//! [`SessionHandle`].

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::inventory::Inventory;
use crate::session::{Session, SessionError, SessionId};
use crate::uri::EndpointUri;

/// Endpoint type before a successful login.
pub const UNDEFINED_TYPE: &str = "undefined";

/// Errors for registry operations.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Session {0} is not registered")]
    SessionNotFound(SessionId),

    #[error("Invalid endpoint identity: {0}")]
    InvalidIdentity(#[from] crate::uri::UriError),
}

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Transport upgrade complete, not yet logged in.
    Connected,
    /// Logged in and bound to a URI.
    Ready,
    /// Broker-initiated close in progress.
    Closing,
}

/// Outcome of a bind attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindOutcome {
    /// Session bound to the returned URI.
    Bound(String),
    /// Session was already `Ready`; carries the existing binding.
    AlreadyLoggedIn(String),
    /// Another session holds the computed URI.
    UriTaken(String),
}

struct ConnectionState {
    session: Arc<dyn Session>,
    /// Leaf lock serializing socket writes; nothing else is acquired
    /// while it is held.
    write_lock: Arc<Mutex<()>>,
    common_name: String,
    endpoint_type: String,
    status: ConnectionStatus,
    uri: Option<String>,
    created_at: DateTime<Utc>,
}

/// Point-in-time copy of a session's state, free of handles and locks.
#[derive(Debug, Clone)]
pub struct ConnectionSnapshot {
    pub common_name: String,
    pub endpoint_type: String,
    pub status: ConnectionStatus,
    pub uri: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Delivery-side view of a session: the transport handle plus its write
/// lock.
#[derive(Clone)]
pub struct SessionHandle {
    session: Arc<dyn Session>,
    write_lock: Arc<Mutex<()>>,
}

impl SessionHandle {
    /// Write one encoded frame under the per-session write lock.
    ///
    /// The lock is scoped to this single write and released on every
    /// exit path, so concurrent deliveries to one session never
    /// interleave frames.
    pub async fn send_serialized(&self, frame: &[u8]) -> Result<(), SessionError> {
        let _write = self.write_lock.lock().await;
        self.session.send(frame).await
    }
}

#[derive(Default)]
struct RegistryInner {
    sessions: HashMap<SessionId, ConnectionState>,
    uris: HashMap<String, SessionId>,
}

/// Registry of live sessions and their URI bindings.
pub struct ConnectionRegistry {
    inner: RwLock<RegistryInner>,
    inventory: Arc<Inventory>,
}

impl ConnectionRegistry {
    /// Create a registry that records bindings into `inventory`.
    pub fn new(inventory: Arc<Inventory>) -> Self {
        Self {
            inner: RwLock::new(RegistryInner::default()),
            inventory,
        }
    }

    /// Register a session after transport upgrade.
    pub async fn add(&self, session: Arc<dyn Session>) {
        let id = session.id();
        let common_name = session.common_name().to_string();

        let mut inner = self.inner.write().await;
        inner.sessions.insert(
            id,
            ConnectionState {
                session,
                write_lock: Arc::new(Mutex::new(())),
                common_name: common_name.clone(),
                endpoint_type: UNDEFINED_TYPE.to_string(),
                status: ConnectionStatus::Connected,
                uri: None,
                created_at: Utc::now(),
            },
        );
        drop(inner);

        info!(session = %id, common_name = %common_name, "Session connected");
    }

    /// Remove a session, unbinding its URI if any.
    ///
    /// Removal of the session entry and the URI entry is atomic; the
    /// inventory is updated after the lock is released.
    pub async fn remove(&self, id: SessionId) {
        let removed_uri = {
            let mut inner = self.inner.write().await;
            let Some(state) = inner.sessions.remove(&id) else {
                return;
            };
            if let Some(uri) = &state.uri {
                inner.uris.remove(uri);
            }
            state.uri
        };

        if let Some(uri) = &removed_uri {
            self.inventory.forget(uri).await;
            info!(session = %id, uri = %uri, "Session removed");
        } else {
            info!(session = %id, "Session removed before login");
        }
    }

    /// Bind a session to the URI derived from its common name and the
    /// declared endpoint type.
    pub async fn bind(
        &self,
        id: SessionId,
        endpoint_type: &str,
    ) -> Result<BindOutcome, RegistryError> {
        let outcome = {
            let mut inner = self.inner.write().await;
            let state = inner
                .sessions
                .get(&id)
                .ok_or(RegistryError::SessionNotFound(id))?;

            if state.status == ConnectionStatus::Ready {
                let existing = state.uri.clone().unwrap_or_default();
                return Ok(BindOutcome::AlreadyLoggedIn(existing));
            }

            let uri = EndpointUri::new(&state.common_name, endpoint_type)?.to_string();
            if inner.uris.contains_key(&uri) {
                return Ok(BindOutcome::UriTaken(uri));
            }

            inner.uris.insert(uri.clone(), id);
            // get_mut cannot fail: the entry was just read under this guard.
            if let Some(state) = inner.sessions.get_mut(&id) {
                state.status = ConnectionStatus::Ready;
                state.endpoint_type = endpoint_type.to_string();
                state.uri = Some(uri.clone());
            }
            BindOutcome::Bound(uri)
        };

        if let BindOutcome::Bound(uri) = &outcome {
            self.inventory.record(uri).await;
            debug!(session = %id, uri = %uri, "Session bound");
        }
        Ok(outcome)
    }

    /// Resolve a URI to a delivery handle for its bound session.
    pub async fn lookup(&self, uri: &str) -> Option<SessionHandle> {
        let inner = self.inner.read().await;
        let id = inner.uris.get(uri)?;
        let state = inner.sessions.get(id)?;
        Some(SessionHandle {
            session: Arc::clone(&state.session),
            write_lock: Arc::clone(&state.write_lock),
        })
    }

    /// Snapshot a session's state.
    pub async fn state(&self, id: SessionId) -> Option<ConnectionSnapshot> {
        let inner = self.inner.read().await;
        inner.sessions.get(&id).map(|state| ConnectionSnapshot {
            common_name: state.common_name.clone(),
            endpoint_type: state.endpoint_type.clone(),
            status: state.status,
            uri: state.uri.clone(),
            created_at: state.created_at,
        })
    }

    /// Broker-initiated close: mark the session `Closing` and close its
    /// transport. The entry is removed when the transport reports the
    /// close back.
    pub async fn close_session(&self, id: SessionId) {
        let session = {
            let mut inner = self.inner.write().await;
            match inner.sessions.get_mut(&id) {
                Some(state) => {
                    state.status = ConnectionStatus::Closing;
                    Arc::clone(&state.session)
                }
                None => {
                    warn!(session = %id, "Close requested for unknown session");
                    return;
                }
            }
        };
        session.close().await;
    }

    /// Number of registered sessions.
    pub async fn session_count(&self) -> usize {
        self.inner.read().await.sessions.len()
    }
}
