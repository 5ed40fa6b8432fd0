//! cth-broker: message broker for authenticated socket endpoints.
//!
//! Routes typed JSON messages between endpoints identified by
//! `cth://<common-name>/<type>` URIs over persistent bidirectional
//! sessions. Endpoints log in to bind their URI, address each other by
//! literal URI or wildcard pattern, and may query the broker's live
//! inventory. Messages stage through a durable accept queue; failed
//! deliveries retry with a TTL-halving backoff until they expire.
//!
//! The socket transport (websocket upgrade, TLS client auth, framing)
//! is an external collaborator that drives a [`Broker`] through
//! `handle_open` / `handle_frame` / `handle_close`.

pub mod broker;
pub mod config;
pub mod delivery;
pub mod handlers;
pub mod inventory;
pub mod message;
#[cfg(feature = "otel")]
pub mod metrics;
pub mod queue;
pub mod registry;
pub mod router;
pub mod session;
pub mod uri;
pub mod validation;

// Re-export common types for library usage
pub use broker::{Broker, BrokerError};
pub use config::Config;
pub use inventory::Inventory;
pub use message::{Hop, Message};
pub use queue::{EnqueueOptions, MessageQueue, QueueError, QueueHandler};
pub use registry::{BindOutcome, ConnectionRegistry, ConnectionStatus};
pub use session::{Session, SessionError, SessionId};
pub use uri::{EndpointUri, SERVER_URI};
