//! Message envelope and JSON wire codec.
//!
//! The envelope carries routing fields (sender, targets, expiry) around
//! an opaque payload. Brokers append hops as a message moves through
//! internal stages; hops are append-only. The chosen delivery target is
//! carried in the internal `_target` field so redelivery entries keep
//! their destination through the queue.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::uri::SERVER_URI;

/// Schema URI for login requests.
pub const LOGIN_SCHEMA: &str = "cth:///schema/loginschema";
/// Schema URI for inventory queries.
pub const INVENTORY_SCHEMA: &str = "cth:///schema/inventoryschema";
/// Schema URI for inventory query responses.
pub const INVENTORY_RESPONSE_SCHEMA: &str = "cth:///schema/inventoryresponseschema";
/// Schema URI for destination reports.
pub const DESTINATION_REPORT_SCHEMA: &str = "cth:///schema/destination_report";

/// Hop stage: message accepted and enqueued for delivery.
pub const STAGE_ACCEPT: &str = "accept-to-queue";
/// Hop stage: delivery attempt to a target session.
pub const STAGE_DELIVER: &str = "deliver";
/// Hop stage: delivery failed, message scheduled for retry.
pub const STAGE_REDELIVERY: &str = "redelivery";

/// TTL applied to broker-originated messages (responses, reports).
pub const SERVER_MESSAGE_TTL_SECS: i64 = 60;

/// Errors raised by the wire codec.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("Failed to encode message: {0}")]
    Encode(serde_json::Error),

    #[error("Failed to decode message: {0}")]
    Decode(serde_json::Error),
}

/// Timestamped record of an internal processing stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hop {
    pub stage: String,
    pub timestamp: DateTime<Utc>,
}

/// The message envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message identifier.
    pub id: Uuid,
    /// URI of the originator.
    pub sender: String,
    /// Target URIs; literals or wildcard patterns.
    pub targets: Vec<String>,
    /// URI-shaped schema name for the payload.
    pub message_type: String,
    /// Absolute expiry; the message is dropped once past it.
    pub expires: DateTime<Utc>,
    /// When true, the broker reports the expanded target set to the sender.
    #[serde(default)]
    pub destination_report: bool,
    /// Append-only trace of broker-internal stages.
    #[serde(default)]
    pub hops: Vec<Hop>,
    /// Opaque payload; interpretation depends on `message_type`.
    #[serde(default)]
    pub data: Value,
    /// Destination chosen during target expansion; set only on copies
    /// handed to the delivery pool and through the redeliver queue.
    #[serde(rename = "_target", default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

impl Message {
    /// Create a message with a fresh id and no hops.
    pub fn new(
        sender: impl Into<String>,
        targets: Vec<String>,
        message_type: impl Into<String>,
        expires: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender: sender.into(),
            targets,
            message_type: message_type.into(),
            expires,
            destination_report: false,
            hops: Vec::new(),
            data: Value::Null,
            target: None,
        }
    }

    /// Create a broker-originated message addressed to a single peer.
    pub fn server_message(target: String, message_type: impl Into<String>, data: Value) -> Self {
        let mut message = Self::new(
            SERVER_URI,
            vec![target],
            message_type,
            Utc::now() + ChronoDuration::seconds(SERVER_MESSAGE_TTL_SECS),
        );
        message.data = data;
        message
    }

    /// Create the destination report for a message, listing its expanded
    /// targets, addressed back to the sender.
    pub fn destination_report(of: &Message, expanded: &[String]) -> Self {
        Self::server_message(
            of.sender.clone(),
            DESTINATION_REPORT_SCHEMA,
            serde_json::json!({ "id": of.id, "targets": expanded }),
        )
    }

    /// Append a hop for a processing stage.
    pub fn add_hop(&mut self, stage: &str) {
        self.hops.push(Hop {
            stage: stage.to_string(),
            timestamp: Utc::now(),
        });
    }

    /// Whether the expiry has passed.
    pub fn expired(&self) -> bool {
        Utc::now() > self.expires
    }

    /// Remaining time to live, or `None` once expired.
    pub fn ttl_remaining(&self) -> Option<ChronoDuration> {
        let remaining = self.expires - Utc::now();
        (remaining > ChronoDuration::zero()).then_some(remaining)
    }

    /// Encode to the JSON wire format.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(self).map_err(CodecError::Encode)
    }

    /// Decode from the JSON wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        serde_json::from_slice(bytes).map_err(CodecError::Decode)
    }

    /// Whether the first target addresses the broker itself.
    pub fn is_server_bound(&self) -> bool {
        self.targets.first().map(String::as_str) == Some(SERVER_URI)
    }

    /// Whether this is a login request: server-bound with the login schema.
    pub fn is_login(&self) -> bool {
        self.is_server_bound() && self.message_type == LOGIN_SCHEMA
    }
}
