//! Input validation for messages crossing the socket boundary.
//!
//! Centralized checks for the envelope and the server-directed control
//! bodies (login, inventory query). Validation failures drop the
//! message; they are never retried.

use serde_json::Value;

use crate::message::Message;
use crate::uri::{is_valid_segment, EndpointUri};

/// Length limits for validated fields.
pub mod limits {
    /// Maximum length of an endpoint URI or query pattern.
    pub const MAX_URI_LENGTH: usize = 256;
    /// Maximum length of a `message_type` schema URI.
    pub const MAX_TYPE_LENGTH: usize = 256;
    /// Maximum number of targets in one envelope.
    pub const MAX_TARGETS: usize = 64;
    /// Maximum number of patterns in one inventory query.
    pub const MAX_QUERY_PATTERNS: usize = 64;
    /// Maximum length of an endpoint type declared at login.
    pub const MAX_ENDPOINT_TYPE_LENGTH: usize = 64;
}

/// Error constants for validation failures.
pub mod errmsg {
    pub const TARGETS_EMPTY: &str = "message must have at least one target";
    pub const TOO_MANY_TARGETS: &str = "message exceeds maximum target count";
    pub const TARGET_TOO_LONG: &str = "target URI exceeds maximum length";
    pub const TARGET_MALFORMED: &str = "target is not a URI or URI pattern";

    pub const TYPE_EMPTY: &str = "message_type cannot be empty";
    pub const TYPE_TOO_LONG: &str = "message_type exceeds maximum length";

    pub const BODY_NOT_OBJECT: &str = "control message body must be a JSON object";
    pub const LOGIN_TYPE_MISSING: &str = "login body must have a string 'type' field";
    pub const LOGIN_TYPE_TOO_LONG: &str = "endpoint type exceeds maximum length";
    pub const LOGIN_TYPE_INVALID: &str =
        "endpoint type is not a valid URI segment (no '/', ':', or '*')";

    pub const QUERY_MISSING: &str = "inventory body must have a 'query' array of strings";
    pub const TOO_MANY_PATTERNS: &str = "inventory query exceeds maximum pattern count";
    pub const PATTERN_TOO_LONG: &str = "query pattern exceeds maximum length";
    pub const PATTERN_MALFORMED: &str = "query pattern is not a URI or URI pattern";
}

/// A failed validation check.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct ValidationError(pub &'static str);

/// Validate the routing fields of an envelope.
///
/// Targets must be present, bounded, and URI-shaped (literal or
/// pattern); the message type must be present and bounded. The payload
/// is opaque at this layer.
pub fn validate_envelope(message: &Message) -> Result<(), ValidationError> {
    if message.targets.is_empty() {
        return Err(ValidationError(errmsg::TARGETS_EMPTY));
    }
    if message.targets.len() > limits::MAX_TARGETS {
        return Err(ValidationError(errmsg::TOO_MANY_TARGETS));
    }
    for target in &message.targets {
        if target.len() > limits::MAX_URI_LENGTH {
            return Err(ValidationError(errmsg::TARGET_TOO_LONG));
        }
        if EndpointUri::parse(target).is_err() {
            return Err(ValidationError(errmsg::TARGET_MALFORMED));
        }
    }

    if message.message_type.is_empty() {
        return Err(ValidationError(errmsg::TYPE_EMPTY));
    }
    if message.message_type.len() > limits::MAX_TYPE_LENGTH {
        return Err(ValidationError(errmsg::TYPE_TOO_LONG));
    }

    Ok(())
}

/// Validate a login body and extract the declared endpoint type.
///
/// Body shape: `{ "type": "<endpoint-type>" }`.
pub fn validate_login(body: &Value) -> Result<String, ValidationError> {
    let object = body
        .as_object()
        .ok_or(ValidationError(errmsg::BODY_NOT_OBJECT))?;

    let endpoint_type = object
        .get("type")
        .and_then(Value::as_str)
        .ok_or(ValidationError(errmsg::LOGIN_TYPE_MISSING))?;

    if endpoint_type.len() > limits::MAX_ENDPOINT_TYPE_LENGTH {
        return Err(ValidationError(errmsg::LOGIN_TYPE_TOO_LONG));
    }
    if !is_valid_segment(endpoint_type) {
        return Err(ValidationError(errmsg::LOGIN_TYPE_INVALID));
    }

    Ok(endpoint_type.to_string())
}

/// Validate an inventory query body and extract its patterns.
///
/// Body shape: `{ "query": ["<uri-or-pattern>", ...] }`.
pub fn validate_inventory_query(body: &Value) -> Result<Vec<String>, ValidationError> {
    let object = body
        .as_object()
        .ok_or(ValidationError(errmsg::BODY_NOT_OBJECT))?;

    let query = object
        .get("query")
        .and_then(Value::as_array)
        .ok_or(ValidationError(errmsg::QUERY_MISSING))?;

    if query.len() > limits::MAX_QUERY_PATTERNS {
        return Err(ValidationError(errmsg::TOO_MANY_PATTERNS));
    }

    let mut patterns = Vec::with_capacity(query.len());
    for entry in query {
        let pattern = entry
            .as_str()
            .ok_or(ValidationError(errmsg::QUERY_MISSING))?;
        if pattern.len() > limits::MAX_URI_LENGTH {
            return Err(ValidationError(errmsg::PATTERN_TOO_LONG));
        }
        if EndpointUri::parse(pattern).is_err() {
            return Err(ValidationError(errmsg::PATTERN_MALFORMED));
        }
        patterns.push(pattern.to_string());
    }

    Ok(patterns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, Utc};
    use serde_json::json;

    use crate::uri::SERVER_URI;

    fn envelope(targets: Vec<&str>, message_type: &str) -> Message {
        Message::new(
            "cth://agent-1/agent",
            targets.into_iter().map(String::from).collect(),
            message_type,
            Utc::now() + ChronoDuration::seconds(10),
        )
    }

    // ========================================================================
    // Envelope
    // ========================================================================

    #[test]
    fn test_envelope_accepts_literal_and_pattern_targets() {
        let message = envelope(
            vec!["cth://agent-2/agent", "cth://*/agent"],
            "cth:///schema/demo",
        );
        assert!(validate_envelope(&message).is_ok());
    }

    #[test]
    fn test_envelope_accepts_server_target() {
        let message = envelope(vec![SERVER_URI], "cth:///schema/loginschema");
        assert!(validate_envelope(&message).is_ok());
    }

    #[test]
    fn test_envelope_rejects_empty_targets() {
        let message = envelope(vec![], "cth:///schema/demo");
        let err = validate_envelope(&message).unwrap_err();
        assert_eq!(err.0, errmsg::TARGETS_EMPTY);
    }

    #[test]
    fn test_envelope_rejects_malformed_target() {
        let message = envelope(vec!["not-a-uri"], "cth:///schema/demo");
        let err = validate_envelope(&message).unwrap_err();
        assert_eq!(err.0, errmsg::TARGET_MALFORMED);
    }

    #[test]
    fn test_envelope_rejects_empty_type() {
        let message = envelope(vec!["cth://agent-2/agent"], "");
        let err = validate_envelope(&message).unwrap_err();
        assert_eq!(err.0, errmsg::TYPE_EMPTY);
    }

    #[test]
    fn test_envelope_rejects_too_many_targets() {
        let targets: Vec<String> = (0..=limits::MAX_TARGETS)
            .map(|i| format!("cth://agent-{}/agent", i))
            .collect();
        let mut message = envelope(vec![], "cth:///schema/demo");
        message.targets = targets;
        let err = validate_envelope(&message).unwrap_err();
        assert_eq!(err.0, errmsg::TOO_MANY_TARGETS);
    }

    // ========================================================================
    // Login body
    // ========================================================================

    #[test]
    fn test_login_body_valid() {
        assert_eq!(
            validate_login(&json!({ "type": "agent" })).unwrap(),
            "agent"
        );
    }

    #[test]
    fn test_login_body_rejects_missing_type() {
        assert!(validate_login(&json!({})).is_err());
        assert!(validate_login(&json!({ "type": 7 })).is_err());
        assert!(validate_login(&json!("agent")).is_err());
    }

    #[test]
    fn test_login_body_rejects_invalid_segment() {
        assert!(validate_login(&json!({ "type": "" })).is_err());
        assert!(validate_login(&json!({ "type": "*" })).is_err());
        assert!(validate_login(&json!({ "type": "a/b" })).is_err());
    }

    // ========================================================================
    // Inventory query body
    // ========================================================================

    #[test]
    fn test_inventory_query_valid() {
        let patterns =
            validate_inventory_query(&json!({ "query": ["cth://*/agent", "cth://x/agent"] }))
                .unwrap();
        assert_eq!(patterns, vec!["cth://*/agent", "cth://x/agent"]);
    }

    #[test]
    fn test_inventory_query_rejects_bad_shapes() {
        assert!(validate_inventory_query(&json!({})).is_err());
        assert!(validate_inventory_query(&json!({ "query": "cth://*/agent" })).is_err());
        assert!(validate_inventory_query(&json!({ "query": [1, 2] })).is_err());
        assert!(validate_inventory_query(&json!({ "query": ["nope"] })).is_err());
    }

    #[test]
    fn test_inventory_query_accepts_empty_query() {
        assert!(validate_inventory_query(&json!({ "query": [] }))
            .unwrap()
            .is_empty());
    }
}
