//! Handlers for messages addressed to the broker itself.
//!
//! Dispatches on `message_type` for messages whose first target is
//! `cth:///server`: login binds the session to its endpoint URI,
//! inventory queries answer with the matching URIs, anything else is
//! logged and dropped.

use serde_json::json;
use tracing::{error, info, warn};

use crate::message::{Message, INVENTORY_RESPONSE_SCHEMA, INVENTORY_SCHEMA, LOGIN_SCHEMA};
use crate::registry::BindOutcome;
use crate::router::Router;
use crate::session::SessionId;
use crate::validation;

/// Dispatch a server-bound message to its handler.
pub(crate) async fn handle_server_message(
    router: &Router,
    origin: Option<SessionId>,
    message: Message,
) {
    match message.message_type.as_str() {
        LOGIN_SCHEMA => handle_login(router, origin, message).await,
        INVENTORY_SCHEMA => handle_inventory(router, origin, message).await,
        other => {
            warn!(message_type = %other, "Unknown server message type, dropping");
        }
    }
}

/// Login: validate the body, bind the session, arbitrate duplicates.
///
/// A failed validation leaves the session connected so the peer may try
/// again; a duplicate login or URI conflict closes the losing (new)
/// session.
async fn handle_login(router: &Router, origin: Option<SessionId>, message: Message) {
    let Some(id) = origin else {
        warn!(id = %message.id, "Dropping login message without an originating session");
        return;
    };

    let endpoint_type = match validation::validate_login(&message.data) {
        Ok(endpoint_type) => endpoint_type,
        Err(e) => {
            warn!(session = %id, error = %e, "Invalid login message");
            return;
        }
    };

    match router.registry().bind(id, &endpoint_type).await {
        Ok(BindOutcome::Bound(uri)) => {
            info!(session = %id, uri = %uri, "Endpoint logged in");
        }
        Ok(BindOutcome::AlreadyLoggedIn(existing)) => {
            error!(session = %id, uri = %existing,
                "Session is already logged in, closing the new login attempt");
            router.registry().close_session(id).await;
        }
        Ok(BindOutcome::UriTaken(uri)) => {
            error!(session = %id, uri = %uri,
                "URI is bound to another session, closing the new session");
            router.registry().close_session(id).await;
        }
        Err(e) => {
            error!(session = %id, error = %e, "Login failed");
        }
    }
}

/// Inventory query: expand the patterns and answer the requesting
/// endpoint through the normal delivery pipeline.
async fn handle_inventory(router: &Router, origin: Option<SessionId>, message: Message) {
    let Some(id) = origin else {
        warn!(id = %message.id, "Dropping inventory request without an originating session");
        return;
    };

    let query = match validation::validate_inventory_query(&message.data) {
        Ok(query) => query,
        Err(e) => {
            warn!(session = %id, error = %e, "Invalid inventory request");
            return;
        }
    };

    let Some(requester_uri) = router.registry().state(id).await.and_then(|s| s.uri) else {
        warn!(session = %id, "Dropping inventory request from unbound session");
        return;
    };

    let uris = router.inventory().find(&query).await;
    info!(session = %id, patterns = query.len(), matches = uris.len(),
        "Answering inventory request");

    let response = Message::server_message(
        requester_uri,
        INVENTORY_RESPONSE_SCHEMA,
        json!({ "uris": uris }),
    );
    router.ingress(None, response).await;
}
