//! In-process inventory of currently bound endpoint URIs.
//!
//! The inventory answers glob queries during target expansion. Queries
//! read a single snapshot; no lock is held across expansion and
//! delivery, because delivery failure is the consistency fallback for a
//! URI that disappears between the two.

use std::collections::BTreeSet;

use tokio::sync::RwLock;
use tracing::debug;

use crate::uri::{is_wildcard_pattern, pattern_matches};

/// Registry of live endpoint URIs, queryable by literal or wildcard
/// pattern.
#[derive(Default)]
pub struct Inventory {
    uris: RwLock<BTreeSet<String>>,
}

impl Inventory {
    /// Create an empty inventory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a URI as known. Idempotent.
    pub async fn record(&self, uri: &str) {
        if self.uris.write().await.insert(uri.to_string()) {
            debug!(uri = %uri, "Recorded endpoint in inventory");
        }
    }

    /// Remove a URI. Idempotent.
    pub async fn forget(&self, uri: &str) {
        if self.uris.write().await.remove(uri) {
            debug!(uri = %uri, "Removed endpoint from inventory");
        }
    }

    /// Expand a sequence of patterns against the current snapshot.
    ///
    /// Wildcard patterns expand to the recorded URIs they match. Literal
    /// patterns are returned verbatim whether or not they are recorded,
    /// so a sender may address a disconnected endpoint; the delivery
    /// attempt will fail into redelivery. The result is deduplicated and
    /// sorted.
    pub async fn find(&self, patterns: &[String]) -> Vec<String> {
        let uris = self.uris.read().await;
        let mut expanded = BTreeSet::new();

        for pattern in patterns {
            if is_wildcard_pattern(pattern) {
                for uri in uris.iter() {
                    if pattern_matches(pattern, uri) {
                        expanded.insert(uri.clone());
                    }
                }
            } else {
                expanded.insert(pattern.clone());
            }
        }

        expanded.into_iter().collect()
    }

    /// Number of recorded URIs.
    pub async fn len(&self) -> usize {
        self.uris.read().await.len()
    }

    /// Whether the inventory is empty.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
