//! Persistence collaborators
//!
//! The queue never talks to the store directly. Lane handlers call a
//! [`SyncBackend`] for normal flushes and hand a [`BeaconRequest`] to a
//! [`BeaconTransport`] when the session is being torn down.

pub mod http;
pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::action::{EntityType, Lane};
use crate::error::Result;

pub use http::{HttpBackend, HttpBeacon};
pub use memory::{BackendCall, MemoryBackend};

/// "Set like state to X for entity Y"
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LikeWrite {
    pub entity_type: EntityType,
    pub entity_id: String,
    pub liked: bool,
}

/// "Mark these notification ids as seen / dismissed".
///
/// Dismissed ids are also listed in `seen`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationWrite {
    pub seen: Vec<String>,
    pub dismissed: Vec<String>,
}

impl NotificationWrite {
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty() && self.dismissed.is_empty()
    }
}

/// Mutation endpoint for flushed intents
#[async_trait]
pub trait SyncBackend: Send + Sync {
    async fn set_like(&self, write: &LikeWrite) -> Result<()>;

    async fn mark_notifications(&self, write: &NotificationWrite) -> Result<()>;
}

/// One lane's pending state, encoded for delivery during teardown
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeaconRequest {
    pub lane: Lane,
    pub body: serde_json::Value,
}

/// Fire-and-forget delivery that is attempted even while the session ends.
///
/// Must not block. Returns whether the request was accepted for delivery,
/// which says nothing about whether it arrived.
pub trait BeaconTransport: Send + Sync {
    fn send_beacon(&self, request: BeaconRequest) -> bool;
}
