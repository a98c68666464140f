//! Action registry - lane handlers keyed by [`Lane`]
//!
//! A handler decides how a newly queued payload merges into the pending one
//! for the same target, and how a lane's snapshot becomes outbound writes.
//! The registry itself knows nothing about likes or notifications.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::action::{ActionKind, Lane, Payload, PendingAction};
use crate::backend::BeaconRequest;
use crate::error::{Result, SyncError};

/// A lane's share of one debounce cycle
#[derive(Debug, Clone)]
pub struct LaneBatch {
    pub lane: Lane,
    pub cycle_id: Uuid,
    pub actions: Vec<PendingAction>,
}

impl LaneBatch {
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

/// What a lane flush achieved. Entries count targets, not HTTP calls.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FlushOutcome {
    pub lane: Option<Lane>,
    pub committed: usize,
    pub failed: usize,
    /// Backend calls issued, retries included
    pub attempts: u32,
    pub errors: Vec<String>,
}

impl FlushOutcome {
    pub fn for_lane(lane: Lane) -> Self {
        Self {
            lane: Some(lane),
            ..Self::default()
        }
    }
}

/// Merge and flush policy for one lane
#[async_trait]
pub trait ActionHandler: Send + Sync {
    fn lane(&self) -> Lane;

    /// Combine a new intent with the pending one for the same target.
    ///
    /// Must be pure; feeding the same `incoming` twice yields the same result.
    fn merge(&self, existing: Option<&Payload>, incoming: Payload) -> Payload;

    /// Write the batch to the store. Transient failures are reported in the
    /// outcome, never raised.
    async fn flush(&self, batch: &LaneBatch) -> FlushOutcome;

    /// Encode the whole batch as a single teardown request.
    fn beacon(&self, batch: &LaneBatch) -> Option<BeaconRequest>;
}

/// Lane handlers, registered once at queue initialization
#[derive(Default)]
pub struct ActionRegistry {
    handlers: DashMap<Lane, Arc<dyn ActionHandler>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for its lane.
    ///
    /// Returns `false` (keeping the existing handler) if the lane already has one.
    pub fn register(&self, handler: Arc<dyn ActionHandler>) -> bool {
        let lane = handler.lane();
        match self.handlers.entry(lane) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                debug!(%lane, "Handler already registered");
                false
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(handler);
                info!(%lane, "Handler registered");
                true
            }
        }
    }

    pub fn is_registered(&self, kind: ActionKind) -> bool {
        self.handlers.contains_key(&kind.lane())
    }

    /// Handler for a kind, or a configuration error if its lane has none.
    pub fn handler_for(&self, kind: ActionKind) -> Result<Arc<dyn ActionHandler>> {
        self.handler_for_lane(kind.lane()).ok_or_else(|| {
            SyncError::Configuration(format!("no handler registered for action kind '{}'", kind))
        })
    }

    pub fn handler_for_lane(&self, lane: Lane) -> Option<Arc<dyn ActionHandler>> {
        self.handlers.get(&lane).map(|entry| Arc::clone(entry.value()))
    }

    pub fn lanes(&self) -> Vec<Lane> {
        let mut lanes: Vec<Lane> = self.handlers.iter().map(|entry| *entry.key()).collect();
        lanes.sort();
        lanes
    }
}
