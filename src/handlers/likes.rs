//! Likes lane - last write wins per entity
//!
//! Toggling like on, off, on before a flush collapses to a single write
//! carrying the final state.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::json;
use tracing::{debug, warn};

use super::with_retry;
use crate::action::{Lane, Payload, PendingAction};
use crate::backend::{BeaconRequest, LikeWrite, SyncBackend};
use crate::config::RetryPolicy;
use crate::registry::{ActionHandler, FlushOutcome, LaneBatch};

pub struct LikeHandler {
    backend: Arc<dyn SyncBackend>,
    retry: RetryPolicy,
}

impl LikeHandler {
    pub fn new(backend: Arc<dyn SyncBackend>, retry: RetryPolicy) -> Self {
        Self { backend, retry }
    }

    fn writes(batch: &LaneBatch) -> Vec<(&PendingAction, LikeWrite)> {
        batch
            .actions
            .iter()
            .filter_map(|action| match &action.payload {
                Payload::Like {
                    entity_type,
                    entity_id,
                    liked,
                } => Some((
                    action,
                    LikeWrite {
                        entity_type: *entity_type,
                        entity_id: entity_id.clone(),
                        liked: *liked,
                    },
                )),
                Payload::Notification { .. } => {
                    warn!(target_key = %action.target_key, "Non-like payload in likes lane, skipped");
                    None
                }
            })
            .collect()
    }
}

#[async_trait]
impl ActionHandler for LikeHandler {
    fn lane(&self) -> Lane {
        Lane::Likes
    }

    fn merge(&self, _existing: Option<&Payload>, incoming: Payload) -> Payload {
        incoming
    }

    async fn flush(&self, batch: &LaneBatch) -> FlushOutcome {
        let writes = Self::writes(batch);

        let results = join_all(writes.iter().map(|(action, write)| async move {
            let result = with_retry(&self.retry, &action.target_key, || self.backend.set_like(write)).await;
            (action.target_key.as_str(), result)
        }))
        .await;

        let mut outcome = FlushOutcome::for_lane(Lane::Likes);
        for (target_key, (result, attempts)) in results {
            outcome.attempts += attempts;
            match result {
                Ok(()) => {
                    debug!(cycle_id = %batch.cycle_id, target_key, "Like committed");
                    outcome.committed += 1;
                }
                Err(e) => {
                    warn!(cycle_id = %batch.cycle_id, target_key, error = %e, "Like write failed, dropped");
                    outcome.failed += 1;
                    outcome.errors.push(format!("{}: {}", target_key, e));
                }
            }
        }
        outcome
    }

    fn beacon(&self, batch: &LaneBatch) -> Option<BeaconRequest> {
        let likes: Vec<LikeWrite> = Self::writes(batch).into_iter().map(|(_, w)| w).collect();
        if likes.is_empty() {
            return None;
        }
        Some(BeaconRequest {
            lane: Lane::Likes,
            body: json!({ "likes": likes }),
        })
    }
}
