//! Notifications lane - seen/dismiss marks batched into one write
//!
//! Every notification id touched since the last flush travels in a single
//! call. A dismissal outranks "seen" for the same id, whichever came first.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, warn};

use super::with_retry;
use crate::action::{Lane, NotificationMark, Payload};
use crate::backend::{BeaconRequest, NotificationWrite, SyncBackend};
use crate::config::RetryPolicy;
use crate::registry::{ActionHandler, FlushOutcome, LaneBatch};

pub struct NotificationHandler {
    backend: Arc<dyn SyncBackend>,
    retry: RetryPolicy,
}

impl NotificationHandler {
    pub fn new(backend: Arc<dyn SyncBackend>, retry: RetryPolicy) -> Self {
        Self { backend, retry }
    }

    /// Fold a lane batch into one write. Ids come out sorted.
    pub fn batch_write(batch: &LaneBatch) -> NotificationWrite {
        let mut write = NotificationWrite::default();
        for action in &batch.actions {
            match &action.payload {
                Payload::Notification {
                    notification_id,
                    mark,
                } => {
                    write.seen.push(notification_id.clone());
                    if *mark == NotificationMark::Dismissed {
                        write.dismissed.push(notification_id.clone());
                    }
                }
                Payload::Like { .. } => {
                    warn!(target_key = %action.target_key, "Like payload in notifications lane, skipped");
                }
            }
        }
        write.seen.sort();
        write.seen.dedup();
        write.dismissed.sort();
        write.dismissed.dedup();
        write
    }
}

#[async_trait]
impl ActionHandler for NotificationHandler {
    fn lane(&self) -> Lane {
        Lane::Notifications
    }

    fn merge(&self, existing: Option<&Payload>, incoming: Payload) -> Payload {
        match (existing, incoming) {
            (
                Some(Payload::Notification { mark: previous, .. }),
                Payload::Notification {
                    notification_id,
                    mark,
                },
            ) => Payload::Notification {
                notification_id,
                mark: mark.max(*previous),
            },
            (_, incoming) => incoming,
        }
    }

    async fn flush(&self, batch: &LaneBatch) -> FlushOutcome {
        let mut outcome = FlushOutcome::for_lane(Lane::Notifications);
        let write = Self::batch_write(batch);
        if write.is_empty() {
            return outcome;
        }

        let entries = write.seen.len();
        let (result, attempts) = with_retry(&self.retry, "notifications", || {
            self.backend.mark_notifications(&write)
        })
        .await;
        outcome.attempts = attempts;

        match result {
            Ok(()) => {
                debug!(
                    cycle_id = %batch.cycle_id,
                    seen = write.seen.len(),
                    dismissed = write.dismissed.len(),
                    "Notification batch committed"
                );
                outcome.committed = entries;
            }
            Err(e) => {
                warn!(
                    cycle_id = %batch.cycle_id,
                    entries,
                    error = %e,
                    "Notification batch failed, dropped"
                );
                outcome.failed = entries;
                outcome.errors.push(e.to_string());
            }
        }
        outcome
    }

    fn beacon(&self, batch: &LaneBatch) -> Option<BeaconRequest> {
        let write = Self::batch_write(batch);
        if write.is_empty() {
            return None;
        }
        Some(BeaconRequest {
            lane: Lane::Notifications,
            body: json!({ "notifications": write }),
        })
    }
}
