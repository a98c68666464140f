//! Write-coalescing sync queue
//!
//! UI event handlers push intents with the `queue_*` methods and move on;
//! they apply optimistic state themselves and never wait on persistence.
//! A background worker coalesces intents per target, waits for a quiet
//! period with no new input, and writes the merged state once.
//!
//! ## Lifecycle
//!
//! 1. `SyncQueue::spawn` at session start (inside a tokio runtime)
//! 2. `initialize_sync_handlers` registers the like/notification lanes
//! 3. `queue_*` calls for the life of the session
//! 4. `unload` at teardown: one fire-and-forget beacon per lane, then the
//!    queue is closed for good
//! 5. `drain` to give writes that were already in flight time to land
//!
//! ```rust,ignore
//! let backend = Arc::new(HttpBackend::new(&config.backend)?);
//! let beacon = Arc::new(HttpBeacon::new(&config.backend)?);
//!
//! let queue = SyncQueue::spawn(&config, beacon);
//! queue.initialize_sync_handlers(backend);
//!
//! queue.queue_like(EntityType::Photo, "abc123", true)?;
//! queue.queue_notification_dismiss("n-42")?;
//!
//! // On shutdown
//! let report = queue.unload().await?;
//! if report.in_flight > 0 {
//!     queue.drain(Duration::from_millis(500)).await;
//! }
//! ```

pub mod pending;
pub mod stats;
mod worker;

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{info, warn};

use crate::action::{like_target_key, ActionKind, EntityType, NotificationMark, Payload};
use crate::backend::{BeaconTransport, SyncBackend};
use crate::config::{RetryPolicy, SyncConfig};
use crate::error::{Result, SyncError};
use crate::handlers;
use crate::registry::ActionRegistry;

pub use pending::{PendingQueue, Snapshot, Upsert};
pub use stats::{FlushSummary, QueueState, QueueStats, UnloadReport};

use stats::StateCell;
use worker::{Command, Worker};

/// Handle to the session's sync queue. Cheap to clone.
#[derive(Clone)]
pub struct SyncQueue {
    commands: mpsc::UnboundedSender<Command>,
    registry: Arc<ActionRegistry>,
    state: Arc<StateCell>,
    /// Set once unload is sent. Enqueues send under the read lock, so none
    /// can land in the channel behind the unload command.
    closed: Arc<RwLock<bool>>,
    stopped: watch::Receiver<bool>,
    retry: RetryPolicy,
}

impl SyncQueue {
    /// Start a queue with an empty registry.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(config: &SyncConfig, beacon: Arc<dyn BeaconTransport>) -> Self {
        Self::with_registry(config, Arc::new(ActionRegistry::new()), beacon)
    }

    /// Start a queue over a pre-populated registry.
    pub fn with_registry(
        config: &SyncConfig,
        registry: Arc<ActionRegistry>,
        beacon: Arc<dyn BeaconTransport>,
    ) -> Self {
        let (commands, receiver) = mpsc::unbounded_channel();
        let state = Arc::new(StateCell::new());
        let (stopped_tx, stopped) = watch::channel(false);

        let worker = Worker::new(
            &config.queue,
            Arc::clone(&registry),
            beacon,
            Arc::clone(&state),
            stopped_tx,
        );
        tokio::spawn(worker.run(receiver));

        Self {
            commands,
            registry,
            state,
            closed: Arc::new(RwLock::new(false)),
            stopped,
            retry: config.retry.clone(),
        }
    }

    /// Register the built-in like and notification handlers.
    ///
    /// Safe to call more than once; later calls are no-ops and return `false`.
    pub fn initialize_sync_handlers(&self, backend: Arc<dyn SyncBackend>) -> bool {
        let registered =
            handlers::initialize_sync_handlers(&self.registry, backend, self.retry.clone());
        if registered {
            info!(lanes = ?self.registry.lanes(), "Sync handlers initialized");
        }
        registered
    }

    pub fn registry(&self) -> &ActionRegistry {
        &self.registry
    }

    /// Queue an intent. Returns immediately; the write happens later.
    ///
    /// Fails only for programmer errors (unregistered kind, payload for the
    /// wrong lane, key that doesn't name the payload's target) or once the
    /// queue has been unloaded.
    pub fn enqueue(&self, kind: ActionKind, target_key: impl Into<String>, payload: Payload) -> Result<()> {
        let target_key = target_key.into();
        if payload.lane() != kind.lane() {
            return Err(SyncError::Configuration(format!(
                "payload for lane '{}' queued as '{}'",
                payload.lane(),
                kind
            )));
        }
        let expected = payload.target_key();
        if target_key != expected {
            return Err(SyncError::Configuration(format!(
                "target key '{}' does not match payload target '{}'",
                target_key, expected
            )));
        }
        self.registry.handler_for(kind)?;

        let closed = self.read_closed();
        if *closed {
            return Err(SyncError::QueueClosed);
        }
        self.commands
            .send(Command::Enqueue {
                kind,
                target_key,
                payload,
            })
            .map_err(|_| SyncError::QueueClosed)
    }

    pub fn queue_like(&self, entity_type: EntityType, entity_id: &str, liked: bool) -> Result<()> {
        self.enqueue(
            ActionKind::Like,
            like_target_key(entity_type, entity_id),
            Payload::like(entity_type, entity_id, liked),
        )
    }

    pub fn queue_notification_seen(&self, notification_id: &str) -> Result<()> {
        self.enqueue(
            ActionKind::NotificationSeen,
            notification_id,
            Payload::notification(notification_id, NotificationMark::Seen),
        )
    }

    pub fn queue_notification_dismiss(&self, notification_id: &str) -> Result<()> {
        self.enqueue(
            ActionKind::NotificationDismiss,
            notification_id,
            Payload::notification(notification_id, NotificationMark::Dismissed),
        )
    }

    pub fn queue_all_notifications_seen<I, S>(&self, notification_ids: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for id in notification_ids {
            let id = id.as_ref();
            self.enqueue(
                ActionKind::MarkAllSeen,
                id,
                Payload::notification(id, NotificationMark::Seen),
            )?;
        }
        Ok(())
    }

    /// Flush now instead of waiting for the quiet period, and wait for the
    /// writes of this cycle to settle.
    ///
    /// A lane whose previous write is still running is left out of the
    /// cycle; its entries go out as soon as that write settles.
    pub async fn flush_now(&self) -> Result<FlushSummary> {
        if self.is_closed() {
            return Err(SyncError::QueueClosed);
        }
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Flush { reply })
            .map_err(|_| SyncError::QueueClosed)?;
        response.await.map_err(|_| SyncError::QueueClosed)
    }

    /// Teardown flush. Hands each lane's pending state to the beacon
    /// transport without waiting for delivery, then closes the queue.
    ///
    /// A second call is a no-op. Writes already in flight keep going; see
    /// [`SyncQueue::drain`].
    pub async fn unload(&self) -> Result<UnloadReport> {
        let (reply, response) = oneshot::channel();
        {
            let mut closed = self.write_closed();
            if *closed {
                return Ok(UnloadReport::default());
            }
            *closed = true;
            self.commands
                .send(Command::Unload { reply })
                .map_err(|_| SyncError::QueueClosed)?;
        }
        response.await.map_err(|_| SyncError::QueueClosed)
    }

    /// Wait up to `grace` for the worker to stop after an unload, which
    /// happens once every in-flight write has settled. Returns `false` if
    /// writes were still outstanding when the grace period ran out.
    pub async fn drain(&self, grace: Duration) -> bool {
        let mut stopped = self.stopped.clone();
        let drained = match tokio::time::timeout(grace, stopped.wait_for(|done| *done)).await {
            Ok(_) => true,
            Err(_) => {
                warn!(grace_ms = grace.as_millis() as u64, "Writes still in flight after grace period");
                false
            }
        };
        drained
    }

    pub async fn stats(&self) -> Result<QueueStats> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Stats { reply })
            .map_err(|_| SyncError::QueueClosed)?;
        response.await.map_err(|_| SyncError::QueueClosed)
    }

    pub fn state(&self) -> QueueState {
        self.state.get()
    }

    pub fn is_closed(&self) -> bool {
        *self.read_closed()
    }

    fn read_closed(&self) -> RwLockReadGuard<'_, bool> {
        self.closed.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_closed(&self) -> RwLockWriteGuard<'_, bool> {
        self.closed.write().unwrap_or_else(|e| e.into_inner())
    }
}
