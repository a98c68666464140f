//! shutter-sync - debounced write-coalescing sync queue
//!
//! Collapses bursts of user interactions (likes, notification seen/dismiss
//! flags) into the minimum number of writes against the persistence API,
//! and makes a best-effort final delivery when the session ends.
//!
//! ## Modules
//!
//! - **action**: action kinds, lanes and payloads
//! - **registry**: per-lane merge/flush handlers
//! - **handlers**: the built-in like and notification lanes
//! - **queue**: the queue handle, its worker and pending state
//! - **backend**: persistence collaborators (HTTP, in-memory)
//! - **shell**: line commands for the interactive binary

pub mod action;
pub mod backend;
pub mod config;
pub mod error;
pub mod handlers;
pub mod queue;
pub mod registry;
pub mod shell;

pub use action::{ActionKind, EntityType, Lane, NotificationMark, Payload, PendingAction};
pub use backend::{BeaconRequest, BeaconTransport, HttpBackend, HttpBeacon, MemoryBackend, SyncBackend};
pub use config::{RetryPolicy, SyncConfig};
pub use error::{Result, SyncError};
pub use queue::{FlushSummary, QueueState, QueueStats, SyncQueue, UnloadReport};
pub use registry::{ActionHandler, ActionRegistry, FlushOutcome, LaneBatch};
