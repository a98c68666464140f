//! Shared fixtures for queue integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use shutter_sync::{MemoryBackend, SyncConfig, SyncQueue};

pub const QUIET_PERIOD: Duration = Duration::from_millis(1000);

/// Default config: 1s quiet period, single attempt per cycle
pub fn config() -> SyncConfig {
    SyncConfig::for_interactive()
}

/// Queue with both lanes registered against an in-memory backend that
/// also serves as the beacon transport.
pub fn spawn_queue(config: &SyncConfig, backend: &Arc<MemoryBackend>) -> SyncQueue {
    let queue = SyncQueue::spawn(config, backend.clone());
    queue.initialize_sync_handlers(backend.clone());
    queue
}

/// Let the worker drain everything sent so far.
pub async fn settle(queue: &SyncQueue) {
    queue.stats().await.unwrap();
}
