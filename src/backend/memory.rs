//! In-memory persistence collaborator
//!
//! Records every successful write and every beacon. Used by the CLI's
//! dry-run mode and by tests, which can inject latency and failures.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::{BeaconRequest, BeaconTransport, LikeWrite, NotificationWrite, SyncBackend};
use crate::error::{Result, SyncError};

/// A write that reached the backend
#[derive(Debug, Clone, PartialEq)]
pub enum BackendCall {
    Like(LikeWrite),
    Notifications(NotificationWrite),
}

#[derive(Default)]
struct Recorded {
    calls: Vec<(Instant, BackendCall)>,
    beacons: Vec<BeaconRequest>,
}

/// Backend that keeps everything in memory
#[derive(Default)]
pub struct MemoryBackend {
    recorded: Mutex<Recorded>,
    latency: Option<Duration>,
    fail_next: AtomicUsize,
    attempts: AtomicU64,
    reject_beacons: bool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every write sleeps this long before completing.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Beacons are refused, as when no transport is available.
    pub fn rejecting_beacons(mut self) -> Self {
        self.reject_beacons = true;
        self
    }

    /// Fail the next `count` write attempts with a network error.
    pub fn fail_next(&self, count: usize) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    fn recorded(&self) -> MutexGuard<'_, Recorded> {
        self.recorded.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn apply(&self, call: BackendCall) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let failing = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(SyncError::Network("simulated failure".into()));
        }

        self.recorded().calls.push((Instant::now(), call));
        Ok(())
    }

    /// Successful writes in arrival order, with the time they landed
    pub fn calls(&self) -> Vec<(Instant, BackendCall)> {
        self.recorded().calls.clone()
    }

    pub fn likes(&self) -> Vec<LikeWrite> {
        self.recorded()
            .calls
            .iter()
            .filter_map(|(_, call)| match call {
                BackendCall::Like(write) => Some(write.clone()),
                BackendCall::Notifications(_) => None,
            })
            .collect()
    }

    pub fn notification_batches(&self) -> Vec<NotificationWrite> {
        self.recorded()
            .calls
            .iter()
            .filter_map(|(_, call)| match call {
                BackendCall::Notifications(write) => Some(write.clone()),
                BackendCall::Like(_) => None,
            })
            .collect()
    }

    pub fn beacons(&self) -> Vec<BeaconRequest> {
        self.recorded().beacons.clone()
    }

    /// Write attempts including failed ones
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SyncBackend for MemoryBackend {
    async fn set_like(&self, write: &LikeWrite) -> Result<()> {
        self.apply(BackendCall::Like(write.clone())).await
    }

    async fn mark_notifications(&self, write: &NotificationWrite) -> Result<()> {
        self.apply(BackendCall::Notifications(write.clone())).await
    }
}

impl BeaconTransport for MemoryBackend {
    fn send_beacon(&self, request: BeaconRequest) -> bool {
        if self.reject_beacons {
            return false;
        }
        self.recorded().beacons.push(request);
        true
    }
}
