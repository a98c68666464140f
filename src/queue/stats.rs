//! Queue state and reporting types

use std::sync::atomic::{AtomicU8, Ordering};

use serde::Serialize;
use uuid::Uuid;

use crate::action::Lane;
use crate::registry::FlushOutcome;

/// Lifecycle of the queue as a whole
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum QueueState {
    /// Nothing pending, no deadline armed
    Idle = 0,
    /// Intents pending, debounce deadline armed
    Accumulating = 1,
    /// A snapshot is being written, nothing new pending
    Flushing = 2,
    /// Terminal: forced flush fired, queue discarded
    Unloading = 3,
}

impl QueueState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => QueueState::Accumulating,
            2 => QueueState::Flushing,
            3 => QueueState::Unloading,
            _ => QueueState::Idle,
        }
    }
}

/// State readable from any handle without a round trip to the worker
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(QueueState::Idle as u8))
    }

    pub(crate) fn get(&self) -> QueueState {
        QueueState::from_u8(self.0.load(Ordering::SeqCst))
    }

    pub(crate) fn set(&self, state: QueueState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }
}

/// Result of one debounce cycle across all lanes
#[derive(Debug, Clone, Serialize)]
pub struct FlushSummary {
    pub cycle_id: Uuid,
    pub outcomes: Vec<FlushOutcome>,
}

impl FlushSummary {
    pub fn empty(cycle_id: Uuid) -> Self {
        Self {
            cycle_id,
            outcomes: Vec::new(),
        }
    }

    pub fn committed(&self) -> usize {
        self.outcomes.iter().map(|o| o.committed).sum()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.iter().map(|o| o.failed).sum()
    }

    pub fn outcome(&self, lane: Lane) -> Option<&FlushOutcome> {
        self.outcomes.iter().find(|o| o.lane == Some(lane))
    }
}

/// Result of the teardown flush
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UnloadReport {
    /// Pending entries at unload time
    pub entries: usize,
    /// Beacons accepted by the transport
    pub beacons_sent: usize,
    /// Beacons the transport refused
    pub beacons_rejected: usize,
    /// Flush cycles still writing when the queue closed
    pub in_flight: usize,
}

/// Counters since the queue was spawned
#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub state: QueueState,
    pub pending_entries: usize,
    pub in_flight_cycles: usize,
    pub cycles_flushed: u64,
    pub writes_committed: u64,
    pub writes_failed: u64,
    pub entries_superseded: u64,
    pub beacons_sent: u64,
    pub beacons_rejected: u64,
}
