//! Pending intents, deduplicated per (lane, target)
//!
//! Owned by the queue worker. `take` is the snapshot-and-clear step that lets
//! new intents start a fresh batch while the previous one is in flight.

use std::collections::HashMap;

use chrono::Utc;

use crate::action::{ActionKind, Lane, Payload, PendingAction};

/// Result of an upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Inserted,
    Superseded,
}

/// Pending entries taken out of the queue for one flush
#[derive(Debug, Default)]
pub struct Snapshot {
    pub lanes: Vec<(Lane, Vec<PendingAction>)>,
}

impl Snapshot {
    pub fn is_empty(&self) -> bool {
        self.lanes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.lanes.iter().map(|(_, actions)| actions.len()).sum()
    }
}

#[derive(Debug, Default)]
pub struct PendingQueue {
    lanes: HashMap<Lane, HashMap<String, PendingAction>>,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or merge an intent.
    ///
    /// An existing entry for the same target is replaced in place by
    /// `merge(existing, incoming)`; its `registered_at` is kept.
    pub fn upsert<F>(&mut self, kind: ActionKind, target_key: String, payload: Payload, merge: F) -> Upsert
    where
        F: FnOnce(Option<&Payload>, Payload) -> Payload,
    {
        let lane = self.lanes.entry(kind.lane()).or_default();
        match lane.get_mut(&target_key) {
            Some(existing) => {
                existing.payload = merge(Some(&existing.payload), payload);
                existing.kind = kind;
                Upsert::Superseded
            }
            None => {
                let payload = merge(None, payload);
                lane.insert(
                    target_key.clone(),
                    PendingAction {
                        kind,
                        target_key,
                        payload,
                        registered_at: Utc::now(),
                    },
                );
                Upsert::Inserted
            }
        }
    }

    /// Snapshot every lane and clear. Lanes and targets come out sorted.
    pub fn take(&mut self) -> Snapshot {
        self.take_where(|_| true)
    }

    /// Snapshot and clear only the lanes accepted by `include`; the rest
    /// stay pending untouched.
    pub fn take_where<F>(&mut self, mut include: F) -> Snapshot
    where
        F: FnMut(Lane) -> bool,
    {
        let selected: Vec<Lane> = self
            .lanes
            .iter()
            .filter(|(lane, entries)| !entries.is_empty() && include(**lane))
            .map(|(lane, _)| *lane)
            .collect();

        let mut lanes: Vec<(Lane, Vec<PendingAction>)> = selected
            .into_iter()
            .filter_map(|lane| self.lanes.remove(&lane).map(|entries| (lane, entries)))
            .map(|(lane, entries)| {
                let mut actions: Vec<PendingAction> = entries.into_values().collect();
                actions.sort_by(|a, b| a.target_key.cmp(&b.target_key));
                (lane, actions)
            })
            .collect();
        lanes.sort_by_key(|(lane, _)| *lane);
        Snapshot { lanes }
    }

    pub fn len(&self) -> usize {
        self.lanes.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn lane_len(&self, lane: Lane) -> usize {
        self.lanes.get(&lane).map_or(0, HashMap::len)
    }

    pub fn get(&self, lane: Lane, target_key: &str) -> Option<&PendingAction> {
        self.lanes.get(&lane)?.get(target_key)
    }
}
