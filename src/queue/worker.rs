//! Queue worker - sole owner of the pending state
//!
//! Handles arrive over a channel in order, so merges never interleave. The
//! worker runs the shared debounce deadline, takes a snapshot when it
//! expires and writes it from a background task, and performs the
//! teardown flush before exiting.
//!
//! A lane has at most one cycle writing at a time. Entries queued for a
//! lane that is still writing wait for that write to settle, so a slow or
//! retrying write can never land after a newer one for the same target.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::pending::{PendingQueue, Upsert};
use super::stats::{FlushSummary, QueueState, QueueStats, StateCell, UnloadReport};
use crate::action::{ActionKind, Lane, Payload};
use crate::backend::BeaconTransport;
use crate::config::QueueConfig;
use crate::registry::{ActionRegistry, LaneBatch};

/// Commands sent from queue handles to the worker.
pub(crate) enum Command {
    Enqueue {
        kind: ActionKind,
        target_key: String,
        payload: Payload,
    },
    Flush {
        reply: oneshot::Sender<FlushSummary>,
    },
    Unload {
        reply: oneshot::Sender<UnloadReport>,
    },
    Stats {
        reply: oneshot::Sender<QueueStats>,
    },
}

struct CycleResult {
    summary: FlushSummary,
    lanes: Vec<Lane>,
    reply: Option<oneshot::Sender<FlushSummary>>,
}

#[derive(Default)]
struct Counters {
    cycles_flushed: u64,
    writes_committed: u64,
    writes_failed: u64,
    entries_superseded: u64,
    beacons_sent: u64,
    beacons_rejected: u64,
}

pub(crate) struct Worker {
    registry: Arc<ActionRegistry>,
    beacon: Arc<dyn BeaconTransport>,
    state: Arc<StateCell>,
    stopped: watch::Sender<bool>,
    quiet_period: Duration,
    pending_warn_depth: usize,
    pending: PendingQueue,
    deadline: Option<Instant>,
    in_flight: JoinSet<CycleResult>,
    busy_lanes: HashSet<Lane>,
    counters: Counters,
    depth_warned: bool,
}

impl Worker {
    pub(crate) fn new(
        config: &QueueConfig,
        registry: Arc<ActionRegistry>,
        beacon: Arc<dyn BeaconTransport>,
        state: Arc<StateCell>,
        stopped: watch::Sender<bool>,
    ) -> Self {
        Self {
            registry,
            beacon,
            state,
            stopped,
            quiet_period: config.quiet_period(),
            pending_warn_depth: config.pending_warn_depth,
            pending: PendingQueue::new(),
            deadline: None,
            in_flight: JoinSet::new(),
            busy_lanes: HashSet::new(),
            counters: Counters::default(),
            depth_warned: false,
        }
    }

    /// Run until unloaded or until every handle is dropped, then let the
    /// cycles already writing settle before reporting the worker stopped.
    pub(crate) async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        info!(
            quiet_period_ms = self.quiet_period.as_millis() as u64,
            "Sync queue worker started"
        );

        loop {
            let deadline = self.deadline;

            tokio::select! {
                biased;

                command = commands.recv() => match command {
                    Some(command) => {
                        if self.handle(command) {
                            break;
                        }
                    }
                    None => {
                        debug!("All queue handles dropped, unloading");
                        self.unload();
                        break;
                    }
                },

                Some(joined) = self.in_flight.join_next(), if !self.in_flight.is_empty() => {
                    self.finish_cycle(joined);
                }

                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.deadline = None;
                    self.start_cycle(None);
                }
            }
        }

        // Commands still queued get dropped with their reply channels.
        drop(commands);

        // In-flight writes are never cancelled; wait for them here.
        while let Some(joined) = self.in_flight.join_next().await {
            self.finish_cycle(joined);
        }

        let _ = self.stopped.send(true);
        info!("Sync queue worker stopped");
    }

    /// Apply one command. Returns `true` once the queue has been unloaded.
    fn handle(&mut self, command: Command) -> bool {
        match command {
            Command::Enqueue {
                kind,
                target_key,
                payload,
            } => self.enqueue(kind, target_key, payload),
            Command::Flush { reply } => {
                self.deadline = None;
                self.start_cycle(Some(reply));
            }
            Command::Stats { reply } => {
                let _ = reply.send(self.stats());
            }
            Command::Unload { reply } => {
                let _ = reply.send(self.unload());
                return true;
            }
        }
        false
    }

    fn enqueue(&mut self, kind: ActionKind, target_key: String, payload: Payload) {
        let handler = match self.registry.handler_for(kind) {
            Ok(handler) => handler,
            Err(e) => {
                error!(%kind, error = %e, "Intent dropped");
                return;
            }
        };

        let upsert = self.pending.upsert(kind, target_key.clone(), payload, |existing, incoming| {
            handler.merge(existing, incoming)
        });
        if upsert == Upsert::Superseded {
            self.counters.entries_superseded += 1;
        }
        debug!(%kind, target_key = %target_key, ?upsert, pending = self.pending.len(), "Intent queued");

        // One deadline for every lane; each enqueue pushes it back.
        self.deadline = Some(Instant::now() + self.quiet_period);
        self.state.set(QueueState::Accumulating);

        if !self.depth_warned && self.pending.len() > self.pending_warn_depth {
            warn!(
                pending = self.pending.len(),
                threshold = self.pending_warn_depth,
                "Pending intents piling up without a quiet period"
            );
            self.depth_warned = true;
        }
    }

    /// Snapshot-and-clear the idle lanes, then write the snapshot in the
    /// background. Lanes still writing keep their entries pending.
    fn start_cycle(&mut self, reply: Option<oneshot::Sender<FlushSummary>>) {
        let cycle_id = Uuid::new_v4();
        let busy = &self.busy_lanes;
        let snapshot = self.pending.take_where(|lane| !busy.contains(&lane));
        self.depth_warned = false;

        if !self.pending.is_empty() {
            debug!(
                %cycle_id,
                held = self.pending.len(),
                busy = ?self.busy_lanes,
                "Entries held until their lane's write settles"
            );
        }

        if snapshot.is_empty() {
            if let Some(reply) = reply {
                let _ = reply.send(FlushSummary::empty(cycle_id));
            }
            return;
        }

        let entries = snapshot.len();
        let mut batches = Vec::with_capacity(snapshot.lanes.len());
        for (lane, actions) in snapshot.lanes {
            match self.registry.handler_for_lane(lane) {
                Some(handler) => batches.push((
                    handler,
                    LaneBatch {
                        lane,
                        cycle_id,
                        actions,
                    },
                )),
                None => error!(%lane, entries = actions.len(), "No handler for lane, entries dropped"),
            }
        }

        let lanes: Vec<Lane> = batches.iter().map(|(_, batch)| batch.lane).collect();
        self.busy_lanes.extend(lanes.iter().copied());

        info!(%cycle_id, lanes = batches.len(), entries, "Flushing pending intents");
        self.state.set(QueueState::Flushing);

        let span = info_span!("flush_cycle", %cycle_id);
        self.in_flight.spawn(
            async move {
                let outcomes = join_all(
                    batches
                        .iter()
                        .map(|(handler, batch)| handler.flush(batch)),
                )
                .await;
                CycleResult {
                    summary: FlushSummary { cycle_id, outcomes },
                    lanes,
                    reply,
                }
            }
            .instrument(span),
        );
    }

    fn finish_cycle(&mut self, joined: Result<CycleResult, JoinError>) {
        match joined {
            Ok(CycleResult {
                summary,
                lanes,
                reply,
            }) => {
                for lane in &lanes {
                    self.busy_lanes.remove(lane);
                }

                self.counters.cycles_flushed += 1;
                self.counters.writes_committed += summary.committed() as u64;
                self.counters.writes_failed += summary.failed() as u64;

                if summary.failed() > 0 {
                    warn!(
                        cycle_id = %summary.cycle_id,
                        committed = summary.committed(),
                        failed = summary.failed(),
                        "Flush cycle finished with dropped writes"
                    );
                } else {
                    debug!(
                        cycle_id = %summary.cycle_id,
                        committed = summary.committed(),
                        "Flush cycle finished"
                    );
                }

                if let Some(reply) = reply {
                    let _ = reply.send(summary);
                }
            }
            Err(e) => {
                error!(error = %e, "Flush task failed");
                if self.in_flight.is_empty() {
                    self.busy_lanes.clear();
                }
            }
        }

        if self.state.get() == QueueState::Unloading {
            return;
        }

        // Held entries already sat out their quiet period.
        if self.deadline.is_none() && !self.pending.is_empty() {
            self.start_cycle(None);
        }

        if self.in_flight.is_empty() {
            let next = if self.pending.is_empty() {
                QueueState::Idle
            } else {
                QueueState::Accumulating
            };
            self.state.set(next);
        }
    }

    /// Teardown flush: one fire-and-forget beacon per lane, no retries.
    fn unload(&mut self) -> UnloadReport {
        self.deadline = None;
        self.state.set(QueueState::Unloading);

        let cycle_id = Uuid::new_v4();
        let snapshot = self.pending.take();
        let mut report = UnloadReport {
            entries: snapshot.len(),
            in_flight: self.in_flight.len(),
            ..UnloadReport::default()
        };

        for (lane, actions) in snapshot.lanes {
            let Some(handler) = self.registry.handler_for_lane(lane) else {
                error!(%lane, entries = actions.len(), "No handler for lane at unload, entries dropped");
                continue;
            };
            let batch = LaneBatch {
                lane,
                cycle_id,
                actions,
            };
            let Some(request) = handler.beacon(&batch) else {
                continue;
            };
            if self.beacon.send_beacon(request) {
                report.beacons_sent += 1;
            } else {
                warn!(%lane, entries = batch.len(), "Beacon refused, entries lost");
                report.beacons_rejected += 1;
            }
        }

        self.counters.beacons_sent += report.beacons_sent as u64;
        self.counters.beacons_rejected += report.beacons_rejected as u64;

        info!(
            entries = report.entries,
            beacons_sent = report.beacons_sent,
            beacons_rejected = report.beacons_rejected,
            in_flight = report.in_flight,
            "Sync queue unloaded"
        );
        report
    }

    fn stats(&self) -> QueueStats {
        QueueStats {
            state: self.state.get(),
            pending_entries: self.pending.len(),
            in_flight_cycles: self.in_flight.len(),
            cycles_flushed: self.counters.cycles_flushed,
            writes_committed: self.counters.writes_committed,
            writes_failed: self.counters.writes_failed,
            entries_superseded: self.counters.entries_superseded,
            beacons_sent: self.counters.beacons_sent,
            beacons_rejected: self.counters.beacons_rejected,
        }
    }
}
