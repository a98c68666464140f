//! Sync queue integration tests
//!
//! Drives the queue against the in-memory backend with a paused tokio
//! clock, covering:
//! - Coalescing and supersede semantics per lane
//! - Shared debounce deadline
//! - Snapshot-and-clear while writes are in flight
//! - Unload beacons and queue closure
//! - Failure policy and lane isolation

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use shutter_sync::backend::{LikeWrite, NotificationWrite};
use shutter_sync::{
    ActionKind, EntityType, Lane, MemoryBackend, Payload, QueueState, RetryPolicy, SyncError,
    SyncQueue, UnloadReport,
};

use common::{config, settle, spawn_queue, QUIET_PERIOD};

fn like(entity_id: &str, liked: bool) -> LikeWrite {
    LikeWrite {
        entity_type: EntityType::Photo,
        entity_id: entity_id.into(),
        liked,
    }
}

fn ids(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

// =============================================================================
// Coalescing
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_like_toggles_collapse_to_final_state() {
    let backend = Arc::new(MemoryBackend::new());
    let queue = spawn_queue(&config(), &backend);

    queue.queue_like(EntityType::Photo, "P1", true).unwrap();
    queue.queue_like(EntityType::Photo, "P1", false).unwrap();
    queue.queue_like(EntityType::Photo, "P1", true).unwrap();

    tokio::time::sleep(QUIET_PERIOD * 2).await;

    assert_eq!(backend.likes(), vec![like("P1", true)]);
}

#[tokio::test(start_paused = true)]
async fn test_repeated_enqueue_is_idempotent() {
    let once = Arc::new(MemoryBackend::new());
    let twice = Arc::new(MemoryBackend::new());
    let queue_once = spawn_queue(&config(), &once);
    let queue_twice = spawn_queue(&config(), &twice);

    queue_once.queue_notification_dismiss("A").unwrap();
    queue_twice.queue_notification_dismiss("A").unwrap();
    queue_twice.queue_notification_dismiss("A").unwrap();

    tokio::time::sleep(QUIET_PERIOD * 2).await;

    assert_eq!(once.notification_batches(), twice.notification_batches());
    assert_eq!(once.notification_batches().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_no_duplicate_entries_per_target() {
    let backend = Arc::new(MemoryBackend::new());
    let queue = spawn_queue(&config(), &backend);

    for i in 0..50 {
        queue.queue_like(EntityType::Album, "A7", i % 2 == 0).unwrap();
    }

    let stats = queue.stats().await.unwrap();
    assert_eq!(stats.pending_entries, 1);
    assert_eq!(stats.entries_superseded, 49);

    let summary = queue.flush_now().await.unwrap();
    assert_eq!(summary.committed(), 1);
    assert_eq!(
        backend.likes(),
        vec![LikeWrite {
            entity_type: EntityType::Album,
            entity_id: "A7".into(),
            liked: false,
        }]
    );
}

#[tokio::test(start_paused = true)]
async fn test_photo_and_album_with_same_id_are_separate_targets() {
    let backend = Arc::new(MemoryBackend::new());
    let queue = spawn_queue(&config(), &backend);

    queue.queue_like(EntityType::Photo, "42", true).unwrap();
    queue.queue_like(EntityType::Album, "42", true).unwrap();

    let summary = queue.flush_now().await.unwrap();
    assert_eq!(summary.committed(), 2);
    assert_eq!(backend.likes().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_notification_batch_with_dismiss_dominance() {
    let backend = Arc::new(MemoryBackend::new());
    let queue = spawn_queue(&config(), &backend);

    queue.queue_notification_seen("A").unwrap();
    queue.queue_notification_dismiss("A").unwrap();
    queue.queue_notification_seen("B").unwrap();
    // A later "seen" never downgrades a dismissal
    queue.queue_notification_seen("A").unwrap();

    tokio::time::sleep(QUIET_PERIOD * 2).await;

    assert_eq!(
        backend.notification_batches(),
        vec![NotificationWrite {
            seen: ids(&["A", "B"]),
            dismissed: ids(&["A"]),
        }]
    );
}

#[tokio::test(start_paused = true)]
async fn test_mark_all_seen_joins_notification_batch() {
    let backend = Arc::new(MemoryBackend::new());
    let queue = spawn_queue(&config(), &backend);

    queue.queue_notification_dismiss("n2").unwrap();
    queue.queue_all_notifications_seen(["n1", "n2", "n3"]).unwrap();

    let summary = queue.flush_now().await.unwrap();
    assert_eq!(summary.outcome(Lane::Notifications).unwrap().committed, 3);
    assert_eq!(
        backend.notification_batches(),
        vec![NotificationWrite {
            seen: ids(&["n1", "n2", "n3"]),
            dismissed: ids(&["n2"]),
        }]
    );
}

// =============================================================================
// Debounce
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_steady_stream_defers_flush_until_quiet() {
    let backend = Arc::new(MemoryBackend::new());
    let queue = spawn_queue(&config(), &backend);

    for i in 0..4 {
        queue.queue_notification_seen(&format!("n{}", i)).unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(backend.calls().is_empty(), "flushed during a burst at step {}", i);
    }

    // Last enqueue was 500ms ago; the deadline is 500ms away.
    tokio::time::sleep(Duration::from_millis(499)).await;
    assert!(backend.calls().is_empty());

    tokio::time::sleep(Duration::from_millis(2)).await;
    assert_eq!(backend.notification_batches().len(), 1);
    assert_eq!(backend.notification_batches()[0].seen.len(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_enqueue_on_any_lane_resets_shared_deadline() {
    let backend = Arc::new(MemoryBackend::new());
    let queue = spawn_queue(&config(), &backend);

    queue.queue_like(EntityType::Photo, "P1", true).unwrap();
    tokio::time::sleep(Duration::from_millis(800)).await;
    queue.queue_notification_seen("n1").unwrap();

    tokio::time::sleep(Duration::from_millis(800)).await;
    assert!(backend.calls().is_empty());

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(backend.likes().len(), 1);
    assert_eq!(backend.notification_batches().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_double_click_then_idle_scenario() {
    let backend = Arc::new(MemoryBackend::new());
    let queue = spawn_queue(&config(), &backend);
    let start = tokio::time::Instant::now();

    queue.queue_like(EntityType::Photo, "P1", true).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    queue.queue_like(EntityType::Photo, "P1", false).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    queue.queue_like(EntityType::Photo, "P1", true).unwrap();
    let last_click = tokio::time::Instant::now();

    tokio::time::sleep(Duration::from_secs(2)).await;
    let report = queue.unload().await.unwrap();

    let calls = backend.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(backend.likes(), vec![like("P1", true)]);

    let landed = calls[0].0;
    assert!(landed >= last_click + QUIET_PERIOD);
    assert!(landed < last_click + QUIET_PERIOD + Duration::from_millis(10));
    assert!(landed - start >= Duration::from_millis(1200));

    assert_eq!(report.entries, 0);
    assert_eq!(report.beacons_sent, 0);
    assert!(backend.beacons().is_empty());
}

// =============================================================================
// Snapshot-and-clear
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_enqueue_during_flush_gets_its_own_cycle() {
    let backend = Arc::new(MemoryBackend::new().with_latency(Duration::from_millis(300)));
    let queue = spawn_queue(&config(), &backend);

    queue.queue_like(EntityType::Photo, "P1", true).unwrap();

    // Cycle one has snapshotted P1 and is waiting on the backend.
    tokio::time::sleep(QUIET_PERIOD + Duration::from_millis(100)).await;
    let stats = queue.stats().await.unwrap();
    assert_eq!(stats.state, QueueState::Flushing);
    assert_eq!(stats.pending_entries, 0);
    assert_eq!(stats.in_flight_cycles, 1);

    queue.queue_like(EntityType::Photo, "P1", false).unwrap();
    queue.queue_like(EntityType::Photo, "P2", true).unwrap();
    settle(&queue).await;
    assert_eq!(queue.stats().await.unwrap().pending_entries, 2);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(backend.likes(), vec![like("P1", true)]);

    tokio::time::sleep(QUIET_PERIOD + Duration::from_millis(500)).await;
    let likes = backend.likes();
    assert_eq!(likes.len(), 3);
    assert_eq!(likes[0], like("P1", true));
    assert!(likes[1..].contains(&like("P1", false)));
    assert!(likes[1..].contains(&like("P2", true)));

    let stats = queue.stats().await.unwrap();
    assert_eq!(stats.cycles_flushed, 2);
    assert_eq!(stats.writes_committed, 3);
    assert_eq!(stats.state, QueueState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_flush_now_on_empty_queue_is_a_no_op() {
    let backend = Arc::new(MemoryBackend::new());
    let queue = spawn_queue(&config(), &backend);

    let summary = queue.flush_now().await.unwrap();
    assert!(summary.outcomes.is_empty());
    assert!(backend.calls().is_empty());
    assert_eq!(queue.state(), QueueState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_flush_now_cancels_pending_deadline() {
    let backend = Arc::new(MemoryBackend::new());
    let queue = spawn_queue(&config(), &backend);

    queue.queue_notification_seen("n1").unwrap();
    queue.flush_now().await.unwrap();
    assert_eq!(backend.calls().len(), 1);

    tokio::time::sleep(QUIET_PERIOD * 3).await;
    assert_eq!(backend.calls().len(), 1);
    assert_eq!(queue.stats().await.unwrap().cycles_flushed, 1);
}

// =============================================================================
// Unload
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_unload_sends_one_beacon_per_lane() {
    let backend = Arc::new(MemoryBackend::new());
    let queue = spawn_queue(&config(), &backend);

    queue.queue_like(EntityType::Photo, "P1", true).unwrap();
    queue.queue_like(EntityType::Photo, "P2", false).unwrap();
    queue.queue_notification_seen("n1").unwrap();
    queue.queue_notification_dismiss("n2").unwrap();

    let report = queue.unload().await.unwrap();
    assert_eq!(report.entries, 4);
    assert_eq!(report.beacons_sent, 2);
    assert_eq!(report.beacons_rejected, 0);
    assert_eq!(queue.state(), QueueState::Unloading);

    let beacons = backend.beacons();
    assert_eq!(beacons.len(), 2);
    assert_eq!(beacons[0].lane, Lane::Likes);
    assert_eq!(beacons[0].body["likes"].as_array().map(Vec::len), Some(2));
    assert_eq!(beacons[1].lane, Lane::Notifications);
    assert_eq!(
        beacons[1].body,
        json!({ "notifications": { "seen": ["n1", "n2"], "dismissed": ["n2"] } })
    );

    // No debounce deadline survives the unload.
    tokio::time::sleep(QUIET_PERIOD * 5).await;
    assert!(backend.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_unload_skips_empty_lanes() {
    let backend = Arc::new(MemoryBackend::new());
    let queue = spawn_queue(&config(), &backend);

    queue.queue_notification_seen("n1").unwrap();
    let report = queue.unload().await.unwrap();

    assert_eq!(report.beacons_sent, 1);
    assert_eq!(backend.beacons()[0].lane, Lane::Notifications);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_beacons_are_reported() {
    let backend = Arc::new(MemoryBackend::new().rejecting_beacons());
    let queue = spawn_queue(&config(), &backend);

    queue.queue_like(EntityType::Photo, "P1", true).unwrap();
    let report = queue.unload().await.unwrap();

    assert_eq!(report.beacons_sent, 0);
    assert_eq!(report.beacons_rejected, 1);
    assert!(backend.beacons().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_queue_is_closed_after_unload() {
    let backend = Arc::new(MemoryBackend::new());
    let queue = spawn_queue(&config(), &backend);
    let other_handle = queue.clone();

    queue.unload().await.unwrap();

    assert!(other_handle.is_closed());
    assert!(matches!(
        other_handle.queue_notification_seen("n1"),
        Err(SyncError::QueueClosed)
    ));
    assert!(matches!(queue.flush_now().await, Err(SyncError::QueueClosed)));

    // Second unload is a no-op
    assert_eq!(queue.unload().await.unwrap(), UnloadReport::default());
    assert_eq!(backend.beacons().len(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_in_flight_write_survives_unload() {
    let backend = Arc::new(MemoryBackend::new().with_latency(Duration::from_millis(500)));
    let queue = spawn_queue(&config(), &backend);

    queue.queue_like(EntityType::Photo, "P1", true).unwrap();
    tokio::time::sleep(QUIET_PERIOD + Duration::from_millis(100)).await;

    let report = queue.unload().await.unwrap();
    assert_eq!(report.entries, 0);
    assert_eq!(report.in_flight, 1);

    assert!(queue.drain(Duration::from_secs(1)).await);
    assert_eq!(backend.likes(), vec![like("P1", true)]);
}

#[tokio::test(start_paused = true)]
async fn test_drain_gives_up_after_grace_period() {
    let backend = Arc::new(MemoryBackend::new().with_latency(Duration::from_secs(30)));
    let queue = spawn_queue(&config(), &backend);

    queue.queue_like(EntityType::Photo, "P1", true).unwrap();
    tokio::time::sleep(QUIET_PERIOD + Duration::from_millis(100)).await;

    let report = queue.unload().await.unwrap();
    assert_eq!(report.in_flight, 1);
    assert!(!queue.drain(Duration::from_millis(500)).await);
    assert!(backend.likes().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_drain_is_immediate_with_nothing_in_flight() {
    let backend = Arc::new(MemoryBackend::new());
    let queue = spawn_queue(&config(), &backend);

    queue.queue_notification_seen("n1").unwrap();
    let report = queue.unload().await.unwrap();
    assert_eq!(report.in_flight, 0);

    let started = tokio::time::Instant::now();
    assert!(queue.drain(Duration::from_secs(5)).await);
    assert!(started.elapsed() < Duration::from_millis(10));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_enqueue_never_lost_to_unload() {
    let backend = Arc::new(MemoryBackend::new());
    let mut config = config();
    config.queue.quiet_period_ms = 60_000;
    config.queue.pending_warn_depth = 10_000;
    let queue = spawn_queue(&config, &backend);
    let accepted = Arc::new(AtomicUsize::new(0));

    let writers: Vec<_> = (0..4)
        .map(|writer| {
            let queue = queue.clone();
            let accepted = Arc::clone(&accepted);
            std::thread::spawn(move || {
                for i in 0..2000 {
                    match queue.queue_notification_seen(&format!("n{}-{}", writer, i)) {
                        Ok(()) => {
                            accepted.fetch_add(1, Ordering::SeqCst);
                        }
                        Err(SyncError::QueueClosed) => break,
                        Err(e) => panic!("unexpected enqueue error: {}", e),
                    }
                }
            })
        })
        .collect();

    tokio::time::sleep(Duration::from_millis(1)).await;
    let report = queue.unload().await.unwrap();
    for writer in writers {
        writer.join().unwrap();
    }

    // Every accepted intent was ahead of the unload and went out in the beacon.
    assert_eq!(report.entries, accepted.load(Ordering::SeqCst));
    let beacon_seen = backend
        .beacons()
        .first()
        .and_then(|beacon| beacon.body["notifications"]["seen"].as_array().map(Vec::len))
        .unwrap_or(0);
    assert_eq!(beacon_seen, report.entries);
}

// =============================================================================
// Configuration errors
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_enqueue_before_handlers_is_configuration_error() {
    let backend = Arc::new(MemoryBackend::new());
    let queue = SyncQueue::spawn(&config(), backend.clone());

    assert!(matches!(
        queue.queue_like(EntityType::Photo, "P1", true),
        Err(SyncError::Configuration(_))
    ));

    assert!(queue.initialize_sync_handlers(backend.clone()));
    assert!(!queue.initialize_sync_handlers(backend.clone()));
    assert!(queue.queue_like(EntityType::Photo, "P1", true).is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_target_key_must_match_payload() {
    let backend = Arc::new(MemoryBackend::new());
    let queue = spawn_queue(&config(), &backend);

    let mismatched = queue.enqueue(
        ActionKind::Like,
        "x",
        Payload::like(EntityType::Photo, "y", true),
    );
    assert!(matches!(mismatched, Err(SyncError::Configuration(_))));

    queue
        .enqueue(
            ActionKind::Like,
            "photo:y",
            Payload::like(EntityType::Photo, "y", false),
        )
        .unwrap();
    queue.queue_like(EntityType::Photo, "y", true).unwrap();

    let stats = queue.stats().await.unwrap();
    assert_eq!(stats.pending_entries, 1);
    assert_eq!(stats.entries_superseded, 1);
}

#[tokio::test(start_paused = true)]
async fn test_payload_for_wrong_lane_is_rejected() {
    let backend = Arc::new(MemoryBackend::new());
    let queue = spawn_queue(&config(), &backend);

    let result = queue.enqueue(
        ActionKind::NotificationSeen,
        "photo:P1",
        Payload::like(EntityType::Photo, "P1", true),
    );
    assert!(matches!(result, Err(SyncError::Configuration(_))));
    assert_eq!(queue.stats().await.unwrap().pending_entries, 0);
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_failed_write_is_dropped_not_requeued() {
    let backend = Arc::new(MemoryBackend::new());
    let queue = spawn_queue(&config(), &backend);

    backend.fail_next(1);
    queue.queue_like(EntityType::Photo, "P1", true).unwrap();
    let summary = queue.flush_now().await.unwrap();

    let outcome = summary.outcome(Lane::Likes).unwrap();
    assert_eq!(outcome.failed, 1);
    assert_eq!(outcome.attempts, 1);
    assert_eq!(outcome.errors.len(), 1);

    queue.queue_like(EntityType::Photo, "P2", true).unwrap();
    tokio::time::sleep(QUIET_PERIOD * 2).await;

    assert_eq!(backend.likes(), vec![like("P2", true)]);
    assert_eq!(backend.attempts(), 2);

    let stats = queue.stats().await.unwrap();
    assert_eq!(stats.writes_failed, 1);
    assert_eq!(stats.writes_committed, 1);
}

#[tokio::test(start_paused = true)]
async fn test_bounded_retry_recovers_transient_failures() {
    let backend = Arc::new(MemoryBackend::new());
    let mut config = config();
    config.retry = RetryPolicy::bounded(3);
    let queue = spawn_queue(&config, &backend);

    backend.fail_next(2);
    queue.queue_notification_seen("n1").unwrap();
    let summary = queue.flush_now().await.unwrap();

    let outcome = summary.outcome(Lane::Notifications).unwrap();
    assert_eq!(outcome.committed, 1);
    assert_eq!(outcome.failed, 0);
    assert_eq!(outcome.attempts, 3);
    assert_eq!(backend.notification_batches().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_retrying_write_never_lands_after_newer_intent() {
    let backend = Arc::new(MemoryBackend::new());
    let mut config = config();
    config.retry = RetryPolicy {
        max_attempts: 3,
        initial_backoff_ms: 2000,
        max_backoff_ms: 5000,
    };
    let queue = spawn_queue(&config, &backend);

    // First attempt fails at t=1000; the retry is due at t=3000.
    backend.fail_next(1);
    queue.queue_like(EntityType::Photo, "P1", true).unwrap();
    tokio::time::sleep(QUIET_PERIOD + Duration::from_millis(100)).await;

    // Un-like while the first cycle is backing off. Its quiet period ends
    // at t=2100, but the likes lane is still busy then.
    queue.queue_like(EntityType::Photo, "P1", false).unwrap();
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(backend.likes().is_empty());
    assert_eq!(queue.stats().await.unwrap().pending_entries, 1);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(backend.likes(), vec![like("P1", true), like("P1", false)]);

    let stats = queue.stats().await.unwrap();
    assert_eq!(stats.cycles_flushed, 2);
    assert_eq!(stats.pending_entries, 0);
    assert_eq!(stats.state, QueueState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_busy_lane_does_not_hold_back_other_lane() {
    let backend = Arc::new(MemoryBackend::new());
    let mut config = config();
    config.retry = RetryPolicy {
        max_attempts: 2,
        initial_backoff_ms: 3000,
        max_backoff_ms: 3000,
    };
    let queue = spawn_queue(&config, &backend);

    backend.fail_next(1);
    queue.queue_like(EntityType::Photo, "P1", true).unwrap();
    tokio::time::sleep(QUIET_PERIOD + Duration::from_millis(100)).await;

    queue.queue_notification_seen("n1").unwrap();
    tokio::time::sleep(QUIET_PERIOD + Duration::from_millis(100)).await;

    // Likes is still backing off; notifications went out on schedule.
    assert!(backend.likes().is_empty());
    assert_eq!(backend.notification_batches().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_lane_failure_does_not_affect_other_lane() {
    let backend = Arc::new(MemoryBackend::new());
    let queue = spawn_queue(&config(), &backend);

    queue.queue_like(EntityType::Photo, "P1", true).unwrap();
    queue.queue_notification_seen("n1").unwrap();
    queue.queue_notification_dismiss("n2").unwrap();

    // Likes flush first within a cycle, so the like write takes the failure.
    backend.fail_next(1);
    let summary = queue.flush_now().await.unwrap();

    assert_eq!(summary.outcome(Lane::Likes).unwrap().failed, 1);
    assert_eq!(summary.outcome(Lane::Notifications).unwrap().committed, 2);
    assert!(backend.likes().is_empty());
    assert_eq!(
        backend.notification_batches(),
        vec![NotificationWrite {
            seen: ids(&["n1", "n2"]),
            dismissed: ids(&["n2"]),
        }]
    );
}

// =============================================================================
// State
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_state_follows_lifecycle() {
    let backend = Arc::new(MemoryBackend::new().with_latency(Duration::from_millis(200)));
    let queue = spawn_queue(&config(), &backend);
    assert_eq!(queue.state(), QueueState::Idle);

    queue.queue_like(EntityType::Photo, "P1", true).unwrap();
    settle(&queue).await;
    assert_eq!(queue.state(), QueueState::Accumulating);

    tokio::time::sleep(QUIET_PERIOD + Duration::from_millis(50)).await;
    assert_eq!(queue.state(), QueueState::Flushing);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(queue.state(), QueueState::Idle);

    queue.unload().await.unwrap();
    assert_eq!(queue.state(), QueueState::Unloading);
}
