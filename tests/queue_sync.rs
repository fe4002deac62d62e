//! Queue and barrier behavior, end to end through the hub surface.

use std::sync::Arc;
use std::time::Duration;

use trade_runner::barrier::SyncBarrier;
use trade_runner::request::{GameEntity, SilentNotifier, TrainerInfo};
use trade_runner::types::{QueueError, RoutineKind, Significance, TradeKind};
use trade_runner::{RunnerSettings, TradeHub, TradeQueue};

fn trainer(id: u64) -> TrainerInfo {
    TrainerInfo {
        name: format!("user{id}"),
        id,
    }
}

#[test]
fn owner_jumps_the_line_but_not_midflight() {
    let hub = TradeHub::new(RunnerSettings::default());

    let first = hub
        .enqueue(
            TradeKind::Specific,
            12345678,
            Some(GameEntity::new(vec![1])),
            trainer(1),
            Significance::Normal,
            false,
            Arc::new(SilentNotifier),
        )
        .unwrap();
    assert_eq!(first.position, 1);

    let owner = hub
        .enqueue(
            TradeKind::Specific,
            1,
            Some(GameEntity::new(vec![2])),
            trainer(2),
            Significance::Owner,
            false,
            Arc::new(SilentNotifier),
        )
        .unwrap();
    assert_eq!(owner.position, 1);
    // The earlier normal-tier request got pushed back.
    assert_eq!(hub.check_status(1), Some((TradeKind::Specific, 2)));

    // Workers serve the owner first.
    let claimed = hub.queue.dequeue(RoutineKind::LinkTrade).unwrap();
    assert_eq!(claimed.trainer.id, 2);
    // The claimed request no longer has a queue position.
    assert_eq!(hub.check_status(2), None);
    assert_eq!(hub.check_status(1), Some((TradeKind::Specific, 1)));
}

#[test]
fn one_pending_trade_per_user_across_kinds() {
    let hub = TradeHub::new(RunnerSettings::default());
    hub.enqueue(
        TradeKind::Specific,
        1,
        None,
        trainer(5),
        Significance::Normal,
        false,
        Arc::new(SilentNotifier),
    )
    .unwrap();

    for kind in [TradeKind::Clone, TradeKind::Dump, TradeKind::Specific] {
        let err = hub
            .enqueue(
                kind,
                2,
                None,
                trainer(5),
                Significance::Normal,
                false,
                Arc::new(SilentNotifier),
            )
            .unwrap_err();
        assert_eq!(err, QueueError::AlreadyQueued(5));
    }

    // Withdrawal frees the slot.
    assert!(hub.clear_entry(5));
    assert!(hub
        .enqueue(
            TradeKind::Dump,
            3,
            None,
            trainer(5),
            Significance::Normal,
            false,
            Arc::new(SilentNotifier),
        )
        .is_ok());
}

#[test]
fn fifo_is_preserved_within_a_tier() {
    let hub = TradeHub::new(RunnerSettings::default());
    for id in 1..=5 {
        hub.enqueue(
            TradeKind::Specific,
            id as u32,
            None,
            trainer(id),
            Significance::Normal,
            false,
            Arc::new(SilentNotifier),
        )
        .unwrap();
    }
    for expected in 1..=5 {
        let req = hub.queue.dequeue(RoutineKind::LinkTrade).unwrap();
        assert_eq!(req.trainer.id, expected);
        hub.queue.release(expected);
    }
}

#[test]
fn wait_estimates_grow_with_position_and_shrink_with_workers() {
    let p2w1 = TradeQueue::estimate_wait_minutes(2, 1);
    let p6w1 = TradeQueue::estimate_wait_minutes(6, 1);
    let p6w3 = TradeQueue::estimate_wait_minutes(6, 3);
    assert!(p6w1 >= p2w1);
    assert!(p6w3 <= p6w1);
    // Positions never estimate to zero.
    assert!(TradeQueue::estimate_wait_minutes(1, 8) >= 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn synchronized_workers_release_together() {
    let barrier = Arc::new(SyncBarrier::new());
    for _ in 0..4 {
        barrier.join();
    }
    let mut handles = Vec::new();
    for _ in 0..4 {
        let b = Arc::clone(&barrier);
        handles.push(tokio::spawn(async move {
            b.arrive(Duration::from_secs(10)).await
        }));
    }
    for handle in handles {
        assert!(handle.await.unwrap());
    }
    // Membership is unchanged by a release.
    assert_eq!(barrier.participant_count(), 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn missing_participant_times_out_the_rest() {
    let barrier = Arc::new(SyncBarrier::new());
    for _ in 0..3 {
        barrier.join();
    }
    // Only two of three arrive.
    let mut handles = Vec::new();
    for _ in 0..2 {
        let b = Arc::clone(&barrier);
        handles.push(tokio::spawn(async move {
            b.arrive(Duration::from_millis(100)).await
        }));
    }
    for handle in handles {
        assert!(!handle.await.unwrap());
    }

    // After the stragglers withdrew, a full round still works.
    let mut handles = Vec::new();
    for _ in 0..3 {
        let b = Arc::clone(&barrier);
        handles.push(tokio::spawn(async move {
            b.arrive(Duration::from_secs(10)).await
        }));
    }
    for handle in handles {
        assert!(handle.await.unwrap());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn departure_closes_an_otherwise_full_generation() {
    let barrier = Arc::new(SyncBarrier::new());
    barrier.join();
    barrier.join();
    barrier.join();

    let mut handles = Vec::new();
    for _ in 0..2 {
        let b = Arc::clone(&barrier);
        handles.push(tokio::spawn(async move {
            b.arrive(Duration::from_secs(10)).await
        }));
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    // The third worker goes away instead of arriving; the two arrivals now
    // cover the whole membership and must be released.
    barrier.leave();
    for handle in handles {
        assert!(handle.await.unwrap());
    }
    assert_eq!(barrier.participant_count(), 2);
}

#[test]
fn fallback_never_starves_the_lanes() {
    let hub = TradeHub::new(RunnerSettings::default());
    hub.add_distribution_entries(vec![GameEntity::new(vec![9])]);
    hub.enqueue(
        TradeKind::Specific,
        1,
        None,
        trainer(1),
        Significance::Normal,
        false,
        Arc::new(SilentNotifier),
    )
    .unwrap();

    // A worker drains its lane before touching the fallback queue.
    let primary = hub.queue.dequeue(RoutineKind::LinkTrade).unwrap();
    assert_eq!(primary.trainer.id, 1);
    let fallback = hub.queue.dequeue_fallback().unwrap();
    assert_eq!(fallback.kind, TradeKind::Batch);
    assert!(hub.queue.dequeue_fallback().is_none());
}
