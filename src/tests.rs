//! Cross-module unit tests.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::RunnerSettings;
use crate::hub::TradeHub;
use crate::request::{GameEntity, PartnerInfo, TradeNotifier, TrainerInfo};
use crate::types::{RoutineKind, Significance, TradeKind, TradeOutcome};

/// Notifier that records every callback for assertions.
#[derive(Default)]
pub struct RecordingNotifier {
    pub events: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }
}

impl TradeNotifier for RecordingNotifier {
    fn queued(&self, position: usize, eta_minutes: u64) {
        self.events
            .lock()
            .push(format!("queued:{position}:{eta_minutes}"));
    }
    fn initializing(&self, bot: &str) {
        self.events.lock().push(format!("initializing:{bot}"));
    }
    fn searching(&self, bot: &str) {
        self.events.lock().push(format!("searching:{bot}"));
    }
    fn partner_found(&self, partner: &PartnerInfo) {
        self.events.lock().push(format!("partner:{}", partner.name));
    }
    fn message(&self, text: &str) {
        self.events.lock().push(format!("message:{text}"));
    }
    fn entity(&self, entity: &GameEntity, caption: &str) {
        self.events
            .lock()
            .push(format!("entity:{caption}:{}", entity.fingerprint()));
    }
    fn finished(&self, received: GameEntity) {
        self.events
            .lock()
            .push(format!("finished:{}", received.fingerprint()));
    }
    fn canceled(&self, outcome: TradeOutcome) {
        self.events.lock().push(format!("canceled:{outcome}"));
    }
}

fn trainer(id: u64) -> TrainerInfo {
    TrainerInfo {
        name: format!("user{id}"),
        id,
    }
}

#[test]
fn enqueue_notifies_position_and_eta() {
    let hub = TradeHub::new(RunnerSettings::default());
    let notifier = RecordingNotifier::new();
    hub.enqueue(
        TradeKind::Specific,
        12345678,
        Some(GameEntity::new(vec![1])),
        trainer(1),
        Significance::Normal,
        false,
        notifier.clone(),
    )
    .unwrap();
    let events = notifier.events();
    assert_eq!(events.len(), 1);
    assert!(events[0].starts_with("queued:1:"));
}

#[test]
fn full_queue_cycle_allows_requeue_after_release() {
    let hub = TradeHub::new(RunnerSettings::default());
    let notifier = RecordingNotifier::new();
    hub.enqueue(
        TradeKind::Clone,
        7777,
        None,
        trainer(3),
        Significance::Favored,
        false,
        notifier.clone(),
    )
    .unwrap();

    let req = hub.queue.dequeue(RoutineKind::Clone).unwrap();
    assert!(req.is_processing());
    assert_eq!(req.significance, Significance::Favored);

    // Terminal state: the worker releases the user.
    req.set_processing(false);
    hub.queue.release(req.trainer.id);
    assert!(hub
        .enqueue(
            TradeKind::Specific,
            1,
            None,
            trainer(3),
            Significance::Normal,
            false,
            notifier,
        )
        .is_ok());
}

#[test]
fn retried_requests_do_not_retry_twice() {
    let hub = TradeHub::new(RunnerSettings::default());
    hub.enqueue(
        TradeKind::Specific,
        5,
        None,
        trainer(8),
        Significance::Normal,
        false,
        RecordingNotifier::new(),
    )
    .unwrap();
    let req = hub.queue.dequeue(RoutineKind::LinkTrade).unwrap();

    assert!(TradeOutcome::RecoverStart.should_attempt_retry());
    assert!(!req.was_retried());
    req.mark_retried();
    hub.queue.enqueue_retry(Arc::clone(&req));

    let again = hub.queue.dequeue(RoutineKind::LinkTrade).unwrap();
    assert_eq!(again.trainer.id, 8);
    // The latch is the guard against a second retry.
    assert!(again.was_retried());
}

#[test]
fn link_code_symbols_are_stable_per_request() {
    let hub = TradeHub::new(RunnerSettings::default());
    hub.enqueue(
        TradeKind::Specific,
        44556677,
        None,
        trainer(4),
        Significance::Normal,
        true,
        RecordingNotifier::new(),
    )
    .unwrap();
    let req = hub.queue.dequeue(RoutineKind::LinkTrade).unwrap();
    assert_eq!(req.code.picto_codes(), req.code.picto_codes());
    assert!(req.synchronized);
}

#[test]
fn eta_shrinks_with_more_workers() {
    let hub = TradeHub::new(RunnerSettings::default());
    hub.worker_started();
    hub.worker_started();
    hub.worker_started();

    for id in 1..=6 {
        hub.enqueue(
            TradeKind::Specific,
            id as u32,
            None,
            trainer(id),
            Significance::Normal,
            false,
            RecordingNotifier::new(),
        )
        .unwrap();
    }
    let notifier = RecordingNotifier::new();
    hub.enqueue(
        TradeKind::Specific,
        99,
        None,
        trainer(99),
        Significance::Normal,
        false,
        notifier.clone(),
    )
    .unwrap();
    let events = notifier.events();
    // Position 7 across 3 workers is 3 rounds; well under the 7 a single
    // worker would need.
    assert!(events[0].starts_with("queued:7:"));
    assert_eq!(hub.active_bots(), 3);
}
