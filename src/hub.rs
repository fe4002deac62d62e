//! The trade hub: everything workers and the inbound surface share.
//!
//! Owns the queue, the rendezvous barrier, the counters and the settings.
//! Inbound callers enqueue through here and get queue receipts back; workers
//! pull from here.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rand::Rng;
use tracing::debug;

use crate::barrier::SyncBarrier;
use crate::config::RunnerSettings;
use crate::queue::TradeQueue;
use crate::request::{
    GameEntity, LinkCode, SilentNotifier, TradeNotifier, TradeRequest, TrainerInfo,
};
use crate::state::TradeCounts;
use crate::types::{QueueError, Significance, TradeKind};

/// Acknowledgement returned to a successful enqueue.
#[derive(Debug, Clone, Copy)]
pub struct QueueReceipt {
    pub request_id: u64,
    pub position: usize,
    pub eta_minutes: u64,
}

/// Shared hub handed to every worker and the inbound surface.
pub struct TradeHub {
    pub settings: RunnerSettings,
    pub queue: TradeQueue,
    pub barrier: SyncBarrier,
    pub counts: TradeCounts,
    active_bots: AtomicUsize,
}

impl TradeHub {
    pub fn new(settings: RunnerSettings) -> Arc<Self> {
        Arc::new(TradeHub {
            settings,
            queue: TradeQueue::new(),
            barrier: SyncBarrier::new(),
            counts: TradeCounts::new(),
            active_bots: AtomicUsize::new(0),
        })
    }

    pub fn worker_started(&self) {
        self.active_bots.fetch_add(1, Ordering::Relaxed);
    }

    pub fn worker_stopped(&self) {
        self.active_bots.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn active_bots(&self) -> usize {
        self.active_bots.load(Ordering::Relaxed)
    }

    /// Validate and queue a trade request; notifies the requester of their
    /// position and estimated wait.
    #[allow(clippy::too_many_arguments)]
    pub fn enqueue(
        &self,
        kind: TradeKind,
        code: u32,
        payload: Option<GameEntity>,
        trainer: TrainerInfo,
        significance: Significance,
        synchronized: bool,
        notifier: Arc<dyn TradeNotifier>,
    ) -> Result<QueueReceipt, QueueError> {
        let code = LinkCode::new(code)?;
        let req = TradeRequest::new(
            kind,
            significance,
            code,
            payload,
            trainer,
            synchronized,
            Arc::clone(&notifier),
        );
        let request_id = req.id;
        let user_id = req.trainer.id;
        self.queue.enqueue(req)?;

        let position = self
            .queue
            .check_position(user_id)
            .map(|(_, p)| p)
            .unwrap_or(1);
        let eta_minutes =
            TradeQueue::estimate_wait_minutes(position, self.active_bots().max(1));
        notifier.queued(position, eta_minutes);
        debug!(user = user_id, kind = %kind, position, eta_minutes, "request queued");
        Ok(QueueReceipt {
            request_id,
            position,
            eta_minutes,
        })
    }

    /// Current queue position for a user, if they have an unclaimed request.
    pub fn check_status(&self, user_id: u64) -> Option<(TradeKind, usize)> {
        self.queue.check_position(user_id)
    }

    /// Withdraw a user's pending request. Returns whether anything was removed.
    pub fn clear_entry(&self, user_id: u64) -> bool {
        self.queue.remove(user_id).is_some()
    }

    /// Top up the fallback lane with distribution entries.
    ///
    /// Codes are random or fixed per the distribution settings; payloads come
    /// from whatever pool the operator wired in.
    pub fn add_distribution_entries(&self, payloads: Vec<GameEntity>) {
        for payload in payloads {
            let code = if self.settings.distribution.random_code {
                rand::thread_rng().gen_range(0..=crate::request::MAX_LINK_CODE)
            } else {
                self.settings.distribution.fixed_code
            };
            let code = match LinkCode::new(code) {
                Ok(code) => code,
                Err(_) => continue,
            };
            let req = TradeRequest::new(
                TradeKind::Batch,
                Significance::Normal,
                code,
                Some(payload),
                TrainerInfo {
                    name: String::from("distribution"),
                    id: 0,
                },
                false,
                Arc::new(SilentNotifier),
            );
            // Fallback entries bypass uniqueness; enqueue cannot fail.
            let _ = self.queue.enqueue(req);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RoutineKind;

    fn trainer(id: u64) -> TrainerInfo {
        TrainerInfo {
            name: format!("user{id}"),
            id,
        }
    }

    #[test]
    fn enqueue_validates_code() {
        let hub = TradeHub::new(RunnerSettings::default());
        let err = hub
            .enqueue(
                TradeKind::Specific,
                100_000_000,
                None,
                trainer(1),
                Significance::Normal,
                false,
                Arc::new(SilentNotifier),
            )
            .unwrap_err();
        assert_eq!(err, QueueError::InvalidCode(100_000_000));
    }

    #[test]
    fn enqueue_reports_position() {
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

        let second = hub
            .enqueue(
                TradeKind::Specific,
                1111,
                Some(GameEntity::new(vec![2])),
                trainer(2),
                Significance::Normal,
                false,
                Arc::new(SilentNotifier),
            )
            .unwrap();
        assert_eq!(second.position, 2);
        assert!(second.eta_minutes >= first.eta_minutes);
    }

    #[test]
    fn duplicate_user_is_rejected() {
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
        let err = hub
            .enqueue(
                TradeKind::Dump,
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

    #[test]
    fn clear_entry_withdraws() {
        let hub = TradeHub::new(RunnerSettings::default());
        hub.enqueue(
            TradeKind::Specific,
            1,
            None,
            trainer(9),
            Significance::Normal,
            false,
            Arc::new(SilentNotifier),
        )
        .unwrap();
        assert!(hub.clear_entry(9));
        assert!(!hub.clear_entry(9));
        assert!(hub.check_status(9).is_none());
    }

    #[test]
    fn distribution_entries_fill_fallback() {
        let hub = TradeHub::new(RunnerSettings::default());
        hub.add_distribution_entries(vec![
            GameEntity::new(vec![1]),
            GameEntity::new(vec![2]),
        ]);
        assert_eq!(hub.queue.fallback_count(), 2);
        assert!(hub.queue.dequeue(RoutineKind::LinkTrade).is_none());
    }

    #[test]
    fn fixed_distribution_code_is_used() {
        let mut settings = RunnerSettings::default();
        settings.distribution.random_code = false;
        settings.distribution.fixed_code = 4455;
        let hub = TradeHub::new(settings);
        hub.add_distribution_entries(vec![GameEntity::new(vec![1])]);
        let req = hub.queue.dequeue_fallback().unwrap();
        assert_eq!(req.code.value(), 4455);
    }
}
