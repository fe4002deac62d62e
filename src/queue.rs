//! The shared trade queue.
//!
//! Per-routine priority lanes ordered by (tier, arrival), a separate fallback
//! lane for distribution work, and the one-pending-trade-per-user rule. All
//! operations take one short lock; nothing here blocks.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::request::TradeRequest;
use crate::types::{tier, QueueError, RoutineKind, TradeKind};

/// Average seconds one trade occupies a worker, used for wait estimates.
const AVG_TRADE_SECONDS: u64 = 92;

struct Slot {
    tier: u32,
    seq: u64,
    req: Arc<TradeRequest>,
}

#[derive(Default)]
struct Inner {
    /// Lanes keyed by the routine that serves them.
    queues: HashMap<RoutineKind, Vec<Slot>>,
    /// Distribution entries, plain FIFO, only drained when lanes are empty.
    fallback: VecDeque<Arc<TradeRequest>>,
    /// Requester id to the lane holding their pending trade.
    users: HashMap<u64, RoutineKind>,
}

/// Cross-worker trade queue. Cheap to clone via `Arc` at the hub.
#[derive(Default)]
pub struct TradeQueue {
    inner: Mutex<Inner>,
    seq: AtomicU64,
}

impl TradeQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    /// Add a request, enforcing one pending trade per requester.
    ///
    /// Fallback-kind requests skip uniqueness; they carry no real requester.
    pub fn enqueue(&self, req: Arc<TradeRequest>) -> Result<(), QueueError> {
        let mut inner = self.inner.lock();
        if req.kind.is_fallback() {
            inner.fallback.push_back(req);
            return Ok(());
        }
        if inner.users.contains_key(&req.trainer.id) {
            return Err(QueueError::AlreadyQueued(req.trainer.id));
        }
        let routine = req.kind.routine();
        inner.users.insert(req.trainer.id, routine);
        let slot = Slot {
            tier: req.significance.tier(),
            seq: self.next_seq(),
            req,
        };
        inner.queues.entry(routine).or_default().push(slot);
        Ok(())
    }

    /// Re-admit a failed request for its single retry.
    ///
    /// Lands at `min(original tier, favored)`: owner retries keep their tier,
    /// everyone else joins the back of the favored band. Uniqueness is skipped
    /// because the user's entry never left the ledger.
    pub fn enqueue_retry(&self, req: Arc<TradeRequest>) {
        let mut inner = self.inner.lock();
        if req.kind.is_fallback() {
            inner.fallback.push_back(req);
            return;
        }
        let routine = req.kind.routine();
        inner.users.insert(req.trainer.id, routine);
        let slot = Slot {
            tier: req.significance.tier().min(tier::FAVORED),
            seq: self.next_seq(),
            req,
        };
        inner.queues.entry(routine).or_default().push(slot);
    }

    /// Claim the best waiting request for `routine`, if any.
    ///
    /// Best is lowest tier, then earliest arrival. The user's ledger entry
    /// stays until `release`, so they cannot re-queue mid-trade.
    pub fn dequeue(&self, routine: RoutineKind) -> Option<Arc<TradeRequest>> {
        let mut inner = self.inner.lock();
        let lane = inner.queues.get_mut(&routine)?;
        let best = lane
            .iter()
            .enumerate()
            .min_by_key(|(_, s)| (s.tier, s.seq))
            .map(|(i, _)| i)?;
        let slot = lane.remove(best);
        slot.req.set_processing(true);
        Some(slot.req)
    }

    /// Claim the oldest distribution entry.
    pub fn dequeue_fallback(&self) -> Option<Arc<TradeRequest>> {
        let req = self.inner.lock().fallback.pop_front()?;
        req.set_processing(true);
        Some(req)
    }

    /// 1-based position of a user's unclaimed request within its lane.
    ///
    /// `None` when the user has nothing waiting (includes in-flight trades).
    pub fn check_position(&self, user_id: u64) -> Option<(TradeKind, usize)> {
        let inner = self.inner.lock();
        let routine = *inner.users.get(&user_id)?;
        let lane = inner.queues.get(&routine)?;
        let me = lane
            .iter()
            .find(|s| s.req.trainer.id == user_id && !s.req.is_processing())?;
        let ahead = lane
            .iter()
            .filter(|s| (s.tier, s.seq) < (me.tier, me.seq))
            .count();
        Some((me.req.kind, ahead + 1))
    }

    /// Drop a user's request wherever it sits. Returns the removed request.
    pub fn remove(&self, user_id: u64) -> Option<Arc<TradeRequest>> {
        let mut inner = self.inner.lock();
        inner.users.remove(&user_id);
        for lane in inner.queues.values_mut() {
            if let Some(i) = lane.iter().position(|s| s.req.trainer.id == user_id) {
                return Some(lane.remove(i).req);
            }
        }
        None
    }

    /// Clear a user's ledger entry after their trade reached a terminal state.
    pub fn release(&self, user_id: u64) {
        self.inner.lock().users.remove(&user_id);
    }

    pub fn is_user_queued(&self, user_id: u64) -> bool {
        self.inner.lock().users.contains_key(&user_id)
    }

    /// Waiting (unclaimed) entries for one routine.
    pub fn waiting_count(&self, routine: RoutineKind) -> usize {
        let inner = self.inner.lock();
        inner
            .queues
            .get(&routine)
            .map(|lane| lane.iter().filter(|s| !s.req.is_processing()).count())
            .unwrap_or(0)
    }

    pub fn fallback_count(&self) -> usize {
        self.inner.lock().fallback.len()
    }

    /// Rough wait for the given queue position across `workers` consoles.
    pub fn estimate_wait_minutes(position: usize, workers: usize) -> u64 {
        let workers = workers.max(1) as u64;
        let rounds = (position as u64).div_ceil(workers);
        (rounds * AVG_TRADE_SECONDS).div_ceil(60)
    }
}
