//! Dynamic-membership rendezvous barrier.
//!
//! Workers serving synchronized trades join before entering their link codes
//! and wait until every current participant has arrived, so a batch of
//! consoles starts searching at the same moment. Membership changes while a
//! generation is open are handled against the live participant count.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;

#[derive(Default)]
struct State {
    participants: usize,
    arrived: usize,
    generation: u64,
}

/// Rendezvous point shared by all synchronized workers.
pub struct SyncBarrier {
    state: Mutex<State>,
    release: watch::Sender<u64>,
}

impl Default for SyncBarrier {
    fn default() -> Self {
        let (release, _) = watch::channel(0);
        SyncBarrier {
            state: Mutex::new(State::default()),
            release,
        }
    }
}

impl SyncBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a worker as a rendezvous participant.
    pub fn join(&self) {
        self.state.lock().participants += 1;
    }

    /// Deregister a worker.
    ///
    /// If everyone still present has already arrived, the open generation
    /// closes immediately so the remaining waiters are not stranded.
    pub fn leave(&self) {
        let mut state = self.state.lock();
        state.participants = state.participants.saturating_sub(1);
        if state.participants == 0 {
            state.arrived = 0;
        } else if state.arrived >= state.participants {
            state.arrived = 0;
            state.generation += 1;
            let _ = self.release.send(state.generation);
        }
    }

    pub fn participant_count(&self) -> usize {
        self.state.lock().participants
    }

    /// Wait until all current participants have arrived, or `timeout`.
    ///
    /// Returns `true` when released by the barrier, `false` on timeout. A
    /// timed-out arrival is withdrawn so it cannot release a later generation
    /// the caller is no longer waiting on.
    pub async fn arrive(&self, timeout: Duration) -> bool {
        let mut rx = self.release.subscribe();
        let my_generation = {
            let mut state = self.state.lock();
            state.arrived += 1;
            if state.participants > 0 && state.arrived >= state.participants {
                state.arrived = 0;
                state.generation += 1;
                let _ = self.release.send(state.generation);
                return true;
            }
            state.generation
        };

        let released = tokio::time::timeout(timeout, async {
            loop {
                if *rx.borrow_and_update() > my_generation {
                    return;
                }
                if rx.changed().await.is_err() {
                    return;
                }
            }
        })
        .await
        .is_ok();

        if !released {
            let mut state = self.state.lock();
            if state.generation == my_generation {
                state.arrived = state.arrived.saturating_sub(1);
            }
        }
        released
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn all_participants_release_together() {
        let barrier = Arc::new(SyncBarrier::new());
        for _ in 0..3 {
            barrier.join();
        }

        let mut handles = Vec::new();
        for _ in 0..3 {
            let b = Arc::clone(&barrier);
            handles.push(tokio::spawn(async move {
                b.arrive(Duration::from_secs(5)).await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap());
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn lone_waiter_times_out() {
        let barrier = Arc::new(SyncBarrier::new());
        barrier.join();
        barrier.join();
        assert!(!barrier.arrive(Duration::from_millis(50)).await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn leave_releases_stranded_waiters() {
        let barrier = Arc::new(SyncBarrier::new());
        barrier.join();
        barrier.join();

        let b = Arc::clone(&barrier);
        let waiter = tokio::spawn(async move { b.arrive(Duration::from_secs(5)).await });

        tokio::time::sleep(Duration::from_millis(100)).await;
        barrier.leave();
        assert!(waiter.await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn timed_out_arrival_is_withdrawn() {
        let barrier = Arc::new(SyncBarrier::new());
        barrier.join();
        barrier.join();
        barrier.join();

        // One arrival times out and withdraws.
        assert!(!barrier.arrive(Duration::from_millis(50)).await);

        // The three live participants must now all arrive to release.
        let mut handles = Vec::new();
        for _ in 0..3 {
            let b = Arc::clone(&barrier);
            handles.push(tokio::spawn(async move {
                b.arrive(Duration::from_secs(5)).await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap());
        }
    }

    #[test]
    fn single_participant_passes_straight_through() {
        let barrier = SyncBarrier::new();
        barrier.join();
        assert!(tokio_test::block_on(
            barrier.arrive(Duration::from_millis(10))
        ));
    }
}
