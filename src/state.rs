//! Shared observability state
//!
//! Per-worker status blocks the supervisor renders summaries from, and the
//! process-wide trade counters.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::info;

use crate::types::RoutineKind;

/// Live status of one bot worker, shared with the supervisor.
pub struct WorkerState {
    /// Short name used in logs and summaries.
    pub label: String,
    /// Console address string.
    pub connection: String,
    routine: RwLock<RoutineKind>,
    next_routine: RwLock<RoutineKind>,
    last_activity: RwLock<DateTime<Utc>>,
    last_log: RwLock<String>,
    running: AtomicBool,
}

impl WorkerState {
    pub fn new(label: impl Into<String>, connection: impl Into<String>) -> Self {
        WorkerState {
            label: label.into(),
            connection: connection.into(),
            routine: RwLock::new(RoutineKind::Idle),
            next_routine: RwLock::new(RoutineKind::Idle),
            last_activity: RwLock::new(Utc::now()),
            last_log: RwLock::new(String::from("starting")),
            running: AtomicBool::new(false),
        }
    }

    /// Record a status line: emits a log event and updates the summary block.
    pub fn log(&self, line: impl Into<String>) {
        let line = line.into();
        info!(bot = %self.label, "{line}");
        *self.last_log.write() = line;
        *self.last_activity.write() = Utc::now();
    }

    pub fn touch(&self) {
        *self.last_activity.write() = Utc::now();
    }

    pub fn current_routine(&self) -> RoutineKind {
        *self.routine.read()
    }

    /// Ask the worker to switch routine at its next safe checkpoint.
    pub fn request_routine(&self, routine: RoutineKind) {
        *self.next_routine.write() = routine;
    }

    /// Adopt the requested routine. Called by the worker between trades.
    pub fn iterate_next_routine(&self) -> RoutineKind {
        let next = *self.next_routine.read();
        *self.routine.write() = next;
        next
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// One-line operator summary.
    pub fn summary(&self) -> String {
        let age = Utc::now()
            .signed_duration_since(*self.last_activity.read())
            .num_seconds()
            .max(0);
        format!(
            "{} | {} - {} ~ {}s ago | {}",
            self.label,
            self.connection,
            self.current_routine(),
            age,
            self.last_log.read()
        )
    }
}

/// Process-wide completed-trade counters, bumped only on verified success.
#[derive(Default)]
pub struct TradeCounts {
    specific: AtomicU64,
    clones: AtomicU64,
    dumps: AtomicU64,
    distribution: AtomicU64,
}

impl TradeCounts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_specific(&self) {
        self.specific.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_clone(&self) {
        self.clones.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_dump(&self) {
        self.dumps.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_distribution(&self) {
        self.distribution.fetch_add(1, Ordering::Relaxed);
    }

    /// (specific, clones, dumps, distribution)
    pub fn snapshot(&self) -> (u64, u64, u64, u64) {
        (
            self.specific.load(Ordering::Relaxed),
            self.clones.load(Ordering::Relaxed),
            self.dumps.load(Ordering::Relaxed),
            self.distribution.load(Ordering::Relaxed),
        )
    }
}
