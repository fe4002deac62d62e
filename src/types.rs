//! Core types shared across the runner
//!
//! Routine/trade kinds, significance tiers, trade result codes and the
//! error taxonomy.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Category of work a bot worker is currently assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RoutineKind {
    /// Keep the session alive but perform no trade work.
    #[default]
    Idle,
    /// Serve link-trade requests (specific, random, mystery egg, batch).
    LinkTrade,
    /// Serve clone requests.
    Clone,
    /// Serve dump requests.
    Dump,
}

impl std::fmt::Display for RoutineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RoutineKind::Idle => write!(f, "idle"),
            RoutineKind::LinkTrade => write!(f, "link_trade"),
            RoutineKind::Clone => write!(f, "clone"),
            RoutineKind::Dump => write!(f, "dump"),
        }
    }
}

/// What a queued request asks the worker to do once a partner is found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeKind {
    /// Send the exact payload attached to the request.
    Specific,
    /// Payload was drawn at random before enqueue; no retry on failure.
    Random,
    /// Externally generated egg payload; follows the specific protocol.
    MysteryEgg,
    /// Capture what the partner shows, then send copies back.
    Clone,
    /// Passively record everything the partner shows; nothing is sent.
    Dump,
    /// Opportunistic distribution work served from the fallback queue.
    Batch,
}

impl TradeKind {
    /// The worker routine that serves this kind of request.
    pub fn routine(self) -> RoutineKind {
        match self {
            TradeKind::Specific | TradeKind::Random | TradeKind::MysteryEgg | TradeKind::Batch => {
                RoutineKind::LinkTrade
            }
            TradeKind::Clone => RoutineKind::Clone,
            TradeKind::Dump => RoutineKind::Dump,
        }
    }

    /// Batch work never sits in a per-kind queue; it feeds the fallback queue.
    pub fn is_fallback(self) -> bool {
        matches!(self, TradeKind::Batch)
    }
}

impl std::fmt::Display for TradeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradeKind::Specific => write!(f, "specific"),
            TradeKind::Random => write!(f, "random"),
            TradeKind::MysteryEgg => write!(f, "mystery_egg"),
            TradeKind::Clone => write!(f, "clone"),
            TradeKind::Dump => write!(f, "dump"),
            TradeKind::Batch => write!(f, "batch"),
        }
    }
}

/// Requester significance, fixed at enqueue time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Significance {
    Owner,
    Favored,
    #[default]
    Normal,
}

/// Queue tiers; lower values dequeue first.
pub mod tier {
    pub const OWNER: u32 = 1;
    pub const FAVORED: u32 = 2;
    pub const NORMAL: u32 = 3;
    /// Fallback/distribution entries, always last.
    pub const FREE: u32 = 9;
}

impl Significance {
    /// Numeric tier used for queue ordering.
    pub fn tier(self) -> u32 {
        match self {
            Significance::Owner => tier::OWNER,
            Significance::Favored => tier::FAVORED,
            Significance::Normal => tier::NORMAL,
        }
    }
}

/// Terminal result of one trade attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeOutcome {
    Success,
    /// Nobody showed up at the rendezvous before the wait budget elapsed.
    NoTrainerFound,
    /// Partner connected but never confirmed their half of the exchange.
    TrainerTooSlow,
    /// Partner backed out mid-exchange.
    TrainerLeft,
    /// Partner id is on the banned list.
    SuspiciousActivity,
    /// Cooperative cancellation was observed mid-protocol.
    RoutineCancel,
    /// The console was not in a serviceable state when the trade started.
    RecoverStart,
    /// Transport failure; the connection to the console was lost.
    ExceptionConnection,
    /// Unexpected internal failure.
    ExceptionInternal,
}

impl TradeOutcome {
    /// Whether a failed attempt with this result is worth one re-enqueue.
    pub fn should_attempt_retry(self) -> bool {
        matches!(
            self,
            TradeOutcome::RecoverStart | TradeOutcome::ExceptionConnection
        )
    }
}

impl std::fmt::Display for TradeOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TradeOutcome::Success => "Success",
            TradeOutcome::NoTrainerFound => "NoTrainerFound",
            TradeOutcome::TrainerTooSlow => "TrainerTooSlow",
            TradeOutcome::TrainerLeft => "TrainerLeft",
            TradeOutcome::SuspiciousActivity => "SuspiciousActivity",
            TradeOutcome::RoutineCancel => "RoutineCancel",
            TradeOutcome::RecoverStart => "RecoverStart",
            TradeOutcome::ExceptionConnection => "ExceptionConnection",
            TradeOutcome::ExceptionInternal => "ExceptionInternal",
        };
        write!(f, "{name}")
    }
}

/// Errors surfaced to the enqueue caller; never fatal to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("requester {0} already has a pending trade")]
    AlreadyQueued(u64),
    #[error("link code {0} is outside 0-99999999")]
    InvalidCode(u32),
}

/// Transport failures against the remote console.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection lost: {0}")]
    ConnectionLost(#[from] std::io::Error),
    #[error("{op} timed out after {after_ms} ms")]
    Timeout { op: &'static str, after_ms: u64 },
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("not connected")]
    NotConnected,
}

impl TransportError {
    pub fn timeout(op: &'static str, after_ms: u64) -> Self {
        TransportError::Timeout { op, after_ms }
    }
}

/// Failures while bringing up a console session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("host console reported invalid trainer data")]
    InvalidTrainerData,
}
