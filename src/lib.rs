//! Trade Runner Library
//!
//! Drives a fleet of remote consoles through scripted link trades on behalf
//! of queued users: priority queue, rendezvous barrier, per-console trade
//! state machines and the fleet supervisor.

pub mod barrier;
pub mod botbase;
pub mod channel;
pub mod config;
pub mod executor;
pub mod fleet;
pub mod hub;
pub mod offsets;
pub mod picto;
pub mod queue;
pub mod request;
pub mod state;
pub mod types;
pub mod worker;

// Re-export main types for convenience
pub use channel::{Button, ConsoleAddress, SessionChannel, Stick};
pub use config::{RunnerSettings, SyncOption};
pub use executor::{ConsoleExecutor, HostIdentity};
pub use fleet::{FleetError, FleetSupervisor};
pub use hub::{QueueReceipt, TradeHub};
pub use queue::TradeQueue;
pub use request::{GameEntity, LinkCode, PartnerInfo, TradeNotifier, TradeRequest, TrainerInfo};
pub use types::{
    QueueError, RoutineKind, SessionError, Significance, TradeKind, TradeOutcome, TransportError,
};
pub use worker::BotWorker;

#[cfg(test)]
mod tests;
