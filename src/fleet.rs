//! Fleet supervisor
//!
//! Owns the set of registered consoles, spawns one worker task per console
//! and exposes the operator command surface: start, stop, idle, resume,
//! routine changes, restarts and status summaries.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::botbase::BotbaseClient;
use crate::channel::ConsoleAddress;
use crate::config::BotEntry;
use crate::hub::TradeHub;
use crate::state::WorkerState;
use crate::types::RoutineKind;
use crate::worker::BotWorker;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FleetError {
    #[error("a bot is already registered at {0}")]
    DuplicateAddress(String),
    #[error("no bot registered at {0}")]
    UnknownBot(String),
    #[error("bot at {0} is already running")]
    AlreadyRunning(String),
}

struct BotSlot {
    address: ConsoleAddress,
    /// Routine the bot returns to on resume.
    assigned: RoutineKind,
    state: Arc<WorkerState>,
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

/// Supervises the worker fleet. One instance per process.
pub struct FleetSupervisor {
    hub: Arc<TradeHub>,
    bots: Mutex<Vec<BotSlot>>,
}

impl FleetSupervisor {
    pub fn new(hub: Arc<TradeHub>) -> Self {
        FleetSupervisor {
            hub,
            bots: Mutex::new(Vec::new()),
        }
    }

    /// Register every console listed in the settings.
    pub fn register_from_settings(&self) -> Result<(), FleetError> {
        let entries: Vec<BotEntry> = self.hub.settings.bots.clone();
        for entry in entries {
            self.register(
                ConsoleAddress {
                    host: entry.host,
                    port: entry.port,
                },
                entry.routine,
            )?;
        }
        Ok(())
    }

    /// Register a console. Addresses must be unique across the fleet.
    pub fn register(
        &self,
        address: ConsoleAddress,
        routine: RoutineKind,
    ) -> Result<(), FleetError> {
        let mut bots = self.bots.lock();
        if bots.iter().any(|b| b.address == address) {
            return Err(FleetError::DuplicateAddress(address.to_string()));
        }
        let label = format!("bot-{}", bots.len() + 1);
        let state = Arc::new(WorkerState::new(label, address.to_string()));
        state.request_routine(routine);
        bots.push(BotSlot {
            address,
            assigned: routine,
            state,
            token: CancellationToken::new(),
            handle: None,
        });
        Ok(())
    }

    fn find_index(&self, address: &str) -> Result<usize, FleetError> {
        self.bots
            .lock()
            .iter()
            .position(|b| b.address.to_string() == address)
            .ok_or_else(|| FleetError::UnknownBot(address.to_string()))
    }

    /// Spawn the worker task for one console.
    pub fn start(&self, address: &str) -> Result<(), FleetError> {
        let index = self.find_index(address)?;
        let mut bots = self.bots.lock();
        let slot = &mut bots[index];
        if slot.handle.as_ref().is_some_and(|h| !h.is_finished()) {
            return Err(FleetError::AlreadyRunning(address.to_string()));
        }
        slot.token = CancellationToken::new();
        slot.state.request_routine(slot.assigned);

        let channel = BotbaseClient::new(
            slot.address.clone(),
            Duration::from_millis(self.hub.settings.timings.op_timeout_ms),
        );
        let mut worker = BotWorker::new(
            channel,
            Arc::clone(&self.hub),
            Arc::clone(&slot.state),
            slot.token.clone(),
        );
        info!(bot = %slot.state.label, address = %slot.address, "starting worker");
        slot.handle = Some(tokio::spawn(async move { worker.main_loop().await }));
        Ok(())
    }

    /// Cancel one worker and wait for it to wind down.
    pub async fn stop(&self, address: &str) -> Result<(), FleetError> {
        let index = self.find_index(address)?;
        let handle = {
            let mut bots = self.bots.lock();
            let slot = &mut bots[index];
            slot.token.cancel();
            slot.handle.take()
        };
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        Ok(())
    }

    /// Park a worker in the idle routine without stopping its session.
    pub fn idle(&self, address: &str) -> Result<(), FleetError> {
        let index = self.find_index(address)?;
        self.bots.lock()[index]
            .state
            .request_routine(RoutineKind::Idle);
        Ok(())
    }

    /// Return an idled worker to its assigned routine.
    pub fn resume(&self, address: &str) -> Result<(), FleetError> {
        let index = self.find_index(address)?;
        let bots = self.bots.lock();
        bots[index].state.request_routine(bots[index].assigned);
        Ok(())
    }

    /// Reassign a worker's routine; takes effect at its next checkpoint.
    pub fn change_routine(
        &self,
        address: &str,
        routine: RoutineKind,
    ) -> Result<(), FleetError> {
        let index = self.find_index(address)?;
        let mut bots = self.bots.lock();
        bots[index].assigned = routine;
        bots[index].state.request_routine(routine);
        Ok(())
    }

    /// Full stop/start cycle for one console.
    pub async fn restart(&self, address: &str) -> Result<(), FleetError> {
        self.stop(address).await?;
        self.start(address)
    }

    pub fn start_all(&self) {
        let addresses: Vec<String> = self
            .bots
            .lock()
            .iter()
            .map(|b| b.address.to_string())
            .collect();
        for address in addresses {
            if let Err(e) = self.start(&address) {
                info!(%address, error = %e, "start skipped");
            }
        }
    }

    pub async fn stop_all(&self) {
        let addresses: Vec<String> = self
            .bots
            .lock()
            .iter()
            .map(|b| b.address.to_string())
            .collect();
        for address in addresses {
            let _ = self.stop(&address).await;
        }
    }

    pub async fn restart_all(&self) {
        let addresses: Vec<String> = self
            .bots
            .lock()
            .iter()
            .map(|b| b.address.to_string())
            .collect();
        for address in addresses {
            let _ = self.restart(&address).await;
        }
    }

    /// One status line per registered bot.
    pub fn summaries(&self) -> Vec<String> {
        self.bots
            .lock()
            .iter()
            .map(|b| b.state.summary())
            .collect()
    }

    pub fn bot_count(&self) -> usize {
        self.bots.lock().len()
    }

    /// Machine-readable fleet status for operator tooling.
    pub fn status_json(&self) -> serde_json::Value {
        let bots: Vec<serde_json::Value> = self
            .bots
            .lock()
            .iter()
            .map(|b| {
                json!({
                    "label": b.state.label,
                    "address": b.address.to_string(),
                    "routine": b.state.current_routine().to_string(),
                    "assigned": b.assigned.to_string(),
                    "running": b.state.is_running(),
                })
            })
            .collect();
        let (specific, clones, dumps, distribution) = self.hub.counts.snapshot();
        let waiting: usize = [RoutineKind::LinkTrade, RoutineKind::Clone, RoutineKind::Dump]
            .iter()
            .map(|r| self.hub.queue.waiting_count(*r))
            .sum();
        json!({
            "bots": bots,
            "queue": {
                "waiting": waiting,
                "fallback": self.hub.queue.fallback_count(),
            },
            "completed": {
                "specific": specific,
                "clones": clones,
                "dumps": dumps,
                "distribution": distribution,
            },
        })
    }
}
