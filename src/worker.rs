//! Per-console bot worker.
//!
//! One task per console: claims requests from the hub queue, drives the
//! console through the matching trade protocol and reports terminal outcomes.
//! Cancellation is cooperative; the token is observed at loop boundaries and
//! between protocol phases, never mid-exchange.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::channel::{Button, SessionChannel, Stick, STICK_MAX};
use crate::config::SyncOption;
use crate::executor::{ConsoleExecutor, HostIdentity};
use crate::hub::TradeHub;
use crate::offsets::ScreenScenario;
use crate::request::{GameEntity, PartnerInfo, TradeRequest};
use crate::state::WorkerState;
use crate::types::{RoutineKind, SessionError, TradeKind, TradeOutcome, TransportError};

/// Maximum sampling rounds while capturing clone source entities.
const CLONE_SAMPLE_ROUNDS: usize = 6;
/// Seconds between clone sampling rounds.
const CLONE_SAMPLE_INTERVAL_SECS: u64 = 5;
/// Passive dump window.
const DUMP_WINDOW_SECS: u64 = 30;

/// One bot worker bound to one console session.
pub struct BotWorker<C: SessionChannel> {
    exec: ConsoleExecutor<C>,
    hub: Arc<TradeHub>,
    state: Arc<WorkerState>,
    token: CancellationToken,
    host: Option<HostIdentity>,
    in_barrier: bool,
    failed_barrier: u32,
    idle_polls: u64,
}

impl<C: SessionChannel> BotWorker<C> {
    pub fn new(
        channel: C,
        hub: Arc<TradeHub>,
        state: Arc<WorkerState>,
        token: CancellationToken,
    ) -> Self {
        BotWorker {
            exec: ConsoleExecutor::new(channel),
            hub,
            state,
            token,
            host: None,
            in_barrier: false,
            failed_barrier: 0,
            idle_polls: 0,
        }
    }

    /// Run until cancelled or the session is lost beyond recovery.
    pub async fn main_loop(&mut self) {
        self.state.set_running(true);
        self.hub.worker_started();
        let result = self.run_session().await;
        if let Err(e) = result {
            error!(bot = %self.state.label, error = %e, "worker stopped on session error");
            self.state.log(format!("stopped: {e}"));
        }
        self.hard_stop().await;
        self.hub.worker_stopped();
        self.state.set_running(false);
    }

    async fn run_session(&mut self) -> Result<(), SessionError> {
        self.exec.connect().await?;
        let host = self
            .exec
            .initialize_session(self.hub.settings.timings.screen_off)
            .await?;
        self.state
            .log(format!("session up as {} ({})", host.name, host.display_id));
        self.host = Some(host);
        self.inner_loop().await?;
        Ok(())
    }

    async fn inner_loop(&mut self) -> Result<(), SessionError> {
        while !self.token.is_cancelled() {
            let routine = self.state.iterate_next_routine();
            let step = match routine {
                RoutineKind::Idle => self.idle_step().await,
                other => self.do_trades(other).await,
            };
            if let Err(e) = step {
                match e {
                    TransportError::ConnectionLost(_) | TransportError::Timeout { .. } => {
                        self.try_reconnect().await?;
                    }
                    other => return Err(other.into()),
                }
            }
        }
        Ok(())
    }

    /// Stop everything this worker holds across the shared structures.
    async fn hard_stop(&mut self) {
        if self.in_barrier {
            self.hub.barrier.leave();
            self.in_barrier = false;
        }
        self.exec.clean_exit().await;
        self.exec.disconnect().await;
        self.state.log("worker stopped");
    }

    async fn try_reconnect(&mut self) -> Result<(), SessionError> {
        let attempts = self.hub.settings.timings.reconnect_attempts;
        let delay = Duration::from_millis(self.hub.settings.timings.extra_reconnect_delay_ms);
        for attempt in 1..=attempts {
            if self.token.is_cancelled() {
                break;
            }
            warn!(bot = %self.state.label, attempt, "reconnecting to console");
            self.exec.disconnect().await;
            tokio::time::sleep(delay).await;
            match self.exec.connect().await {
                Ok(()) => {
                    self.exec.channel_mut().attach_controller().await?;
                    self.state.log(format!("reconnected after {attempt} attempts"));
                    return Ok(());
                }
                Err(e) => {
                    warn!(bot = %self.state.label, attempt, error = %e, "reconnect failed");
                }
            }
        }
        Err(TransportError::NotConnected.into())
    }

    /// Idle routine body: keep the session warm, do nothing else.
    async fn idle_step(&mut self) -> Result<(), TransportError> {
        if self.idle_polls == 0 {
            self.state.log("idling");
        }
        self.anti_idle_tick().await?;
        tokio::time::sleep(Duration::from_secs(1)).await;
        Ok(())
    }

    /// Every tenth poll presses a harmless button so the console session does
    /// not time out.
    async fn anti_idle_tick(&mut self) -> Result<(), TransportError> {
        self.idle_polls += 1;
        if self.hub.settings.trade.anti_idle && self.idle_polls % 10 == 0 {
            self.exec.click(Button::B, 100).await?;
        }
        Ok(())
    }

    async fn do_trades(&mut self, routine: RoutineKind) -> Result<(), TransportError> {
        let claimed = self.hub.queue.dequeue(routine).or_else(|| {
            if routine == RoutineKind::LinkTrade {
                self.hub.queue.dequeue_fallback()
            } else {
                None
            }
        });
        let Some(req) = claimed else {
            self.anti_idle_tick().await?;
            tokio::time::sleep(Duration::from_secs(1)).await;
            return Ok(());
        };
        self.idle_polls = 0;
        self.perform_trade(req).await
    }

    async fn perform_trade(&mut self, req: Arc<TradeRequest>) -> Result<(), TransportError> {
        self.state.log(format!(
            "starting {} trade for {} (code {})",
            req.kind, req.trainer.name, req.code
        ));
        match self.perform_routine(&req).await {
            Ok(TradeOutcome::Success) => {
                req.set_processing(false);
                self.hub.queue.release(req.trainer.id);
                self.state.log(format!("trade finished for {}", req.trainer.name));
                Ok(())
            }
            Ok(outcome) => {
                self.handle_aborted_trade(&req, outcome);
                Ok(())
            }
            Err(e) => {
                self.handle_aborted_trade(&req, TradeOutcome::ExceptionConnection);
                Err(e)
            }
        }
    }

    /// Single point deciding retry versus final cancellation.
    ///
    /// At most one retry per request, never for random-payload trades, only
    /// for outcomes the retry classification allows. Exactly one cancellation
    /// notification reaches the requester on the no-retry path.
    fn handle_aborted_trade(&mut self, req: &Arc<TradeRequest>, outcome: TradeOutcome) {
        req.set_processing(false);
        let retry = outcome.should_attempt_retry()
            && req.kind != TradeKind::Random
            && !req.was_retried();
        if retry {
            req.mark_retried();
            self.state.log(format!(
                "requeueing {} after {outcome}",
                req.trainer.name
            ));
            req.notifier
                .message("Something went wrong on the console; you were put back in the queue.");
            self.hub.queue.enqueue_retry(Arc::clone(req));
        } else {
            self.state
                .log(format!("trade for {} canceled: {outcome}", req.trainer.name));
            req.notifier.canceled(outcome);
            self.hub.queue.release(req.trainer.id);
        }
    }

    async fn perform_routine(
        &mut self,
        req: &Arc<TradeRequest>,
    ) -> Result<TradeOutcome, TransportError> {
        self.update_barrier(req.synchronized);
        req.notifier.initializing(&self.state.label);

        // Inject the outgoing payload before touching the menus.
        if let Some(payload) = &req.payload {
            if payload.is_present() {
                self.exec.write_slot(0, 0, payload).await?;
            }
        }

        if !self.exec.is_on_overworld().await? {
            self.exec.exit_trade(true).await?;
            return Ok(TradeOutcome::RecoverStart);
        }

        if !self.exec.navigate_to_trade_screen().await? {
            self.exec.exit_trade(true).await?;
            return Ok(TradeOutcome::RecoverStart);
        }
        self.exec.enter_link_code(&req.code.picto_codes()).await?;

        self.wait_at_barrier_if_applicable().await;
        if self.token.is_cancelled() {
            self.exec.exit_trade(false).await?;
            return Ok(TradeOutcome::RoutineCancel);
        }

        req.notifier.searching(&self.state.label);
        self.state.log(format!("searching for a partner ({})", req.code));
        if !self.wait_for_partner().await? {
            self.exec.exit_trade(false).await?;
            return Ok(TradeOutcome::NoTrainerFound);
        }
        // Let the trade screen settle before reading partner data.
        tokio::time::sleep(Duration::from_secs(10)).await;

        let partner = match self.identify_partner().await? {
            Some(partner) => partner,
            None => {
                self.exec.exit_trade(false).await?;
                return Ok(TradeOutcome::NoTrainerFound);
            }
        };
        if self.hub.settings.abuse.is_banned(partner.sync_id) {
            warn!(bot = %self.state.label, partner = %partner.name, "banned partner refused");
            self.exec.exit_trade(false).await?;
            return Ok(TradeOutcome::SuspiciousActivity);
        }
        req.notifier.partner_found(&partner);
        self.state.log(format!(
            "found partner {} ({})",
            partner.name, partner.display_id
        ));

        match req.kind {
            TradeKind::Dump => {
                let outcome = self.process_dump(req).await?;
                self.exec.exit_trade(false).await?;
                Ok(outcome)
            }
            TradeKind::Clone => self.process_clone(req).await,
            _ => self.process_specific(req).await,
        }
    }

    // Barrier handling.

    fn update_barrier(&mut self, synchronized: bool) {
        let should_wait =
            synchronized && self.hub.settings.sync.mode == SyncOption::LocalSync;
        if should_wait && !self.in_barrier {
            self.hub.barrier.join();
            self.in_barrier = true;
            info!(bot = %self.state.label, "joined the rendezvous barrier");
        } else if !should_wait && self.in_barrier {
            self.hub.barrier.leave();
            self.in_barrier = false;
            info!(bot = %self.state.label, "left the rendezvous barrier");
        }
    }

    async fn wait_at_barrier_if_applicable(&mut self) {
        if !self.in_barrier {
            return;
        }
        let mut timeout = Duration::from_secs(self.hub.settings.sync.timeout_secs);
        if self.failed_barrier > 0 {
            timeout *= 2;
        }
        if self.hub.barrier.arrive(timeout).await {
            self.failed_barrier = 0;
            self.state.log("barrier released, searching together");
        } else {
            self.failed_barrier += 1;
            warn!(
                bot = %self.state.label,
                failures = self.failed_barrier,
                "barrier timed out, searching alone"
            );
        }
    }

    // Partner matching.

    /// Poll until the link-search spinner goes away or the wait budget ends.
    async fn wait_for_partner(&mut self) -> Result<bool, TransportError> {
        let budget = Duration::from_secs(self.hub.settings.trade.trade_wait_secs);
        let started = tokio::time::Instant::now();
        while started.elapsed() < budget {
            if self.token.is_cancelled() {
                return Ok(false);
            }
            if !self.exec.is_in_waiting_screen().await? {
                return Ok(true);
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        Ok(false)
    }

    /// Read both trader blocks and pick the one that is not us.
    async fn identify_partner(&mut self) -> Result<Option<PartnerInfo>, TransportError> {
        let (first, second) = self.exec.read_traders().await?;
        let host = match &self.host {
            Some(host) => host,
            None => return Ok(None),
        };
        let partner = if host.matches(&first) { second } else { first };
        if partner.is_empty() || host.matches(&partner) {
            return Ok(None);
        }
        Ok(Some(partner))
    }

    // Trade protocols.

    async fn process_specific(
        &mut self,
        req: &Arc<TradeRequest>,
    ) -> Result<TradeOutcome, TransportError> {
        // Select our offered slot.
        while self.exec.current_screen().await? == ScreenScenario::Box {
            self.exec.click(Button::A, 1_000).await?;
        }
        req.notifier
            .message("You have 15 seconds to select your trade entity.");
        tokio::time::sleep(Duration::from_secs(15)).await;

        let sent_hash = req.payload.as_ref().map(|p| p.content_hash());
        let outcome = self.confirm_and_start_trading(0).await?;
        if outcome != TradeOutcome::Success {
            self.exec.exit_trade(true).await?;
            return Ok(outcome);
        }
        if self.token.is_cancelled() {
            self.exec.exit_trade(false).await?;
            return Ok(TradeOutcome::RoutineCancel);
        }

        let received = self.exec.read_slot(0, 0).await?;
        if Some(received.content_hash()) == sent_hash {
            // Partner never committed; our own payload is still in the slot.
            self.exec.exit_trade(true).await?;
            return Ok(TradeOutcome::TrainerTooSlow);
        }

        if req.kind == TradeKind::Batch {
            self.hub.counts.add_distribution();
        } else {
            self.hub.counts.add_specific();
        }
        req.notifier.finished(received);

        // Sit through the exchange animation before backing out.
        for _ in 0..30 {
            self.exec.click(Button::B, 500).await?;
        }
        self.exec.exit_trade(false).await?;
        Ok(TradeOutcome::Success)
    }

    /// Wait for the exchange to actually begin and complete.
    ///
    /// The first bytes of our slot change once the partner's entity lands in
    /// it; an unchanged header past the confirm budget means the partner
    /// never confirmed.
    async fn confirm_and_start_trading(
        &mut self,
        slot_index: u64,
    ) -> Result<TradeOutcome, TransportError> {
        let original_header = self.exec.read_slot_header(0, slot_index).await?;
        self.exec.click(Button::A, 3_000).await?;
        for _ in 0..10 {
            match self.exec.current_screen().await? {
                ScreenScenario::Box | ScreenScenario::Menu => {
                    return Ok(TradeOutcome::TrainerLeft)
                }
                _ => {}
            }
            self.exec.click(Button::A, 1_500).await?;
        }

        let budget = Duration::from_secs(self.hub.settings.trade.max_trade_confirm_secs);
        let started = tokio::time::Instant::now();
        loop {
            let header = self.exec.read_slot_header(0, slot_index).await?;
            if header != original_header {
                // Exchange animation runs after the slot flips.
                tokio::time::sleep(Duration::from_secs(15)).await;
                return Ok(TradeOutcome::Success);
            }
            if started.elapsed() >= budget {
                return Ok(TradeOutcome::TrainerTooSlow);
            }
            if self.exec.is_on_overworld().await? {
                return Ok(TradeOutcome::TrainerLeft);
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }

    async fn process_clone(
        &mut self,
        req: &Arc<TradeRequest>,
    ) -> Result<TradeOutcome, TransportError> {
        req.notifier.message(
            "Show me each entity you want cloned, one at a time. I will capture for 30 seconds.",
        );
        tokio::time::sleep(Duration::from_secs(10)).await;

        // Sampling pass: collect distinct offers.
        let mut clones: Vec<GameEntity> = Vec::new();
        let first = self.exec.read_offered().await?;
        if first.is_present() {
            req.notifier.entity(&first, "captured");
            clones.push(first);
        }
        for _ in 0..CLONE_SAMPLE_ROUNDS {
            tokio::time::sleep(Duration::from_secs(CLONE_SAMPLE_INTERVAL_SECS)).await;
            let offer = self.exec.read_offered().await?;
            if !offer.is_present() {
                continue;
            }
            if clones.iter().any(|c| c.content_hash() == offer.content_hash()) {
                continue;
            }
            req.notifier.entity(&offer, "captured");
            clones.push(offer);
        }
        if clones.is_empty() {
            self.exec.exit_trade(true).await?;
            return Ok(TradeOutcome::TrainerTooSlow);
        }
        req.notifier.message(&format!(
            "Captured {} distinct entities. Leave the trade and reconnect with the same code.",
            clones.len()
        ));
        self.exec.exit_trade(false).await?;

        // Inject the copies into consecutive slots.
        for (i, clone) in clones.iter().enumerate() {
            self.exec.write_slot(0, i as u64, clone).await?;
            tokio::time::sleep(Duration::from_secs(1)).await;
        }

        // Re-rendezvous on the same code.
        if !self.exec.navigate_to_trade_screen().await? {
            self.exec.exit_trade(true).await?;
            return Ok(TradeOutcome::RecoverStart);
        }
        self.exec.enter_link_code(&req.code.picto_codes()).await?;
        req.notifier.searching(&self.state.label);
        if !self.wait_for_partner().await? {
            self.exec.exit_trade(false).await?;
            return Ok(TradeOutcome::NoTrainerFound);
        }
        tokio::time::sleep(Duration::from_secs(10)).await;
        if self.identify_partner().await?.is_none() {
            self.exec.exit_trade(false).await?;
            return Ok(TradeOutcome::NoTrainerFound);
        }

        // One sub-exchange per clone.
        for (i, _) in clones.iter().enumerate() {
            if self.token.is_cancelled() {
                self.exec.exit_trade(false).await?;
                return Ok(TradeOutcome::RoutineCancel);
            }
            // Move the cursor onto the slot holding this copy.
            for _ in 0..i {
                self.exec
                    .flick_stick(Stick::Left, STICK_MAX, 0, 100)
                    .await?;
            }
            while self.exec.current_screen().await? == ScreenScenario::Box {
                self.exec.click(Button::A, 1_000).await?;
            }
            req.notifier
                .message(&format!("Sending copy {} of {}.", i + 1, clones.len()));
            tokio::time::sleep(Duration::from_secs(10)).await;
            let outcome = self.confirm_and_start_trading(i as u64).await?;
            if outcome != TradeOutcome::Success {
                self.exec.exit_trade(true).await?;
                return Ok(outcome);
            }
            self.hub.counts.add_clone();
            // Settle between consecutive exchanges.
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        self.exec.exit_trade(false).await?;
        Ok(TradeOutcome::Success)
    }

    async fn process_dump(
        &mut self,
        req: &Arc<TradeRequest>,
    ) -> Result<TradeOutcome, TransportError> {
        req.notifier.message(
            "Show me entities one at a time. I will record everything for 30 seconds.",
        );
        let mut seen: Vec<[u8; 32]> = Vec::new();
        let started = tokio::time::Instant::now();
        while started.elapsed() < Duration::from_secs(DUMP_WINDOW_SECS) {
            if self.token.is_cancelled() {
                return Ok(TradeOutcome::RoutineCancel);
            }
            let offer = self.exec.read_offered().await?;
            if offer.is_present() && !seen.contains(&offer.content_hash()) {
                seen.push(offer.content_hash());
                req.notifier.entity(&offer, "recorded");
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        req.notifier
            .message(&format!("Time is up. Recorded {} entities.", seen.len()));
        if !seen.is_empty() {
            self.hub.counts.add_dump();
        }
        Ok(TradeOutcome::Success)
    }
}
