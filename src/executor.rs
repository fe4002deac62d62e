//! Mid-level console operations.
//!
//! Everything between the raw session channel and the trade state machine:
//! screen queries, slot reads and writes, link-code entry, menu navigation
//! and the recovery paths. Generic over the channel so tests can drive it
//! with a scripted fake.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::channel::{Button, SessionChannel, Stick, STICK_MAX, STICK_MIN};
use crate::offsets::{self, ScreenScenario};
use crate::request::{GameEntity, PartnerInfo, ENTITY_SIZE};
use crate::types::{SessionError, TransportError};

/// Host trainer identity captured at session bring-up.
#[derive(Debug, Clone)]
pub struct HostIdentity {
    pub name: String,
    pub display_id: u32,
    pub sync_id: u64,
}

impl HostIdentity {
    /// Whether a partner block is actually this host echoed back.
    pub fn matches(&self, partner: &PartnerInfo) -> bool {
        self.name == partner.name && self.display_id == partner.display_id
    }
}

/// Drives one console through the channel.
pub struct ConsoleExecutor<C: SessionChannel> {
    channel: C,
}

impl<C: SessionChannel> ConsoleExecutor<C> {
    pub fn new(channel: C) -> Self {
        ConsoleExecutor { channel }
    }

    pub fn channel_mut(&mut self) -> &mut C {
        &mut self.channel
    }

    pub fn label(&self) -> String {
        self.channel.label()
    }

    pub async fn connect(&mut self) -> Result<(), TransportError> {
        self.channel.connect().await
    }

    pub async fn disconnect(&mut self) {
        self.channel.disconnect().await;
    }

    pub fn is_connected(&self) -> bool {
        self.channel.is_connected()
    }

    /// Press a button, then hold off for the game to register it.
    pub async fn click(&mut self, button: Button, delay_ms: u64) -> Result<(), TransportError> {
        self.channel.press(button).await?;
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        Ok(())
    }

    /// Flick a stick to an extreme and recenter.
    pub async fn flick_stick(
        &mut self,
        stick: Stick,
        x: i16,
        y: i16,
        hold_ms: u64,
    ) -> Result<(), TransportError> {
        self.channel.set_stick(stick, x, y).await?;
        tokio::time::sleep(Duration::from_millis(hold_ms)).await;
        self.channel.set_stick(stick, 0, 0).await?;
        tokio::time::sleep(Duration::from_millis(300)).await;
        Ok(())
    }

    // Screen queries.

    pub async fn current_screen(&mut self) -> Result<ScreenScenario, TransportError> {
        let raw = self
            .channel
            .read_main(offsets::CURRENT_SCREEN_OFFSET, 2)
            .await?;
        Ok(ScreenScenario::from_raw(u16::from_le_bytes([raw[0], raw[1]])))
    }

    pub async fn is_on_overworld(&mut self) -> Result<bool, TransportError> {
        let flag = self.channel.read_heap(offsets::OVERWORLD_OFFSET, 1).await?;
        Ok(flag[0] == 1)
    }

    /// True while the link-search spinner is up.
    pub async fn is_in_waiting_screen(&mut self) -> Result<bool, TransportError> {
        let raw = self
            .channel
            .read_main(offsets::WAITING_SCREEN_OFFSET, 4)
            .await?;
        Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) == 0)
    }

    // Entity slots.

    pub async fn read_slot(
        &mut self,
        box_index: u64,
        slot_index: u64,
    ) -> Result<GameEntity, TransportError> {
        let data = self
            .channel
            .read_heap(offsets::slot_offset(box_index, slot_index), ENTITY_SIZE)
            .await?;
        Ok(GameEntity::new(data))
    }

    pub async fn write_slot(
        &mut self,
        box_index: u64,
        slot_index: u64,
        entity: &GameEntity,
    ) -> Result<(), TransportError> {
        self.channel
            .write_heap(offsets::slot_offset(box_index, slot_index), entity.bytes())
            .await
    }

    /// Entity the connected partner currently offers.
    pub async fn read_offered(&mut self) -> Result<GameEntity, TransportError> {
        let data = self
            .channel
            .read_heap(offsets::TRADE_PARTNER_OFFERED_OFFSET, ENTITY_SIZE)
            .await?;
        Ok(GameEntity::new(data))
    }

    /// First bytes of a slot, used to detect an exchange completing.
    pub async fn read_slot_header(
        &mut self,
        box_index: u64,
        slot_index: u64,
    ) -> Result<Vec<u8>, TransportError> {
        self.channel
            .read_heap(offsets::slot_offset(box_index, slot_index), 8)
            .await
    }

    // Trainer blocks.

    async fn read_trainer_block(&mut self, offset: u64) -> Result<PartnerInfo, TransportError> {
        let block = self
            .channel
            .read_heap(offset, offsets::TRAINER_BLOCK_LEN)
            .await?;
        Ok(decode_trainer_block(&block))
    }

    /// Both trader status blocks on the trade screen.
    pub async fn read_traders(&mut self) -> Result<(PartnerInfo, PartnerInfo), TransportError> {
        let first = self.read_trainer_block(offsets::TRADER1_STATUS_OFFSET).await?;
        let second = self.read_trainer_block(offsets::TRADER2_STATUS_OFFSET).await?;
        Ok((first, second))
    }

    /// Host trainer block, validated.
    pub async fn read_host_identity(&mut self) -> Result<HostIdentity, SessionError> {
        let info = self.read_trainer_block(offsets::TRAINER_DATA_OFFSET).await?;
        if info.name.is_empty() || info.display_id == 0 {
            return Err(SessionError::InvalidTrainerData);
        }
        Ok(HostIdentity {
            name: info.name,
            display_id: info.display_id,
            sync_id: info.sync_id,
        })
    }

    // Session lifecycle.

    /// Bring the console session up and capture the host identity.
    pub async fn initialize_session(
        &mut self,
        screen_off: bool,
    ) -> Result<HostIdentity, SessionError> {
        self.channel.detach_controller().await?;
        if screen_off {
            self.channel.set_screen(false).await?;
        }
        self.channel.attach_controller().await?;
        let host = self.read_host_identity().await?;
        info!(
            console = %self.channel.label(),
            trainer = %host.name,
            id = host.display_id,
            "console session ready"
        );
        Ok(host)
    }

    /// Restore the screen and release the controller.
    pub async fn clean_exit(&mut self) {
        if let Err(e) = self.channel.set_screen(true).await {
            warn!(console = %self.channel.label(), error = %e, "screen restore failed");
        }
        if let Err(e) = self.channel.detach_controller().await {
            warn!(console = %self.channel.label(), error = %e, "controller detach failed");
        }
    }

    // Navigation.

    /// Walk the menus from the overworld to an armed trade screen.
    ///
    /// Re-derives position from the screen word after every step; bails out
    /// after a bounded number of iterations instead of looping forever on an
    /// unrecognized screen.
    pub async fn navigate_to_trade_screen(&mut self) -> Result<bool, TransportError> {
        self.click(Button::X, 2_000).await?;
        for _ in 0..30 {
            match self.current_screen().await? {
                ScreenScenario::Menu => {
                    // Communicate pane, then the faraway-player entry.
                    self.flick_stick(Stick::Right, STICK_MAX, 0, 100).await?;
                    self.click(Button::A, 2_000).await?;
                }
                ScreenScenario::SelectFaraway => {
                    self.flick_stick(Stick::Right, 0, STICK_MIN, 100).await?;
                    self.click(Button::A, 10_000).await?;
                    self.click(Button::A, 1_000).await?;
                    return Ok(true);
                }
                ScreenScenario::Scroll => {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                }
                scenario if scenario.is_save_prompt() => {
                    // Autosave detour; decline and reopen the menu.
                    self.click(Button::B, 1_000).await?;
                    self.click(Button::X, 2_000).await?;
                }
                ScreenScenario::Box | ScreenScenario::WaitingToTrade
                | ScreenScenario::WaitingToTrade2 => {
                    return Ok(true);
                }
                _ => {
                    self.click(Button::B, 1_000).await?;
                    self.click(Button::X, 2_000).await?;
                }
            }
        }
        warn!(console = %self.channel.label(), "trade screen navigation gave up");
        Ok(false)
    }

    /// Enter the three picture symbols of a link code.
    ///
    /// The selector starts on the first symbol of the top row; symbols past
    /// index 4 sit on the bottom row.
    pub async fn enter_link_code(
        &mut self,
        symbols: &[crate::picto::PictoCode; 3],
    ) -> Result<(), TransportError> {
        debug!(console = %self.channel.label(), "entering link code");
        for symbol in symbols {
            let index = symbol.index();
            let on_bottom_row = index > 4;
            if on_bottom_row {
                self.flick_stick(Stick::Left, 0, STICK_MIN, 100).await?;
            }
            let steps = if on_bottom_row { index - 5 } else { index };
            for _ in 0..steps {
                self.flick_stick(Stick::Left, STICK_MAX, 0, 100).await?;
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
            self.click(Button::A, 800).await?;
            // Recenter for the next symbol.
            for _ in 0..steps {
                self.flick_stick(Stick::Left, STICK_MIN, 0, 100).await?;
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
            if on_bottom_row {
                self.flick_stick(Stick::Left, 0, STICK_MAX, 100).await?;
            }
        }
        Ok(())
    }

    // Recovery.

    /// Back out of a trade to the overworld.
    ///
    /// Mashes B with a bounded budget, answering dialogs along the way. If
    /// the budget runs out the game is restarted outright.
    pub async fn exit_trade(&mut self, unexpected: bool) -> Result<(), TransportError> {
        if unexpected {
            info!(console = %self.channel.label(), "unexpected behavior, recovering");
        }
        let mut budget_ms: i64 = 120_000;
        while !self.is_on_overworld().await? {
            if budget_ms <= 0 {
                warn!(console = %self.channel.label(), "exit budget exhausted, restarting game");
                return self.restart_game().await;
            }
            match self.current_screen().await? {
                ScreenScenario::Box | ScreenScenario::YesNoSelector => {
                    self.click(Button::A, 1_000).await?;
                    budget_ms -= 1_000;
                }
                _ => {
                    self.click(Button::B, 1_000).await?;
                    budget_ms -= 1_000;
                }
            }
        }
        Ok(())
    }

    /// Close and reopen the game, waiting for the overworld.
    pub async fn restart_game(&mut self) -> Result<(), TransportError> {
        info!(console = %self.channel.label(), "restarting game");
        self.click(Button::Home, 2_000).await?;
        self.click(Button::X, 1_000).await?;
        self.click(Button::A, 5_000).await?;
        // Relaunch and dismiss intro screens.
        for _ in 0..3 {
            self.click(Button::A, 2_000).await?;
        }
        for _ in 0..120 {
            if self.is_on_overworld().await? {
                info!(console = %self.channel.label(), "back on overworld");
                return Ok(());
            }
            self.click(Button::A, 1_000).await?;
        }
        Err(TransportError::timeout("restart_game", 120_000))
    }
}

/// Decode a raw trainer status block.
fn decode_trainer_block(block: &[u8]) -> PartnerInfo {
    let name = decode_utf16_name(
        &block[offsets::TRAINER_NAME_OFFSET..offsets::TRAINER_NAME_OFFSET + offsets::TRAINER_NAME_LEN],
    );
    let display_id = u32::from_le_bytes(
        block[offsets::TRAINER_DISPLAY_ID_OFFSET..offsets::TRAINER_DISPLAY_ID_OFFSET + 4]
            .try_into()
            .unwrap_or([0; 4]),
    );
    let sync_id = u64::from_le_bytes(
        block[offsets::TRAINER_SYNC_ID_OFFSET..offsets::TRAINER_SYNC_ID_OFFSET + 8]
            .try_into()
            .unwrap_or([0; 8]),
    );
    PartnerInfo {
        name,
        display_id,
        sync_id,
    }
}

/// NUL-terminated UTF-16LE trainer name.
fn decode_utf16_name(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .take_while(|&unit| unit != 0)
        .collect();
    String::from_utf16_lossy(&units)
}
