//! Fixed memory layout of the target game build.
//!
//! Heap and main-segment offsets for the structures the trade flow reads,
//! the slot geometry of box storage, and the coarse screen scenario word.

/// Host trainer status block (heap).
pub const TRAINER_DATA_OFFSET: u64 = 0x53321CF0;
/// Status block of the first trader shown on the trade screen (heap).
pub const TRADER1_STATUS_OFFSET: u64 = 0x41A28240;
/// Status block of the second trader (heap).
pub const TRADER2_STATUS_OFFSET: u64 = 0x41A28078;
/// Entity the partner currently offers (heap).
pub const TRADE_PARTNER_OFFERED_OFFSET: u64 = 0x41A22858;
/// First slot of box storage (heap).
pub const BOX_START_OFFSET: u64 = 0x533675B0;
/// Overworld flag byte; 1 when the player is standing in the overworld (heap).
pub const OVERWORLD_OFFSET: u64 = 0x5E1CE550;
/// Zero while the link-search spinner is up (main).
pub const WAITING_SCREEN_OFFSET: u64 = 0x15363D8;
/// Current screen scenario word (main).
pub const CURRENT_SCREEN_OFFSET: u64 = 0x1610E68;

/// Bytes of one stored entity record.
pub const SLOT_SIZE: u64 = 0x104;
/// Padding between consecutive slots in box storage.
pub const SLOT_GAP: u64 = 380;
/// Slots per box.
pub const SLOTS_PER_BOX: u64 = 25;

/// Trainer status block geometry.
pub const TRAINER_BLOCK_LEN: usize = 0x168;
/// UTF-16LE name field, 12 code units.
pub const TRAINER_NAME_OFFSET: usize = 0x00;
pub const TRAINER_NAME_LEN: usize = 24;
/// Displayed id, little-endian u32.
pub const TRAINER_DISPLAY_ID_OFFSET: usize = 0x18;
/// Matchmaking sync id, little-endian u64.
pub const TRAINER_SYNC_ID_OFFSET: usize = 0x20;

/// Heap offset of a box slot.
pub fn slot_offset(box_index: u64, slot_index: u64) -> u64 {
    let slot = box_index * SLOTS_PER_BOX + slot_index;
    BOX_START_OFFSET + slot * (SLOT_SIZE + SLOT_GAP)
}

/// Coarse screen state decoded from the screen scenario word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScreenScenario {
    /// Link-search spinner, variant shown before a partner is locked.
    WaitingToTrade,
    /// Link-search spinner, post-lock variant.
    WaitingToTrade2,
    /// Save prompt (autosave detour variant).
    Save2,
    /// Save prompt.
    Save,
    /// Faraway-player selector on the communication menu.
    SelectFaraway,
    /// Scrolling transition between menu panes.
    Scroll,
    /// Main menu.
    Menu,
    /// A yes/no dialog.
    YesNoSelector,
    /// Box / trade selection grid.
    Box,
    /// Anything else, including the overworld.
    Unknown(u16),
}

impl ScreenScenario {
    pub fn from_raw(raw: u16) -> Self {
        match raw {
            0x0080 => ScreenScenario::WaitingToTrade,
            0x1080 => ScreenScenario::WaitingToTrade2,
            0x6250 => ScreenScenario::Save2,
            0x7250 => ScreenScenario::Save,
            0xA080 => ScreenScenario::SelectFaraway,
            0xB080 => ScreenScenario::Scroll,
            0xD080 => ScreenScenario::Menu,
            0xE080 => ScreenScenario::YesNoSelector,
            0xF080 => ScreenScenario::Box,
            other => ScreenScenario::Unknown(other),
        }
    }

    pub fn is_waiting(self) -> bool {
        matches!(
            self,
            ScreenScenario::WaitingToTrade | ScreenScenario::WaitingToTrade2
        )
    }

    pub fn is_save_prompt(self) -> bool {
        matches!(self, ScreenScenario::Save | ScreenScenario::Save2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_math() {
        assert_eq!(slot_offset(0, 0), BOX_START_OFFSET);
        assert_eq!(slot_offset(0, 1), BOX_START_OFFSET + SLOT_SIZE + SLOT_GAP);
        assert_eq!(
            slot_offset(1, 0),
            BOX_START_OFFSET + SLOTS_PER_BOX * (SLOT_SIZE + SLOT_GAP)
        );
    }

    #[test]
    fn scenario_decode() {
        assert_eq!(ScreenScenario::from_raw(0xD080), ScreenScenario::Menu);
        assert_eq!(ScreenScenario::from_raw(0xF080), ScreenScenario::Box);
        assert!(ScreenScenario::from_raw(0x0080).is_waiting());
        assert!(ScreenScenario::from_raw(0x1080).is_waiting());
        assert!(ScreenScenario::from_raw(0x7250).is_save_prompt());
        assert_eq!(
            ScreenScenario::from_raw(0xBEEF),
            ScreenScenario::Unknown(0xBEEF)
        );
    }
}
