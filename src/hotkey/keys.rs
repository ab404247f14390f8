//! Numeric keypad key codes and slot classification
//!
//! Maps the raw virtual-key codes delivered by the low-level hook onto
//! the sixteen logical slots that bindings are keyed by.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Number of logical slots (one per numeric keypad key)
pub const SLOT_COUNT: usize = 16;

/// Raw virtual-key codes of the numeric keypad
pub mod vk {
    pub const NUMPAD0: u32 = 0x60;
    pub const NUMPAD1: u32 = 0x61;
    pub const NUMPAD2: u32 = 0x62;
    pub const NUMPAD3: u32 = 0x63;
    pub const NUMPAD4: u32 = 0x64;
    pub const NUMPAD5: u32 = 0x65;
    pub const NUMPAD6: u32 = 0x66;
    pub const NUMPAD7: u32 = 0x67;
    pub const NUMPAD8: u32 = 0x68;
    pub const NUMPAD9: u32 = 0x69;
    pub const MULTIPLY: u32 = 0x6A;
    pub const ADD: u32 = 0x6B;
    pub const SUBTRACT: u32 = 0x6D;
    pub const DECIMAL: u32 = 0x6E;
    pub const DIVIDE: u32 = 0x6F;
    /// Shared by main Enter and keypad Enter; only the extended variant is ours
    pub const RETURN: u32 = 0x0D;
}

/// Stable identifier of one numeric keypad key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Slot(u8);

impl Slot {
    pub const ADD: Slot = Slot(10);
    pub const SUBTRACT: Slot = Slot(11);
    pub const MULTIPLY: Slot = Slot(12);
    pub const DIVIDE: Slot = Slot(13);
    pub const ENTER: Slot = Slot(14);
    pub const DECIMAL: Slot = Slot(15);

    /// Create a slot from its index, rejecting anything outside 0..16
    pub fn new(index: u8) -> Option<Self> {
        (usize::from(index) < SLOT_COUNT).then_some(Self(index))
    }

    /// Position of this slot in a slot-indexed table
    pub fn index(self) -> usize {
        usize::from(self.0)
    }

    /// All slots in index order
    pub fn all() -> impl Iterator<Item = Slot> {
        (0..SLOT_COUNT as u8).map(Slot)
    }

    /// `+` and `-` keep firing while held
    pub fn is_repeat_eligible(self) -> bool {
        matches!(self, Slot::ADD | Slot::SUBTRACT)
    }

    /// Human-readable key name
    pub fn label(self) -> &'static str {
        const LABELS: [&str; SLOT_COUNT] = [
            "NumPad 0", "NumPad 1", "NumPad 2", "NumPad 3", "NumPad 4", "NumPad 5", "NumPad 6",
            "NumPad 7", "NumPad 8", "NumPad 9", "NumPad +", "NumPad -", "NumPad *", "NumPad /",
            "NumPad Enter", "NumPad .",
        ];
        LABELS[self.index()]
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A slot index outside the numeric keypad range
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("slot {0} is outside the numeric keypad range 0-15")]
pub struct InvalidSlot(pub u8);

impl TryFrom<u8> for Slot {
    type Error = InvalidSlot;

    fn try_from(index: u8) -> Result<Self, Self::Error> {
        Slot::new(index).ok_or(InvalidSlot(index))
    }
}

impl From<Slot> for u8 {
    fn from(slot: Slot) -> Self {
        slot.0
    }
}

/// Classify a raw key code from the low-level hook.
///
/// Keypad Enter and main Enter share a virtual-key code; only the
/// extended variant maps to [`Slot::ENTER`]. Every other keypad code maps
/// to its slot regardless of flags.
pub fn classify(vk_code: u32, extended: bool) -> Option<Slot> {
    match vk_code {
        vk::NUMPAD0..=vk::NUMPAD9 => Some(Slot((vk_code - vk::NUMPAD0) as u8)),
        vk::ADD => Some(Slot::ADD),
        vk::SUBTRACT => Some(Slot::SUBTRACT),
        vk::MULTIPLY => Some(Slot::MULTIPLY),
        vk::DIVIDE => Some(Slot::DIVIDE),
        vk::DECIMAL => Some(Slot::DECIMAL),
        vk::RETURN if extended => Some(Slot::ENTER),
        _ => None,
    }
}

/// Physical key location reported by a higher-level input listener
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyLocation {
    Standard,
    Left,
    Right,
    Numpad,
    Unknown,
}

/// Pre-filter for any secondary global listener running next to the hook.
///
/// The hook owns suppression and dispatch for every code it classifies,
/// so a secondary listener must skip those (and anything not reported
/// from the keypad) or each press would fire twice.
pub fn secondary_should_skip(raw_code: u32, location: KeyLocation) -> bool {
    location != KeyLocation::Numpad || hook_handles(raw_code)
}

fn hook_handles(raw_code: u32) -> bool {
    classify(raw_code, false).is_some() || classify(raw_code, true).is_some()
}
