//! Virtual-key codes used for synthetic input and the key name table

use std::fmt;

/// A Windows virtual-key code as understood by the input injection API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VirtualKey(pub u16);

impl VirtualKey {
    pub const CONTROL: VirtualKey = VirtualKey(0x11);
    pub const SHIFT: VirtualKey = VirtualKey(0x10);
    pub const ALT: VirtualKey = VirtualKey(0x12);
    pub const LWIN: VirtualKey = VirtualKey(0x5B);

    pub const VOLUME_MUTE: VirtualKey = VirtualKey(0xAD);
    pub const VOLUME_DOWN: VirtualKey = VirtualKey(0xAE);
    pub const VOLUME_UP: VirtualKey = VirtualKey(0xAF);
    pub const MEDIA_PLAY_PAUSE: VirtualKey = VirtualKey(0xB3);

    /// Keys that must be injected with the extended-key flag so the
    /// receiver does not confuse them with their keypad twins.
    pub fn is_extended(self) -> bool {
        matches!(
            self.0,
            0x21..=0x28 // page up/down, end, home, arrows
                | 0x2D | 0x2E // insert, delete
                | 0x5B // left win
                | 0xAD..=0xB3 // volume and media keys
        )
    }

    /// Canonical name from the key table, if there is one
    pub fn name(self) -> Option<&'static str> {
        KEY_NAMES
            .iter()
            .find(|(_, code)| *code == self.0)
            .map(|(name, _)| *name)
    }
}

impl fmt::Display for VirtualKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            0x41..=0x5A => write!(f, "{}", char::from(b'a' + (self.0 - 0x41) as u8)),
            0x30..=0x39 => write!(f, "{}", self.0 - 0x30),
            _ => match self.name() {
                Some(name) => f.write_str(name),
                None => write!(f, "vk{:#04x}", self.0),
            },
        }
    }
}

/// Named keys; the first entry for a code is its canonical name.
/// Letters and digits are resolved arithmetically in [`lookup`].
const KEY_NAMES: &[(&str, u16)] = &[
    ("space", 0x20),
    ("enter", 0x0D),
    ("return", 0x0D),
    ("tab", 0x09),
    ("esc", 0x1B),
    ("escape", 0x1B),
    ("backspace", 0x08),
    ("back", 0x08),
    ("delete", 0x2E),
    ("del", 0x2E),
    ("insert", 0x2D),
    ("home", 0x24),
    ("end", 0x23),
    ("pageup", 0x21),
    ("pgup", 0x21),
    ("pagedown", 0x22),
    ("pgdn", 0x22),
    ("left", 0x25),
    ("up", 0x26),
    ("right", 0x27),
    ("down", 0x28),
    ("f1", 0x70),
    ("f2", 0x71),
    ("f3", 0x72),
    ("f4", 0x73),
    ("f5", 0x74),
    ("f6", 0x75),
    ("f7", 0x76),
    ("f8", 0x77),
    ("f9", 0x78),
    ("f10", 0x79),
    ("f11", 0x7A),
    ("f12", 0x7B),
    ("comma", 0xBC),
    (",", 0xBC),
    ("period", 0xBE),
    (".", 0xBE),
    ("semicolon", 0xBA),
    (";", 0xBA),
    ("quote", 0xDE),
    ("'", 0xDE),
    ("lbracket", 0xDB),
    ("[", 0xDB),
    ("rbracket", 0xDD),
    ("]", 0xDD),
    ("backslash", 0xDC),
    ("\\", 0xDC),
    ("slash", 0xBF),
    ("/", 0xBF),
    ("equal", 0xBB),
    ("=", 0xBB),
    ("minus", 0xBD),
    ("-", 0xBD),
    ("grave", 0xC0),
    ("backtick", 0xC0),
    ("`", 0xC0),
];

/// Resolve a lowercase key name to its virtual-key code
pub fn lookup(name: &str) -> Option<VirtualKey> {
    let mut chars = name.chars();
    if let (Some(c), None) = (chars.next(), chars.next()) {
        match c {
            'a'..='z' => return Some(VirtualKey(0x41 + (c as u16 - 'a' as u16))),
            '0'..='9' => return Some(VirtualKey(0x30 + (c as u16 - '0' as u16))),
            _ => {}
        }
    }

    KEY_NAMES
        .iter()
        .find(|(key, _)| *key == name)
        .map(|(_, code)| VirtualKey(*code))
}
