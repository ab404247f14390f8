//! Global numeric keypad capture
//!
//! A low-level keyboard hook runs on its own thread with a message pump,
//! classifies keypad keys into [`Slot`]s, suppresses them and hands them to
//! the dispatch queue. Held `+` and `-` repeat through [`RepeatScheduler`].

mod engine;
mod keys;
mod platform;
mod repeat;

pub use engine::{EngineState, HookEngine, HookError, KeyDirection, KeyEvent, Verdict};
pub use keys::{classify, secondary_should_skip, InvalidSlot, KeyLocation, Slot, SLOT_COUNT};
pub use repeat::{RepeatError, RepeatPhase, RepeatScheduler};
