//! Synthetic keyboard input
//!
//! Key combinations and media keys are re-emitted through a
//! [`KeyInjector`]. On Windows that is `SendInput`; elsewhere no injector
//! exists and every synthesis call fails softly.

mod combo;
mod keycode;
#[cfg(target_os = "windows")]
mod sendinput;
mod volume;

use std::sync::Arc;

pub use combo::{ComboParseError, ComboSpec, ComboSynthesizer, Modifiers};
pub use keycode::VirtualKey;
pub use volume::VolumeActuator;

/// Errors from the input injection primitive
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InjectionError {
    #[error("synthetic input is not available on this system")]
    Unavailable,

    #[error("injection of {key} was rejected by the system")]
    Rejected { key: VirtualKey },
}

/// Emits individual synthetic key transitions
pub trait KeyInjector: Send + Sync {
    fn press(&self, key: VirtualKey) -> Result<(), InjectionError>;
    fn release(&self, key: VirtualKey) -> Result<(), InjectionError>;
}

/// The injector for the current platform, if it has one
pub fn platform_injector() -> Option<Arc<dyn KeyInjector>> {
    #[cfg(target_os = "windows")]
    {
        Some(Arc::new(sendinput::SendInputInjector))
    }

    #[cfg(not(target_os = "windows"))]
    {
        None
    }
}
