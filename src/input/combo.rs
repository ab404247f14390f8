//! Key combination parsing and synthesis
//!
//! A combination such as `ctrl+shift+a` is parsed once, when it is bound,
//! and replayed on every dispatch as a fixed press/release sequence.

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use super::keycode::{self, VirtualKey};
use super::{InjectionError, KeyInjector};

/// Modifier keys held around the main key
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Modifiers {
    /// Control key is held
    pub ctrl: bool,
    /// Shift key is held
    pub shift: bool,
    /// Alt key is held
    pub alt: bool,
    /// Windows key is held
    pub win: bool,
}

impl Modifiers {
    /// Check if no modifier is set
    pub fn is_empty(&self) -> bool {
        !self.ctrl && !self.shift && !self.alt && !self.win
    }

    /// Modifier keys in press order: Ctrl, Shift, Alt, Win
    pub fn keys(&self) -> Vec<VirtualKey> {
        [
            (self.ctrl, VirtualKey::CONTROL),
            (self.shift, VirtualKey::SHIFT),
            (self.alt, VirtualKey::ALT),
            (self.win, VirtualKey::LWIN),
        ]
        .into_iter()
        .filter_map(|(held, key)| held.then_some(key))
        .collect()
    }
}

/// Reasons a combination string is rejected
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ComboParseError {
    #[error("key combination is empty")]
    Empty,

    #[error("key combination contains an empty key between '+' separators")]
    EmptyToken,

    #[error("unknown key '{0}'")]
    UnknownKey(String),

    #[error("key combination has no main key")]
    MissingMainKey,

    #[error("key combination has more than one main key ('{first}' and '{second}')")]
    MultipleMainKeys { first: String, second: String },
}

/// A parsed key combination: modifiers plus exactly one main key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComboSpec {
    modifiers: Modifiers,
    key: VirtualKey,
}

impl ComboSpec {
    pub fn new(modifiers: Modifiers, key: VirtualKey) -> Self {
        Self { modifiers, key }
    }

    pub fn modifiers(&self) -> Modifiers {
        self.modifiers
    }

    pub fn key(&self) -> VirtualKey {
        self.key
    }
}

impl FromStr for ComboSpec {
    type Err = ComboParseError;

    /// Tokens are split on `+`, trimmed and matched case-insensitively
    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        if spec.trim().is_empty() {
            return Err(ComboParseError::Empty);
        }

        let mut modifiers = Modifiers::default();
        let mut main: Option<(String, VirtualKey)> = None;

        for token in spec.split('+') {
            let token = token.trim().to_lowercase();
            match token.as_str() {
                "" => return Err(ComboParseError::EmptyToken),
                "ctrl" | "control" => modifiers.ctrl = true,
                "shift" => modifiers.shift = true,
                "alt" => modifiers.alt = true,
                "win" | "windows" => modifiers.win = true,
                name => {
                    let key = keycode::lookup(name)
                        .ok_or_else(|| ComboParseError::UnknownKey(name.to_string()))?;
                    if let Some((first, _)) = main {
                        return Err(ComboParseError::MultipleMainKeys {
                            first,
                            second: token,
                        });
                    }
                    main = Some((token, key));
                }
            }
        }

        let (_, key) = main.ok_or(ComboParseError::MissingMainKey)?;
        Ok(Self { modifiers, key })
    }
}

impl fmt::Display for ComboSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = &self.modifiers;
        for (held, name) in [(m.ctrl, "ctrl"), (m.shift, "shift"), (m.alt, "alt"), (m.win, "win")] {
            if held {
                write!(f, "{name}+")?;
            }
        }
        write!(f, "{}", self.key)
    }
}

/// Replays key combinations and single key taps through an injector.
///
/// Executions are serialized: two overlapping sequences touching the same
/// modifiers would leave the system with the wrong keys held.
pub struct ComboSynthesizer {
    injector: Option<Arc<dyn KeyInjector>>,
    /// Settle time between transitions
    step: Duration,
    gate: Mutex<()>,
}

impl ComboSynthesizer {
    pub fn new(injector: Option<Arc<dyn KeyInjector>>, step: Duration) -> Self {
        if injector.is_none() {
            warn!("no input injector available, key combinations will be skipped");
        }
        Self {
            injector,
            step,
            gate: Mutex::new(()),
        }
    }

    /// Parse a combination string
    pub fn parse(spec: &str) -> Result<ComboSpec, ComboParseError> {
        spec.parse()
    }

    /// Press modifiers (Ctrl, Shift, Alt, Win), tap the main key, then
    /// release modifiers in reverse order.
    ///
    /// Anything pressed before a failure is still released.
    pub fn execute(&self, combo: &ComboSpec) -> Result<(), InjectionError> {
        let injector = self.injector()?;
        let _gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
        debug!(%combo, "synthesizing key combination");

        let mut held = Vec::with_capacity(5);
        let result = self.press_sequence(injector, combo, &mut held);
        let released = release_all(injector, &mut held);
        result.and(released)
    }

    /// Press and release a single key
    pub fn tap(&self, key: VirtualKey) -> Result<(), InjectionError> {
        let injector = self.injector()?;
        let _gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
        debug!(%key, "synthesizing key tap");

        injector.press(key)?;
        thread::sleep(self.step);
        injector.release(key)?;
        thread::sleep(self.step);
        Ok(())
    }

    fn injector(&self) -> Result<&dyn KeyInjector, InjectionError> {
        self.injector.as_deref().ok_or(InjectionError::Unavailable)
    }

    fn press_sequence(
        &self,
        injector: &dyn KeyInjector,
        combo: &ComboSpec,
        held: &mut Vec<VirtualKey>,
    ) -> Result<(), InjectionError> {
        for key in combo.modifiers.keys() {
            injector.press(key)?;
            held.push(key);
        }
        thread::sleep(self.step);

        injector.press(combo.key)?;
        held.push(combo.key);
        thread::sleep(self.step);

        injector.release(combo.key)?;
        held.pop();
        thread::sleep(self.step);
        Ok(())
    }
}

/// Release held keys last-pressed first, reporting the first failure
fn release_all(injector: &dyn KeyInjector, held: &mut Vec<VirtualKey>) -> Result<(), InjectionError> {
    let mut result = Ok(());
    while let Some(key) = held.pop() {
        if let Err(e) = injector.release(key) {
            warn!(%key, error = %e, "failed to release synthetic key");
            result = result.and(Err(e));
        }
    }
    result
}
