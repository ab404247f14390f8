//! Key bindings and the slot-indexed binding table
//!
//! A [`Binding`] is immutable once built; the table holds them behind
//! `Arc` so a changed table shares every untouched entry with the old one.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::hotkey::{Slot, SLOT_COUNT};
use crate::input::{ComboParseError, ComboSpec};

/// Actions implemented inside the daemon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuiltinAction {
    VolumeUp,
    VolumeDown,
    Mute,
    PlayPause,
}

impl BuiltinAction {
    /// Reserved command string naming this action in saved bindings
    pub fn command(self) -> &'static str {
        match self {
            BuiltinAction::VolumeUp => "__volume_up",
            BuiltinAction::VolumeDown => "__volume_down",
            BuiltinAction::Mute => "__volume_mute",
            BuiltinAction::PlayPause => "__play_pause",
        }
    }

    pub fn from_command(command: &str) -> Option<Self> {
        [
            BuiltinAction::VolumeUp,
            BuiltinAction::VolumeDown,
            BuiltinAction::Mute,
            BuiltinAction::PlayPause,
        ]
        .into_iter()
        .find(|action| action.command() == command)
    }
}

/// What a binding does when its slot fires
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionKind {
    /// Spawn a program, optionally with one argument
    Launch {
        command: String,
        argument: Option<String>,
    },
    /// Replay a key combination; parsed when the binding is built
    Combo { spec: String, combo: ComboSpec },
    /// Run a built-in actuator
    Builtin(BuiltinAction),
}

/// A named action bound to a slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    name: String,
    kind: ActionKind,
}

impl Binding {
    pub fn launch(
        name: impl Into<String>,
        command: impl Into<String>,
        argument: Option<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: ActionKind::Launch {
                command: command.into(),
                argument,
            },
        }
    }

    /// Bind a key combination, rejecting it if it does not parse
    pub fn combo(name: impl Into<String>, spec: &str) -> Result<Self, ComboParseError> {
        let combo: ComboSpec = spec.parse()?;
        Ok(Self {
            name: name.into(),
            kind: ActionKind::Combo {
                spec: spec.trim().to_string(),
                combo,
            },
        })
    }

    pub fn builtin(name: impl Into<String>, action: BuiltinAction) -> Self {
        Self {
            name: name.into(),
            kind: ActionKind::Builtin(action),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &ActionKind {
        &self.kind
    }
}

/// Errors building or applying a binding
#[derive(Debug, thiserror::Error)]
pub enum BindingError {
    #[error(transparent)]
    InvalidSlot(#[from] crate::hotkey::InvalidSlot),

    #[error("invalid key combination: {0}")]
    Parse(#[from] ComboParseError),

    #[error("unknown builtin action '{0}'")]
    UnknownBuiltin(String),

    #[error("binding '{0}' has no command, key combination or builtin action")]
    Empty(String),

    #[error("failed to persist bindings: {0}")]
    Persist(String),
}

/// Flat binding representation used on disk and over IPC
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BindingRecord {
    #[serde(default)]
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub argument: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_combination: Option<String>,
}

impl From<&Binding> for BindingRecord {
    fn from(binding: &Binding) -> Self {
        let mut record = BindingRecord {
            name: binding.name.clone(),
            ..Default::default()
        };
        match &binding.kind {
            ActionKind::Launch { command, argument } => {
                record.command = Some(command.clone());
                record.argument = argument.clone();
            }
            ActionKind::Combo { spec, .. } => record.key_combination = Some(spec.clone()),
            ActionKind::Builtin(action) => record.command = Some(action.command().to_string()),
        }
        record
    }
}

impl TryFrom<BindingRecord> for Binding {
    type Error = BindingError;

    /// Builtin commands win over key combinations, which win over launches
    fn try_from(record: BindingRecord) -> Result<Self, Self::Error> {
        let command = non_empty(record.command);

        if let Some(reserved) = command.as_deref().filter(|c| c.starts_with("__")) {
            let action = BuiltinAction::from_command(reserved)
                .ok_or_else(|| BindingError::UnknownBuiltin(reserved.to_string()))?;
            return Ok(Binding::builtin(record.name, action));
        }

        if let Some(spec) = non_empty(record.key_combination) {
            return Ok(Binding::combo(record.name, &spec)?);
        }

        match command {
            Some(command) => Ok(Binding::launch(record.name, command, non_empty(record.argument))),
            None => Err(BindingError::Empty(record.name)),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Slot to binding mapping; unbound slots are `None`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BindingTable {
    slots: [Option<Arc<Binding>>; SLOT_COUNT],
}

impl BindingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bindings used when nothing has been saved yet
    pub fn defaults() -> Self {
        let mut table = Self::new();
        let entries = [
            (1, Binding::launch("Open Notepad", "notepad.exe", None)),
            (2, Binding::launch("Open Calculator", "calc.exe", None)),
            (
                3,
                Binding::launch(
                    "Open Browser",
                    "explorer.exe",
                    Some("https://www.google.com".to_string()),
                ),
            ),
            (4, Binding::launch("Open File Explorer", "explorer.exe", None)),
            (5, Binding::launch("Open Command Prompt", "cmd.exe", None)),
            (10, Binding::builtin("Volume Up", BuiltinAction::VolumeUp)),
            (11, Binding::builtin("Volume Down", BuiltinAction::VolumeDown)),
            (14, Binding::builtin("Play/Pause", BuiltinAction::PlayPause)),
        ];
        for (index, binding) in entries {
            if let Some(slot) = Slot::new(index) {
                table.insert(slot, binding);
            }
        }
        table
    }

    pub fn get(&self, slot: Slot) -> Option<&Arc<Binding>> {
        self.slots[slot.index()].as_ref()
    }

    pub fn insert(&mut self, slot: Slot, binding: Binding) {
        self.slots[slot.index()] = Some(Arc::new(binding));
    }

    /// Replace a slot's entry, returning the previous one
    pub fn put(&mut self, slot: Slot, binding: Option<Arc<Binding>>) -> Option<Arc<Binding>> {
        std::mem::replace(&mut self.slots[slot.index()], binding)
    }

    /// Bound slots in index order
    pub fn iter(&self) -> impl Iterator<Item = (Slot, &Arc<Binding>)> {
        Slot::all().filter_map(|slot| self.get(slot).map(|binding| (slot, binding)))
    }

    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_records(&self) -> BTreeMap<u8, BindingRecord> {
        self.iter()
            .map(|(slot, binding)| (u8::from(slot), BindingRecord::from(binding.as_ref())))
            .collect()
    }
}
