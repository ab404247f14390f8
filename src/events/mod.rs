//! Events emitted by the dispatcher and hook engine
//!
//! Broadcast to anyone interested (logging, subscribed control clients)
//! so outcomes can be reported without coupling the dispatch path to a UI.

use serde::{Deserialize, Serialize};

use crate::hotkey::Slot;

/// Outcome and lifecycle notifications
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionEvent {
    /// A bound action ran successfully
    Dispatched { slot: Slot, name: String },

    /// A slot with no binding was pressed
    Unconfigured { slot: Slot },

    /// A bound action failed (launch or injection error)
    Failed {
        slot: Slot,
        name: String,
        error: String,
    },

    /// A binding was replaced or cleared
    BindingChanged {
        slot: Slot,
        /// Display name of the new binding, `None` when cleared
        name: Option<String>,
    },

    /// The keyboard hook is installed
    HookStarted,

    /// The keyboard hook was removed
    HookStopped,
}

impl std::fmt::Display for ActionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionEvent::Dispatched { slot, name } => write!(f, "DISPATCHED {slot} ({name})"),
            ActionEvent::Unconfigured { slot } => write!(f, "UNCONFIGURED {slot}"),
            ActionEvent::Failed { slot, name, error } => {
                write!(f, "FAILED {slot} ({name}): {error}")
            }
            ActionEvent::BindingChanged { slot, name: Some(name) } => {
                write!(f, "BINDING_CHANGED {slot} -> {name}")
            }
            ActionEvent::BindingChanged { slot, name: None } => {
                write!(f, "BINDING_CLEARED {slot}")
            }
            ActionEvent::HookStarted => write!(f, "HOOK_STARTED"),
            ActionEvent::HookStopped => write!(f, "HOOK_STOPPED"),
        }
    }
}
