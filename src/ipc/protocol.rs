//! IPC message protocol definitions
//!
//! All messages are JSON-encoded, prefixed with a 4-byte little-endian length.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::actions::{BindingError, BindingRecord};
use crate::events::ActionEvent;

/// Largest frame either side may send
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Requests from a control client to the daemon
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Ping to check connectivity
    Ping,

    /// Request current daemon status
    GetStatus,

    /// All bound slots
    ListBindings,

    /// Bind a slot, replacing what was there
    SetBinding { slot: u8, binding: BindingRecord },

    /// Unbind a slot
    ClearBinding { slot: u8 },

    /// Dispatch a slot as if its key was pressed
    Trigger { slot: u8 },

    /// Load bindings from a file and make them active
    ImportBindings { path: PathBuf },

    /// Copy the saved bindings to a file
    ExportBindings { path: PathBuf },

    /// Subscribe to outcome notifications
    Subscribe,
}

/// Responses from the daemon
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Pong,

    Status(DaemonStatus),

    Bindings { bindings: BTreeMap<u8, BindingRecord> },

    BindingUpdated { slot: u8 },

    Triggered { slot: u8 },

    Imported { bound: usize },

    Exported { path: PathBuf },

    /// Subscription confirmed
    Subscribed,

    Error { code: ErrorCode, message: String },
}

impl Response {
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Response::Error {
            code,
            message: message.into(),
        }
    }
}

/// Machine-readable failure category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidRequest,
    InvalidBinding,
    InvalidSlot,
    PersistFailed,
    QueueClosed,
}

impl From<&BindingError> for ErrorCode {
    fn from(error: &BindingError) -> Self {
        match error {
            BindingError::InvalidSlot(_) => ErrorCode::InvalidSlot,
            BindingError::Persist(_) => ErrorCode::PersistFailed,
            BindingError::Parse(_) | BindingError::UnknownBuiltin(_) | BindingError::Empty(_) => {
                ErrorCode::InvalidBinding
            }
        }
    }
}

/// Push notification for subscribed clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    Event { event: ActionEvent },
}

/// Full daemon status snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonStatus {
    /// Daemon version
    pub version: String,

    /// Whether the keyboard hook is installed
    pub hook_running: bool,

    /// Number of slots with a binding
    pub bound_slots: usize,

    /// Uptime in seconds
    pub uptime_secs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hotkey::Slot;

    #[test]
    fn test_request_serialization() {
        let req = Request::ClearBinding { slot: 4 };
        let json = serde_json::to_string(&req).unwrap();
        assert_eq!(json, r#"{"type":"clear_binding","slot":4}"#);
    }

    #[test]
    fn test_set_binding_uses_store_field_names() {
        let req: Request = serde_json::from_str(
            r#"{"type":"set_binding","slot":6,"binding":{"name":"Copy","keyCombination":"ctrl+c"}}"#,
        )
        .unwrap();
        let Request::SetBinding { slot, binding } = req else {
            panic!("wrong request");
        };
        assert_eq!(slot, 6);
        assert_eq!(binding.key_combination.as_deref(), Some("ctrl+c"));
    }

    #[test]
    fn test_response_serialization() {
        let resp = Response::Status(DaemonStatus {
            version: "0.1.0".into(),
            hook_running: true,
            bound_slots: 8,
            uptime_secs: 3,
        });
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains(r#""type":"status""#));
        assert!(json.contains(r#""hook_running":true"#));

        let err = Response::error(ErrorCode::QueueClosed, "gone");
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains(r#""code":"queue_closed""#));
    }

    #[test]
    fn test_notification_nests_event() {
        let note = Notification::Event {
            event: ActionEvent::Unconfigured { slot: Slot::DIVIDE },
        };
        let value = serde_json::to_value(&note).unwrap();
        assert_eq!(value["type"], "event");
        assert_eq!(value["event"]["type"], "unconfigured");
        assert_eq!(value["event"]["slot"], 13);
    }

    #[test]
    fn test_unknown_request_is_rejected() {
        assert!(serde_json::from_str::<Request>(r#"{"type":"set_mode"}"#).is_err());
    }
}
