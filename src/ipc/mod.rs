//! IPC module for controlling the daemon
//!
//! The control surface edits bindings, triggers slots and streams outcome
//! events to subscribed clients.

mod protocol;
mod server;

pub use protocol::{DaemonStatus, ErrorCode, Notification, Request, Response, MAX_FRAME_LEN};
pub use server::{Server, ServerContext};
