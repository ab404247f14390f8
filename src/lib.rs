//! minpad: numeric keypad macro daemon
//!
//! Captures the sixteen numeric keypad keys system-wide, suppresses them,
//! and runs whatever is bound to each one:
//! - launching a program, optionally with an argument
//! - synthesizing a key combination such as `ctrl+shift+t`
//! - a built-in media action (volume up/down, mute, play/pause)
//!
//! `+` and `-` auto-repeat while held. Bindings persist as JSON and can be
//! edited at runtime through the local control socket.

pub mod actions;
pub mod config;
pub mod events;
pub mod hotkey;
pub mod input;
pub mod ipc;
pub mod lifecycle;
pub mod store;
