//! `SendInput` backed injector

// FFI type names match Win32 API conventions (INPUT, KEYBDINPUT, etc.)
#![allow(clippy::upper_case_acronyms)]

use std::mem;

use windows::Win32::UI::Input::KeyboardAndMouse::{
    SendInput, INPUT, INPUT_0, INPUT_KEYBOARD, KEYBDINPUT, KEYBD_EVENT_FLAGS,
    KEYEVENTF_EXTENDEDKEY, KEYEVENTF_KEYUP, VIRTUAL_KEY,
};

use super::{InjectionError, KeyInjector, VirtualKey};

/// Injects key transitions into the system input stream
pub struct SendInputInjector;

impl SendInputInjector {
    fn send(&self, key: VirtualKey, up: bool) -> Result<(), InjectionError> {
        let mut flags = KEYBD_EVENT_FLAGS(0);
        if key.is_extended() {
            flags |= KEYEVENTF_EXTENDEDKEY;
        }
        if up {
            flags |= KEYEVENTF_KEYUP;
        }

        let input = [INPUT {
            r#type: INPUT_KEYBOARD,
            Anonymous: INPUT_0 {
                ki: KEYBDINPUT {
                    wVk: VIRTUAL_KEY(key.0),
                    wScan: 0,
                    dwFlags: flags,
                    time: 0,
                    dwExtraInfo: 0,
                },
            },
        }];

        // SAFETY: `input` is a fully initialized keyboard INPUT and cbsize matches its layout
        let sent = unsafe { SendInput(&input, mem::size_of::<INPUT>() as i32) };
        if sent == 1 {
            Ok(())
        } else {
            Err(InjectionError::Rejected { key })
        }
    }
}

impl KeyInjector for SendInputInjector {
    fn press(&self, key: VirtualKey) -> Result<(), InjectionError> {
        self.send(key, false)
    }

    fn release(&self, key: VirtualKey) -> Result<(), InjectionError> {
        self.send(key, true)
    }
}
