//! OS keyboard hook backends
//!
//! `run_pump` installs the hook on the calling thread, reports the pump's
//! thread id (or the failure) through `ready`, and services messages until
//! `post_quit` is called with that id.

use std::sync::mpsc::SyncSender;
use std::sync::Arc;

use super::engine::{HookError, KeyProcessor};

/// Installs the hook and runs its message pump
pub(crate) trait HookBackend: Send + Sync {
    /// Runs on the dedicated hook thread until told to quit
    fn run_pump(&self, processor: Arc<KeyProcessor>, ready: SyncSender<Result<u32, HookError>>);

    /// Ask the pump running on `thread_id` to exit
    fn post_quit(&self, thread_id: u32);
}

/// The hook this platform provides
pub(crate) struct SystemHook;

impl HookBackend for SystemHook {
    fn run_pump(&self, processor: Arc<KeyProcessor>, ready: SyncSender<Result<u32, HookError>>) {
        imp::run_pump(processor, ready);
    }

    fn post_quit(&self, thread_id: u32) {
        imp::post_quit(thread_id);
    }
}

#[cfg(target_os = "windows")]
use windows_hook as imp;

#[cfg(not(target_os = "windows"))]
mod imp {
    use super::*;

    pub(super) fn run_pump(_processor: Arc<KeyProcessor>, ready: SyncSender<Result<u32, HookError>>) {
        tracing::warn!("no global keyboard hook backend for this platform");
        let _ = ready.send(Err(HookError::Unsupported));
    }

    pub(super) fn post_quit(_thread_id: u32) {}
}

#[cfg(target_os = "windows")]
mod windows_hook {
    use std::cell::{Cell, RefCell};
    use std::panic::{self, AssertUnwindSafe};

    use tracing::{error, warn};
    use windows::Win32::Foundation::{HINSTANCE, LPARAM, LRESULT, WPARAM};
    use windows::Win32::System::LibraryLoader::GetModuleHandleW;
    use windows::Win32::System::Threading::GetCurrentThreadId;
    use windows::Win32::UI::WindowsAndMessaging::{
        CallNextHookEx, DispatchMessageW, GetMessageW, PeekMessageW, PostThreadMessageW,
        SetWindowsHookExW, TranslateMessage, UnhookWindowsHookEx, HHOOK, KBDLLHOOKSTRUCT,
        LLKHF_EXTENDED, LLKHF_INJECTED, MSG, PM_NOREMOVE, WH_KEYBOARD_LL, WM_KEYDOWN, WM_KEYUP,
        WM_QUIT, WM_SYSKEYDOWN, WM_SYSKEYUP, WM_USER,
    };

    use super::*;
    use crate::hotkey::engine::{KeyDirection, KeyEvent, Verdict};

    thread_local! {
        static PROCESSOR: RefCell<Option<Arc<KeyProcessor>>> = const { RefCell::new(None) };
        static HOOK: Cell<HHOOK> = Cell::new(HHOOK::default());
    }

    pub(super) fn run_pump(
        processor: Arc<KeyProcessor>,
        ready: SyncSender<Result<u32, HookError>>,
    ) {
        PROCESSOR.with(|slot| *slot.borrow_mut() = Some(processor));

        let hook = match install() {
            Ok(hook) => hook,
            Err(e) => {
                PROCESSOR.with(|slot| slot.borrow_mut().take());
                let _ = ready.send(Err(HookError::Registration(e.to_string())));
                return;
            }
        };
        HOOK.with(|cell| cell.set(hook));

        let mut msg = MSG::default();
        let thread_id = unsafe {
            // Create the message queue before anyone can post WM_QUIT to it
            let _ = PeekMessageW(&mut msg, None, WM_USER, WM_USER, PM_NOREMOVE);
            GetCurrentThreadId()
        };
        let _ = ready.send(Ok(thread_id));

        // 0 is WM_QUIT, -1 is an error; both end the pump
        while unsafe { GetMessageW(&mut msg, None, 0, 0) }.0 > 0 {
            unsafe {
                let _ = TranslateMessage(&msg);
                DispatchMessageW(&msg);
            }
        }

        if let Err(e) = unsafe { UnhookWindowsHookEx(hook) } {
            warn!(error = %e, "failed to remove keyboard hook");
        }
        HOOK.with(|cell| cell.set(HHOOK::default()));
        PROCESSOR.with(|slot| slot.borrow_mut().take());
    }

    pub(super) fn post_quit(thread_id: u32) {
        if let Err(e) = unsafe { PostThreadMessageW(thread_id, WM_QUIT, WPARAM(0), LPARAM(0)) } {
            warn!(thread_id, error = %e, "failed to post quit to hook thread");
        }
    }

    fn install() -> windows::core::Result<HHOOK> {
        unsafe {
            let instance: HINSTANCE = GetModuleHandleW(None)?.into();
            SetWindowsHookExW(WH_KEYBOARD_LL, Some(keyboard_proc), instance, 0)
        }
    }

    unsafe extern "system" fn keyboard_proc(code: i32, wparam: WPARAM, lparam: LPARAM) -> LRESULT {
        let hook = HOOK.with(Cell::get);
        if code < 0 {
            return CallNextHookEx(hook, code, wparam, lparam);
        }

        let direction = match wparam.0 as u32 {
            WM_KEYDOWN | WM_SYSKEYDOWN => KeyDirection::Down,
            WM_KEYUP | WM_SYSKEYUP => KeyDirection::Up,
            _ => return CallNextHookEx(hook, code, wparam, lparam),
        };

        let info = &*(lparam.0 as *const KBDLLHOOKSTRUCT);
        let event = KeyEvent {
            vk_code: info.vkCode,
            extended: info.flags.0 & LLKHF_EXTENDED.0 != 0,
            injected: info.flags.0 & LLKHF_INJECTED.0 != 0,
            direction,
        };

        let verdict = PROCESSOR.with(|slot| {
            let slot = slot.borrow();
            let processor = slot.as_ref()?;
            match panic::catch_unwind(AssertUnwindSafe(|| processor.handle(event))) {
                Ok(verdict) => Some(verdict),
                Err(_) => {
                    error!(vk = event.vk_code, "key handler panicked");
                    None
                }
            }
        });

        match verdict {
            Some(Verdict::Suppress) => LRESULT(1),
            _ => CallNextHookEx(hook, code, wparam, lparam),
        }
    }
}
