//! Global keyboard hook engine
//!
//! Owns the low-level hook for the daemon's lifetime. The hook and its
//! message pump live on a dedicated thread; the callback classifies the
//! event, updates the pressed-key set and repeat timers, enqueues the slot
//! for dispatch and returns immediately.

use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use tokio::sync::broadcast;
use tracing::{debug, error, info, trace, warn};

use super::keys::{self, Slot};
use super::platform::{HookBackend, SystemHook};
use super::repeat::RepeatScheduler;
use crate::actions::{Origin, SlotSink};
use crate::config::Timing;
use crate::events::ActionEvent;

/// Key transition reported by the hook
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyDirection {
    Down,
    Up,
}

/// One raw keyboard event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    pub vk_code: u32,
    /// Hardware extended-key flag (keypad Enter vs main Enter)
    pub extended: bool,
    /// Event was synthesized by software, including by us
    pub injected: bool,
    pub direction: KeyDirection,
}

/// What the hook tells the OS to do with an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Let the event continue to other hooks and applications
    PassThrough,
    /// Swallow the event
    Suppress,
}

/// Lifecycle of the hook engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl EngineState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => EngineState::Starting,
            2 => EngineState::Running,
            3 => EngineState::Stopping,
            _ => EngineState::Stopped,
        }
    }
}

/// Errors that can occur starting the hook
#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error("keyboard hook is already starting or stopping")]
    AlreadyStarting,

    #[error("failed to register keyboard hook: {0}")]
    Registration(String),

    #[error("global keyboard hooks are not supported on this platform")]
    Unsupported,

    #[error("failed to spawn hook thread: {0}")]
    ThreadSpawn(String),

    #[error("keyboard hook was stopped while starting")]
    Cancelled,
}

/// Raw codes the processor is tracking between down and up
#[derive(Debug, Default)]
struct HeldKeys {
    /// Suppressed and dispatched; used to spot OS auto-repeat
    held: HashSet<u32>,
    /// Passed through because dispatch failed; their key-up passes too
    passed: HashSet<u32>,
}

/// Per-event logic run inside the hook callback
pub(crate) struct KeyProcessor {
    sink: Arc<dyn SlotSink>,
    repeats: RepeatScheduler,
    timing: Timing,
    keys: Mutex<HeldKeys>,
}

impl KeyProcessor {
    fn new(sink: Arc<dyn SlotSink>, repeats: RepeatScheduler, timing: Timing) -> Self {
        Self {
            sink,
            repeats,
            timing,
            keys: Mutex::new(HeldKeys::default()),
        }
    }

    pub(crate) fn handle(&self, event: KeyEvent) -> Verdict {
        // Our own synthesized keys must never re-enter dispatch
        if event.injected {
            return Verdict::PassThrough;
        }
        let Some(slot) = keys::classify(event.vk_code, event.extended) else {
            return Verdict::PassThrough;
        };

        let code = event.vk_code;
        match event.direction {
            KeyDirection::Down => {
                {
                    let mut keys = self.keys();
                    if keys.passed.contains(&code) {
                        return Verdict::PassThrough;
                    }
                    if !keys.held.insert(code) {
                        trace!(%slot, "auto-repeat suppressed");
                        return Verdict::Suppress;
                    }
                }
                debug!(%slot, vk = code, "key down");
                if !self.submit(slot) {
                    let mut keys = self.keys();
                    keys.held.remove(&code);
                    keys.passed.insert(code);
                    return Verdict::PassThrough;
                }
                if slot.is_repeat_eligible() {
                    self.start_repeat(slot);
                }
                Verdict::Suppress
            }
            KeyDirection::Up => {
                let passed = {
                    let mut keys = self.keys();
                    keys.held.remove(&code);
                    keys.passed.remove(&code)
                };
                self.repeats.cancel(slot);
                self.release(slot);
                debug!(%slot, vk = code, passed, "key up");
                if passed {
                    Verdict::PassThrough
                } else {
                    Verdict::Suppress
                }
            }
        }
    }

    /// Hand the slot to the dispatch sink; failures never reach the OS callback
    fn submit(&self, slot: Slot) -> bool {
        match panic::catch_unwind(AssertUnwindSafe(|| self.sink.submit(slot, Origin::Hook))) {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                error!(%slot, error = %e, "dispatch failed, passing key through");
                false
            }
            Err(_) => {
                error!(%slot, "dispatch panicked, passing key through");
                false
            }
        }
    }

    fn release(&self, slot: Slot) {
        if panic::catch_unwind(AssertUnwindSafe(|| self.sink.release(slot))).is_err() {
            error!(%slot, "release panicked");
        }
    }

    fn start_repeat(&self, slot: Slot) {
        let sink = Arc::clone(&self.sink);
        let result = self.repeats.start_repeat(
            slot,
            self.timing.repeat_delay,
            self.timing.repeat_interval,
            move |slot| {
                if let Err(e) = sink.submit(slot, Origin::Repeat) {
                    warn!(%slot, error = %e, "repeat dispatch failed");
                }
            },
        );
        if let Err(e) = result {
            warn!(error = %e, "repeat timer not started");
        }
    }

    /// Forget held keys and cancel all repeats
    pub(crate) fn reset(&self) {
        {
            let mut keys = self.keys();
            keys.held.clear();
            keys.passed.clear();
        }
        self.repeats.cancel_all();
        for slot in Slot::all() {
            self.release(slot);
        }
    }

    fn keys(&self) -> MutexGuard<'_, HeldKeys> {
        self.keys.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct PumpHandle {
    thread_id: u32,
    thread: JoinHandle<()>,
}

const STOPPED: u8 = 0;
const STARTING: u8 = 1;
const RUNNING: u8 = 2;
const STOPPING: u8 = 3;

/// Owns the global keyboard hook and its pump thread
pub struct HookEngine {
    processor: Arc<KeyProcessor>,
    backend: Arc<dyn HookBackend>,
    state: Arc<AtomicU8>,
    pump: Mutex<Option<PumpHandle>>,
    /// `stop` arrived while the hook was still registering
    stop_requested: AtomicBool,
    events: broadcast::Sender<ActionEvent>,
}

impl HookEngine {
    pub fn new(
        sink: Arc<dyn SlotSink>,
        repeats: RepeatScheduler,
        timing: Timing,
        events: broadcast::Sender<ActionEvent>,
    ) -> Self {
        Self::with_backend(sink, repeats, timing, events, Arc::new(SystemHook))
    }

    pub(crate) fn with_backend(
        sink: Arc<dyn SlotSink>,
        repeats: RepeatScheduler,
        timing: Timing,
        events: broadcast::Sender<ActionEvent>,
        backend: Arc<dyn HookBackend>,
    ) -> Self {
        Self {
            processor: Arc::new(KeyProcessor::new(sink, repeats, timing)),
            backend,
            state: Arc::new(AtomicU8::new(STOPPED)),
            pump: Mutex::new(None),
            stop_requested: AtomicBool::new(false),
            events,
        }
    }

    pub fn state(&self) -> EngineState {
        EngineState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn is_running(&self) -> bool {
        self.state() == EngineState::Running
    }

    /// Install the hook on a dedicated pump thread.
    ///
    /// Returns once the hook is registered. Calling this while running is
    /// a no-op. A registration failure leaves the engine stopped and is
    /// not retried. A `stop` issued before registration finishes wins:
    /// the hook is removed again and this returns [`HookError::Cancelled`].
    pub fn start(&self) -> Result<(), HookError> {
        match self
            .state
            .compare_exchange(STOPPED, STARTING, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(_) => {}
            Err(RUNNING) => return Ok(()),
            Err(_) => return Err(HookError::AlreadyStarting),
        }
        self.stop_requested.store(false, Ordering::SeqCst);

        let (ready_tx, ready_rx) = std_mpsc::sync_channel(1);
        let processor = Arc::clone(&self.processor);
        let backend = Arc::clone(&self.backend);
        let state = Arc::clone(&self.state);

        let spawned = thread::Builder::new()
            .name("minpad-hook".to_string())
            .spawn(move || {
                info!("hook thread started");
                backend.run_pump(Arc::clone(&processor), ready_tx);
                processor.reset();
                // Only an unexpected pump exit leaves the engine marked running
                let _ = state.compare_exchange(RUNNING, STOPPED, Ordering::SeqCst, Ordering::SeqCst);
                info!("hook thread stopped");
            });

        let thread = match spawned {
            Ok(thread) => thread,
            Err(e) => {
                self.state.store(STOPPED, Ordering::SeqCst);
                return Err(HookError::ThreadSpawn(e.to_string()));
            }
        };

        let registered = ready_rx
            .recv()
            .unwrap_or_else(|_| Err(HookError::Registration("hook thread exited early".into())));

        match registered {
            Ok(thread_id) => {
                let mut pump = self.pump();
                if self.stop_requested.swap(false, Ordering::SeqCst) {
                    drop(pump);
                    self.state.store(STOPPING, Ordering::SeqCst);
                    self.backend.post_quit(thread_id);
                    if thread.join().is_err() {
                        error!("hook thread panicked");
                    }
                    self.processor.reset();
                    self.state.store(STOPPED, Ordering::SeqCst);
                    info!("keyboard hook stopped during startup");
                    return Err(HookError::Cancelled);
                }
                *pump = Some(PumpHandle { thread_id, thread });
                self.state.store(RUNNING, Ordering::SeqCst);
                drop(pump);
                info!(thread_id, "keyboard hook running");
                let _ = self.events.send(ActionEvent::HookStarted);
                Ok(())
            }
            Err(e) => {
                if thread.join().is_err() {
                    error!("hook thread panicked during startup");
                }
                self.state.store(STOPPED, Ordering::SeqCst);
                error!(error = %e, "keyboard hook failed to start");
                Err(e)
            }
        }
    }

    /// Remove the hook and end the pump thread.
    ///
    /// Safe from any thread; never waits on the pump thread from itself.
    /// While the hook is still starting, the stop is handed to `start`.
    pub fn stop(&self) {
        let pump = {
            let mut guard = self.pump();
            let pump = guard.take();
            if pump.is_none() && self.state() == EngineState::Starting {
                self.stop_requested.store(true, Ordering::SeqCst);
            }
            pump
        };
        let Some(pump) = pump else {
            self.processor.reset();
            return;
        };

        self.state.store(STOPPING, Ordering::SeqCst);
        self.processor.reset();
        self.backend.post_quit(pump.thread_id);

        if pump.thread.thread().id() != thread::current().id() && pump.thread.join().is_err() {
            error!("hook thread panicked");
        }

        self.state.store(STOPPED, Ordering::SeqCst);
        info!("keyboard hook stopped");
        let _ = self.events.send(ActionEvent::HookStopped);
    }

    fn pump(&self) -> MutexGuard<'_, Option<PumpHandle>> {
        self.pump.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for HookEngine {
    fn drop(&mut self) {
        self.stop();
    }
}
