//! Dispatch queue between the hook thread and action execution
//!
//! The hook callback only enqueues a slot and returns; a dedicated worker
//! thread drains the queue in FIFO order and runs the bound actions,
//! so process spawning and key synthesis delays never run inside the
//! OS callback.
//!
//! Auto-repeat requests are coalesced: each slot has at most one repeat
//! waiting in the queue, and releasing the key drops any repeat that has
//! not started yet.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace};

use super::ActionDispatcher;
use crate::hotkey::{Slot, SLOT_COUNT};

/// Where a dispatch request came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// First press seen by the keyboard hook
    Hook,
    /// Auto-repeat of a held key
    Repeat,
    /// Triggered through the control socket
    Control,
}

/// The dispatch worker is gone
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("dispatch queue is closed")]
pub struct QueueClosed;

/// Accepts slots for dispatch without blocking the caller
pub trait SlotSink: Send + Sync {
    fn submit(&self, slot: Slot, origin: Origin) -> Result<(), QueueClosed>;

    /// The key behind `slot` was released; repeats not yet started are void
    fn release(&self, _slot: Slot) {}
}

#[derive(Debug)]
enum Message {
    Dispatch {
        slot: Slot,
        origin: Origin,
        /// Release generation of the slot when a repeat was queued
        generation: u64,
    },
    Shutdown,
}

/// Per-slot repeat bookkeeping shared by both queue halves
#[derive(Debug, Default)]
struct RepeatGate {
    /// A repeat for the slot is waiting in the queue
    queued: [AtomicBool; SLOT_COUNT],
    /// Bumped every time the slot's key is released
    generation: [AtomicU64; SLOT_COUNT],
}

impl RepeatGate {
    /// Reserve the slot's single queued repeat, returning its generation
    fn reserve(&self, slot: Slot) -> Option<u64> {
        let index = slot.index();
        if self.queued[index].swap(true, Ordering::SeqCst) {
            return None;
        }
        Some(self.generation[index].load(Ordering::SeqCst))
    }

    /// Give the reservation back; true when the repeat is still current
    fn take(&self, slot: Slot, generation: u64) -> bool {
        let index = slot.index();
        self.queued[index].store(false, Ordering::SeqCst);
        self.generation[index].load(Ordering::SeqCst) == generation
    }

    fn release(&self, slot: Slot) {
        self.generation[slot.index()].fetch_add(1, Ordering::SeqCst);
    }
}

/// Sending half of the dispatch queue
#[derive(Debug, Clone)]
pub struct DispatchQueue {
    tx: mpsc::UnboundedSender<Message>,
    repeats: Arc<RepeatGate>,
}

/// Receiving half, consumed by [`DispatchWorker::spawn`]
pub struct DispatchReceiver {
    rx: mpsc::UnboundedReceiver<Message>,
    repeats: Arc<RepeatGate>,
}

impl DispatchQueue {
    pub fn new() -> (Self, DispatchReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let repeats = Arc::new(RepeatGate::default());
        (
            Self {
                tx,
                repeats: Arc::clone(&repeats),
            },
            DispatchReceiver { rx, repeats },
        )
    }

    /// Ask the worker to exit once it has drained earlier requests
    pub fn shutdown(&self) {
        let _ = self.tx.send(Message::Shutdown);
    }
}

impl SlotSink for DispatchQueue {
    fn submit(&self, slot: Slot, origin: Origin) -> Result<(), QueueClosed> {
        let generation = match origin {
            Origin::Repeat => match self.repeats.reserve(slot) {
                Some(generation) => generation,
                None => {
                    trace!(%slot, "repeat already queued, coalesced");
                    return if self.tx.is_closed() { Err(QueueClosed) } else { Ok(()) };
                }
            },
            Origin::Hook | Origin::Control => 0,
        };

        self.tx
            .send(Message::Dispatch {
                slot,
                origin,
                generation,
            })
            .map_err(|_| QueueClosed)
    }

    fn release(&self, slot: Slot) {
        self.repeats.release(slot);
    }
}

/// Thread executing queued dispatches one at a time
pub struct DispatchWorker {
    thread: JoinHandle<()>,
}

impl DispatchWorker {
    pub fn spawn(dispatcher: Arc<ActionDispatcher>, receiver: DispatchReceiver) -> std::io::Result<Self> {
        let thread = thread::Builder::new()
            .name("minpad-dispatch".to_string())
            .spawn(move || run_worker(dispatcher, receiver))?;
        Ok(Self { thread })
    }

    /// Wait for the worker to exit (after [`DispatchQueue::shutdown`])
    pub fn join(self) {
        if self.thread.join().is_err() {
            error!("dispatch worker panicked");
        }
    }
}

fn run_worker(dispatcher: Arc<ActionDispatcher>, receiver: DispatchReceiver) {
    let DispatchReceiver { mut rx, repeats } = receiver;
    info!("dispatch worker started");

    while let Some(message) = rx.blocking_recv() {
        match message {
            Message::Dispatch {
                slot,
                origin,
                generation,
            } => {
                if origin == Origin::Repeat && !repeats.take(slot, generation) {
                    debug!(%slot, "dropping repeat queued before release");
                    continue;
                }
                debug!(%slot, ?origin, "dispatching");
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| dispatcher.dispatch(slot)));
                if outcome.is_err() {
                    error!(%slot, "action panicked, worker continues");
                }
            }
            Message::Shutdown => break,
        }
    }

    info!("dispatch worker stopped");
}
