//! Auto-repeat timers for held keys
//!
//! Each slot is a small state machine: `Idle -> Pending -> Repeating -> Idle`.
//! `Pending` covers the initial delay after the first dispatch; the timer
//! moves to `Repeating` on its first firing and back to `Idle` when
//! cancelled. Timers run as tasks on the tokio runtime, never on the hook
//! thread.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::debug;

use super::keys::{Slot, SLOT_COUNT};

const PHASE_PENDING: u8 = 1;
const PHASE_REPEATING: u8 = 2;

/// Where a slot's repeat timer is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepeatPhase {
    /// No timer
    Idle,
    /// Waiting out the initial delay
    Pending,
    /// Firing at the steady interval
    Repeating,
}

/// Errors from the repeat scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RepeatError {
    #[error("{0} already has a repeat timer")]
    AlreadyScheduled(Slot),
}

struct SlotTimer {
    phase: Arc<AtomicU8>,
    task: AbortHandle,
}

/// Per-slot recurring timers; at most one per slot
pub struct RepeatScheduler {
    runtime: Handle,
    timers: Mutex<[Option<SlotTimer>; SLOT_COUNT]>,
}

impl RepeatScheduler {
    pub fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            timers: Mutex::new(Default::default()),
        }
    }

    /// Call `fire` after `initial_delay`, then every `interval`, until cancelled
    pub fn start_repeat<F>(
        &self,
        slot: Slot,
        initial_delay: Duration,
        interval: Duration,
        fire: F,
    ) -> Result<(), RepeatError>
    where
        F: Fn(Slot) + Send + Sync + 'static,
    {
        let mut timers = self.timers();
        let entry = &mut timers[slot.index()];
        if entry.as_ref().is_some_and(|timer| !timer.task.is_finished()) {
            return Err(RepeatError::AlreadyScheduled(slot));
        }

        let phase = Arc::new(AtomicU8::new(PHASE_PENDING));
        let task_phase = Arc::clone(&phase);
        let interval = interval.max(Duration::from_millis(1));

        let task = self.runtime.spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + initial_delay, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                task_phase.store(PHASE_REPEATING, Ordering::Release);
                fire(slot);
            }
        });

        *entry = Some(SlotTimer {
            phase,
            task: task.abort_handle(),
        });
        debug!(%slot, ?initial_delay, ?interval, "repeat timer started");
        Ok(())
    }

    /// Cancel the slot's timer; returns whether one was live
    pub fn cancel(&self, slot: Slot) -> bool {
        match self.timers()[slot.index()].take() {
            Some(timer) => {
                timer.task.abort();
                debug!(%slot, "repeat timer cancelled");
                true
            }
            None => false,
        }
    }

    /// Cancel every timer
    pub fn cancel_all(&self) {
        let mut timers = self.timers();
        for timer in timers.iter_mut().filter_map(Option::take) {
            timer.task.abort();
        }
    }

    pub fn phase(&self, slot: Slot) -> RepeatPhase {
        match &self.timers()[slot.index()] {
            None => RepeatPhase::Idle,
            Some(timer) if timer.task.is_finished() => RepeatPhase::Idle,
            Some(timer) => match timer.phase.load(Ordering::Acquire) {
                PHASE_REPEATING => RepeatPhase::Repeating,
                _ => RepeatPhase::Pending,
            },
        }
    }

    fn timers(&self) -> MutexGuard<'_, [Option<SlotTimer>; SLOT_COUNT]> {
        self.timers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for RepeatScheduler {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
