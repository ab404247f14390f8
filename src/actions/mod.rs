//! Bound actions and their execution
//!
//! Slots arrive through the [`DispatchQueue`] and are executed by the
//! [`ActionDispatcher`] on the dispatch worker thread.

mod binding;
mod dispatcher;
mod launcher;
mod queue;

pub use binding::{ActionKind, Binding, BindingError, BindingRecord, BindingTable, BuiltinAction};
pub use dispatcher::{ActionDispatcher, ActionError, DispatchOutcome};
pub use launcher::{ProcessLauncher, SystemLauncher};
pub use queue::{DispatchQueue, DispatchReceiver, DispatchWorker, Origin, QueueClosed, SlotSink};

#[cfg(test)]
pub(crate) use dispatcher::tests::{dispatcher_with, RecordingLauncher};
