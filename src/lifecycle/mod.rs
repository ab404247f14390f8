//! Process lifecycle: single-instance guard and shutdown signals

mod instance;
mod shutdown;

pub use instance::{InstanceError, InstanceLock};
pub use shutdown::ShutdownSignal;
