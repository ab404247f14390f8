//! External program launching

use std::io;
use std::process::{Child, Command, Stdio};

use tracing::debug;

/// Starts external programs, fire-and-forget
pub trait ProcessLauncher: Send + Sync {
    fn spawn(&self, command: &str, argument: Option<&str>) -> io::Result<()>;
}

/// Launches programs as detached child processes
pub struct SystemLauncher;

impl ProcessLauncher for SystemLauncher {
    fn spawn(&self, command: &str, argument: Option<&str>) -> io::Result<()> {
        let mut cmd = Command::new(command);
        cmd.args(argument)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        let child = cmd.spawn()?;
        debug!(command, pid = child.id(), "process launched");
        detach(child);
        Ok(())
    }
}

/// Let the child run on its own; exited children must be waited on or they
/// linger as zombies
#[cfg(unix)]
fn detach(child: Child) {
    if let Err(e) = reap(child) {
        tracing::warn!(error = %e, "could not start reaper thread");
    }
}

/// Dropping the child only closes its handle
#[cfg(not(unix))]
fn detach(_child: Child) {}

#[cfg(unix)]
fn reap(mut child: Child) -> io::Result<std::thread::JoinHandle<()>> {
    std::thread::Builder::new()
        .name("minpad-reaper".to_string())
        .spawn(move || {
            let _ = child.wait();
        })
}
