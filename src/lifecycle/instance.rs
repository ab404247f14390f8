//! Single-instance guard
//!
//! Holds an exclusive advisory lock on a file in the data directory for
//! the life of the process. The OS drops the lock when the process exits,
//! so a crashed daemon never leaves a stale lock behind.

use std::fs::{File, OpenOptions, TryLockError};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum InstanceError {
    #[error("another minpad daemon is already running (lock held on {})", .0.display())]
    AlreadyRunning(PathBuf),

    #[error("failed to lock {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Exclusive lock; released on drop
#[derive(Debug)]
pub struct InstanceLock {
    _file: File,
    path: PathBuf,
}

impl InstanceLock {
    pub fn acquire(path: &Path) -> Result<Self, InstanceError> {
        let io_err = |source| InstanceError::Io {
            path: path.to_owned(),
            source,
        };

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)
            .map_err(io_err)?;

        match file.try_lock() {
            Ok(()) => {}
            Err(TryLockError::WouldBlock) => {
                return Err(InstanceError::AlreadyRunning(path.to_owned()))
            }
            Err(TryLockError::Error(source)) => return Err(io_err(source)),
        }

        // Informational only; the lock is what matters
        file.set_len(0).map_err(io_err)?;
        write!(file, "{}", std::process::id()).map_err(io_err)?;

        debug!(path = %path.display(), "instance lock acquired");
        Ok(Self {
            _file: file,
            path: path.to_owned(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
