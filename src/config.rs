//! Configuration loading and management

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};

/// Environment variable overriding the data directory
const DATA_DIR_ENV: &str = "MINPAD_DATA_DIR";

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory for runtime data
    pub data_dir: PathBuf,

    /// Saved key bindings
    pub bindings_path: PathBuf,

    /// Single-instance lock file
    pub lock_path: PathBuf,

    /// Control endpoint: a Unix socket path, or a named pipe on Windows
    pub ipc_endpoint: PathBuf,

    /// Key repeat and synthesis timing
    pub timing: Timing,
}

/// Delays used by the repeat scheduler and the key synthesizer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// Hold time before a repeat-eligible key starts repeating
    pub repeat_delay: Duration,
    /// Period between repeats once repeating
    pub repeat_interval: Duration,
    /// Settle time between synthetic key transitions
    pub key_step: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            repeat_delay: Duration::from_millis(150),
            repeat_interval: Duration::from_millis(120),
            key_step: Duration::from_millis(50),
        }
    }
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> Result<Self> {
        let data_dir = match std::env::var_os(DATA_DIR_ENV) {
            Some(dir) => PathBuf::from(dir),
            None => dirs::home_dir()
                .context("could not determine home directory")?
                .join(".minpad"),
        };

        Ok(Self::with_data_dir(data_dir))
    }

    /// Build a configuration rooted at `data_dir`
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();

        Self {
            bindings_path: data_dir.join("config.json"),
            lock_path: data_dir.join("minpad.lock"),
            ipc_endpoint: default_endpoint(&data_dir),
            timing: Timing::default(),
            data_dir,
        }
    }

    /// Ensure data directory exists
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)
            .with_context(|| format!("failed to create {}", self.data_dir.display()))?;
        Ok(())
    }
}

#[cfg(unix)]
fn default_endpoint(data_dir: &Path) -> PathBuf {
    data_dir.join("minpad.sock")
}

#[cfg(windows)]
fn default_endpoint(_data_dir: &Path) -> PathBuf {
    PathBuf::from(r"\\.\pipe\minpad")
}
