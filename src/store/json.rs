//! JSON file store
//!
//! Layout:
//!
//! ```json
//! {
//!   "actions": { "1": { "name": "Open Notepad", "command": "notepad.exe" } },
//!   "version": "1.0.0",
//!   "lastModified": 1700000000000
//! }
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::BindingStore;
use crate::actions::{Binding, BindingRecord, BindingTable};
use crate::hotkey::Slot;

const FORMAT_VERSION: &str = "1.0.0";

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BindingsFile {
    #[serde(default)]
    actions: BTreeMap<String, BindingRecord>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_modified: Option<u64>,
}

/// Stores bindings as pretty-printed JSON at a fixed path
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Copy the saved bindings to `dest`
    pub fn export_to(&self, dest: &Path) -> Result<()> {
        if !self.path.exists() {
            bail!("no saved bindings at {}", self.path.display());
        }
        fs::copy(&self.path, dest)
            .with_context(|| format!("failed to export bindings to {}", dest.display()))?;
        info!(dest = %dest.display(), "bindings exported");
        Ok(())
    }

    /// Parse a bindings file at `src` without touching the saved one
    pub fn read_from(src: &Path) -> Result<BindingTable> {
        let content = fs::read_to_string(src)
            .with_context(|| format!("failed to read {}", src.display()))?;
        let file: BindingsFile = serde_json::from_str(&content)
            .with_context(|| format!("{} is not a bindings file", src.display()))?;
        Ok(table_from_file(file))
    }
}

impl BindingStore for JsonFileStore {
    fn load_bindings(&self) -> Result<Option<BindingTable>> {
        if !self.path.exists() {
            info!(path = %self.path.display(), "no saved bindings, using defaults");
            return Ok(None);
        }

        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        let file: BindingsFile = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse {}", self.path.display()))?;

        let table = table_from_file(file);
        info!(path = %self.path.display(), bound = table.len(), "bindings loaded");
        Ok(Some(table))
    }

    fn save_bindings(&self, table: &BindingTable) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let file = BindingsFile {
            actions: table
                .to_records()
                .into_iter()
                .map(|(slot, record)| (slot.to_string(), record))
                .collect(),
            version: Some(FORMAT_VERSION.to_string()),
            last_modified: Some(now_millis()),
        };
        let json = serde_json::to_string_pretty(&file)?;

        // Write beside the target and rename so readers never see a partial file
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).with_context(|| format!("failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("failed to replace {}", self.path.display()))?;

        info!(path = %self.path.display(), bound = table.len(), "bindings saved");
        Ok(())
    }
}

/// Build a table from file records, skipping anything unusable
fn table_from_file(file: BindingsFile) -> BindingTable {
    let mut table = BindingTable::new();

    for (key, record) in file.actions {
        let Some(slot) = key.parse::<u8>().ok().and_then(Slot::new) else {
            warn!(key, "skipping binding with invalid slot");
            continue;
        };
        match Binding::try_from(record) {
            Ok(binding) => table.insert(slot, binding),
            Err(e) => warn!(%slot, error = %e, "skipping invalid binding"),
        }
    }

    table
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
