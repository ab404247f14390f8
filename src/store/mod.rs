//! Binding persistence
//!
//! The dispatcher only sees the [`BindingStore`] trait; the JSON file
//! layout lives in [`JsonFileStore`].

mod json;

use anyhow::Result;

use crate::actions::BindingTable;

pub use json::JsonFileStore;

/// Loads and saves the slot to binding mapping
pub trait BindingStore: Send + Sync {
    /// Saved bindings, or `None` if nothing has been saved yet
    fn load_bindings(&self) -> Result<Option<BindingTable>>;

    /// Persist the full table
    fn save_bindings(&self, table: &BindingTable) -> Result<()>;
}
