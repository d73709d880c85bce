//! Persistence of per-extension enabled state.
//!
//! The lifecycle service only depends on the [`StatusStore`] contract. Two
//! implementations ship with the crate: [`MemoryStatusStore`] for embedding
//! and tests, and [`FileStatusStore`] which keeps a JSON file on disk.

mod file;
mod memory;

pub use file::FileStatusStore;
pub use memory::MemoryStatusStore;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::Result;

/// Stored state of one extension.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub enabled: bool,
    #[serde(rename = "type", default)]
    pub ext_type: Option<String>,
}

/// Pluggable storage of [`StatusRecord`]s keyed by extension id.
///
/// Implementations must give read-your-writes consistency within a process:
/// a read issued after a write has returned observes that write. A missing
/// record means disabled.
pub trait StatusStore: Send + Sync {
    /// All stored records.
    fn statuses(&self) -> Result<BTreeMap<String, StatusRecord>>;

    /// Write a record. A `None` type keeps the type already stored.
    fn set(&self, id: &str, enabled: bool, ext_type: Option<&str>) -> Result<()>;

    /// Drop the record for `id`. Removing an unknown id is not an error.
    fn remove(&self, id: &str) -> Result<()>;

    fn enable(&self, id: &str, ext_type: Option<&str>) -> Result<()> {
        self.set(id, true, ext_type)
    }

    fn disable(&self, id: &str, ext_type: Option<&str>) -> Result<()> {
        self.set(id, false, ext_type)
    }

    fn is_enabled(&self, id: &str) -> Result<bool> {
        Ok(self.statuses()?.get(id).is_some_and(|r| r.enabled))
    }
}

/// Apply a write to an in-memory record map.
fn apply(
    records: &mut BTreeMap<String, StatusRecord>,
    id: &str,
    enabled: bool,
    ext_type: Option<&str>,
) {
    let record = records.entry(id.to_string()).or_default();
    record.enabled = enabled;
    if let Some(t) = ext_type {
        record.ext_type = Some(t.to_string());
    }
}
