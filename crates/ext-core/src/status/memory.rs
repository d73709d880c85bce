use std::collections::BTreeMap;
use std::sync::RwLock;

use super::{StatusRecord, StatusStore, apply};
use crate::Result;

/// Process-local status store.
#[derive(Debug, Default)]
pub struct MemoryStatusStore {
    records: RwLock<BTreeMap<String, StatusRecord>>,
}

impl MemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with records.
    pub fn with_records(records: impl IntoIterator<Item = (String, StatusRecord)>) -> Self {
        Self {
            records: RwLock::new(records.into_iter().collect()),
        }
    }
}

impl StatusStore for MemoryStatusStore {
    fn statuses(&self) -> Result<BTreeMap<String, StatusRecord>> {
        Ok(self.records.read().unwrap_or_else(|e| e.into_inner()).clone())
    }

    fn set(&self, id: &str, enabled: bool, ext_type: Option<&str>) -> Result<()> {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        apply(&mut records, id, enabled, ext_type);
        Ok(())
    }

    fn remove(&self, id: &str) -> Result<()> {
        self.records
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id);
        Ok(())
    }

    fn is_enabled(&self, id: &str) -> Result<bool> {
        Ok(self
            .records
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .is_some_and(|r| r.enabled))
    }
}
