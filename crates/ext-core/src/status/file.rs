use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Read;
use std::path::{Path, PathBuf};

use fs2::FileExt;

use super::{StatusRecord, StatusStore, apply};
use crate::{Error, Result};

/// Status store persisted as a JSON object of `id -> {enabled, type}`.
///
/// Reads take a shared lock and writes an exclusive lock on a sidecar
/// `.lock` file; writes go to a temporary file renamed over the target, so
/// readers in other processes never observe a partial file.
#[derive(Debug, Clone)]
pub struct FileStatusStore {
    path: PathBuf,
}

impl FileStatusStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_path(&self) -> PathBuf {
        self.path.with_extension("json.lock")
    }

    fn open_lock(&self) -> Result<File> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
        let lock_path = self.lock_path();
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| Error::io(&lock_path, e))
    }

    /// Read the file without locking. A missing or empty file is an empty map.
    fn read_unlocked(&self) -> Result<BTreeMap<String, StatusRecord>> {
        let mut file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(Error::io(&self.path, e)),
        };

        let mut content = String::new();
        file.read_to_string(&mut content)
            .map_err(|e| Error::io(&self.path, e))?;
        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }

        serde_json::from_str(&content).map_err(|e| Error::StatusStore {
            message: format!("corrupt status file {}: {e}", self.path.display()),
        })
    }

    fn write_unlocked(&self, records: &BTreeMap<String, StatusRecord>) -> Result<()> {
        let content = serde_json::to_string_pretty(records)?;

        let temp_path = self.path.with_extension("json.tmp");
        fs::write(&temp_path, content).map_err(|e| Error::io(&temp_path, e))?;
        fs::rename(&temp_path, &self.path).map_err(|e| Error::io(&self.path, e))?;

        Ok(())
    }

    /// Read-modify-write under the exclusive lock.
    fn update(&self, f: impl FnOnce(&mut BTreeMap<String, StatusRecord>)) -> Result<()> {
        let lock = self.open_lock()?;
        lock.lock_exclusive()
            .map_err(|e| Error::io(self.lock_path(), e))?;

        // Lock released when `lock` is dropped
        let mut records = self.read_unlocked()?;
        f(&mut records);
        self.write_unlocked(&records)
    }
}

impl StatusStore for FileStatusStore {
    fn statuses(&self) -> Result<BTreeMap<String, StatusRecord>> {
        let lock = self.open_lock()?;
        lock.lock_shared().map_err(|e| Error::io(self.lock_path(), e))?;
        self.read_unlocked()
    }

    fn set(&self, id: &str, enabled: bool, ext_type: Option<&str>) -> Result<()> {
        self.update(|records| apply(records, id, enabled, ext_type))
    }

    fn remove(&self, id: &str) -> Result<()> {
        self.update(|records| {
            records.remove(id);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_writes_visible_to_new_instance() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("storage/extensions.json");

        let store = FileStatusStore::new(&path);
        store.enable("blog", Some("Modules")).unwrap();
        store.enable("theme", Some("Themes")).unwrap();
        store.disable("theme", None).unwrap();

        let reopened = FileStatusStore::new(&path);
        assert!(reopened.is_enabled("blog").unwrap());
        assert!(!reopened.is_enabled("theme").unwrap());
        assert_eq!(
            reopened.statuses().unwrap()["theme"].ext_type.as_deref(),
            Some("Themes")
        );
    }

    #[test]
    fn test_no_temp_file_left_behind() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("extensions.json");
        let store = FileStatusStore::new(&path);
        store.set("a", true, None).unwrap();

        assert!(!path.with_extension("json.tmp").exists());
        let raw = std::fs::read_to_string(&path).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed["a"]["enabled"], serde_json::json!(true));
        assert_eq!(parsed["a"]["type"], serde_json::Value::Null);
    }

    #[test]
    fn test_remove_and_missing_file() {
        let tmp = TempDir::new().unwrap();
        let store = FileStatusStore::new(tmp.path().join("extensions.json"));
        assert!(store.statuses().unwrap().is_empty());

        store.enable("a", None).unwrap();
        store.remove("a").unwrap();
        store.remove("never-existed").unwrap();
        assert!(store.statuses().unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_file_is_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("extensions.json");
        std::fs::write(&path, "{not json").unwrap();

        let store = FileStatusStore::new(&path);
        assert!(matches!(store.statuses(), Err(Error::StatusStore { .. })));
    }
}
