//! Discovery and caching of extension manifests.
//!
//! The registry walks every configured directory, parses each
//! `extension.json` it finds and keeps the resulting manifests keyed by id.
//! A discovery pass replaces the whole set at once; readers either see the
//! previous set or the new one, never a mix.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::MANIFEST_FILENAME;
use crate::manifest::Manifest;

/// One directory scanned for extensions.
///
/// Manifests below a typed directory get that type; manifests below an
/// untyped one keep the type they declare.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathEntry {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub ext_type: Option<String>,
    pub dir: PathBuf,
}

impl PathEntry {
    pub fn typed(ext_type: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            ext_type: Some(ext_type.into()),
            dir: dir.into(),
        }
    }

    pub fn untyped(dir: impl Into<PathBuf>) -> Self {
        Self {
            ext_type: None,
            dir: dir.into(),
        }
    }
}

/// Directories scanned for extensions, in scan order.
///
/// Deserializes from a map of type name to directory (scanned in key order)
/// or from a list mixing plain directories and `{ type, dir }` tables.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawPaths", into = "Vec<RawEntry>")]
pub struct ExtensionPaths {
    entries: Vec<PathEntry>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawPaths {
    Typed(BTreeMap<String, PathBuf>),
    Mixed(Vec<RawEntry>),
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawEntry {
    Dir(PathBuf),
    Entry(PathEntry),
}

impl From<RawPaths> for ExtensionPaths {
    fn from(raw: RawPaths) -> Self {
        match raw {
            RawPaths::Typed(map) => Self::typed(map),
            RawPaths::Mixed(entries) => entries
                .into_iter()
                .map(|entry| match entry {
                    RawEntry::Dir(dir) => PathEntry::untyped(dir),
                    RawEntry::Entry(entry) => entry,
                })
                .collect(),
        }
    }
}

impl From<ExtensionPaths> for Vec<RawEntry> {
    fn from(paths: ExtensionPaths) -> Self {
        paths
            .entries
            .into_iter()
            .map(|entry| match entry.ext_type {
                Some(_) => RawEntry::Entry(entry),
                None => RawEntry::Dir(entry.dir),
            })
            .collect()
    }
}

impl FromIterator<PathEntry> for ExtensionPaths {
    fn from_iter<I: IntoIterator<Item = PathEntry>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl ExtensionPaths {
    /// Typed directories from `(type, dir)` pairs.
    pub fn typed<T, D>(pairs: impl IntoIterator<Item = (T, D)>) -> Self
    where
        T: Into<String>,
        D: Into<PathBuf>,
    {
        pairs
            .into_iter()
            .map(|(t, d)| PathEntry::typed(t, d))
            .collect()
    }

    /// Untyped directories.
    pub fn untyped<D: Into<PathBuf>>(dirs: impl IntoIterator<Item = D>) -> Self {
        dirs.into_iter().map(PathEntry::untyped).collect()
    }

    pub fn entries(&self) -> &[PathEntry] {
        &self.entries
    }

    /// Configured type names in first-seen order, without duplicates.
    pub fn type_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for ext_type in self.entries.iter().filter_map(|e| e.ext_type.as_ref()) {
            if !names.contains(ext_type) {
                names.push(ext_type.clone());
            }
        }
        names
    }
}

/// One completed discovery pass.
#[derive(Debug, Default)]
struct Snapshot {
    manifests: Vec<Arc<Manifest>>,
    index: HashMap<String, usize>,
}

impl Snapshot {
    fn from_manifests(manifests: impl IntoIterator<Item = Manifest>) -> Self {
        let mut snapshot = Self::default();
        for manifest in manifests {
            snapshot.insert(manifest);
        }
        snapshot
    }

    /// Insert a manifest; a duplicate id replaces the earlier entry in place.
    fn insert(&mut self, manifest: Manifest) {
        let manifest = Arc::new(manifest);
        match self.index.get(&manifest.id) {
            Some(&pos) => {
                tracing::debug!(
                    id = %manifest.id,
                    path = %manifest.path.display(),
                    "Duplicate extension id, later manifest wins"
                );
                self.manifests[pos] = manifest;
            }
            None => {
                self.index.insert(manifest.id.clone(), self.manifests.len());
                self.manifests.push(manifest);
            }
        }
    }
}

/// Cached discovery result. `generation` is bumped whenever the slot is
/// replaced or cleared, so a lazy scan that raced with either is not stored.
#[derive(Debug, Default)]
struct SnapshotSlot {
    generation: u64,
    snapshot: Option<Arc<Snapshot>>,
}

impl SnapshotSlot {
    fn replace(&mut self, snapshot: Option<Arc<Snapshot>>) {
        self.generation = self.generation.wrapping_add(1);
        self.snapshot = snapshot;
    }
}

/// Registry of discovered extension manifests.
///
/// Discovery runs lazily on first read and again after [`Registry::clear_cache`].
#[derive(Debug)]
pub struct Registry {
    base_path: PathBuf,
    paths: ExtensionPaths,
    default_author: String,
    /// Lowercase type name -> configured spelling.
    canonical_types: HashMap<String, String>,
    cache: RwLock<SnapshotSlot>,
}

impl Registry {
    /// Create a registry. Relative directories are resolved against `base_path`.
    pub fn new(base_path: impl Into<PathBuf>, paths: ExtensionPaths) -> Self {
        let canonical_types = paths
            .type_names()
            .into_iter()
            .map(|t| (t.to_lowercase(), t))
            .collect();

        Self {
            base_path: base_path.into(),
            paths,
            default_author: String::new(),
            canonical_types,
            cache: RwLock::new(SnapshotSlot::default()),
        }
    }

    /// Author recorded for manifests that do not declare one.
    pub fn with_default_author(mut self, author: impl Into<String>) -> Self {
        self.default_author = author.into();
        self
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Rescan all configured directories and replace the cached manifest set.
    pub fn discover(&self) {
        let snapshot = Arc::new(self.scan());
        tracing::debug!(count = snapshot.manifests.len(), "Extension discovery complete");
        self.slot_mut().replace(Some(snapshot));
    }

    /// Replace the cached manifest set without touching the filesystem.
    pub fn set_manifests(&self, manifests: impl IntoIterator<Item = Manifest>) {
        let snapshot = Arc::new(Snapshot::from_manifests(manifests));
        self.slot_mut().replace(Some(snapshot));
    }

    /// Drop the cached manifest set; the next read rediscovers.
    pub fn clear_cache(&self) {
        self.slot_mut().replace(None);
    }

    /// All discovered manifests in discovery order.
    pub fn all(&self) -> Vec<Arc<Manifest>> {
        self.snapshot().manifests.clone()
    }

    /// Look up a manifest by id.
    pub fn find(&self, id: &str) -> Option<Arc<Manifest>> {
        let snapshot = self.snapshot();
        snapshot
            .index
            .get(id)
            .map(|&pos| Arc::clone(&snapshot.manifests[pos]))
    }

    /// Configured type names, canonical spelling.
    pub fn types(&self) -> Vec<String> {
        self.paths.type_names()
    }

    /// Canonical type -> absolute directory.
    pub fn typed_paths(&self) -> BTreeMap<String, PathBuf> {
        self.paths
            .entries()
            .iter()
            .filter_map(|e| {
                e.ext_type
                    .as_ref()
                    .map(|t| (t.clone(), self.resolve(&e.dir)))
            })
            .collect()
    }

    /// Absolute directory configured for `ext_type` (case-insensitive).
    pub fn path_for_type(&self, ext_type: &str) -> Option<PathBuf> {
        let canonical = self.canonicalize_type(ext_type);
        self.typed_paths().remove(&canonical)
    }

    /// Map a type name to its configured spelling; unknown types pass through.
    pub fn canonicalize_type(&self, ext_type: &str) -> String {
        let trimmed = ext_type.trim();
        self.canonical_types
            .get(&trimmed.to_lowercase())
            .cloned()
            .unwrap_or_else(|| trimmed.to_string())
    }

    fn slot_mut(&self) -> std::sync::RwLockWriteGuard<'_, SnapshotSlot> {
        self.cache.write().unwrap_or_else(|e| e.into_inner())
    }

    fn snapshot(&self) -> Arc<Snapshot> {
        let generation = {
            let slot = self.cache.read().unwrap_or_else(|e| e.into_inner());
            if let Some(snapshot) = &slot.snapshot {
                return Arc::clone(snapshot);
            }
            slot.generation
        };

        let snapshot = Arc::new(self.scan());
        let mut slot = self.slot_mut();
        if slot.generation != generation {
            // Cleared or replaced while scanning; serve the scan without caching it.
            return slot.snapshot.clone().unwrap_or(snapshot);
        }
        Arc::clone(slot.snapshot.get_or_insert(snapshot))
    }

    fn resolve(&self, dir: &Path) -> PathBuf {
        if dir.is_absolute() {
            dir.to_path_buf()
        } else {
            self.base_path.join(dir)
        }
    }

    fn scan(&self) -> Snapshot {
        let mut snapshot = Snapshot::default();

        for entry in self.paths.entries() {
            self.scan_dir(&self.resolve(&entry.dir), entry.ext_type.as_deref(), &mut snapshot);
        }

        snapshot
    }

    /// Shallow pass over direct children, then a recursive pass for nested manifests.
    fn scan_dir(&self, dir: &Path, ext_type: Option<&str>, snapshot: &mut Snapshot) {
        if !dir.is_dir() {
            tracing::debug!(dir = %dir.display(), "Extension directory does not exist, skipping");
            return;
        }

        let mut seen = HashSet::new();

        let mut children: Vec<PathBuf> = match std::fs::read_dir(dir) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.is_dir())
                .collect(),
            Err(e) => {
                tracing::warn!(dir = %dir.display(), error = %e, "Failed to read extension directory");
                return;
            }
        };
        children.sort();

        for child in children {
            if child.join(MANIFEST_FILENAME).is_file() {
                seen.insert(child.clone());
                self.read_into(&child, ext_type, snapshot);
            }
        }

        let nested = WalkDir::new(dir)
            .min_depth(3)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| e.file_name().eq_ignore_ascii_case(MANIFEST_FILENAME));

        for entry in nested {
            let Some(parent) = entry.path().parent() else {
                continue;
            };
            if seen.insert(parent.to_path_buf()) {
                self.read_into(parent, ext_type, snapshot);
            }
        }
    }

    fn read_into(&self, dir: &Path, ext_type: Option<&str>, snapshot: &mut Snapshot) {
        match Manifest::load(dir, ext_type, &self.default_author) {
            Ok(mut manifest) => {
                manifest.ext_type = self.canonicalize_type(&manifest.ext_type);
                snapshot.insert(manifest);
            }
            Err(e) => {
                tracing::debug!(dir = %dir.display(), error = %e, "Skipping directory without a valid manifest");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn write_manifest(dir: &Path, id: &str, extra: &str) {
        std::fs::create_dir_all(dir).unwrap();
        let body = format!(
            r#"{{"id": "{id}", "name": "{id}", "provider": "{id}::Provider"{extra}}}"#
        );
        std::fs::write(dir.join(MANIFEST_FILENAME), body).unwrap();
    }

    fn typed(entries: &[(&str, &str)]) -> ExtensionPaths {
        ExtensionPaths::typed(entries.iter().copied())
    }

    fn ids(registry: &Registry) -> Vec<String> {
        registry.all().iter().map(|m| m.id.clone()).collect()
    }

    #[test]
    fn test_discover_shallow_and_nested() {
        let tmp = TempDir::new().unwrap();
        write_manifest(&tmp.path().join("modules/Blog"), "blog", "");
        write_manifest(&tmp.path().join("modules/Auth"), "auth", "");
        write_manifest(&tmp.path().join("modules/vendor/acme/Shop"), "shop", "");
        std::fs::create_dir_all(tmp.path().join("modules/Empty")).unwrap();

        let registry = Registry::new(tmp.path(), typed(&[("Modules", "modules")]));
        assert_eq!(ids(&registry), vec!["auth", "blog", "shop"]);
        assert_eq!(registry.find("shop").unwrap().ext_type, "Modules");
    }

    #[test]
    fn test_invalid_manifests_skipped() {
        let tmp = TempDir::new().unwrap();
        write_manifest(&tmp.path().join("modules/Good"), "good", "");
        let bad = tmp.path().join("modules/Bad");
        std::fs::create_dir_all(&bad).unwrap();
        std::fs::write(bad.join(MANIFEST_FILENAME), r#"{"id": "bad", "name": "Bad"}"#).unwrap();
        let broken = tmp.path().join("modules/Broken");
        std::fs::create_dir_all(&broken).unwrap();
        std::fs::write(broken.join(MANIFEST_FILENAME), "{oops").unwrap();

        let registry = Registry::new(tmp.path(), typed(&[("Modules", "modules")]));
        assert_eq!(ids(&registry), vec!["good"]);
    }

    #[test]
    fn test_duplicate_id_last_wins() {
        let tmp = TempDir::new().unwrap();
        write_manifest(&tmp.path().join("modules/A"), "same", r#", "version": "1.0.0""#);
        write_manifest(&tmp.path().join("modules/B"), "same", r#", "version": "2.0.0""#);

        let registry = Registry::new(tmp.path(), typed(&[("Modules", "modules")]));
        let all = registry.all();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].version, "2.0.0");
    }

    #[test]
    fn test_untyped_paths_canonicalize_declared_type() {
        let tmp = TempDir::new().unwrap();
        write_manifest(&tmp.path().join("ext/One"), "one", r#", "type": "THEMES""#);
        write_manifest(&tmp.path().join("ext/Two"), "two", r#", "type": "Widgets""#);

        let registry = Registry::new(tmp.path(), ExtensionPaths::untyped(["ext"]));
        assert_eq!(registry.find("one").unwrap().ext_type, "THEMES");
        assert_eq!(registry.find("two").unwrap().ext_type, "Widgets");
        assert!(registry.types().is_empty());
    }

    #[test]
    fn test_types_and_paths() {
        let tmp = TempDir::new().unwrap();
        let registry = Registry::new(
            tmp.path(),
            typed(&[("Modules", "modules"), ("Themes", "/abs/themes")]),
        );

        assert_eq!(registry.types(), vec!["Modules", "Themes"]);
        assert_eq!(registry.canonicalize_type("themes"), "Themes");
        assert_eq!(registry.canonicalize_type(" MODULES "), "Modules");
        assert_eq!(registry.canonicalize_type("Plugins"), "Plugins");
        assert_eq!(
            registry.path_for_type("modules"),
            Some(tmp.path().join("modules"))
        );
        assert_eq!(registry.path_for_type("THEMES"), Some(PathBuf::from("/abs/themes")));
        assert_eq!(registry.path_for_type("Plugins"), None);
        assert_eq!(registry.typed_paths().len(), 2);
    }

    #[test]
    fn test_clear_cache_rediscovers_lazily() {
        let tmp = TempDir::new().unwrap();
        write_manifest(&tmp.path().join("modules/A"), "a", "");
        let registry = Registry::new(tmp.path(), typed(&[("Modules", "modules")]));
        assert_eq!(ids(&registry), vec!["a"]);

        write_manifest(&tmp.path().join("modules/B"), "b", "");
        assert_eq!(ids(&registry), vec!["a"], "cached set must not change");

        registry.clear_cache();
        assert_eq!(ids(&registry), vec!["a", "b"]);
    }

    #[test]
    fn test_discover_replaces_set() {
        let tmp = TempDir::new().unwrap();
        write_manifest(&tmp.path().join("modules/A"), "a", "");
        write_manifest(&tmp.path().join("modules/B"), "b", "");
        let registry = Registry::new(tmp.path(), typed(&[("Modules", "modules")]));
        assert_eq!(ids(&registry).len(), 2);

        std::fs::remove_dir_all(tmp.path().join("modules/A")).unwrap();
        registry.discover();
        assert_eq!(ids(&registry), vec!["b"]);
        assert!(registry.find("a").is_none());
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let tmp = TempDir::new().unwrap();
        let registry = Registry::new(tmp.path(), typed(&[("Modules", "nope")]));
        assert!(registry.all().is_empty());
    }

    #[test]
    fn test_default_author_applied() {
        let tmp = TempDir::new().unwrap();
        write_manifest(&tmp.path().join("modules/A"), "a", "");
        let registry =
            Registry::new(tmp.path(), typed(&[("Modules", "modules")])).with_default_author("Host");
        assert_eq!(registry.find("a").unwrap().author, "Host");
    }

    #[test]
    fn test_set_manifests() {
        let registry = Registry::new("/tmp", ExtensionPaths::default());
        registry.set_manifests([
            Manifest::new("x", "X", "p", "/tmp/x"),
            Manifest::new("y", "Y", "p", "/tmp/y"),
        ]);
        assert_eq!(ids(&registry), vec!["x", "y"]);
    }

    #[test]
    fn test_paths_deserialize_both_shapes() {
        let typed: ExtensionPaths = serde_json::from_str(r#"{"Modules": "modules"}"#).unwrap();
        assert_eq!(typed.type_names(), vec!["Modules"]);

        let untyped: ExtensionPaths = serde_json::from_str(r#"["a", "b"]"#).unwrap();
        assert_eq!(untyped, ExtensionPaths::untyped(["a", "b"]));
    }

    #[test]
    fn test_paths_mix_typed_and_untyped_entries() {
        let paths: ExtensionPaths = serde_json::from_str(
            r#"["shared", {"type": "Themes", "dir": "themes"}, {"dir": "legacy"}]"#,
        )
        .unwrap();
        assert_eq!(
            paths.entries(),
            &[
                PathEntry::untyped("shared"),
                PathEntry::typed("Themes", "themes"),
                PathEntry::untyped("legacy"),
            ]
        );
        assert_eq!(paths.type_names(), vec!["Themes"]);

        let round: ExtensionPaths =
            serde_json::from_value(serde_json::to_value(&paths).unwrap()).unwrap();
        assert_eq!(round, paths);
    }

    #[test]
    fn test_discover_mixed_paths() {
        let tmp = TempDir::new().unwrap();
        write_manifest(&tmp.path().join("shared/Widget"), "widget", r#", "type": "themes""#);
        write_manifest(&tmp.path().join("shared/Tool"), "tool", r#", "type": "Tools""#);
        write_manifest(&tmp.path().join("themes/Dark"), "dark", "");

        let paths = ExtensionPaths::from_iter([
            PathEntry::untyped("shared"),
            PathEntry::typed("Themes", "themes"),
        ]);
        let registry = Registry::new(tmp.path(), paths);

        assert_eq!(ids(&registry), vec!["tool", "widget", "dark"]);
        assert_eq!(registry.find("widget").unwrap().ext_type, "Themes");
        assert_eq!(registry.find("tool").unwrap().ext_type, "Tools");
        assert_eq!(registry.find("dark").unwrap().ext_type, "Themes");
        assert_eq!(registry.types(), vec!["Themes"]);
        assert_eq!(registry.typed_paths().len(), 1);
    }
}
