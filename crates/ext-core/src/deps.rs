//! Detection of unmet external package requirements.
//!
//! Installed packages are read from a lock-style index:
//!
//! ```json
//! {"packages": [{"name": "acme/http", "version": "1.4.2"}]}
//! ```
//!
//! A bare array of the same entries is accepted too. An extension may bundle
//! its own packages under `vendor/installed.json`; those count as installed
//! once [`DependencyChecker::include_bundled`] has seen the extension.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::Deserialize;

use ext_registry::{Manifest, VersionConstraint};

use crate::{Error, Result};

/// Path of an extension's bundled package index, relative to its directory.
pub const BUNDLED_INDEX: &str = "vendor/installed.json";

/// Source of truth for which external packages are installed.
pub trait PackageIndex: Send + Sync {
    /// Installed packages as name -> version, or `None` when no index exists.
    fn installed_packages(&self) -> Option<BTreeMap<String, String>>;

    fn installed_version(&self, name: &str) -> Option<String> {
        self.installed_packages()?.get(name).cloned()
    }
}

#[derive(Debug, Deserialize)]
struct PackageEntry {
    name: String,
    #[serde(default)]
    version: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum IndexFile {
    Wrapped { packages: Vec<PackageEntry> },
    Bare(Vec<PackageEntry>),
}

/// Parse an installed-packages index file.
pub fn read_index(path: &Path) -> Result<BTreeMap<String, String>> {
    let content = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    let file: IndexFile = serde_json::from_str(&content)?;
    let entries = match file {
        IndexFile::Wrapped { packages } => packages,
        IndexFile::Bare(packages) => packages,
    };
    Ok(entries.into_iter().map(|p| (p.name, p.version)).collect())
}

/// [`PackageIndex`] backed by a file that is re-read on every query.
#[derive(Debug, Clone)]
pub struct InstalledPackagesIndex {
    path: PathBuf,
}

impl InstalledPackagesIndex {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl PackageIndex for InstalledPackagesIndex {
    fn installed_packages(&self) -> Option<BTreeMap<String, String>> {
        if !self.path.is_file() {
            return None;
        }
        match read_index(&self.path) {
            Ok(packages) => Some(packages),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Unreadable package index");
                None
            }
        }
    }
}

/// Computes which declared packages of a manifest are not satisfied.
pub struct DependencyChecker {
    index: Arc<dyn PackageIndex>,
    bundled: Mutex<BTreeMap<String, String>>,
}

impl std::fmt::Debug for DependencyChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyChecker")
            .field("bundled", &self.bundled)
            .finish_non_exhaustive()
    }
}

impl DependencyChecker {
    pub fn new(index: Arc<dyn PackageIndex>) -> Self {
        Self {
            index,
            bundled: Mutex::new(BTreeMap::new()),
        }
    }

    /// Count the extension's bundled packages as installed.
    ///
    /// Best-effort: a missing bundle is ignored and an unreadable one is logged.
    pub fn include_bundled(&self, manifest: &Manifest) {
        let path = manifest.path.join(BUNDLED_INDEX);
        if !path.is_file() {
            return;
        }
        match read_index(&path) {
            Ok(packages) => {
                tracing::debug!(id = %manifest.id, count = packages.len(), "Included bundled packages");
                self.bundled
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .extend(packages);
            }
            Err(e) => {
                tracing::warn!(id = %manifest.id, error = %e, "Failed to read bundled packages");
            }
        }
    }

    /// Names of required packages that are absent or fail their constraint.
    pub fn missing_packages(&self, manifest: &Manifest) -> Vec<String> {
        if manifest.requires_packages.is_empty() {
            return Vec::new();
        }

        let installed = self.index.installed_packages();
        let bundled = self.bundled.lock().unwrap_or_else(|e| e.into_inner());

        manifest
            .requires_packages
            .iter()
            .filter(|(name, constraint)| {
                let version = bundled
                    .get(name.as_str())
                    .or_else(|| installed.as_ref().and_then(|i| i.get(name.as_str())));
                match version {
                    Some(version) => !satisfies(version, constraint),
                    None => true,
                }
            })
            .map(|(name, _)| name.clone())
            .collect()
    }
}

/// Constraint check that only rejects when both sides parse.
fn satisfies(version: &str, constraint: &str) -> bool {
    let Ok(installed) = ext_registry::version::normalize_version(version) else {
        return true;
    };
    match VersionConstraint::parse(constraint) {
        Ok(c) => c.satisfies_version(&installed),
        Err(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    struct FixedIndex(Option<BTreeMap<String, String>>);

    impl PackageIndex for FixedIndex {
        fn installed_packages(&self) -> Option<BTreeMap<String, String>> {
            self.0.clone()
        }
    }

    fn index(entries: &[(&str, &str)]) -> Arc<dyn PackageIndex> {
        Arc::new(FixedIndex(Some(
            entries
                .iter()
                .map(|(n, v)| (n.to_string(), v.to_string()))
                .collect(),
        )))
    }

    #[test]
    fn test_missing_and_unsatisfied() {
        let checker = DependencyChecker::new(index(&[
            ("acme/http", "1.5.0"),
            ("acme/log", "0.9.0"),
            ("acme/dev", "dev-main"),
        ]));
        let manifest = Manifest::new("x", "X", "p", "/tmp/x")
            .with_package("acme/http", "^1.4")
            .with_package("acme/log", ">=1.0")
            .with_package("acme/dev", "^2.0")
            .with_package("acme/weird", "not a constraint")
            .with_package("acme/absent", "*");

        assert_eq!(
            checker.missing_packages(&manifest),
            vec!["acme/absent", "acme/log", "acme/weird"]
        );
    }

    #[test]
    fn test_no_index_reports_everything_missing() {
        let checker = DependencyChecker::new(Arc::new(FixedIndex(None)));
        let manifest = Manifest::new("x", "X", "p", "/tmp/x").with_package("acme/http", "*");
        assert_eq!(checker.missing_packages(&manifest), vec!["acme/http"]);
    }

    #[test]
    fn test_bundled_packages_count_as_installed() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("vendor")).unwrap();
        std::fs::write(
            tmp.path().join(BUNDLED_INDEX),
            r#"[{"name": "acme/http", "version": "v1.4.0"}]"#,
        )
        .unwrap();

        let checker = DependencyChecker::new(Arc::new(FixedIndex(None)));
        let manifest = Manifest::new("x", "X", "p", tmp.path()).with_package("acme/http", "^1.4");
        assert_eq!(checker.missing_packages(&manifest), vec!["acme/http"]);

        checker.include_bundled(&manifest);
        assert!(checker.missing_packages(&manifest).is_empty());
    }

    #[test]
    fn test_installed_index_file_shapes() {
        let tmp = TempDir::new().unwrap();
        let wrapped = tmp.path().join("wrapped.json");
        std::fs::write(
            &wrapped,
            r#"{"packages": [{"name": "a/b", "version": "2.0.0"}, {"name": "c/d"}]}"#,
        )
        .unwrap();

        let packages = InstalledPackagesIndex::new(&wrapped).installed_packages().unwrap();
        assert_eq!(packages.get("a/b").map(String::as_str), Some("2.0.0"));
        assert_eq!(packages.get("c/d").map(String::as_str), Some(""));

        let missing = InstalledPackagesIndex::new(tmp.path().join("nope.json"));
        assert!(missing.installed_packages().is_none());
        assert!(missing.installed_version("a/b").is_none());
    }
}
