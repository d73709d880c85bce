//! Extension manager configuration.
//!
//! Loaded from a TOML file. A sibling `<name>.local.toml` file, when present,
//! is layered on top: scalar and list keys replace the base value, tables are
//! merged key by key.

mod protected;

pub use protected::{ProtectedConfig, ProtectedSet, ProtectedValue};

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use ext_registry::ExtensionPaths;

use crate::{Error, Result};

/// Top-level configuration of the extension manager.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ExtensionsConfig {
    /// Root against which every relative path is resolved.
    pub base_path: PathBuf,
    /// Author recorded for manifests that omit one.
    pub default_author: String,
    /// Version of the host, compared with manifests' `compatible_with`.
    pub host_version: String,
    /// Status file used by the file-backed status store.
    pub statuses_file: PathBuf,
    pub protected: ProtectedConfig,
    /// Ids or names registered first at warmup, in this order.
    pub load_order: Vec<String>,
    /// Types in which at most one unprotected member may be enabled.
    pub switch_types: Vec<String>,
    pub paths: ExtensionPaths,
    pub installer: InstallerConfig,
    pub migrations: MigrationsConfig,
    pub tracker: TrackerConfig,
}

impl Default for ExtensionsConfig {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from("."),
            default_author: "Host".to_string(),
            host_version: "1.0.0".to_string(),
            statuses_file: PathBuf::from("storage/extensions.json"),
            protected: ProtectedConfig::default(),
            load_order: Vec::new(),
            switch_types: Vec::new(),
            paths: ExtensionPaths::default(),
            installer: InstallerConfig::default(),
            migrations: MigrationsConfig::default(),
            tracker: TrackerConfig::default(),
        }
    }
}

/// Host-wide dependency installer settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct InstallerConfig {
    pub command: String,
    pub timeout_secs: u64,
    /// Installed-packages index consulted for missing packages.
    pub index: PathBuf,
}

impl Default for InstallerConfig {
    fn default() -> Self {
        Self {
            command: "composer update --no-interaction --optimize-autoloader".to_string(),
            timeout_secs: 300,
            index: PathBuf::from("vendor/installed.json"),
        }
    }
}

impl InstallerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Schema migration settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MigrationsConfig {
    /// Migration directory, relative to each extension's directory.
    pub dir: PathBuf,
    /// Command run for each extension with pending migrations.
    pub command: Option<String>,
}

impl Default for MigrationsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("database/migrations"),
            command: None,
        }
    }
}

/// Operation tracker settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub ttl_secs: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self { ttl_secs: 2 * 60 * 60 }
    }
}

impl TrackerConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl ExtensionsConfig {
    /// Parse configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load configuration from `path` plus its `.local.toml` overlay.
    ///
    /// A missing base file yields the defaults. Invalid TOML in either file
    /// is an error.
    pub fn load(path: &Path) -> Result<Self> {
        let mut merged = toml::Table::new();

        for layer in [path.to_path_buf(), local_overlay_path(path)] {
            if !layer.is_file() {
                tracing::debug!(path = %layer.display(), "No configuration file, skipping");
                continue;
            }
            tracing::debug!(path = %layer.display(), "Loading configuration");
            let content = std::fs::read_to_string(&layer).map_err(|e| Error::io(&layer, e))?;
            let table: toml::Table = toml::from_str(&content)?;
            merge_tables(&mut merged, table);
        }

        toml::Value::Table(merged)
            .try_into()
            .map_err(|e: toml::de::Error| Error::InvalidConfig {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })
    }

    /// Resolve `path` against `base_path` unless it is already absolute.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_path.join(path)
        }
    }

    /// Absolute path of the status file.
    pub fn statuses_path(&self) -> PathBuf {
        self.resolve(&self.statuses_file)
    }

    pub fn protected_set(&self) -> ProtectedSet {
        ProtectedSet::from_config(&self.protected)
    }

    /// Lowercase switch-type names.
    pub fn switch_type_set(&self) -> HashSet<String> {
        self.switch_types.iter().map(|t| t.to_lowercase()).collect()
    }
}

/// `extensions.toml` -> `extensions.local.toml`
fn local_overlay_path(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("{stem}.local.toml"))
}

fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(base_table)), toml::Value::Table(overlay_table)) => {
                merge_tables(base_table, overlay_table);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}
