//! Extension manifest parsing for `extension.json` files.
//!
//! A manifest is the self-description of one extension directory. Three
//! string fields are required (`id`, `name`, `provider`); everything else
//! falls back to a default. External package requirements are not part of
//! the manifest itself: they come from the `require` table of the adjacent
//! [`DEPENDENCY_FILENAME`](crate::DEPENDENCY_FILENAME) file.
//!
//! # Example
//!
//! ```json
//! {
//!   "id": "blog",
//!   "name": "Blog",
//!   "provider": "modules::blog::providers::BlogProvider",
//!   "type": "Modules",
//!   "version": "1.2.0",
//!   "compatible_with": "2.0",
//!   "requires_extensions": ["base"]
//! }
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::version::VersionConstraint;
use crate::{DEPENDENCY_FILENAME, HOST_PACKAGE, MANIFEST_FILENAME};

const DEFAULT_VERSION: &str = "1.0.0";

/// Immutable description of one discovered extension.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Manifest {
    /// Unique identifier; the identity of the extension.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Opaque entry-point reference handed to the host registrar.
    pub provider: String,
    /// Directory containing the manifest.
    pub path: PathBuf,
    pub description: String,
    pub author: String,
    /// Group label such as `Modules` or `Themes`.
    #[serde(rename = "type")]
    pub ext_type: String,
    pub version: String,
    /// Minimum host version this extension works with.
    pub compatible_with: String,
    /// Ids of other extensions that must be enabled first, in declared order.
    pub requires_extensions: Vec<String>,
    /// External package name -> version constraint.
    pub requires_packages: BTreeMap<String, String>,
    /// The raw manifest object, including fields this crate does not interpret.
    pub meta: Map<String, Value>,
}

impl Manifest {
    /// Create a manifest with default optional fields.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        provider: impl Into<String>,
        path: impl Into<PathBuf>,
    ) -> Self {
        let name = name.into();
        Self {
            id: id.into(),
            description: name.clone(),
            name,
            provider: provider.into(),
            path: path.into(),
            author: String::new(),
            ext_type: String::new(),
            version: DEFAULT_VERSION.to_string(),
            compatible_with: DEFAULT_VERSION.to_string(),
            requires_extensions: Vec::new(),
            requires_packages: BTreeMap::new(),
            meta: Map::new(),
        }
    }

    /// Set the extension type.
    pub fn with_type(mut self, ext_type: impl Into<String>) -> Self {
        self.ext_type = ext_type.into();
        self
    }

    /// Set the required extension ids.
    pub fn with_requires<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.requires_extensions = ids.into_iter().map(Into::into).collect();
        self
    }

    /// Add a required external package.
    pub fn with_package(mut self, name: impl Into<String>, constraint: impl Into<String>) -> Self {
        self.requires_packages.insert(name.into(), constraint.into());
        self
    }

    /// Read the manifest in `dir`.
    ///
    /// `ext_type` overrides the type declared in the file (the registry
    /// passes the configured type of the directory being scanned).
    /// `default_author` is used when the file has no `author`.
    pub fn load(dir: &Path, ext_type: Option<&str>, default_author: &str) -> Result<Self> {
        let manifest_path = dir.join(MANIFEST_FILENAME);
        if !manifest_path.is_file() {
            return Err(Error::ManifestNotFound(manifest_path));
        }
        let content =
            std::fs::read_to_string(&manifest_path).map_err(|e| Error::io(&manifest_path, e))?;
        let value: Value =
            serde_json::from_str(&content).map_err(|source| Error::ManifestParse {
                path: manifest_path.clone(),
                source,
            })?;
        let Value::Object(object) = value else {
            return Err(Error::InvalidManifest {
                path: manifest_path,
                reason: "manifest must be a JSON object".to_string(),
            });
        };

        Self::from_object(object, dir, ext_type, default_author)
    }

    /// Build a manifest from an already parsed JSON object.
    pub fn from_object(
        object: Map<String, Value>,
        dir: &Path,
        ext_type: Option<&str>,
        default_author: &str,
    ) -> Result<Self> {
        let required = |key: &str| -> Result<String> {
            match object.get(key) {
                Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
                _ => Err(Error::InvalidManifest {
                    path: dir.join(MANIFEST_FILENAME),
                    reason: format!("missing required string field '{key}'"),
                }),
            }
        };
        let optional = |key: &str| -> Option<String> {
            object.get(key).and_then(Value::as_str).map(str::to_string)
        };

        let id = required("id")?;
        let name = required("name")?;
        let provider = required("provider")?;

        let ext_type = match ext_type {
            Some(t) if !t.is_empty() => t.to_string(),
            _ => optional("type").unwrap_or_default(),
        };

        let requires_extensions = match object.get("requires_extensions") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        };

        Ok(Self {
            description: optional("description").unwrap_or_else(|| format!("{ext_type} {name}")),
            author: optional("author").unwrap_or_else(|| default_author.to_string()),
            version: optional("version").unwrap_or_else(|| DEFAULT_VERSION.to_string()),
            compatible_with: optional("compatible_with")
                .unwrap_or_else(|| DEFAULT_VERSION.to_string()),
            requires_extensions,
            requires_packages: read_required_packages(dir),
            path: dir.to_path_buf(),
            id,
            name,
            provider,
            ext_type,
            meta: object,
        })
    }

    /// Path of the dependency declaration file next to the manifest.
    pub fn dependency_file(&self) -> PathBuf {
        self.path.join(DEPENDENCY_FILENAME)
    }

    /// Whether the extension ships a dependency declaration file.
    pub fn has_dependency_file(&self) -> bool {
        self.dependency_file().is_file()
    }

    /// Look up a raw manifest field.
    pub fn meta_value(&self, key: &str) -> Option<&Value> {
        self.meta.get(key)
    }

    /// Check the manifest's `compatible_with` against a host version.
    ///
    /// A plain version is read as a minimum (`2.0` means `>=2.0`); a value
    /// carrying operators is used as a full constraint. Values that cannot be
    /// parsed are treated as compatible.
    pub fn is_compatible_with(&self, host_version: &str) -> bool {
        let raw = self.compatible_with.trim();
        let constraint = if raw.starts_with(|c: char| c.is_ascii_digit() || c == 'v') {
            format!(">={raw}")
        } else {
            raw.to_string()
        };

        match VersionConstraint::parse(&constraint) {
            Ok(c) => c.satisfies(host_version),
            Err(e) => {
                tracing::debug!(id = %self.id, error = %e, "Unparseable compatible_with, assuming compatible");
                true
            }
        }
    }
}

/// Read the `require` table of the dependency file in `dir`.
///
/// Missing or malformed files yield an empty map; the host pseudo-package and
/// non-string constraints are skipped.
pub fn read_required_packages(dir: &Path) -> BTreeMap<String, String> {
    let path = dir.join(DEPENDENCY_FILENAME);
    let mut packages = BTreeMap::new();

    let Ok(content) = std::fs::read_to_string(&path) else {
        return packages;
    };
    let value: Value = match serde_json::from_str(&content) {
        Ok(v) => v,
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "Ignoring malformed dependency file");
            return packages;
        }
    };

    if let Some(Value::Object(require)) = value.get("require") {
        for (name, constraint) in require {
            if name == HOST_PACKAGE {
                continue;
            }
            if let Value::String(constraint) = constraint {
                packages.insert(name.clone(), constraint.clone());
            }
        }
    }

    packages
}
