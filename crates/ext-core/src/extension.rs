//! Derived view of one extension: its manifest joined with its status.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde_json::Value;
use walkdir::WalkDir;

use ext_registry::Manifest;

/// Ephemeral view of an extension. Rebuilt from manifest and status on
/// every uncached read; never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct Extension {
    manifest: Arc<Manifest>,
    enabled: bool,
    broken: bool,
    issue: Option<String>,
    protected: bool,
    compatible: bool,
}

impl Extension {
    pub fn new(manifest: Arc<Manifest>, enabled: bool) -> Self {
        Self {
            manifest,
            enabled,
            broken: false,
            issue: None,
            protected: false,
            compatible: true,
        }
    }

    /// Mark the entry point as unresolvable.
    pub fn with_issue(mut self, issue: impl Into<String>) -> Self {
        self.broken = true;
        self.issue = Some(issue.into());
        self
    }

    pub fn with_protected(mut self, protected: bool) -> Self {
        self.protected = protected;
        self
    }

    pub fn with_compatible(mut self, compatible: bool) -> Self {
        self.compatible = compatible;
        self
    }

    pub fn manifest(&self) -> &Arc<Manifest> {
        &self.manifest
    }

    pub fn id(&self) -> &str {
        &self.manifest.id
    }

    pub fn name(&self) -> &str {
        &self.manifest.name
    }

    pub fn ext_type(&self) -> &str {
        &self.manifest.ext_type
    }

    pub fn provider(&self) -> &str {
        &self.manifest.provider
    }

    pub fn path(&self) -> &Path {
        &self.manifest.path
    }

    pub fn description(&self) -> &str {
        &self.manifest.description
    }

    pub fn author(&self) -> &str {
        &self.manifest.author
    }

    pub fn version(&self) -> &str {
        &self.manifest.version
    }

    pub fn requires(&self) -> &[String] {
        &self.manifest.requires_extensions
    }

    pub fn requires_packages(&self) -> &BTreeMap<String, String> {
        &self.manifest.requires_packages
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_broken(&self) -> bool {
        self.broken
    }

    pub fn issue(&self) -> Option<&str> {
        self.issue.as_deref()
    }

    pub fn is_protected(&self) -> bool {
        self.protected
    }

    /// Whether the running host satisfies the manifest's `compatible_with`.
    pub fn is_compatible(&self) -> bool {
        self.compatible
    }

    pub fn has_dependencies(&self) -> bool {
        !self.manifest.requires_extensions.is_empty() || !self.manifest.requires_packages.is_empty()
    }

    /// Total size in bytes of the files below the extension directory.
    pub fn size(&self) -> u64 {
        WalkDir::new(&self.manifest.path)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| e.metadata().ok())
            .map(|m| m.len())
            .sum()
    }

    /// Flattened manifest fields plus the computed flags.
    pub fn to_json(&self) -> Value {
        let mut value = serde_json::to_value(self.manifest.as_ref()).unwrap_or(Value::Null);
        if let Value::Object(map) = &mut value {
            map.insert("enabled".into(), self.enabled.into());
            map.insert("broken".into(), self.broken.into());
            map.insert("issue".into(), self.issue.clone().into());
            map.insert("protected".into(), self.protected.into());
            map.insert("compatible".into(), self.compatible.into());
        }
        value
    }
}
