//! Normalization of the `protected` setting.
//!
//! The setting accepts three shapes which all collapse into one
//! [`ProtectedSet`] before any lifecycle check runs:
//!
//! ```toml
//! protected = ["Themer", "core"]               # any type
//! protected = { core = true, billing = 1 }     # any type; false/0 ignored
//! protected = { Modules = "Sample" }           # Sample, only as a Modules extension
//! ```

use std::collections::{BTreeMap, HashSet};

use serde::Deserialize;

use ext_registry::Manifest;

/// Raw `protected` setting as written in the configuration file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ProtectedConfig {
    List(Vec<String>),
    Table(BTreeMap<String, ProtectedValue>),
}

impl Default for ProtectedConfig {
    fn default() -> Self {
        Self::List(Vec::new())
    }
}

/// Value of one table entry in the `protected` setting.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ProtectedValue {
    Flag(bool),
    Int(i64),
    Name(String),
    Names(Vec<String>),
}

/// Case-insensitive set of protected extensions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProtectedSet {
    /// Lowercase ids/names protected regardless of type.
    any: HashSet<String>,
    /// Lowercase (type, id-or-name) pairs.
    typed: HashSet<(String, String)>,
}

impl ProtectedSet {
    pub fn from_config(config: &ProtectedConfig) -> Self {
        let mut set = Self::default();

        match config {
            ProtectedConfig::List(names) => {
                for name in names {
                    set.any.insert(name.to_lowercase());
                }
            }
            ProtectedConfig::Table(entries) => {
                for (key, value) in entries {
                    match value {
                        ProtectedValue::Flag(true) | ProtectedValue::Int(1) => {
                            set.any.insert(key.to_lowercase());
                        }
                        ProtectedValue::Flag(false) | ProtectedValue::Int(_) => {}
                        ProtectedValue::Name(name) => {
                            set.typed.insert((key.to_lowercase(), name.to_lowercase()));
                        }
                        ProtectedValue::Names(names) => {
                            for name in names {
                                set.typed.insert((key.to_lowercase(), name.to_lowercase()));
                            }
                        }
                    }
                }
            }
        }

        set
    }

    /// Whether `manifest` is protected, matching on id or name.
    pub fn contains(&self, manifest: &Manifest) -> bool {
        let id = manifest.id.to_lowercase();
        let name = manifest.name.to_lowercase();

        if self.any.contains(&id) || self.any.contains(&name) {
            return true;
        }

        let ext_type = manifest.ext_type.to_lowercase();
        self.typed.contains(&(ext_type.clone(), id)) || self.typed.contains(&(ext_type, name))
    }

    pub fn is_empty(&self) -> bool {
        self.any.is_empty() && self.typed.is_empty()
    }
}
