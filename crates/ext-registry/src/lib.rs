//! Manifest parsing and discovery for host extensions.
//!
//! This crate reads the self-description file of each extension directory
//! into an immutable [`Manifest`] and keeps the discovered set in a
//! [`Registry`] keyed by extension id.

pub mod error;
pub mod manifest;
pub mod registry;
pub mod version;

/// The canonical filename for extension manifest files.
///
/// Every extension directory carries a file with this name at its root;
/// directories without one are not extensions.
pub const MANIFEST_FILENAME: &str = "extension.json";

/// File next to the manifest declaring the external packages the extension needs.
pub const DEPENDENCY_FILENAME: &str = "packages.json";

/// Pseudo-package naming the host itself. Never reported as a requirement.
pub const HOST_PACKAGE: &str = "host";

pub use error::{Error, Result};
pub use manifest::Manifest;
pub use registry::{ExtensionPaths, PathEntry, Registry};
pub use version::VersionConstraint;
