//! Error types for ext-core

use std::path::PathBuf;

/// Result type for ext-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in ext-core operations
///
/// Lifecycle verbs never return these to callers; they are converted into an
/// [`OpResult`](crate::OpResult) with the `exception` code at the service boundary.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration file could not be interpreted
    #[error("Invalid configuration at {path}: {reason}")]
    InvalidConfig { path: PathBuf, reason: String },

    /// The status store failed to read or persist a record
    #[error("Status store error: {message}")]
    StatusStore { message: String },

    /// The host rejected an entry-point registration
    #[error("Failed to register entry point '{provider}' for {id}: {reason}")]
    Registration {
        id: String,
        provider: String,
        reason: String,
    },

    /// An external command could not be started
    #[error("Failed to run '{command}': {source}")]
    Command {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// Filesystem error with the offending path
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Transparent wrappers for underlying crate errors
    /// Manifest or registry error from ext-registry
    #[error(transparent)]
    Registry(#[from] ext_registry::Error),

    /// JSON serialization/deserialization error
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// TOML deserialization error
    #[error(transparent)]
    TomlDe(#[from] toml::de::Error),
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
