//! Error types for ext-jobs

use thiserror::Error;

/// Errors raised while dispatching background jobs.
///
/// Job outcomes themselves are never errors: they are recorded on the
/// tracked operation.
#[derive(Debug, Error)]
pub enum Error {
    #[error("No async runtime available: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),

    #[error("Failed to spawn job thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error(transparent)]
    Core(#[from] ext_core::Error),
}

/// Result type for ext-jobs operations
pub type Result<T> = std::result::Result<T, Error>;
