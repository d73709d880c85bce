//! Notifications emitted after successful lifecycle changes.

use std::path::PathBuf;

use crate::extension::Extension;

/// A completed lifecycle change.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtensionEvent {
    Enabled {
        extension: Extension,
    },
    Disabled {
        extension: Extension,
    },
    Deleted {
        extension: Extension,
        path: PathBuf,
    },
    DependenciesInstalled {
        extension: Extension,
        packages: Vec<String>,
    },
}

impl ExtensionEvent {
    pub fn extension(&self) -> &Extension {
        match self {
            Self::Enabled { extension }
            | Self::Disabled { extension }
            | Self::Deleted { extension, .. }
            | Self::DependenciesInstalled { extension, .. } => extension,
        }
    }

    /// Short name of the event kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Enabled { .. } => "enabled",
            Self::Disabled { .. } => "disabled",
            Self::Deleted { .. } => "deleted",
            Self::DependenciesInstalled { .. } => "dependencies_installed",
        }
    }
}

/// Receives events synchronously, on the thread that made the change.
pub trait EventSink: Send + Sync {
    fn handle(&self, event: &ExtensionEvent);
}
