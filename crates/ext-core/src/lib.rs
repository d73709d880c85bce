//! Lifecycle management for host extensions.
//!
//! Extensions are self-describing directories discovered by
//! [`ext_registry::Registry`]. This crate decides whether each one may be
//! enabled, disabled, installed or deleted, persists the outcome through a
//! [`StatusStore`], and activates enabled extensions through the host's
//! [`EntryPointRegistrar`] in a deterministic order.
//!
//! # Layout
//!
//! - [`config`]: TOML configuration, protected and switch-type policy
//! - [`status`]: status store contract plus memory and file stores
//! - [`deps`]: unmet external package detection
//! - [`installer`] and [`migrate`]: external collaborators
//! - [`bootstrap`]: ordered entry-point registration
//! - [`service`]: the [`LifecycleService`] orchestrator

pub mod bootstrap;
pub mod config;
pub mod deps;
pub mod error;
pub mod events;
pub mod extension;
pub mod installer;
pub mod logging;
pub mod migrate;
pub mod result;
pub mod service;
pub mod status;

pub use bootstrap::{Bootstrapper, EntryPointRegistrar};
pub use config::{ExtensionsConfig, ProtectedConfig, ProtectedSet};
pub use deps::{DependencyChecker, InstalledPackagesIndex, PackageIndex};
pub use error::{Error, Result};
pub use events::{EventSink, ExtensionEvent};
pub use extension::Extension;
pub use installer::{PackageInstaller, ShellInstaller};
pub use migrate::{CommandMigrator, Migrator, SchemaMigrator};
pub use result::{ErrorCode, OpResult};
pub use service::{BulkReport, ExtensionStats, LifecycleService, ServiceBuilder};
pub use status::{FileStatusStore, MemoryStatusStore, StatusRecord, StatusStore};

pub use ext_registry::{Manifest, Registry};
