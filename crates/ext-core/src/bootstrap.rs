//! Ordered activation of enabled extensions.
//!
//! At startup the [`Bootstrapper`] discovers manifests, keeps the enabled
//! ones and hands each to the host's [`EntryPointRegistrar`] exactly once,
//! ordered by the configured `load_order`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use ext_registry::{Manifest, Registry};

use crate::Result;
use crate::status::StatusStore;

/// Path segment separating an extension's namespace from its provider.
const PROVIDERS_SEGMENT: &str = "::providers::";

/// Host capability that activates an extension's entry point.
///
/// The core never inspects host types; it only decides when, and in which
/// order, to call [`register`](Self::register).
pub trait EntryPointRegistrar: Send + Sync {
    /// Whether the host can resolve `provider`.
    fn resolves(&self, _provider: &str) -> bool {
        true
    }

    /// Make `namespace` resolvable from the extension's directory.
    fn extend_namespace(&self, _manifest: &Manifest, _namespace: &str) {}

    /// Activate `provider` on behalf of `manifest`.
    fn register(&self, manifest: &Manifest, provider: &str) -> Result<()>;
}

/// Computes activation order and invokes registration.
pub struct Bootstrapper {
    registry: Arc<Registry>,
    statuses: Arc<dyn StatusStore>,
    registrar: Arc<dyn EntryPointRegistrar>,
    /// Lowercase ids/names in configured order.
    load_order: Vec<String>,
    warmed: AtomicBool,
}

impl std::fmt::Debug for Bootstrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bootstrapper")
            .field("load_order", &self.load_order)
            .field("warmed", &self.warmed)
            .finish_non_exhaustive()
    }
}

impl Bootstrapper {
    pub fn new(
        registry: Arc<Registry>,
        statuses: Arc<dyn StatusStore>,
        registrar: Arc<dyn EntryPointRegistrar>,
        load_order: &[String],
    ) -> Self {
        Self {
            registry,
            statuses,
            registrar,
            load_order: load_order.iter().map(|s| s.to_lowercase()).collect(),
            warmed: AtomicBool::new(false),
        }
    }

    pub fn is_warmed(&self) -> bool {
        self.warmed.load(Ordering::SeqCst)
    }

    /// Register every enabled extension. Only the first call does any work.
    ///
    /// Returns how many providers were registered.
    pub fn warmup(&self) -> Result<usize> {
        if self.warmed.swap(true, Ordering::SeqCst) {
            return Ok(0);
        }

        self.registry.discover();
        let statuses = self.statuses.statuses()?;

        let enabled: Vec<Arc<Manifest>> = self
            .registry
            .all()
            .into_iter()
            .filter(|m| statuses.get(&m.id).is_some_and(|s| s.enabled))
            .collect();

        let mut registered = 0;
        for manifest in self.apply_load_order(enabled) {
            match self.register_provider(&manifest) {
                Ok(true) => registered += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(id = %manifest.id, error = %e, "Entry point registration failed");
                }
            }
        }

        tracing::info!(registered, "Extensions bootstrapped");
        Ok(registered)
    }

    /// Force a new warmup.
    pub fn reload(&self) -> Result<usize> {
        self.warmed.store(false, Ordering::SeqCst);
        self.warmup()
    }

    /// Stable sort: listed extensions by list position, the rest after them
    /// in their incoming order.
    pub fn apply_load_order(&self, mut manifests: Vec<Arc<Manifest>>) -> Vec<Arc<Manifest>> {
        if self.load_order.is_empty() {
            return manifests;
        }

        let position = |m: &Manifest| {
            let id = m.id.to_lowercase();
            let name = m.name.to_lowercase();
            self.load_order
                .iter()
                .position(|entry| *entry == id)
                .or_else(|| self.load_order.iter().position(|entry| *entry == name))
                .unwrap_or(usize::MAX)
        };

        manifests.sort_by_key(|m| position(&**m));
        manifests
    }

    /// The provider the host will actually register for `manifest`, if any.
    ///
    /// The declared provider is preferred; otherwise the conventional
    /// `<type>::<name>::providers::<name>Provider` is tried.
    pub fn resolve_provider(&self, manifest: &Manifest) -> Option<String> {
        if self.registrar.resolves(&manifest.provider) {
            return Some(manifest.provider.clone());
        }
        let fallback = fallback_provider(manifest);
        self.registrar.resolves(&fallback).then_some(fallback)
    }

    /// Register a single extension without a full warmup.
    ///
    /// Returns `Ok(false)` when neither the declared nor the conventional
    /// provider resolves.
    pub fn register_provider(&self, manifest: &Manifest) -> Result<bool> {
        if let Some(namespace) = provider_namespace(&manifest.provider) {
            self.registrar.extend_namespace(manifest, namespace);
        }

        if self.registrar.resolves(&manifest.provider) {
            self.registrar.register(manifest, &manifest.provider)?;
            tracing::debug!(id = %manifest.id, provider = %manifest.provider, "Registered entry point");
            return Ok(true);
        }

        let namespace = fallback_namespace(manifest);
        self.registrar.extend_namespace(manifest, &namespace);
        let fallback = fallback_provider(manifest);
        if self.registrar.resolves(&fallback) {
            self.registrar.register(manifest, &fallback)?;
            tracing::debug!(id = %manifest.id, provider = %fallback, "Registered conventional entry point");
            return Ok(true);
        }

        tracing::warn!(id = %manifest.id, provider = %manifest.provider, "Entry point cannot be resolved");
        Ok(false)
    }
}

/// Prefix before the last `::providers::` segment, matched case-insensitively.
fn provider_namespace(provider: &str) -> Option<&str> {
    let pos = provider.to_ascii_lowercase().rfind(PROVIDERS_SEGMENT)?;
    let namespace = &provider[..pos];
    (!namespace.is_empty()).then_some(namespace)
}

fn fallback_namespace(manifest: &Manifest) -> String {
    format!("{}::{}", manifest.ext_type, manifest.name)
}

fn fallback_provider(manifest: &Manifest) -> String {
    format!(
        "{}{}{}Provider",
        fallback_namespace(manifest),
        PROVIDERS_SEGMENT,
        manifest.name
    )
}
