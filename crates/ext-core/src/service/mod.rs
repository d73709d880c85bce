//! The lifecycle service: one orchestrator per process.
//!
//! [`LifecycleService`] joins the registry, the status store and the other
//! collaborators into enable/disable/install/delete operations, and answers
//! every read query about extensions. Derived data is cached inside the
//! service and dropped by every mutation before the call returns.

mod lifecycle;
mod report;

pub use report::{BulkReport, ExtensionStats};

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use ext_registry::{Manifest, Registry};

use crate::bootstrap::{Bootstrapper, EntryPointRegistrar};
use crate::config::{ExtensionsConfig, ProtectedSet};
use crate::deps::{DependencyChecker, InstalledPackagesIndex, PackageIndex};
use crate::events::{EventSink, ExtensionEvent};
use crate::extension::Extension;
use crate::installer::{PackageInstaller, ShellInstaller};
use crate::migrate::{Migrator, SchemaMigrator};
use crate::status::{FileStatusStore, StatusRecord, StatusStore};
use crate::Result;

/// Derived data, valid until the next mutation.
///
/// `generation` survives [`LifecycleService::invalidate`] and is bumped by it.
/// A value computed outside the lock is stored only if the generation it was
/// computed under is still current.
#[derive(Debug, Default)]
struct ServiceCache {
    generation: u64,
    statuses: Option<Arc<BTreeMap<String, StatusRecord>>>,
    manifests: Option<Arc<Vec<Arc<Manifest>>>>,
    extensions: HashMap<String, Extension>,
    protected: HashMap<String, bool>,
    switch_types: HashMap<String, bool>,
    total_size: Option<u64>,
}

/// Builder for [`LifecycleService`].
///
/// Only the entry-point registrar is mandatory; every other collaborator
/// defaults to the implementation described by the configuration.
pub struct ServiceBuilder {
    config: ExtensionsConfig,
    registrar: Arc<dyn EntryPointRegistrar>,
    statuses: Option<Arc<dyn StatusStore>>,
    installer: Option<Arc<dyn PackageInstaller>>,
    index: Option<Arc<dyn PackageIndex>>,
    migrator: Option<Arc<dyn SchemaMigrator>>,
    sinks: Vec<Arc<dyn EventSink>>,
}

impl ServiceBuilder {
    pub fn status_store(mut self, store: Arc<dyn StatusStore>) -> Self {
        self.statuses = Some(store);
        self
    }

    pub fn installer(mut self, installer: Arc<dyn PackageInstaller>) -> Self {
        self.installer = Some(installer);
        self
    }

    pub fn package_index(mut self, index: Arc<dyn PackageIndex>) -> Self {
        self.index = Some(index);
        self
    }

    pub fn schema_migrator(mut self, migrator: Arc<dyn SchemaMigrator>) -> Self {
        self.migrator = Some(migrator);
        self
    }

    pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn build(self) -> LifecycleService {
        let config = self.config;

        let registry = Arc::new(
            Registry::new(config.base_path.clone(), config.paths.clone())
                .with_default_author(config.default_author.clone()),
        );
        let statuses = self
            .statuses
            .unwrap_or_else(|| Arc::new(FileStatusStore::new(config.statuses_path())));
        let installer = self
            .installer
            .unwrap_or_else(|| Arc::new(ShellInstaller::from_config(&config)));
        let index = self.index.unwrap_or_else(|| {
            Arc::new(InstalledPackagesIndex::new(config.resolve(&config.installer.index)))
        });
        let migrator = match self.migrator {
            Some(runner) => Migrator::new(config.migrations.dir.clone(), Some(runner)),
            None => Migrator::from_config(&config),
        };
        let bootstrapper = Arc::new(Bootstrapper::new(
            Arc::clone(&registry),
            Arc::clone(&statuses),
            self.registrar,
            &config.load_order,
        ));

        LifecycleService {
            protected: config.protected_set(),
            switch_types: config.switch_type_set(),
            registry,
            statuses,
            bootstrapper,
            deps: DependencyChecker::new(index),
            installer,
            migrator,
            sinks: self.sinks,
            cache: Mutex::new(ServiceCache::default()),
            config,
        }
    }
}

/// Orchestrates the extension lifecycle.
///
/// All methods take `&self`; the service can be shared behind an `Arc`.
/// Calls that mutate the *same* extension must be serialized by the caller.
pub struct LifecycleService {
    config: ExtensionsConfig,
    registry: Arc<Registry>,
    statuses: Arc<dyn StatusStore>,
    bootstrapper: Arc<Bootstrapper>,
    deps: DependencyChecker,
    installer: Arc<dyn PackageInstaller>,
    migrator: Migrator,
    protected: ProtectedSet,
    switch_types: HashSet<String>,
    sinks: Vec<Arc<dyn EventSink>>,
    cache: Mutex<ServiceCache>,
}

impl std::fmt::Debug for LifecycleService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleService")
            .field("base_path", &self.config.base_path)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl LifecycleService {
    pub fn builder(config: ExtensionsConfig, registrar: Arc<dyn EntryPointRegistrar>) -> ServiceBuilder {
        ServiceBuilder {
            config,
            registrar,
            statuses: None,
            installer: None,
            index: None,
            migrator: None,
            sinks: Vec::new(),
        }
    }

    pub fn config(&self) -> &ExtensionsConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn status_store(&self) -> &Arc<dyn StatusStore> {
        &self.statuses
    }

    pub fn bootstrapper(&self) -> &Arc<Bootstrapper> {
        &self.bootstrapper
    }

    // ---- caches -------------------------------------------------------

    fn cache(&self) -> MutexGuard<'_, ServiceCache> {
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Drop every derived value, including the registry's manifest set.
    pub fn invalidate(&self) {
        // Registry first: a fill that sees the new generation must not read
        // the old manifest set.
        self.registry.clear_cache();
        let mut cache = self.cache();
        let generation = cache.generation.wrapping_add(1);
        *cache = ServiceCache {
            generation,
            ..ServiceCache::default()
        };
        tracing::debug!(generation, "Extension caches invalidated");
    }

    /// Look up a cached value, or return the generation to compute it under.
    fn cached<T>(&self, lookup: impl FnOnce(&ServiceCache) -> Option<T>) -> std::result::Result<T, u64> {
        let cache = self.cache();
        lookup(&cache).ok_or(cache.generation)
    }

    /// Store a value computed under `generation` unless a mutation intervened.
    fn fill(&self, generation: u64, store: impl FnOnce(&mut ServiceCache)) {
        let mut cache = self.cache();
        if cache.generation == generation {
            store(&mut cache);
        } else {
            tracing::debug!(generation, current = cache.generation, "Discarding value computed before invalidation");
        }
    }

    fn statuses(&self) -> Result<Arc<BTreeMap<String, StatusRecord>>> {
        let generation = match self.cached(|c| c.statuses.clone()) {
            Ok(statuses) => return Ok(statuses),
            Err(generation) => generation,
        };
        let statuses = Arc::new(self.statuses.statuses()?);
        self.fill(generation, |c| c.statuses = Some(Arc::clone(&statuses)));
        Ok(statuses)
    }

    fn manifests(&self) -> Arc<Vec<Arc<Manifest>>> {
        let generation = match self.cached(|c| c.manifests.clone()) {
            Ok(manifests) => return manifests,
            Err(generation) => generation,
        };
        let manifests = Arc::new(self.registry.all());
        self.fill(generation, |c| c.manifests = Some(Arc::clone(&manifests)));
        manifests
    }

    fn is_enabled_in(statuses: &BTreeMap<String, StatusRecord>, id: &str) -> bool {
        statuses.get(id).is_some_and(|s| s.enabled)
    }

    fn make_extension(&self, manifest: &Arc<Manifest>, statuses: &BTreeMap<String, StatusRecord>) -> Extension {
        let mut extension = Extension::new(Arc::clone(manifest), Self::is_enabled_in(statuses, &manifest.id))
            .with_protected(self.protected.contains(manifest))
            .with_compatible(manifest.is_compatible_with(&self.config.host_version));
        if self.bootstrapper.resolve_provider(manifest).is_none() {
            extension = extension.with_issue(format!("Entry point '{}' not found", manifest.provider));
        }
        extension
    }

    fn emit(&self, event: ExtensionEvent) {
        tracing::debug!(id = %event.extension().id(), kind = event.kind(), "Dispatching extension event");
        for sink in &self.sinks {
            sink.handle(&event);
        }
    }

    // ---- lookups ------------------------------------------------------

    /// All extensions in discovery order.
    pub fn all(&self) -> Result<Vec<Extension>> {
        let statuses = self.statuses()?;
        Ok(self
            .manifests()
            .iter()
            .map(|m| self.make_extension(m, &statuses))
            .collect())
    }

    /// Extension by id. Cached until the next mutation.
    pub fn get(&self, id: &str) -> Result<Option<Extension>> {
        let generation = match self.cached(|c| c.extensions.get(id).cloned()) {
            Ok(extension) => return Ok(Some(extension)),
            Err(generation) => generation,
        };
        let Some(manifest) = self.registry.find(id) else {
            return Ok(None);
        };
        let statuses = self.statuses()?;
        let extension = self.make_extension(&manifest, &statuses);
        self.fill(generation, |c| {
            c.extensions.insert(id.to_string(), extension.clone());
        });
        Ok(Some(extension))
    }

    /// Extension by id, falling back to a case-insensitive name match.
    pub fn find(&self, id_or_name: &str) -> Result<Option<Extension>> {
        match self.get(id_or_name)? {
            Some(extension) => Ok(Some(extension)),
            None => self.find_by_name(id_or_name),
        }
    }

    pub fn find_by_name(&self, name: &str) -> Result<Option<Extension>> {
        self.find_by_name_and_type(name, None)
    }

    /// First extension whose name (and type, when given) match case-insensitively.
    pub fn find_by_name_and_type(&self, name: &str, ext_type: Option<&str>) -> Result<Option<Extension>> {
        let name = name.to_lowercase();
        let ext_type = ext_type.map(str::to_lowercase);
        let statuses = self.statuses()?;

        Ok(self
            .manifests()
            .iter()
            .find(|m| {
                m.name.to_lowercase() == name
                    && ext_type.as_ref().is_none_or(|t| m.ext_type.to_lowercase() == *t)
            })
            .map(|m| self.make_extension(m, &statuses)))
    }

    /// Extension by id, or by name restricted to `ext_type`.
    pub fn one(&self, id_or_name: &str, ext_type: Option<&str>) -> Result<Option<Extension>> {
        match self.get(id_or_name)? {
            Some(extension) => Ok(Some(extension)),
            None => self.find_by_name_and_type(id_or_name, ext_type),
        }
    }

    pub fn enabled(&self) -> Result<Vec<Extension>> {
        Ok(self.all()?.into_iter().filter(Extension::is_enabled).collect())
    }

    pub fn disabled(&self) -> Result<Vec<Extension>> {
        Ok(self.all()?.into_iter().filter(|e| !e.is_enabled()).collect())
    }

    /// Extensions of `ext_type` (case-insensitive). An empty type means all.
    pub fn all_by_type(&self, ext_type: &str) -> Result<Vec<Extension>> {
        Ok(filter_type(self.all()?, ext_type))
    }

    pub fn enabled_by_type(&self, ext_type: &str) -> Result<Vec<Extension>> {
        Ok(filter_type(self.enabled()?, ext_type))
    }

    pub fn disabled_by_type(&self, ext_type: &str) -> Result<Vec<Extension>> {
        Ok(filter_type(self.disabled()?, ext_type))
    }

    pub fn types(&self) -> Vec<String> {
        self.registry.types()
    }

    pub fn path_for_type(&self, ext_type: &str) -> Option<PathBuf> {
        self.registry.path_for_type(ext_type)
    }

    pub fn typed_paths(&self) -> BTreeMap<String, PathBuf> {
        self.registry.typed_paths()
    }

    // ---- relations and policy -----------------------------------------

    /// Required packages of `id` that are not installed. Empty for unknown ids.
    pub fn missing_packages(&self, id: &str) -> Vec<String> {
        match self.registry.find(id) {
            Some(manifest) => {
                self.deps.include_bundled(&manifest);
                self.deps.missing_packages(&manifest)
            }
            None => Vec::new(),
        }
    }

    /// Required extensions of `id` that are unknown or not enabled.
    pub fn missing_extensions(&self, id: &str) -> Result<Vec<String>> {
        match self.registry.find(id) {
            Some(manifest) => self.missing_extensions_for(&manifest),
            None => Ok(Vec::new()),
        }
    }

    fn missing_extensions_for(&self, manifest: &Manifest) -> Result<Vec<String>> {
        let statuses = self.statuses()?;
        Ok(manifest
            .requires_extensions
            .iter()
            .filter(|req| self.registry.find(req).is_none() || !Self::is_enabled_in(&statuses, req))
            .cloned()
            .collect())
    }

    /// Ids of enabled extensions that list `id` in their requirements.
    pub fn required_by_enabled(&self, id: &str) -> Result<Vec<String>> {
        let statuses = self.statuses()?;
        Ok(self
            .manifests()
            .iter()
            .filter(|m| Self::is_enabled_in(&statuses, &m.id))
            .filter(|m| m.requires_extensions.iter().any(|r| r == id))
            .map(|m| m.id.clone())
            .collect())
    }

    fn is_protected_manifest(&self, manifest: &Manifest) -> bool {
        self.protected.contains(manifest)
    }

    fn is_switch_type_manifest(&self, manifest: &Manifest) -> bool {
        self.switch_types.contains(&manifest.ext_type.to_lowercase())
    }

    /// Whether `id` is protected by configuration. Unknown ids are not.
    pub fn is_protected(&self, id: &str) -> bool {
        let generation = match self.cached(|c| c.protected.get(id).copied()) {
            Ok(cached) => return cached,
            Err(generation) => generation,
        };
        let result = self
            .registry
            .find(id)
            .is_some_and(|m| self.is_protected_manifest(&m));
        self.fill(generation, |c| {
            c.protected.insert(id.to_string(), result);
        });
        result
    }

    /// Whether the type of `id` is a switch type. Unknown ids are not.
    pub fn is_switch_type(&self, id: &str) -> bool {
        let generation = match self.cached(|c| c.switch_types.get(id).copied()) {
            Ok(cached) => return cached,
            Err(generation) => generation,
        };
        let result = self
            .registry
            .find(id)
            .is_some_and(|m| self.is_switch_type_manifest(&m));
        self.fill(generation, |c| {
            c.switch_types.insert(id.to_string(), result);
        });
        result
    }

    pub fn has_dependency_file(&self, id: &str) -> bool {
        self.registry
            .find(id)
            .is_some_and(|m| m.has_dependency_file())
    }

    /// Run the migrations of `id`. `false` for unknown ids.
    pub fn migrate(&self, id: &str) -> bool {
        match self.registry.find(id) {
            Some(manifest) => self.migrator.migrate(&manifest),
            None => false,
        }
    }

    /// Re-register every enabled extension with the host.
    pub fn reload_active(&self) -> Result<usize> {
        self.invalidate();
        self.bootstrapper.reload()
    }
}

fn filter_type(extensions: Vec<Extension>, ext_type: &str) -> Vec<Extension> {
    if ext_type.is_empty() {
        return extensions;
    }
    let wanted = ext_type.to_lowercase();
    extensions
        .into_iter()
        .filter(|e| e.ext_type().to_lowercase() == wanted)
        .collect()
}
