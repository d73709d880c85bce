//! Scripted collaborators for lifecycle tests.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use ext_core::{
    EntryPointRegistrar, Error, EventSink, ExtensionEvent, PackageIndex, PackageInstaller, Result,
    SchemaMigrator,
};
use ext_registry::Manifest;

/// Registrar that resolves every provider except the ones marked missing.
#[derive(Debug, Default)]
pub struct RecordingRegistrar {
    missing: Mutex<HashSet<String>>,
    fail: AtomicBool,
    registered: Mutex<Vec<(String, String)>>,
    namespaces: Mutex<Vec<String>>,
}

impl RecordingRegistrar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `provider` unresolvable.
    pub fn mark_missing(&self, provider: &str) {
        self.missing.lock().unwrap().insert(provider.to_string());
    }

    /// Make every `register` call return an error.
    pub fn fail_registration(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// `(extension id, provider)` pairs in registration order.
    pub fn registered(&self) -> Vec<(String, String)> {
        self.registered.lock().unwrap().clone()
    }

    /// Extension ids in registration order.
    pub fn registered_ids(&self) -> Vec<String> {
        self.registered().into_iter().map(|(id, _)| id).collect()
    }

    pub fn namespaces(&self) -> Vec<String> {
        self.namespaces.lock().unwrap().clone()
    }
}

impl EntryPointRegistrar for RecordingRegistrar {
    fn resolves(&self, provider: &str) -> bool {
        !self.missing.lock().unwrap().contains(provider)
    }

    fn extend_namespace(&self, _manifest: &Manifest, namespace: &str) {
        self.namespaces.lock().unwrap().push(namespace.to_string());
    }

    fn register(&self, manifest: &Manifest, provider: &str) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Registration {
                id: manifest.id.clone(),
                provider: provider.to_string(),
                reason: "scripted failure".to_string(),
            });
        }
        self.registered
            .lock()
            .unwrap()
            .push((manifest.id.clone(), provider.to_string()));
        Ok(())
    }
}

/// In-memory package index. `unavailable()` models a host without an index.
#[derive(Debug)]
pub struct StaticPackageIndex {
    packages: Mutex<Option<BTreeMap<String, String>>>,
}

impl Default for StaticPackageIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl StaticPackageIndex {
    pub fn new() -> Self {
        Self {
            packages: Mutex::new(Some(BTreeMap::new())),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            packages: Mutex::new(None),
        }
    }

    pub fn install(&self, name: &str, version: &str) {
        self.packages
            .lock()
            .unwrap()
            .get_or_insert_with(BTreeMap::new)
            .insert(name.to_string(), version.to_string());
    }
}

impl PackageIndex for StaticPackageIndex {
    fn installed_packages(&self) -> Option<BTreeMap<String, String>> {
        self.packages.lock().unwrap().clone()
    }
}

/// Installer with a scripted outcome. On success it can install packages
/// into a [`StaticPackageIndex`].
#[derive(Debug)]
pub struct ScriptedInstaller {
    succeed: AtomicBool,
    calls: AtomicUsize,
    index: Option<Arc<StaticPackageIndex>>,
    provides: Mutex<Vec<(String, String)>>,
}

impl ScriptedInstaller {
    pub fn new(succeed: bool) -> Self {
        Self {
            succeed: AtomicBool::new(succeed),
            calls: AtomicUsize::new(0),
            index: None,
            provides: Mutex::new(Vec::new()),
        }
    }

    /// Install into `index` whatever [`provides`](Self::provides) lists.
    pub fn installing_into(mut self, index: Arc<StaticPackageIndex>) -> Self {
        self.index = Some(index);
        self
    }

    pub fn provides(&self, name: &str, version: &str) {
        self.provides
            .lock()
            .unwrap()
            .push((name.to_string(), version.to_string()));
    }

    pub fn set_succeed(&self, succeed: bool) {
        self.succeed.store(succeed, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl PackageInstaller for ScriptedInstaller {
    fn install_dependencies(&self) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.succeed.load(Ordering::SeqCst) {
            return false;
        }
        if let Some(index) = &self.index {
            for (name, version) in self.provides.lock().unwrap().iter() {
                index.install(name, version);
            }
        }
        true
    }
}

/// Migration runner that records the directories it was asked to apply.
#[derive(Debug, Default)]
pub struct ScriptedMigrator {
    fail: AtomicBool,
    runs: Mutex<Vec<(String, PathBuf)>>,
}

impl ScriptedMigrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Extension ids whose migrations ran.
    pub fn runs(&self) -> Vec<String> {
        self.runs
            .lock()
            .unwrap()
            .iter()
            .map(|(id, _)| id.clone())
            .collect()
    }
}

impl SchemaMigrator for ScriptedMigrator {
    fn run(&self, manifest: &Manifest, dir: &Path) -> Result<()> {
        self.runs
            .lock()
            .unwrap()
            .push((manifest.id.clone(), dir.to_path_buf()));
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Command {
                command: "migrate".to_string(),
                source: std::io::Error::other("scripted failure"),
            });
        }
        Ok(())
    }
}

/// Event sink that keeps every event it receives.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ExtensionEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ExtensionEvent> {
        self.events.lock().unwrap().clone()
    }

    /// `(kind, extension id)` pairs in emission order.
    pub fn kinds(&self) -> Vec<(String, String)> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|e| (e.kind().to_string(), e.extension().id().to_string()))
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

impl EventSink for RecordingSink {
    fn handle(&self, event: &ExtensionEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}
