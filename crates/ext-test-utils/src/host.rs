//! Temporary host trees and a fully wired service for scenario tests.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ext_core::{ExtensionsConfig, LifecycleService, MemoryStatusStore};
use ext_registry::{DEPENDENCY_FILENAME, ExtensionPaths, MANIFEST_FILENAME};
use serde_json::{Map, Value, json};
use tempfile::TempDir;

use crate::fakes::{
    RecordingRegistrar, RecordingSink, ScriptedInstaller, ScriptedMigrator, StaticPackageIndex,
};

/// A temporary host directory with `modules/` and `themes/` extension roots.
///
/// # Example
///
/// ```rust,no_run
/// use ext_test_utils::{ExtensionFixture, TestHost};
///
/// let host = TestHost::new();
/// host.add_extension("modules", ExtensionFixture::new("blog").requires(["base"]));
/// ```
pub struct TestHost {
    temp_dir: TempDir,
}

impl Default for TestHost {
    fn default() -> Self {
        Self::new()
    }
}

impl TestHost {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        fs::create_dir_all(temp_dir.path().join("modules")).unwrap();
        fs::create_dir_all(temp_dir.path().join("themes")).unwrap();
        Self { temp_dir }
    }

    pub fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Configuration rooted at this host with `Modules` and `Themes` types.
    pub fn config(&self) -> ExtensionsConfig {
        ExtensionsConfig {
            base_path: self.root().to_path_buf(),
            paths: ExtensionPaths::typed([("Modules", "modules"), ("Themes", "themes")]),
            ..ExtensionsConfig::default()
        }
    }

    /// Write `fixture` under `<root>/<dir>/<id>` and return its directory.
    pub fn add_extension(&self, dir: &str, fixture: ExtensionFixture) -> PathBuf {
        let ext_dir = self.root().join(dir).join(&fixture.id);
        fixture.write(&ext_dir);
        ext_dir
    }

    /// Write an installed-packages index at `relative`.
    pub fn write_index(&self, relative: &str, packages: &[(&str, &str)]) -> PathBuf {
        let path = self.root().join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        let entries: Vec<Value> = packages
            .iter()
            .map(|(name, version)| json!({ "name": name, "version": version }))
            .collect();
        fs::write(&path, json!({ "packages": entries }).to_string()).unwrap();
        path
    }

    /// Assert that `relative` exists under the host root.
    pub fn assert_exists(&self, relative: &str) {
        let path = self.root().join(relative);
        assert!(path.exists(), "expected {} to exist", path.display());
    }

    /// Assert that `relative` does not exist under the host root.
    pub fn assert_missing(&self, relative: &str) {
        let path = self.root().join(relative);
        assert!(!path.exists(), "expected {} to be absent", path.display());
    }
}

/// Builder for one extension directory on disk.
#[derive(Debug, Clone)]
pub struct ExtensionFixture {
    id: String,
    name: String,
    provider: Option<String>,
    ext_type: Option<String>,
    author: Option<String>,
    description: Option<String>,
    version: Option<String>,
    compatible_with: Option<String>,
    requires: Vec<String>,
    packages: BTreeMap<String, String>,
    migrations: bool,
    files: Vec<(String, String)>,
}

impl ExtensionFixture {
    /// A fixture named after its id, with a `<id>::providers::Provider` entry point.
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            provider: None,
            ext_type: None,
            author: None,
            description: None,
            version: None,
            compatible_with: None,
            requires: Vec::new(),
            packages: BTreeMap::new(),
            migrations: false,
            files: Vec::new(),
        }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn provider(mut self, provider: &str) -> Self {
        self.provider = Some(provider.to_string());
        self
    }

    /// Declared type; ignored when the extension sits in a typed directory.
    pub fn ext_type(mut self, ext_type: &str) -> Self {
        self.ext_type = Some(ext_type.to_string());
        self
    }

    pub fn author(mut self, author: &str) -> Self {
        self.author = Some(author.to_string());
        self
    }

    pub fn description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn version(mut self, version: &str) -> Self {
        self.version = Some(version.to_string());
        self
    }

    pub fn compatible_with(mut self, version: &str) -> Self {
        self.compatible_with = Some(version.to_string());
        self
    }

    pub fn requires<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.requires = ids.into_iter().map(Into::into).collect();
        self
    }

    /// Add a `require` entry to the dependency file. Writes the file.
    pub fn package(mut self, name: &str, constraint: &str) -> Self {
        self.packages.insert(name.to_string(), constraint.to_string());
        self
    }

    /// Ship a migrations directory with one migration in it.
    pub fn with_migrations(mut self) -> Self {
        self.migrations = true;
        self
    }

    /// Extra file inside the extension directory.
    pub fn file(mut self, relative: &str, content: &str) -> Self {
        self.files.push((relative.to_string(), content.to_string()));
        self
    }

    pub fn provider_name(&self) -> String {
        self.provider
            .clone()
            .unwrap_or_else(|| format!("{}::providers::Provider", self.id))
    }

    fn manifest_json(&self) -> Value {
        let mut object = Map::new();
        object.insert("id".into(), json!(self.id));
        object.insert("name".into(), json!(self.name));
        object.insert("provider".into(), json!(self.provider_name()));
        if let Some(ext_type) = &self.ext_type {
            object.insert("type".into(), json!(ext_type));
        }
        if let Some(author) = &self.author {
            object.insert("author".into(), json!(author));
        }
        if let Some(description) = &self.description {
            object.insert("description".into(), json!(description));
        }
        if let Some(version) = &self.version {
            object.insert("version".into(), json!(version));
        }
        if let Some(compatible_with) = &self.compatible_with {
            object.insert("compatible_with".into(), json!(compatible_with));
        }
        if !self.requires.is_empty() {
            object.insert("requires_extensions".into(), json!(self.requires));
        }
        Value::Object(object)
    }

    fn write(&self, dir: &Path) {
        fs::create_dir_all(dir).unwrap();
        fs::write(
            dir.join(MANIFEST_FILENAME),
            serde_json::to_string_pretty(&self.manifest_json()).unwrap(),
        )
        .unwrap();

        if !self.packages.is_empty() {
            fs::write(
                dir.join(DEPENDENCY_FILENAME),
                json!({ "require": self.packages }).to_string(),
            )
            .unwrap();
        }

        if self.migrations {
            let migrations = dir.join("database").join("migrations");
            fs::create_dir_all(&migrations).unwrap();
            fs::write(migrations.join("0001_create_tables.sql"), "-- schema\n").unwrap();
        }

        for (relative, content) in &self.files {
            let path = dir.join(relative);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
        }
    }
}

/// A [`LifecycleService`] over a [`TestHost`], wired to recording fakes.
///
/// The installer installs whatever it was told to provide into `index`, so
/// a successful dependency run makes the packages visible to later checks.
pub struct Harness {
    pub host: TestHost,
    pub registrar: Arc<RecordingRegistrar>,
    pub installer: Arc<ScriptedInstaller>,
    pub migrator: Arc<ScriptedMigrator>,
    pub index: Arc<StaticPackageIndex>,
    pub statuses: Arc<MemoryStatusStore>,
    pub events: Arc<RecordingSink>,
    pub service: Arc<LifecycleService>,
}

impl Harness {
    /// Harness with the host's default configuration.
    pub fn new(host: TestHost) -> Self {
        Self::build(host, |_| {})
    }

    /// Harness whose configuration is adjusted by `configure` before the
    /// service is built.
    pub fn build(host: TestHost, configure: impl FnOnce(&mut ExtensionsConfig)) -> Self {
        let mut config = host.config();
        configure(&mut config);

        let registrar = Arc::new(RecordingRegistrar::new());
        let index = Arc::new(StaticPackageIndex::new());
        let installer = Arc::new(ScriptedInstaller::new(true).installing_into(Arc::clone(&index)));
        let migrator = Arc::new(ScriptedMigrator::new());
        let statuses = Arc::new(MemoryStatusStore::new());
        let events = Arc::new(RecordingSink::new());

        let service = LifecycleService::builder(config, registrar.clone())
            .status_store(statuses.clone())
            .installer(installer.clone())
            .package_index(index.clone())
            .schema_migrator(migrator.clone())
            .event_sink(events.clone())
            .build();

        Self {
            host,
            registrar,
            installer,
            migrator,
            index,
            statuses,
            events,
            service: Arc::new(service),
        }
    }

    pub fn add_extension(&self, dir: &str, fixture: ExtensionFixture) -> PathBuf {
        let path = self.host.add_extension(dir, fixture);
        self.service.invalidate();
        path
    }

    /// Enabled state as recorded by the status store.
    pub fn is_enabled(&self, id: &str) -> bool {
        use ext_core::StatusStore;
        self.statuses.is_enabled(id).unwrap()
    }
}
