//! Mutating lifecycle verbs and their validations.

use std::path::Path;
use std::sync::Arc;

use walkdir::WalkDir;

use ext_registry::Manifest;

use super::LifecycleService;
use crate::events::ExtensionEvent;
use crate::extension::Extension;
use crate::result::{ErrorCode, OpResult};
use crate::{Error, Result};

/// Which steps of the installation pipeline to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pipeline {
    /// Packages only.
    Dependencies,
    /// Packages and migrations.
    Install,
    /// Packages, migrations, exclusivity and activation.
    Enable,
}

impl LifecycleService {
    /// Convert an internal error into an `exception` failure.
    fn guarded(&self, verb: &str, id: &str, f: impl FnOnce() -> Result<OpResult>) -> OpResult {
        match f() {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(id = %id, verb, error = %e, "Extension operation failed unexpectedly");
                OpResult::failure(format!("Failed to {verb} extension: {e}"), ErrorCode::Exception)
            }
        }
    }

    fn not_found() -> OpResult {
        OpResult::failure("Extension not found", ErrorCode::NotFound)
    }

    fn manifest_or_fail(&self, id: &str) -> std::result::Result<Arc<Manifest>, OpResult> {
        self.registry.find(id).ok_or_else(Self::not_found)
    }

    fn extension_view(&self, id: &str) -> Result<Extension> {
        self.get(id)?.ok_or_else(|| Error::StatusStore {
            message: format!("extension '{id}' vanished during the operation"),
        })
    }

    // ---- discovery ----------------------------------------------------

    /// Rescan extension directories and drop status records of vanished ids.
    pub fn discover(&self) -> OpResult {
        self.guarded("discover", "*", || {
            self.invalidate();
            self.registry.discover();

            let known: Vec<String> = self.manifests().iter().map(|m| m.id.clone()).collect();
            let mut removed = Vec::new();
            for id in self.statuses.statuses()?.keys() {
                if !known.contains(id) {
                    self.statuses.remove(id)?;
                    removed.push(id.clone());
                }
            }
            if !removed.is_empty() {
                self.invalidate();
            }

            let count = self.manifests().len();
            tracing::info!(discovered = count, removed_orphaned = ?removed, "Extensions discovered");

            let mut message = format!("Discovered {count} extensions");
            if !removed.is_empty() {
                message.push_str(&format!(", removed {} orphaned", removed.len()));
            }
            Ok(OpResult::success(message)
                .with_data("discovered_count", count)
                .with_data("removed_orphaned", removed))
        })
    }

    // ---- validation ---------------------------------------------------

    pub fn validate_can_enable(&self, id: &str) -> OpResult {
        self.guarded("validate", id, || self.try_validate_can_enable(id))
    }

    fn try_validate_can_enable(&self, id: &str) -> Result<OpResult> {
        let manifest = match self.manifest_or_fail(id) {
            Ok(m) => m,
            Err(failure) => return Ok(failure),
        };
        if self.statuses.is_enabled(id)? {
            return Ok(OpResult::failure("Extension is already enabled", ErrorCode::AlreadyEnabled));
        }
        if self.bootstrapper.resolve_provider(&manifest).is_none() {
            return Ok(OpResult::failure(
                format!("Extension is broken: entry point '{}' not found", manifest.provider),
                ErrorCode::Broken,
            ));
        }
        Ok(OpResult::success("Extension can be enabled"))
    }

    pub fn validate_can_disable(&self, id: &str) -> OpResult {
        self.guarded("validate", id, || self.try_validate_can_disable(id))
    }

    fn try_validate_can_disable(&self, id: &str) -> Result<OpResult> {
        let manifest = match self.manifest_or_fail(id) {
            Ok(m) => m,
            Err(failure) => return Ok(failure),
        };
        if !self.statuses.is_enabled(id)? {
            return Ok(OpResult::failure("Extension is already disabled", ErrorCode::AlreadyDisabled));
        }
        if self.is_protected_manifest(&manifest) && !self.is_switch_type_manifest(&manifest) {
            return Ok(OpResult::failure(
                "Extension is protected and cannot be disabled",
                ErrorCode::Protected,
            ));
        }
        let required_by = self.required_by_enabled(id)?;
        if !required_by.is_empty() {
            return Ok(OpResult::failure(
                format!("Extension is required by: {}", required_by.join(", ")),
                ErrorCode::RequiredBy,
            )
            .with_data("required_by", required_by));
        }
        Ok(OpResult::success("Extension can be disabled"))
    }

    pub fn validate_can_delete(&self, id: &str) -> OpResult {
        match self.manifest_or_fail(id) {
            Err(failure) => failure,
            Ok(manifest) if self.is_protected_manifest(&manifest) => OpResult::failure(
                "Extension is protected and cannot be deleted",
                ErrorCode::Protected,
            ),
            Ok(_) => OpResult::success("Extension can be deleted"),
        }
    }

    // ---- verbs --------------------------------------------------------

    /// Enable an extension, installing missing packages and switching off
    /// other members of its switch type.
    pub fn enable(&self, id: &str) -> OpResult {
        self.guarded("enable", id, || {
            let validation = self.try_validate_can_enable(id)?;
            if validation.has_code(ErrorCode::AlreadyEnabled) {
                return Ok(OpResult::success("Extension is already enabled"));
            }
            if validation.is_failure() {
                return Ok(validation);
            }
            self.run_pipeline(id, Pipeline::Enable)
        })
    }

    pub fn disable(&self, id: &str) -> OpResult {
        self.guarded("disable", id, || self.try_disable(id))
    }

    fn try_disable(&self, id: &str) -> Result<OpResult> {
        let validation = self.try_validate_can_disable(id)?;
        if validation.has_code(ErrorCode::AlreadyDisabled) {
            return Ok(OpResult::success("Extension is already disabled"));
        }
        if validation.is_failure() {
            return Ok(validation);
        }

        let extension = self.extension_view(id)?;
        self.statuses.disable(id, Some(extension.ext_type()))?;
        self.invalidate();

        tracing::info!(id = %id, "Extension disabled");
        self.emit(ExtensionEvent::Disabled {
            extension: extension.clone(),
        });
        Ok(OpResult::success("Extension disabled successfully"))
    }

    /// Disable if needed, forget the status record and remove the directory.
    ///
    /// A directory that cannot be removed yields `fs_error`; the status record
    /// is already gone by then and stays gone.
    pub fn delete(&self, id: &str) -> OpResult {
        self.delete_with(id, remove_tree)
    }

    fn delete_with(&self, id: &str, remove: impl FnOnce(&Path) -> Result<()>) -> OpResult {
        self.guarded("delete", id, || {
            let validation = self.validate_can_delete(id);
            if validation.is_failure() {
                return Ok(validation);
            }

            if self.statuses.is_enabled(id)? {
                let disabled = self.try_disable(id)?;
                if disabled.is_failure() {
                    return Ok(disabled);
                }
            }
            // Read after the cascade so the event reports the disabled state.
            let extension = self.extension_view(id)?;

            self.statuses.remove(id)?;
            self.invalidate();

            let path = extension.path().to_path_buf();
            if let Err(e) = remove(&path) {
                tracing::warn!(id = %id, path = %path.display(), error = %e, "Failed to delete extension directory");
                self.invalidate();
                return Ok(OpResult::failure("Failed to delete extension directory", ErrorCode::FsError)
                    .with_data("path", path.display().to_string()));
            }
            self.invalidate();

            tracing::info!(id = %id, path = %path.display(), "Extension deleted");
            self.emit(ExtensionEvent::Deleted {
                extension,
                path: path.clone(),
            });
            Ok(OpResult::success("Extension deleted successfully")
                .with_data("path", path.display().to_string()))
        })
    }

    /// Install missing packages and run migrations without enabling.
    pub fn install(&self, id: &str) -> OpResult {
        self.guarded("install", id, || self.run_pipeline(id, Pipeline::Install))
    }

    /// Install missing packages only.
    pub fn install_dependencies(&self, id: &str) -> OpResult {
        self.guarded("install dependencies of", id, || {
            self.run_pipeline(id, Pipeline::Dependencies)
        })
    }

    /// [`install_dependencies`](Self::install_dependencies) then
    /// [`enable`](Self::enable), stopping at the first failure.
    pub fn install_and_enable(&self, id: &str) -> OpResult {
        let installed = self.install_dependencies(id);
        if installed.is_failure() {
            return installed;
        }

        let enabled = self.enable(id);
        if enabled.is_failure() {
            return enabled;
        }
        match installed.get("packages") {
            Some(packages) => enabled.with_data("packages", packages.clone()),
            None => enabled,
        }
    }

    fn run_pipeline(&self, id: &str, pipeline: Pipeline) -> Result<OpResult> {
        let manifest = match self.manifest_or_fail(id) {
            Ok(m) => m,
            Err(failure) => return Ok(failure),
        };

        self.deps.include_bundled(&manifest);

        let missing_extensions = self.missing_extensions_for(&manifest)?;
        if !missing_extensions.is_empty() {
            return Ok(OpResult::failure(
                format!("Missing required extensions: {}", missing_extensions.join(", ")),
                ErrorCode::MissingExtensions,
            )
            .with_data("extensions", missing_extensions));
        }

        let missing = self.deps.missing_packages(&manifest);
        let has_dependency_file = manifest.has_dependency_file();
        let mut installed = Vec::new();

        if has_dependency_file && !manifest.requires_packages.is_empty() && !missing.is_empty() {
            if !self.installer.install_dependencies() {
                return Ok(OpResult::failure(
                    "Failed to install extension dependencies",
                    ErrorCode::InstallFailed,
                )
                .with_data("packages", missing));
            }

            tracing::info!(id = %id, packages = ?missing, "Extension dependencies installed");
            installed = missing;
            let extension = self.extension_view(id)?;
            self.emit(ExtensionEvent::DependenciesInstalled {
                extension,
                packages: installed.clone(),
            });
        }

        let mut result = OpResult::success("").with_data("packages", installed.clone());

        let migrations_run = match pipeline {
            Pipeline::Dependencies => None,
            Pipeline::Install | Pipeline::Enable => Some(self.migrator.migrate(&manifest)),
        };
        if let Some(ran) = migrations_run {
            result = result.with_data("migrations_run", ran);
        }

        let message = match pipeline {
            Pipeline::Enable => {
                let switched_off = self.enforce_switch_type(&manifest)?;
                if !switched_off.is_empty() {
                    result = result.with_data("switched_off", switched_off);
                }

                self.statuses.enable(id, Some(&manifest.ext_type))?;
                self.invalidate();

                if let Err(e) = self.bootstrapper.register_provider(&manifest) {
                    tracing::warn!(id = %id, error = %e, "Entry point registration failed after enable");
                }

                tracing::info!(id = %id, "Extension enabled");
                self.emit(ExtensionEvent::Enabled {
                    extension: self.extension_view(id)?,
                });
                "Extension enabled successfully"
            }
            Pipeline::Install if migrations_run == Some(true) => {
                tracing::info!(id = %id, "Extension installed (dependencies and migrations)");
                "Extension installed with migrations"
            }
            Pipeline::Install => {
                tracing::info!(id = %id, "Extension installed (dependencies only)");
                "Extension installed, migrations not applied"
            }
            Pipeline::Dependencies if !installed.is_empty() => "Dependencies installed",
            Pipeline::Dependencies if !has_dependency_file => "Extension has no dependency file",
            Pipeline::Dependencies if manifest.requires_packages.is_empty() => {
                "Extension declares no dependencies"
            }
            Pipeline::Dependencies => "Dependencies already installed",
        };

        Ok(result.with_message(message))
    }

    /// Disable every other unprotected, enabled member of a switch type.
    ///
    /// Writes the status store directly; normal disable validation does not apply.
    fn enforce_switch_type(&self, manifest: &Manifest) -> Result<Vec<String>> {
        if !self.is_switch_type_manifest(manifest) {
            return Ok(Vec::new());
        }

        let ext_type = manifest.ext_type.to_lowercase();
        let mut switched_off = Vec::new();

        for other in self.manifests().iter() {
            if other.id == manifest.id
                || other.ext_type.to_lowercase() != ext_type
                || self.is_protected_manifest(other)
            {
                continue;
            }
            if self.statuses.is_enabled(&other.id)? {
                self.statuses.disable(&other.id, Some(&other.ext_type))?;
                tracing::info!(id = %other.id, replaced_by = %manifest.id, "Switched off extension");
                switched_off.push(other.id.clone());
            }
        }

        if !switched_off.is_empty() {
            self.invalidate();
        }
        Ok(switched_off)
    }
}

/// Remove a directory tree, children before parents. A missing path is fine.
fn remove_tree(path: &Path) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }

    for entry in WalkDir::new(path).contents_first(true) {
        let entry = entry.map_err(|e| {
            let at = e.path().unwrap_or(path).to_path_buf();
            Error::io(at, std::io::Error::other(e.to_string()))
        })?;
        let target = entry.path();
        if entry.file_type().is_dir() {
            std::fs::remove_dir(target).map_err(|e| Error::io(target, e))?;
        } else {
            std::fs::remove_file(target).map_err(|e| Error::io(target, e))?;
        }
    }
    Ok(())
}
