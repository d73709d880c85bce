//! Schema migrations shipped by extensions.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use ext_registry::Manifest;

use crate::config::ExtensionsConfig;
use crate::installer::{run_with_timeout, shell_command};
use crate::{Error, Result};

/// Applies the unapplied migrations found in a directory.
pub trait SchemaMigrator: Send + Sync {
    fn run(&self, manifest: &Manifest, dir: &Path) -> Result<()>;
}

/// Runs a shell command with the migration directory in its environment.
///
/// The command receives `EXTENSION_ID` and `EXTENSION_MIGRATIONS_DIR`.
#[derive(Debug, Clone)]
pub struct CommandMigrator {
    command: String,
    working_dir: PathBuf,
    timeout: Duration,
}

impl CommandMigrator {
    pub fn new(command: impl Into<String>, working_dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            working_dir: working_dir.into(),
            timeout,
        }
    }
}

impl SchemaMigrator for CommandMigrator {
    fn run(&self, manifest: &Manifest, dir: &Path) -> Result<()> {
        let mut cmd = shell_command(&self.command);
        cmd.current_dir(&self.working_dir)
            .env("EXTENSION_ID", &manifest.id)
            .env("EXTENSION_MIGRATIONS_DIR", dir);

        let run = run_with_timeout(cmd, &self.command, self.timeout)?;
        match run.status {
            Some(status) if status.success() => Ok(()),
            Some(status) if run.stderr.is_empty() => Err(Error::Command {
                command: self.command.clone(),
                source: std::io::Error::other(format!("exited with {status}")),
            }),
            Some(status) => Err(Error::Command {
                command: self.command.clone(),
                source: std::io::Error::other(format!("exited with {status}: {}", run.stderr)),
            }),
            None => Err(Error::Command {
                command: self.command.clone(),
                source: std::io::Error::new(std::io::ErrorKind::TimedOut, "timed out"),
            }),
        }
    }
}

/// Locates an extension's migration directory and runs it.
#[derive(Clone)]
pub struct Migrator {
    dir: PathBuf,
    runner: Option<Arc<dyn SchemaMigrator>>,
}

impl std::fmt::Debug for Migrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Migrator")
            .field("dir", &self.dir)
            .field("runner", &self.runner.is_some())
            .finish()
    }
}

impl Migrator {
    /// `dir` is relative to each extension's directory.
    pub fn new(dir: impl Into<PathBuf>, runner: Option<Arc<dyn SchemaMigrator>>) -> Self {
        Self {
            dir: dir.into(),
            runner,
        }
    }

    /// Migrator using the configured command, if any.
    pub fn from_config(config: &ExtensionsConfig) -> Self {
        let runner = config.migrations.command.as_ref().map(|command| {
            Arc::new(CommandMigrator::new(
                command.clone(),
                config.base_path.clone(),
                config.installer.timeout(),
            )) as Arc<dyn SchemaMigrator>
        });
        Self::new(config.migrations.dir.clone(), runner)
    }

    pub fn migrations_dir(&self, manifest: &Manifest) -> PathBuf {
        manifest.path.join(&self.dir)
    }

    /// Apply the extension's migrations. A missing directory is a success.
    pub fn migrate(&self, manifest: &Manifest) -> bool {
        let dir = self.migrations_dir(manifest);
        if !dir.is_dir() {
            return true;
        }

        let Some(runner) = &self.runner else {
            tracing::warn!(id = %manifest.id, dir = %dir.display(), "Migrations present but no migration runner configured");
            return false;
        };

        match runner.run(manifest, &dir) {
            Ok(()) => {
                tracing::info!(id = %manifest.id, "Extension migrations applied");
                true
            }
            Err(e) => {
                tracing::warn!(id = %manifest.id, dir = %dir.display(), error = %e, "Extension migrations failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct Recording {
        runs: Mutex<Vec<PathBuf>>,
        fail: bool,
    }

    impl SchemaMigrator for Recording {
        fn run(&self, _manifest: &Manifest, dir: &Path) -> Result<()> {
            self.runs.lock().unwrap().push(dir.to_path_buf());
            if self.fail {
                return Err(Error::Command {
                    command: "migrate".to_string(),
                    source: std::io::Error::other("boom"),
                });
            }
            Ok(())
        }
    }

    #[test]
    fn test_missing_dir_is_success_without_running() {
        let tmp = TempDir::new().unwrap();
        let runner = Arc::new(Recording::default());
        let migrator = Migrator::new("database/migrations", Some(runner.clone()));

        let manifest = Manifest::new("x", "X", "p", tmp.path());
        assert!(migrator.migrate(&manifest));
        assert!(runner.runs.lock().unwrap().is_empty());
    }

    #[test]
    fn test_runs_existing_dir() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("database/migrations");
        std::fs::create_dir_all(&dir).unwrap();

        let runner = Arc::new(Recording::default());
        let migrator = Migrator::new("database/migrations", Some(runner.clone()));
        assert!(migrator.migrate(&Manifest::new("x", "X", "p", tmp.path())));
        assert_eq!(*runner.runs.lock().unwrap(), vec![dir]);
    }

    #[test]
    fn test_runner_failure_and_missing_runner() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("migrations")).unwrap();
        let manifest = Manifest::new("x", "X", "p", tmp.path());

        let failing = Migrator::new(
            "migrations",
            Some(Arc::new(Recording {
                fail: true,
                ..Default::default()
            })),
        );
        assert!(!failing.migrate(&manifest));
        assert!(!Migrator::new("migrations", None).migrate(&manifest));
    }

    #[cfg(unix)]
    #[test]
    fn test_command_migrator_env() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("migrations");
        std::fs::create_dir_all(&dir).unwrap();

        let migrator = CommandMigrator::new(
            "echo \"$EXTENSION_ID\" > \"$EXTENSION_MIGRATIONS_DIR/ran\"",
            tmp.path(),
            Duration::from_secs(10),
        );
        let manifest = Manifest::new("blog", "Blog", "p", tmp.path());
        migrator.run(&manifest, &dir).unwrap();

        let ran = std::fs::read_to_string(dir.join("ran")).unwrap();
        assert_eq!(ran.trim(), "blog");
    }

    #[cfg(unix)]
    #[test]
    fn test_command_migrator_failure_carries_stderr() {
        let tmp = TempDir::new().unwrap();
        let migrator = CommandMigrator::new(
            "echo 'table blog_posts already exists' >&2; exit 1",
            tmp.path(),
            Duration::from_secs(10),
        );
        let manifest = Manifest::new("blog", "Blog", "p", tmp.path());

        let err = migrator.run(&manifest, tmp.path()).unwrap_err();
        assert!(err.to_string().contains("table blog_posts already exists"), "{err}");
    }
}
