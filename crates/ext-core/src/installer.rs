//! Host-wide installation of external packages.

use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, ExitStatus, Stdio};
use std::thread::JoinHandle;
use std::time::Duration;

use wait_timeout::ChildExt;

use crate::config::ExtensionsConfig;
use crate::{Error, Result};

/// Reconciles installed packages with every extension's declared requirements.
///
/// The installer works on the whole host, not on a single extension. Failures
/// are logged by the implementation and reported as `false`.
pub trait PackageInstaller: Send + Sync {
    fn install_dependencies(&self) -> bool;
}

/// Build a shell [`Command`] that executes `cmd_str` via the system shell.
///
/// - Unix: `sh -c "{cmd_str}"`
/// - Windows: `cmd /C "{cmd_str}"`
pub(crate) fn shell_command(cmd_str: &str) -> Command {
    #[cfg(windows)]
    {
        let mut c = Command::new("cmd");
        c.args(["/C", cmd_str]);
        c
    }
    #[cfg(not(windows))]
    {
        let mut c = Command::new("sh");
        c.arg("-c").arg(cmd_str);
        c
    }
}

/// Outcome of a command run by [`run_with_timeout`].
#[derive(Debug)]
pub(crate) struct CommandRun {
    /// `None` when the process was killed for running too long.
    pub status: Option<ExitStatus>,
    pub stdout: String,
    pub stderr: String,
}

/// Read a child pipe to the end on its own thread.
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<String>> {
    pipe.map(|mut pipe| {
        std::thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            String::from_utf8_lossy(&buf).trim().to_string()
        })
    })
}

fn collect(reader: Option<JoinHandle<String>>) -> String {
    reader
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default()
}

/// Run `cmd` to completion or until `timeout` elapses, capturing its output.
///
/// Both pipes are drained while waiting so a chatty child cannot block on a
/// full pipe. After a timeout the output is not collected.
pub(crate) fn run_with_timeout(
    mut cmd: Command,
    command_str: &str,
    timeout: Duration,
) -> Result<CommandRun> {
    let command_err = |source| Error::Command {
        command: command_str.to_string(),
        source,
    };

    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(command_err)?;

    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    match child.wait_timeout(timeout).map_err(command_err)? {
        Some(status) => Ok(CommandRun {
            status: Some(status),
            stdout: collect(stdout),
            stderr: collect(stderr),
        }),
        None => {
            let _ = child.kill();
            let _ = child.wait();
            // Readers are detached: a grandchild may still hold the pipes.
            Ok(CommandRun {
                status: None,
                stdout: String::new(),
                stderr: String::new(),
            })
        }
    }
}

/// Runs a configured shell command (e.g. `composer update`) in the host root.
#[derive(Debug, Clone)]
pub struct ShellInstaller {
    command: String,
    working_dir: PathBuf,
    timeout: Duration,
}

impl ShellInstaller {
    pub fn new(command: impl Into<String>, working_dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            working_dir: working_dir.into(),
            timeout,
        }
    }

    pub fn from_config(config: &ExtensionsConfig) -> Self {
        Self::new(
            config.installer.command.clone(),
            config.base_path.clone(),
            config.installer.timeout(),
        )
    }

    fn run(&self) -> Result<bool> {
        tracing::info!(command = %self.command, "Installing extension dependencies");

        let mut cmd = shell_command(&self.command);
        cmd.current_dir(&self.working_dir);

        let run = run_with_timeout(cmd, &self.command, self.timeout)?;
        match run.status {
            Some(status) if status.success() => {
                tracing::info!(command = %self.command, "Dependency installation completed");
                Ok(true)
            }
            Some(status) => {
                tracing::error!(
                    command = %self.command,
                    exit_code = ?status.code(),
                    output = %run.stdout,
                    error = %run.stderr,
                    "Dependency installation failed"
                );
                Ok(false)
            }
            None => {
                tracing::error!(
                    command = %self.command,
                    timeout_secs = self.timeout.as_secs(),
                    "Dependency installation timed out"
                );
                Ok(false)
            }
        }
    }
}

impl PackageInstaller for ShellInstaller {
    fn install_dependencies(&self) -> bool {
        self.run().unwrap_or_else(|e| {
            tracing::error!(error = %e, "Dependency installer could not be started");
            false
        })
    }
}
