//! Docker command abstraction and builder utilities.
//!
//! Every engine call goes through [`DockerCommand`] so that argument building,
//! logging and stderr classification happen in one place.

use std::ffi::OsString;
use std::process::Output;

use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{Result, RuntimeError};

/// Builder for Docker commands with a fluent interface.
#[derive(Debug, Clone)]
pub struct DockerCommand {
    program: OsString,
    subcommand: Option<String>,
    args: Vec<String>,
}

impl DockerCommand {
    /// Create a new builder running `program` (usually `docker`).
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            subcommand: None,
            args: Vec::new(),
        }
    }

    /// Set the Docker subcommand (e.g., "create", "inspect", "rm").
    pub fn subcommand<S: Into<String>>(mut self, cmd: S) -> Self {
        self.subcommand = Some(cmd.into());
        self
    }

    /// Add a single argument to the command.
    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add multiple arguments to the command.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Arguments after the program name, subcommand first.
    pub fn argv(&self) -> Vec<String> {
        self.subcommand
            .iter()
            .cloned()
            .chain(self.args.iter().cloned())
            .collect()
    }

    /// Execute the command, discarding stdout.
    pub async fn execute(self) -> Result<()> {
        self.execute_with_output().await.map(|_| ())
    }

    /// Execute the command and return trimmed stdout.
    ///
    /// A non-zero exit status is turned into a classified [`RuntimeError`].
    pub async fn execute_with_output(self) -> Result<String> {
        let output = self.execute_raw().await?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let err = RuntimeError::from_stderr(&stderr);
            if !err.is_not_found() {
                warn!(status = %output.status, "Docker command failed: {}", stderr.trim());
            }
            Err(err)
        }
    }

    /// Execute the command and return the raw Output struct.
    pub async fn execute_raw(self) -> Result<Output> {
        let argv = self.argv();
        debug!(program = ?self.program, ?argv, "Executing Docker command");

        Command::new(&self.program)
            .args(&argv)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                RuntimeError::Unavailable(format!(
                    "failed to run {}: {}",
                    self.program.to_string_lossy(),
                    e
                ))
            })
    }
}
