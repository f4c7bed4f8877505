//! Docker engine implementation of [`ContainerRuntime`].
//!
//! Drives the `docker` CLI. Container references passed in are engine ids;
//! names are only used at creation time.

pub mod command;

use std::collections::HashMap;
use std::ffi::OsString;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, instrument};

use crate::error::{Result, RuntimeError};
use crate::spec::ContainerSpec;
use crate::{ContainerHandle, ContainerRuntime, ContainerState};

pub use command::DockerCommand;

/// Default seconds `docker stop` waits before killing the container.
pub const DEFAULT_STOP_TIMEOUT_SECS: u32 = 10;

#[derive(Debug, Clone)]
pub struct DockerRuntime {
    executable: OsString,
    stop_timeout_secs: u32,
}

impl DockerRuntime {
    pub fn new(executable: impl Into<OsString>) -> Self {
        Self {
            executable: executable.into(),
            stop_timeout_secs: DEFAULT_STOP_TIMEOUT_SECS,
        }
    }

    pub fn with_stop_timeout(mut self, secs: u32) -> Self {
        self.stop_timeout_secs = secs;
        self
    }

    fn command(&self) -> DockerCommand {
        DockerCommand::new(self.executable.clone())
    }

    /// `docker create` invocation for `spec`.
    pub fn create_command(&self, spec: &ContainerSpec) -> DockerCommand {
        let mut cmd = self
            .command()
            .subcommand("create")
            .arg("--name")
            .arg(spec.name.as_str())
            .arg("--network")
            .arg(spec.network_mode.as_str())
            .arg("-p")
            .arg(format!(
                "{}:{}/tcp",
                spec.port.host_port, spec.port.container_port
            ));

        for mount in &spec.mounts {
            cmd = cmd.arg("-v").arg(mount.bind_string());
        }
        for (key, value) in &spec.env {
            cmd = cmd.arg("-e").arg(format!("{key}={value}"));
        }
        for (key, value) in &spec.labels {
            cmd = cmd.arg("--label").arg(format!("{key}={value}"));
        }

        cmd.arg(spec.image.as_str())
    }
}

impl Default for DockerRuntime {
    fn default() -> Self {
        Self::new("docker")
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    fn name(&self) -> &'static str {
        "docker"
    }

    #[instrument(skip(self, spec), fields(name = %spec.name, port = spec.port.host_port))]
    async fn create(&self, spec: &ContainerSpec) -> Result<ContainerHandle> {
        let id = self.create_command(spec).execute_with_output().await?;
        if id.is_empty() {
            return Err(RuntimeError::CommandFailed(
                "docker create returned no container id".to_string(),
            ));
        }
        info!(id = %id, "created container");
        Ok(ContainerHandle {
            id,
            name: spec.name.clone(),
        })
    }

    #[instrument(skip(self))]
    async fn start(&self, container_ref: &str) -> Result<()> {
        self.command()
            .subcommand("start")
            .arg(container_ref)
            .execute()
            .await
    }

    #[instrument(skip(self))]
    async fn stop(&self, container_ref: &str) -> Result<()> {
        self.command()
            .subcommand("stop")
            .arg("-t")
            .arg(self.stop_timeout_secs.to_string())
            .arg(container_ref)
            .execute()
            .await
    }

    #[instrument(skip(self))]
    async fn remove(&self, container_ref: &str, force: bool) -> Result<()> {
        let mut cmd = self.command().subcommand("rm");
        if force {
            cmd = cmd.arg("-f");
        }
        cmd.arg(container_ref).execute().await
    }

    async fn inspect(&self, container_ref: &str) -> Result<ContainerState> {
        let output = self
            .command()
            .subcommand("inspect")
            .args(["--type", "container"])
            .arg(container_ref)
            .execute_with_output()
            .await?;

        parse_inspect(&output, container_ref)
    }

    async fn ping(&self) -> Result<()> {
        self.command()
            .subcommand("info")
            .args(["--format", "{{.ServerVersion}}"])
            .execute()
            .await
            .map_err(|e| match e {
                RuntimeError::Unavailable(msg) => RuntimeError::Unavailable(msg),
                other => RuntimeError::Unavailable(other.to_string()),
            })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectEntry {
    id: String,
    name: String,
    state: InspectState,
    #[serde(default)]
    host_config: Option<InspectHostConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectState {
    running: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectHostConfig {
    #[serde(default)]
    port_bindings: Option<HashMap<String, Option<Vec<InspectBinding>>>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectBinding {
    #[serde(default)]
    host_port: String,
}

/// Parse `docker inspect` JSON output into a [`ContainerState`].
fn parse_inspect(output: &str, container_ref: &str) -> Result<ContainerState> {
    let entries: Vec<InspectEntry> = serde_json::from_str(output).map_err(|e| {
        RuntimeError::CommandFailed(format!("unreadable inspect output for {container_ref}: {e}"))
    })?;
    let entry = entries
        .into_iter()
        .next()
        .ok_or_else(|| RuntimeError::NotFound(container_ref.to_string()))?;

    let code_server_key = format!("{}/tcp", crate::CODE_SERVER_PORT);
    let host_port = entry
        .host_config
        .and_then(|hc| hc.port_bindings)
        .and_then(|mut bindings| bindings.remove(&code_server_key))
        .flatten()
        .and_then(|list| list.into_iter().find_map(|b| b.host_port.parse::<u16>().ok()));

    Ok(ContainerState {
        id: entry.id,
        name: entry.name.trim_start_matches('/').to_string(),
        running: entry.state.running,
        host_port,
    })
}
