//! Container engine abstraction.
//!
//! The orchestrator talks to the container engine only through the
//! [`ContainerRuntime`] trait defined here. A single runtime instance is built
//! at startup and shared for the lifetime of the process.

use async_trait::async_trait;

pub mod error;
pub mod spec;

#[cfg(feature = "docker")]
pub mod docker;

// When the `test-helpers` feature is enabled, include the in-memory engine.
#[cfg(any(test, feature = "test-helpers"))]
pub mod mock;

pub use error::{Result, RuntimeError};
pub use spec::{ContainerSpec, Mount, PortMapping, CODE_SERVER_PORT};

#[cfg(feature = "docker")]
pub use docker::DockerRuntime;
#[cfg(any(test, feature = "test-helpers"))]
pub use mock::{MockOp, MockRuntime};

/// Reference to a container the engine has created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHandle {
    /// Engine-assigned identifier. This is the canonical reference.
    pub id: String,
    pub name: String,
}

/// What the engine currently knows about a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerState {
    pub id: String,
    pub name: String,
    pub running: bool,
    /// Host port published for the code-server port, if any.
    pub host_port: Option<u16>,
}

/// The core trait for container engines.
///
/// Implementations must report a missing container as
/// [`RuntimeError::NotFound`] so callers can treat it as "already gone".
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Name of the engine (e.g. "docker", "mock").
    fn name(&self) -> &'static str;

    /// Create (but do not start) a container.
    async fn create(&self, spec: &ContainerSpec) -> Result<ContainerHandle>;

    /// Start a created or stopped container.
    async fn start(&self, container_ref: &str) -> Result<()>;

    /// Stop a running container, keeping its filesystem.
    async fn stop(&self, container_ref: &str) -> Result<()>;

    /// Remove a container. `force` also kills it if running.
    async fn remove(&self, container_ref: &str, force: bool) -> Result<()>;

    /// Current engine-side state of a container.
    async fn inspect(&self, container_ref: &str) -> Result<ContainerState>;

    /// Check that the engine is reachable.
    async fn ping(&self) -> Result<()>;
}
