//! Declarative container description handed to the engine.

use serde::{Deserialize, Serialize};

/// Port code-server listens on inside the container.
pub const CODE_SERVER_PORT: u16 = 8443;

/// Everything the engine needs to create a workspace container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub image: String,
    pub name: String,
    pub mounts: Vec<Mount>,
    pub port: PortMapping,
    pub network_mode: String,
    /// Environment in `KEY=VALUE` order of declaration.
    pub env: Vec<(String, String)>,
    pub labels: Vec<(String, String)>,
}

/// Host path bound into the container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mount {
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub read_only: bool,
}

impl Mount {
    /// Bind string in engine syntax, e.g. `/host:/container:ro`.
    pub fn bind_string(&self) -> String {
        if self.read_only {
            format!("{}:{}:ro", self.source, self.target)
        } else {
            format!("{}:{}", self.source, self.target)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    pub host_port: u16,
    pub container_port: u16,
}

impl PortMapping {
    /// Publish `host_port` to the code-server port.
    pub fn code_server(host_port: u16) -> Self {
        Self {
            host_port,
            container_port: CODE_SERVER_PORT,
        }
    }
}

impl ContainerSpec {
    /// Same spec published on a different host port.
    pub fn with_host_port(mut self, host_port: u16) -> Self {
        self.port.host_port = host_port;
        self
    }

    pub fn env_value(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}
