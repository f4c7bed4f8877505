use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

use codehost_ports::PortRange;
use serde::{Deserialize, Serialize};

use crate::container::ContainerSettings;

pub const DEFAULT_PORT_RETRY_LIMIT: u32 = 3;
pub const DEFAULT_WORKSPACE_ROOT: &str = "/code-server-workspaces";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    pub port_range: PortRange,
    /// Address the allocator binds when probing for free ports.
    pub probe_host: IpAddr,
    /// Host name put into connection URIs.
    pub public_host: String,
    /// Re-allocations allowed after the engine reports a port conflict.
    pub port_retry_limit: u32,
    /// Host directory holding `<user>/<slug>` workspace directories.
    pub workspace_root: PathBuf,
    pub container: ContainerSettings,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            port_range: PortRange::default(),
            probe_host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            public_host: "localhost".to_string(),
            port_retry_limit: DEFAULT_PORT_RETRY_LIMIT,
            workspace_root: PathBuf::from(DEFAULT_WORKSPACE_ROOT),
            container: ContainerSettings::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn connection_uri(&self, host_port: u16) -> String {
        format!("http://{}:{}", self.public_host, host_port)
    }
}
