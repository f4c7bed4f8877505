use codehost_orchestrator::{ContainerSettings, OrchestratorConfig};
use codehost_ports::PortRange;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

fn invalid(var: &'static str, reason: impl std::fmt::Display) -> ConfigError {
    ConfigError::Invalid {
        var,
        reason: reason.to_string(),
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default = "default_reconcile_interval")]
    pub reconcile_interval_secs: u64,

    /// Host name clients use to reach published container ports.
    #[serde(default = "default_public_host")]
    pub public_host: String,

    #[serde(default = "default_probe_host")]
    pub probe_host: IpAddr,

    #[serde(default)]
    pub port_range: PortRange,

    #[serde(default = "default_port_retries")]
    pub port_retries: u32,

    #[serde(default = "default_workspace_root")]
    pub workspace_root: PathBuf,

    #[serde(default = "default_image")]
    pub image: String,

    /// `react=registry/image:tag` pairs.
    #[serde(default)]
    pub tech_images: BTreeMap<String, String>,

    #[serde(default)]
    pub extra_path: Vec<String>,

    #[serde(default = "default_docker_bin")]
    pub docker_bin: String,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3121".to_string()
}

fn default_db_path() -> PathBuf {
    if cfg!(windows) {
        let appdata = std::env::var("APPDATA").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(appdata)
            .join("codehost")
            .join("api")
            .join("codehost.db")
    } else {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home)
            .join(".codehost")
            .join("api")
            .join("codehost.db")
    }
}

fn default_reconcile_interval() -> u64 {
    60
}

fn default_public_host() -> String {
    "localhost".to_string()
}

fn default_probe_host() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_port_retries() -> u32 {
    codehost_orchestrator::config::DEFAULT_PORT_RETRY_LIMIT
}

fn default_workspace_root() -> PathBuf {
    PathBuf::from(codehost_orchestrator::config::DEFAULT_WORKSPACE_ROOT)
}

fn default_image() -> String {
    codehost_orchestrator::container::DEFAULT_IMAGE.to_string()
}

fn default_docker_bin() -> String {
    "docker".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            db_path: default_db_path(),
            reconcile_interval_secs: default_reconcile_interval(),
            public_host: default_public_host(),
            probe_host: default_probe_host(),
            port_range: PortRange::default(),
            port_retries: default_port_retries(),
            workspace_root: default_workspace_root(),
            image: default_image(),
            tech_images: BTreeMap::new(),
            extra_path: Vec::new(),
            docker_bin: default_docker_bin(),
        }
    }
}

impl Config {
    /// Read `CODEHOST_*` environment variables over the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Like [`Config::from_env`], reading variables through `lookup`.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = var("CODEHOST_BIND") {
            config.bind_addr = v;
        }
        if let Some(v) = var("CODEHOST_DB_PATH") {
            config.db_path = PathBuf::from(v);
        }
        if let Some(v) = var("CODEHOST_RECONCILE_INTERVAL") {
            config.reconcile_interval_secs = v
                .trim()
                .parse()
                .map_err(|e| invalid("CODEHOST_RECONCILE_INTERVAL", e))?;
            if config.reconcile_interval_secs == 0 {
                return Err(invalid("CODEHOST_RECONCILE_INTERVAL", "must be at least 1"));
            }
        }
        if let Some(v) = var("CODEHOST_PUBLIC_HOST") {
            config.public_host = v;
        }
        if let Some(v) = var("CODEHOST_PROBE_HOST") {
            config.probe_host = v.trim().parse().map_err(|e| invalid("CODEHOST_PROBE_HOST", e))?;
        }
        if let Some(v) = var("CODEHOST_PORT_RANGE") {
            config.port_range = PortRange::parse(&v).map_err(|e| invalid("CODEHOST_PORT_RANGE", e))?;
        }
        if let Some(v) = var("CODEHOST_PORT_RETRIES") {
            config.port_retries = v
                .trim()
                .parse()
                .map_err(|e| invalid("CODEHOST_PORT_RETRIES", e))?;
        }
        if let Some(v) = var("CODEHOST_WORKSPACE_ROOT") {
            config.workspace_root = PathBuf::from(v);
        }
        if let Some(v) = var("CODEHOST_IMAGE") {
            config.image = v;
        }
        if let Some(v) = var("CODEHOST_TECH_IMAGES") {
            config.tech_images = parse_tech_images(&v)?;
        }
        if let Some(v) = var("CODEHOST_EXTRA_PATH") {
            config.extra_path = v
                .split(':')
                .map(str::trim)
                .filter(|dir| !dir.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(v) = var("CODEHOST_DOCKER_BIN") {
            config.docker_bin = v;
        }

        Ok(config)
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            port_range: self.port_range,
            probe_host: self.probe_host,
            public_host: self.public_host.clone(),
            port_retry_limit: self.port_retries,
            workspace_root: self.workspace_root.clone(),
            container: ContainerSettings {
                default_image: self.image.clone(),
                tech_images: self.tech_images.clone(),
                extra_path: self.extra_path.clone(),
                ..ContainerSettings::default()
            },
        }
    }
}

fn parse_tech_images(value: &str) -> Result<BTreeMap<String, String>, ConfigError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (tech, image) = pair
                .split_once('=')
                .ok_or_else(|| invalid("CODEHOST_TECH_IMAGES", format!("expected tech=image, got '{pair}'")))?;
            let (tech, image) = (tech.trim(), image.trim());
            if tech.is_empty() || image.is_empty() {
                return Err(invalid("CODEHOST_TECH_IMAGES", format!("empty entry in '{pair}'")));
            }
            Ok((tech.to_lowercase(), image.to_string()))
        })
        .collect()
}
