//! Mapping from a workspace to the container that serves it.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use codehost_runtime::{ContainerSpec, Mount, PortMapping};
use serde::{Deserialize, Serialize};

use crate::error::{OrchestratorError, Result};
use crate::workspace::{NewWorkspace, Workspace};

pub const DEFAULT_IMAGE: &str = "lscr.io/linuxserver/code-server:latest";

/// Where the workspace directory appears inside the container.
pub const WORKSPACE_MOUNT: &str = "/config/workspace";

const STANDARD_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// Operator-tunable parts of every workspace container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSettings {
    pub default_image: String,
    /// Tech tag fragment (lowercase) to image. The first key contained in a
    /// workspace's tech tag wins.
    #[serde(default)]
    pub tech_images: BTreeMap<String, String>,
    pub network_mode: String,
    /// Extra host paths mounted into every container.
    #[serde(default)]
    pub extra_mounts: Vec<Mount>,
    /// Directories prepended to `PATH`.
    #[serde(default)]
    pub extra_path: Vec<String>,
    #[serde(default)]
    pub extra_env: Vec<(String, String)>,
}

impl Default for ContainerSettings {
    fn default() -> Self {
        Self {
            default_image: DEFAULT_IMAGE.to_string(),
            tech_images: BTreeMap::new(),
            network_mode: "bridge".to_string(),
            extra_mounts: Vec::new(),
            extra_path: Vec::new(),
            extra_env: Vec::new(),
        }
    }
}

impl ContainerSettings {
    pub fn image_for(&self, tech: &str) -> &str {
        let tech = tech.to_lowercase();
        self.tech_images
            .iter()
            .find(|(fragment, _)| tech.contains(fragment.as_str()))
            .map(|(_, image)| image.as_str())
            .unwrap_or(&self.default_image)
    }
}

/// Identity of a workspace container, available before the row exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerTarget {
    pub container_name: String,
    pub slug: String,
    pub user_id: String,
    pub tech: String,
    pub host_dir: PathBuf,
}

impl ContainerTarget {
    pub fn for_workspace(ws: &Workspace, workspace_root: &Path) -> Result<Self> {
        Ok(Self {
            container_name: ws.container_name(),
            slug: ws.slug.clone(),
            user_id: ws.user_id.clone(),
            tech: ws.tech.clone(),
            host_dir: host_dir(workspace_root, &ws.user_id, &ws.slug)?,
        })
    }

    pub fn for_new(new: &NewWorkspace, workspace_root: &Path) -> Result<Self> {
        Ok(Self {
            container_name: new.container_name(),
            slug: new.slug.clone(),
            user_id: new.user_id.clone(),
            tech: new.tech.clone(),
            host_dir: host_dir(workspace_root, &new.user_id, &new.slug)?,
        })
    }
}

/// `<root>/<user>/<slug>` on the host. Both parts must be plain single path
/// components so the result stays under `workspace_root`.
pub fn host_dir(workspace_root: &Path, user_id: &str, slug: &str) -> Result<PathBuf> {
    for part in [user_id, slug] {
        let mut components = Path::new(part).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => {}
            _ => {
                return Err(OrchestratorError::Validation(format!(
                    "'{part}' cannot be used as a workspace directory name"
                )))
            }
        }
    }
    Ok(workspace_root.join(user_id).join(slug))
}

/// Declarative container for `target`, published on `host_port`.
pub fn build_container_spec(
    target: &ContainerTarget,
    settings: &ContainerSettings,
    host_port: u16,
) -> ContainerSpec {
    let mut mounts = vec![Mount {
        source: target.host_dir.to_string_lossy().into_owned(),
        target: WORKSPACE_MOUNT.to_string(),
        read_only: false,
    }];
    mounts.extend(settings.extra_mounts.iter().cloned());

    let path = settings
        .extra_path
        .iter()
        .map(String::as_str)
        .chain(std::iter::once(STANDARD_PATH))
        .collect::<Vec<_>>()
        .join(":");

    let mut env = vec![
        ("PATH".to_string(), path),
        ("AUTH".to_string(), "none".to_string()),
        ("DEFAULT_WORKSPACE".to_string(), WORKSPACE_MOUNT.to_string()),
    ];
    env.extend(settings.extra_env.iter().cloned());

    ContainerSpec {
        image: settings.image_for(&target.tech).to_string(),
        name: target.container_name.clone(),
        mounts,
        port: PortMapping::code_server(host_port),
        network_mode: settings.network_mode.clone(),
        env,
        labels: vec![
            ("codehost.workspace".to_string(), target.slug.clone()),
            ("codehost.user".to_string(), target.user_id.clone()),
        ],
    }
}
