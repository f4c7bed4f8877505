use crate::error::{OrchestratorError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Longest accepted display name, in characters.
pub const MAX_NAME_LEN: usize = 100;

/// Longest slug stem taken from the display name.
const MAX_SLUG_STEM_LEN: usize = 48;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Workspace {
    pub id: i64,
    pub name: String,
    /// Immutable identifier used for the container name and host directory.
    pub slug: String,
    pub user_id: String,
    pub project_id: i64,
    pub tech: String,
    pub status: WorkspaceStatus,
    pub container_ref: Option<String>,
    pub connection_uri: Option<String>,
    pub host_port: Option<u16>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(rename_all = "UPPERCASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkspaceStatus {
    Running,
    Stopped,
}

impl WorkspaceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "RUNNING",
            Self::Stopped => "STOPPED",
        }
    }
}

impl std::fmt::Display for WorkspaceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WorkspaceStatus {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "RUNNING" => Ok(Self::Running),
            "STOPPED" => Ok(Self::Stopped),
            other => Err(OrchestratorError::Validation(format!(
                "unknown workspace status '{other}'"
            ))),
        }
    }
}

impl Workspace {
    /// Engine-side container name.
    pub fn container_name(&self) -> String {
        container_name_for(&self.slug)
    }

    pub fn is_running(&self) -> bool {
        self.status == WorkspaceStatus::Running
    }

    /// Container reference if one is recorded.
    pub fn container(&self) -> Option<&str> {
        self.container_ref.as_deref().filter(|r| !r.is_empty())
    }

    /// Check the record-level invariants that every transition must preserve.
    pub fn check_invariants(&self) -> Result<()> {
        if self.is_running() && self.container().is_none() {
            return Err(OrchestratorError::Conflict(format!(
                "workspace {} is RUNNING without a container reference",
                self.id
            )));
        }
        if self.is_running() && self.connection_uri.is_none() {
            return Err(OrchestratorError::Conflict(format!(
                "workspace {} is RUNNING without a connection URI",
                self.id
            )));
        }
        if !self.is_running() && self.connection_uri.is_some() {
            return Err(OrchestratorError::Conflict(format!(
                "workspace {} is STOPPED but still advertises a connection URI",
                self.id
            )));
        }
        Ok(())
    }
}

pub fn container_name_for(slug: &str) -> String {
    format!("code-{slug}")
}

/// Client request to create a workspace.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateWorkspaceRequest {
    pub name: String,
    pub project_id: i64,
    pub tech: String,
}

impl CreateWorkspaceRequest {
    /// Validate the request and turn it into a STOPPED row draft for `user_id`.
    pub fn into_new_workspace(self, user_id: &str) -> Result<NewWorkspace> {
        let user_id = validate_user_id(user_id)?;
        let name = validate_name(&self.name)?;
        if self.project_id <= 0 {
            return Err(OrchestratorError::Validation(format!(
                "project id must be positive, got {}",
                self.project_id
            )));
        }
        let tech = self.tech.trim();
        if tech.is_empty() || tech.chars().count() > MAX_NAME_LEN {
            return Err(OrchestratorError::Validation(
                "tech must be between 1 and 100 characters".to_string(),
            ));
        }

        Ok(NewWorkspace {
            slug: generate_slug(&name),
            name,
            user_id,
            project_id: self.project_id,
            tech: tech.to_string(),
            status: WorkspaceStatus::Stopped,
            container_ref: None,
            connection_uri: None,
            host_port: None,
        })
    }
}

/// Row draft handed to the store on insert.
#[derive(Debug, Clone)]
pub struct NewWorkspace {
    pub name: String,
    pub slug: String,
    pub user_id: String,
    pub project_id: i64,
    pub tech: String,
    pub status: WorkspaceStatus,
    pub container_ref: Option<String>,
    pub connection_uri: Option<String>,
    pub host_port: Option<u16>,
}

impl NewWorkspace {
    pub fn container_name(&self) -> String {
        container_name_for(&self.slug)
    }

    /// Mark the draft as running on `container_ref`.
    pub fn running(mut self, container_ref: String, connection_uri: String, host_port: u16) -> Self {
        self.status = WorkspaceStatus::Running;
        self.container_ref = Some(container_ref);
        self.connection_uri = Some(connection_uri);
        self.host_port = Some(host_port);
        self
    }
}

/// Replacement of a workspace's runtime attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub status: WorkspaceStatus,
    pub container_ref: Option<String>,
    pub connection_uri: Option<String>,
    pub host_port: Option<u16>,
}

impl StatusUpdate {
    pub fn running(container_ref: String, connection_uri: String, host_port: u16) -> Self {
        Self {
            status: WorkspaceStatus::Running,
            container_ref: Some(container_ref),
            connection_uri: Some(connection_uri),
            host_port: Some(host_port),
        }
    }

    /// STOPPED, keeping the container and host port for the next start.
    pub fn stopped(container_ref: Option<String>, host_port: Option<u16>) -> Self {
        Self {
            status: WorkspaceStatus::Stopped,
            container_ref,
            connection_uri: None,
            host_port,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct WorkspaceFilters {
    pub user_id: Option<String>,
    pub project_id: Option<i64>,
    pub status: Option<WorkspaceStatus>,
}

/// What a client needs to reach a workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct WorkspaceConnection {
    pub workspace_id: i64,
    pub status: WorkspaceStatus,
    pub connection_uri: Option<String>,
    pub container_name: String,
    pub host_port: Option<u16>,
}

impl From<&Workspace> for WorkspaceConnection {
    fn from(ws: &Workspace) -> Self {
        Self {
            workspace_id: ws.id,
            status: ws.status,
            connection_uri: ws.connection_uri.clone(),
            container_name: ws.container_name(),
            host_port: ws.host_port,
        }
    }
}

/// Check a user id before it names a host directory.
///
/// The id becomes a single path component under the workspace root, so
/// separators, `.`/`..`, NUL and other control characters are refused.
pub fn validate_user_id(user_id: &str) -> Result<String> {
    let user_id = user_id.trim();
    if user_id.is_empty() {
        return Err(OrchestratorError::Validation(
            "user id must not be empty".to_string(),
        ));
    }
    if user_id.chars().count() > MAX_NAME_LEN {
        return Err(OrchestratorError::Validation(format!(
            "user id must be at most {MAX_NAME_LEN} characters"
        )));
    }
    if user_id == "." || user_id == ".." || user_id.contains("..") {
        return Err(OrchestratorError::Validation(format!(
            "user id '{user_id}' must not contain '..'"
        )));
    }
    if user_id
        .chars()
        .any(|c| c == '/' || c == '\\' || c.is_control())
    {
        return Err(OrchestratorError::Validation(
            "user id must not contain path separators or control characters".to_string(),
        ));
    }
    Ok(user_id.to_string())
}

/// Trim and check a display name.
pub fn validate_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(OrchestratorError::Validation(
            "workspace name must not be empty".to_string(),
        ));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(OrchestratorError::Validation(format!(
            "workspace name must be at most {MAX_NAME_LEN} characters"
        )));
    }
    if name.chars().any(char::is_control) {
        return Err(OrchestratorError::Validation(
            "workspace name must not contain control characters".to_string(),
        ));
    }
    Ok(name.to_string())
}

/// Lowercase ASCII stem of `name`: alphanumerics kept, runs of anything else
/// collapsed into a single `-`.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_dash = false;

    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
        if slug.len() >= MAX_SLUG_STEM_LEN {
            break;
        }
    }

    slug.trim_end_matches('-').to_string()
}

/// Unique slug for a new workspace: name stem plus a short random suffix.
pub fn generate_slug(name: &str) -> String {
    let stem = slugify(name);
    let stem = if stem.is_empty() { "workspace".to_string() } else { stem };
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{stem}-{}", &suffix[..6])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(name: &str) -> CreateWorkspaceRequest {
        CreateWorkspaceRequest {
            name: name.to_string(),
            project_id: 1,
            tech: "react".to_string(),
        }
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("demo"), "demo");
        assert_eq!(slugify("My  React App!"), "my-react-app");
        assert_eq!(slugify("--weird__name--"), "weird-name");
        assert_eq!(slugify("日本語"), "");
        assert!(slugify(&"a".repeat(200)).len() <= MAX_SLUG_STEM_LEN);
    }

    #[test]
    fn test_generated_slugs_are_distinct() {
        let a = generate_slug("demo");
        let b = generate_slug("demo");
        assert!(a.starts_with("demo-"));
        assert_eq!(a.len(), "demo-".len() + 6);
        assert_ne!(a, b);

        assert!(generate_slug("???").starts_with("workspace-"));
    }

    #[test]
    fn test_request_validation() {
        let draft = request("  demo ").into_new_workspace("user-1").unwrap();
        assert_eq!(draft.name, "demo");
        assert_eq!(draft.status, WorkspaceStatus::Stopped);
        assert!(draft.container_ref.is_none());
        assert!(draft.container_name().starts_with("code-demo-"));

        assert!(request("").into_new_workspace("user-1").is_err());
        assert!(request("demo").into_new_workspace(" ").is_err());
        assert!(request(&"x".repeat(101)).into_new_workspace("user-1").is_err());

        for bad_user in ["../../x", "/abs/path", "a/b", "a\\b", "..", ".", "nul\0id", "tab\tid"] {
            let err = request("demo").into_new_workspace(bad_user).unwrap_err();
            assert!(
                matches!(err, OrchestratorError::Validation(_)),
                "{bad_user:?} accepted"
            );
        }
        assert_eq!(
            request("demo").into_new_workspace(" alice@example.com ").unwrap().user_id,
            "alice@example.com"
        );

        let mut bad_project = request("demo");
        bad_project.project_id = 0;
        assert!(bad_project.into_new_workspace("user-1").is_err());
    }

    #[test]
    fn test_status_wire_format() {
        assert_eq!(
            serde_json::to_string(&WorkspaceStatus::Running).unwrap(),
            "\"RUNNING\""
        );
        assert_eq!("stopped".parse::<WorkspaceStatus>().unwrap(), WorkspaceStatus::Stopped);
        assert!("paused".parse::<WorkspaceStatus>().is_err());
    }

    #[test]
    fn test_running_without_container_violates_invariant() {
        let now = Utc::now();
        let mut ws = Workspace {
            id: 1,
            name: "demo".into(),
            slug: "demo-abc123".into(),
            user_id: "u".into(),
            project_id: 1,
            tech: "react".into(),
            status: WorkspaceStatus::Running,
            container_ref: Some(String::new()),
            connection_uri: Some("http://localhost:10001".into()),
            host_port: Some(10001),
            created_at: now,
            updated_at: now,
        };
        assert!(ws.check_invariants().is_err());

        ws.container_ref = Some("abc".into());
        assert!(ws.check_invariants().is_ok());
    }
}
