//! Persistence boundary for workspaces and their usage history.
//!
//! The orchestrator only talks to storage through [`WorkspaceStore`]; the
//! production implementation is [`SqliteStore`](crate::sqlite::SqliteStore).
//! Each method is a single atomic write or read.

use async_trait::async_trait;

use crate::error::Result;
use crate::history::{HistorySession, PageRequest};
use crate::workspace::{NewWorkspace, StatusUpdate, Workspace, WorkspaceFilters};

#[async_trait]
pub trait WorkspaceStore: Send + Sync {
    async fn find_workspace(&self, id: i64) -> Result<Option<Workspace>>;

    async fn find_workspace_by_name(&self, project_id: i64, name: &str)
        -> Result<Option<Workspace>>;

    async fn find_running_workspace_for_user(&self, user_id: &str) -> Result<Option<Workspace>>;

    /// Insert a row. Duplicate names within a project, duplicate slugs and a
    /// second RUNNING row for the same user fail with `Conflict`.
    async fn insert_workspace(&self, new: &NewWorkspace) -> Result<Workspace>;

    /// Replace the runtime attributes of a workspace.
    async fn update_workspace_status(&self, id: i64, update: &StatusUpdate) -> Result<Workspace>;

    async fn rename_workspace(&self, id: i64, name: &str) -> Result<Workspace>;

    /// Delete a workspace together with its history.
    async fn delete_workspace(&self, id: i64) -> Result<()>;

    /// Open a session, or return the one already open for this workspace.
    async fn open_history_session(&self, user_id: &str, workspace_id: i64)
        -> Result<HistorySession>;

    /// Close the open session on this workspace, if any, on behalf of `user_id`.
    async fn close_history_session(
        &self,
        user_id: &str,
        workspace_id: i64,
    ) -> Result<Option<HistorySession>>;

    async fn list_workspaces(&self, filters: &WorkspaceFilters) -> Result<Vec<Workspace>>;

    /// Workspaces that have a container reference, for reconciliation.
    async fn list_workspaces_with_containers(&self) -> Result<Vec<Workspace>>;

    /// Sessions of a workspace, newest first.
    async fn list_history(&self, workspace_id: i64, page: PageRequest)
        -> Result<Vec<HistorySession>>;

    async fn count_history(&self, workspace_id: i64) -> Result<u64>;

    async fn ping(&self) -> Result<()>;
}
