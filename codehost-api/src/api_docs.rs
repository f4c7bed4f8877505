use crate::routes::workspaces::{CreateWorkspaceBody, RenameWorkspaceBody};
use codehost_orchestrator::{
    HistoryPage, HistorySession, Pagination, Workspace, WorkspaceConnection, WorkspaceStatus,
};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::health::health_check,
        crate::routes::health::readiness_check,
        crate::routes::workspaces::list_workspaces,
        crate::routes::workspaces::create_workspace,
        crate::routes::workspaces::get_workspace,
        crate::routes::workspaces::rename_workspace,
        crate::routes::workspaces::delete_workspace,
        crate::routes::workspaces::start_workspace,
        crate::routes::workspaces::stop_workspace,
        crate::routes::workspaces::restart_workspace,
        crate::routes::history::list_history,
    ),
    components(
        schemas(
            Workspace,
            WorkspaceStatus,
            WorkspaceConnection,
            CreateWorkspaceBody,
            RenameWorkspaceBody,
            HistorySession,
            HistoryPage,
            Pagination
        )
    ),
    tags(
        (name = "codehost-api", description = "Code-server workspace orchestration API")
    )
)]
pub struct ApiDoc;
