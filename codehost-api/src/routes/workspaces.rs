use crate::{
    auth::{check_workspace_owner, AuthenticatedUser},
    error::ApiResult,
    state::AppState,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Extension, Json, Router,
};
use codehost_orchestrator::{
    CreateWorkspaceRequest, Workspace, WorkspaceConnection, WorkspaceFilters, WorkspaceStatus,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/api/v1/workspaces",
            get(list_workspaces).post(create_workspace),
        )
        .route(
            "/api/v1/workspaces/{id}",
            get(get_workspace)
                .patch(rename_workspace)
                .delete(delete_workspace),
        )
        .route("/api/v1/workspaces/{id}/start", post(start_workspace))
        .route("/api/v1/workspaces/{id}/stop", post(stop_workspace))
        .route("/api/v1/workspaces/{id}/restart", post(restart_workspace))
}

fn default_start() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateWorkspaceBody {
    pub name: String,
    pub project_id: i64,
    pub tech: String,
    /// Bring the container up right away. A workspace created with
    /// `start = false` is only recorded.
    #[serde(default = "default_start")]
    pub start: bool,
}

impl From<CreateWorkspaceBody> for CreateWorkspaceRequest {
    fn from(body: CreateWorkspaceBody) -> Self {
        CreateWorkspaceRequest {
            name: body.name,
            project_id: body.project_id,
            tech: body.tech,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RenameWorkspaceBody {
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListWorkspacesQuery {
    pub project_id: Option<i64>,
    pub status: Option<WorkspaceStatus>,
}

#[utoipa::path(
    post,
    path = "/api/v1/workspaces",
    request_body = CreateWorkspaceBody,
    responses(
        (status = 201, description = "Workspace created", body = Workspace),
        (status = 400, description = "Invalid request"),
        (status = 409, description = "Duplicate name or another workspace already running"),
        (status = 503, description = "Engine unavailable or no free port")
    ),
    tag = "workspaces"
)]
pub async fn create_workspace(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(body): Json<CreateWorkspaceBody>,
) -> ApiResult<(StatusCode, Json<Workspace>)> {
    let orchestrator = &state.orchestrator;
    let start = body.start;

    let workspace = if start {
        let conn = orchestrator
            .create_workspace(&user.user_id, body.into())
            .await?;
        orchestrator.get_workspace(conn.workspace_id).await?
    } else {
        orchestrator
            .provision_workspace(&user.user_id, body.into())
            .await?
    };

    Ok((StatusCode::CREATED, Json(workspace)))
}

#[utoipa::path(
    get,
    path = "/api/v1/workspaces",
    params(ListWorkspacesQuery),
    responses((status = 200, description = "Workspaces owned by the caller", body = Vec<Workspace>)),
    tag = "workspaces"
)]
pub async fn list_workspaces(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(query): Query<ListWorkspacesQuery>,
) -> ApiResult<Json<Vec<Workspace>>> {
    let filters = WorkspaceFilters {
        user_id: Some(user.user_id),
        project_id: query.project_id,
        status: query.status,
    };

    let workspaces = state.orchestrator.list_workspaces(&filters).await?;

    Ok(Json(workspaces))
}

#[utoipa::path(
    get,
    path = "/api/v1/workspaces/{id}",
    params(("id" = i64, Path, description = "Workspace id")),
    responses(
        (status = 200, description = "Workspace", body = Workspace),
        (status = 403, description = "Owned by another user"),
        (status = 404, description = "No such workspace")
    ),
    tag = "workspaces"
)]
pub async fn get_workspace(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Workspace>> {
    let workspace = check_workspace_owner(&state.orchestrator, id, &user).await?;

    Ok(Json(workspace))
}

#[utoipa::path(
    patch,
    path = "/api/v1/workspaces/{id}",
    params(("id" = i64, Path, description = "Workspace id")),
    request_body = RenameWorkspaceBody,
    responses(
        (status = 200, description = "Workspace renamed", body = Workspace),
        (status = 409, description = "Name already used in the project")
    ),
    tag = "workspaces"
)]
pub async fn rename_workspace(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<i64>,
    Json(body): Json<RenameWorkspaceBody>,
) -> ApiResult<Json<Workspace>> {
    check_workspace_owner(&state.orchestrator, id, &user).await?;

    let workspace = state
        .orchestrator
        .rename_workspace(&user.user_id, id, &body.name)
        .await?;

    Ok(Json(workspace))
}

#[utoipa::path(
    delete,
    path = "/api/v1/workspaces/{id}",
    params(("id" = i64, Path, description = "Workspace id")),
    responses(
        (status = 200, description = "Workspace deleted"),
        (status = 409, description = "Workspace is still running")
    ),
    tag = "workspaces"
)]
pub async fn delete_workspace(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<i64>,
) -> ApiResult<Json<serde_json::Value>> {
    check_workspace_owner(&state.orchestrator, id, &user).await?;

    state.orchestrator.delete_workspace(&user.user_id, id).await?;

    Ok(Json(serde_json::json!({ "message": "Workspace deleted" })))
}

#[utoipa::path(
    post,
    path = "/api/v1/workspaces/{id}/start",
    params(("id" = i64, Path, description = "Workspace id")),
    responses(
        (status = 200, description = "Workspace running", body = WorkspaceConnection),
        (status = 409, description = "Another workspace is already running"),
        (status = 503, description = "Engine unavailable or no free port")
    ),
    tag = "workspaces"
)]
pub async fn start_workspace(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<i64>,
) -> ApiResult<Json<WorkspaceConnection>> {
    check_workspace_owner(&state.orchestrator, id, &user).await?;

    let conn = state.orchestrator.start_workspace(&user.user_id, id).await?;
    Ok(Json(conn))
}

#[utoipa::path(
    post,
    path = "/api/v1/workspaces/{id}/stop",
    params(("id" = i64, Path, description = "Workspace id")),
    responses((status = 200, description = "Workspace stopped", body = WorkspaceConnection)),
    tag = "workspaces"
)]
pub async fn stop_workspace(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<i64>,
) -> ApiResult<Json<WorkspaceConnection>> {
    check_workspace_owner(&state.orchestrator, id, &user).await?;

    let conn = state.orchestrator.stop_workspace(&user.user_id, id).await?;
    Ok(Json(conn))
}

#[utoipa::path(
    post,
    path = "/api/v1/workspaces/{id}/restart",
    params(("id" = i64, Path, description = "Workspace id")),
    responses((status = 200, description = "Workspace restarted", body = WorkspaceConnection)),
    tag = "workspaces"
)]
pub async fn restart_workspace(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<i64>,
) -> ApiResult<Json<WorkspaceConnection>> {
    check_workspace_owner(&state.orchestrator, id, &user).await?;

    let conn = state
        .orchestrator
        .restart_workspace(&user.user_id, id)
        .await?;
    Ok(Json(conn))
}
