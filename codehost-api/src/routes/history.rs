use crate::{
    auth::{check_workspace_owner, AuthenticatedUser},
    error::ApiResult,
    state::AppState,
};
use axum::{
    extract::{Path, Query, State},
    routing::get,
    Extension, Json, Router,
};
use codehost_orchestrator::{HistoryPage, PageRequest};
use serde::Deserialize;
use utoipa::IntoParams;

pub fn routes() -> Router<AppState> {
    Router::new().route("/api/v1/workspaces/{id}/history", get(list_history))
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct HistoryQuery {
    /// 1-based page number, default 1.
    pub page: Option<u32>,
    /// Default 10, at most 100.
    pub page_size: Option<u32>,
}

#[utoipa::path(
    get,
    path = "/api/v1/workspaces/{id}/history",
    params(("id" = i64, Path, description = "Workspace id"), HistoryQuery),
    responses(
        (status = 200, description = "Sessions, newest first", body = HistoryPage),
        (status = 400, description = "Invalid page or page_size")
    ),
    tag = "history"
)]
pub async fn list_history(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<i64>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<HistoryPage>> {
    check_workspace_owner(&state.orchestrator, id, &user).await?;

    let page = PageRequest::new(query.page, query.page_size)?;
    let history = state.orchestrator.list_history(id, page).await?;

    Ok(Json(history))
}
