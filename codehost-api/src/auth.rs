use crate::error::ApiError;
use axum::{extract::Request, http::StatusCode, middleware::Next, response::Response};
use codehost_orchestrator::{Workspace, WorkspaceOrchestrator};

#[derive(Clone, Debug)]
pub struct AuthenticatedUser {
    pub user_id: String,
    pub email: Option<String>,
}

/// Identity headers, most trusted first.
const USER_HEADERS: [&str; 3] = ["x-codehost-user", "x-forwarded-user", "x-user"];
const EMAIL_HEADERS: [&str; 2] = ["x-codehost-email", "x-forwarded-email"];

fn first_header(req: &Request, names: &[&str]) -> Option<String> {
    names
        .iter()
        .find_map(|name| req.headers().get(*name))
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Auth middleware - extracts the user an upstream auth proxy vouched for
///
/// The service never authenticates anyone itself. In production a proxy in
/// front of it sets `x-codehost-user` (or the oauth2-proxy `x-forwarded-user`);
/// `x-user` is accepted for local development.
pub async fn auth_middleware(mut req: Request, next: Next) -> Result<Response, StatusCode> {
    let user_id = first_header(&req, &USER_HEADERS).ok_or(StatusCode::UNAUTHORIZED)?;
    let email = first_header(&req, &EMAIL_HEADERS);

    req.extensions_mut()
        .insert(AuthenticatedUser { user_id, email });

    Ok(next.run(req).await)
}

/// Load a workspace and check the authenticated user owns it
///
/// Returns the workspace on success, otherwise:
/// - ApiError (404) if the workspace doesn't exist
/// - ApiError::Forbidden if the workspace exists but belongs to someone else
pub async fn check_workspace_owner(
    orchestrator: &WorkspaceOrchestrator,
    workspace_id: i64,
    user: &AuthenticatedUser,
) -> Result<Workspace, ApiError> {
    let workspace = orchestrator.get_workspace(workspace_id).await?;

    if workspace.user_id != user.user_id {
        return Err(ApiError::Forbidden(format!(
            "Access denied: workspace {} belongs to another user",
            workspace_id
        )));
    }

    Ok(workspace)
}
