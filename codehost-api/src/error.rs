use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use codehost_orchestrator::{ErrorKind, OrchestratorError};
use serde_json::json;
use tracing::error;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug)]
pub enum ApiError {
    Orchestrator(OrchestratorError),
    Forbidden(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::Orchestrator(err) => match err.kind() {
                ErrorKind::Validation => StatusCode::BAD_REQUEST,
                ErrorKind::NotFound => StatusCode::NOT_FOUND,
                ErrorKind::Conflict => StatusCode::CONFLICT,
                ErrorKind::PortExhausted | ErrorKind::RuntimeUnavailable => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
                ErrorKind::RuntimeNotFound => StatusCode::BAD_GATEWAY,
                ErrorKind::Store => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::Forbidden(_) => "forbidden",
            ApiError::Orchestrator(err) => err.kind().as_str(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let kind = self.kind();
        let message = match self {
            ApiError::Forbidden(msg) => msg,
            ApiError::Orchestrator(err) => err.to_string(),
        };

        if status.is_server_error() {
            error!(%status, kind, error = %message, "request failed");
        }

        (status, Json(json!({ "error": message, "kind": kind }))).into_response()
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        ApiError::Orchestrator(err)
    }
}
