use codehost_ports::PortError;
use codehost_runtime::RuntimeError;
use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Workspace not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("No free host port between {seed} and {ceiling}")]
    PortExhausted { seed: u16, ceiling: u16 },

    #[error("Container engine unavailable: {0}")]
    RuntimeUnavailable(String),

    #[error("Container missing from engine: {0}")]
    RuntimeNotFound(String),

    #[error("Database error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Stable, serializable classification of an [`OrchestratorError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    PortExhausted,
    RuntimeUnavailable,
    RuntimeNotFound,
    Store,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::PortExhausted => "port_exhausted",
            Self::RuntimeUnavailable => "runtime_unavailable",
            Self::RuntimeNotFound => "runtime_not_found",
            Self::Store => "store",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl OrchestratorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::PortExhausted { .. } => ErrorKind::PortExhausted,
            Self::RuntimeUnavailable(_) => ErrorKind::RuntimeUnavailable,
            Self::RuntimeNotFound(_) => ErrorKind::RuntimeNotFound,
            Self::Store(_) | Self::Migration(_) | Self::Io(_) => ErrorKind::Store,
        }
    }
}

impl From<RuntimeError> for OrchestratorError {
    fn from(err: RuntimeError) -> Self {
        match err {
            RuntimeError::NotFound(msg) => Self::RuntimeNotFound(msg),
            RuntimeError::Unavailable(msg) | RuntimeError::CommandFailed(msg) => {
                Self::RuntimeUnavailable(msg)
            }
            RuntimeError::NameConflict(msg) => {
                Self::Conflict(format!("container name already in use: {msg}"))
            }
            RuntimeError::PortConflict(msg) => {
                Self::Conflict(format!("host port already bound: {msg}"))
            }
        }
    }
}

impl From<PortError> for OrchestratorError {
    fn from(err: PortError) -> Self {
        match err {
            PortError::Exhausted { seed, ceiling } => Self::PortExhausted { seed, ceiling },
            PortError::InvalidRange(msg) => Self::Validation(msg),
        }
    }
}
