//! Error types for container engine operations.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Errors that can occur while driving the container engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    /// The referenced container does not exist (it may have been pruned).
    #[error("Container not found: {0}")]
    NotFound(String),

    /// The engine daemon could not be reached.
    #[error("Container engine unavailable: {0}")]
    Unavailable(String),

    /// A container with the requested name already exists.
    #[error("Container name already in use: {0}")]
    NameConflict(String),

    /// The requested host port was already bound when the engine tried to publish it.
    #[error("Host port already bound: {0}")]
    PortConflict(String),

    #[error("Engine command failed: {0}")]
    CommandFailed(String),
}

impl RuntimeError {
    /// Classify engine stderr output into an error kind.
    pub fn from_stderr(stderr: &str) -> Self {
        let message = stderr.trim().to_string();
        let lower = message.to_lowercase();

        if lower.contains("no such container") || lower.contains("no such object") {
            Self::NotFound(message)
        } else if lower.contains("cannot connect to the docker daemon")
            || lower.contains("error during connect")
            || lower.contains("is the docker daemon running")
            || lower.contains("permission denied while trying to connect")
        {
            Self::Unavailable(message)
        } else if lower.contains("is already in use by container")
            || lower.contains("conflict. the container name")
        {
            Self::NameConflict(message)
        } else if lower.contains("port is already allocated")
            || lower.contains("address already in use")
        {
            Self::PortConflict(message)
        } else {
            Self::CommandFailed(message)
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
