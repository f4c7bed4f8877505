//! Workspace orchestration business logic
//!
//! This crate owns the lifecycle of hosted code-server workspaces: the
//! workspace records, the containers serving them and the host ports they
//! publish. It is consumed by the codehost-api HTTP service but can also be
//! driven by background workers or other entry points.

pub mod config;
pub mod container;
pub mod db;
pub mod error;
pub mod history;
pub mod locks;
pub mod orchestrator;
pub mod reconcile;
pub mod sqlite;
pub mod store;
pub mod workspace;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use config::OrchestratorConfig;
pub use container::{build_container_spec, ContainerSettings, ContainerTarget};
pub use error::{ErrorKind, OrchestratorError, Result};
pub use history::{HistoryPage, HistorySession, PageRequest, Pagination};
pub use orchestrator::WorkspaceOrchestrator;
pub use reconcile::{ReconcileAction, ReconcileReport};
pub use sqlite::SqliteStore;
pub use store::WorkspaceStore;
pub use workspace::{
    CreateWorkspaceRequest, StatusUpdate, Workspace, WorkspaceConnection, WorkspaceFilters,
    WorkspaceStatus,
};
