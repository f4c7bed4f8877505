use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use codehost_ports::{PortAllocator, PortRange};
use codehost_runtime::MockRuntime;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tempfile::TempDir;

use crate::config::OrchestratorConfig;
use crate::orchestrator::WorkspaceOrchestrator;
use crate::sqlite::SqliteStore;
use crate::workspace::CreateWorkspaceRequest;

/// Helper to create an in-memory test database with migrations applied
pub async fn create_test_db() -> SqlitePool {
    // A single connection: every pooled connection would otherwise open its
    // own private in-memory database.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory database");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    pool
}

/// Configuration pointing at a temporary workspace root and loopback probing.
pub fn test_config(workspace_root: &std::path::Path) -> OrchestratorConfig {
    OrchestratorConfig {
        port_range: PortRange::new(20000, 29999).expect("valid test port range"),
        probe_host: IpAddr::V4(Ipv4Addr::LOCALHOST),
        workspace_root: workspace_root.to_path_buf(),
        ..OrchestratorConfig::default()
    }
}

/// Orchestrator wired to an in-memory store and the mock engine.
pub struct TestHarness {
    pub orchestrator: WorkspaceOrchestrator,
    pub runtime: Arc<MockRuntime>,
    pub pool: SqlitePool,
    pub workspace_root: TempDir,
}

impl TestHarness {
    pub async fn new() -> Self {
        let workspace_root = tempfile::tempdir().expect("Failed to create workspace root");
        Self::with_config(test_config(workspace_root.path()), workspace_root).await
    }

    pub async fn with_config(config: OrchestratorConfig, workspace_root: TempDir) -> Self {
        let ports = PortAllocator::new(config.port_range, config.probe_host);
        Self::with_allocator(config, ports, workspace_root).await
    }

    /// Harness whose port probing goes through `ports`.
    pub async fn with_allocator(
        config: OrchestratorConfig,
        ports: PortAllocator,
        workspace_root: TempDir,
    ) -> Self {
        let pool = create_test_db().await;
        let runtime = Arc::new(MockRuntime::new());
        let orchestrator = WorkspaceOrchestrator::with_allocator(
            Arc::new(SqliteStore::new(pool.clone())),
            runtime.clone(),
            ports,
            config,
        );

        Self {
            orchestrator,
            runtime,
            pool,
            workspace_root,
        }
    }
}

pub fn create_request(name: &str, project_id: i64) -> CreateWorkspaceRequest {
    CreateWorkspaceRequest {
        name: name.to_string(),
        project_id,
        tech: "react".to_string(),
    }
}
