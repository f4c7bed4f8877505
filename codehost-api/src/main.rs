use std::sync::Arc;

use anyhow::{Context, Result};
use codehost_api::{create_app, start_reconciler_task, Config};
use codehost_orchestrator::db::{backup_database, create_pool, run_migrations};
use codehost_orchestrator::{SqliteStore, WorkspaceOrchestrator};
use codehost_runtime::{ContainerRuntime, DockerRuntime};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str =
    "codehost_api=debug,codehost_orchestrator=debug,codehost_runtime=info,tower_http=debug";

#[tokio::main]
async fn main() -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting codehost-api service...");

    let config = Config::from_env().context("invalid configuration")?;
    info!(
        "Configuration loaded: bind_addr={}, db_path={}, port_range={}, workspace_root={}",
        config.bind_addr,
        config.db_path.display(),
        config.port_range,
        config.workspace_root.display()
    );

    // Backup before migrations
    let db_path = &config.db_path;
    if let Some(backup_path) = backup_database(db_path)? {
        info!("Database backed up to: {}", backup_path.display());
    }

    let pool = create_pool(db_path).await?;
    info!("Running database migrations...");
    run_migrations(&pool).await?;
    info!("Migrations complete");

    let runtime = Arc::new(DockerRuntime::new(&config.docker_bin));
    if let Err(e) = runtime.ping().await {
        warn!("Container engine not reachable yet: {}", e);
    }

    let orchestrator = WorkspaceOrchestrator::new(
        Arc::new(SqliteStore::new(pool)),
        runtime,
        config.orchestrator_config(),
    );

    tokio::spawn(start_reconciler_task(
        orchestrator.clone(),
        config.reconcile_interval_secs,
    ));
    info!(
        "Reconciler task started (interval: {}s)",
        config.reconcile_interval_secs
    );

    let app = create_app(orchestrator);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    info!("Listening on http://{}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
