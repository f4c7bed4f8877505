//! Convergence of stored workspace state with what the engine reports.

use codehost_runtime::RuntimeError;
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::error::Result;
use crate::orchestrator::{Observed, WorkspaceOrchestrator};
use crate::workspace::{StatusUpdate, Workspace};

/// What a reconcile pass changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub checked: usize,
    /// Rows stored as RUNNING whose container was stopped or gone.
    pub marked_stopped: usize,
    /// Containers left running for rows stored as STOPPED.
    pub orphans_stopped: usize,
    /// References to containers the engine no longer knows, cleared.
    pub refs_cleared: usize,
    pub failed: usize,
}

/// Outcome for a single workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileAction {
    InSync,
    MarkedStopped,
    OrphanStopped,
    RefCleared,
}

impl WorkspaceOrchestrator {
    /// Bring one workspace row in line with its container.
    #[instrument(skip(self))]
    pub async fn reconcile_workspace(&self, id: i64) -> Result<ReconcileAction> {
        let _guard = self.lock_workspace(id).await;
        let ws = self.require(id).await?;
        self.reconcile_locked(&ws).await
    }

    /// Reconcile every workspace that has or claims a container. Failures on
    /// one workspace are logged and do not stop the sweep.
    #[instrument(skip(self))]
    pub async fn reconcile_all(&self) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();

        for ws in self.store().list_workspaces_with_containers().await? {
            report.checked += 1;
            match self.reconcile_workspace(ws.id).await {
                Ok(ReconcileAction::InSync) => {}
                Ok(ReconcileAction::MarkedStopped) => report.marked_stopped += 1,
                Ok(ReconcileAction::OrphanStopped) => report.orphans_stopped += 1,
                Ok(ReconcileAction::RefCleared) => report.refs_cleared += 1,
                Err(e) => {
                    warn!(workspace_id = ws.id, error = %e, "reconcile failed");
                    report.failed += 1;
                }
            }
        }

        let corrected = report.marked_stopped + report.orphans_stopped + report.refs_cleared;
        if corrected > 0 || report.failed > 0 {
            info!(?report, "reconcile pass finished");
        }
        Ok(report)
    }

    async fn reconcile_locked(&self, ws: &Workspace) -> Result<ReconcileAction> {
        let observed = self.observe(ws).await?;

        match (ws.is_running(), observed) {
            (true, Observed::Running { .. }) => Ok(ReconcileAction::InSync),
            (true, observed) => {
                self.mark_stopped(ws, observed.is_missing()).await?;
                Ok(ReconcileAction::MarkedStopped)
            }
            (false, Observed::Running { .. }) => {
                let Some(container_ref) = ws.container() else {
                    return Ok(ReconcileAction::InSync);
                };
                warn!(workspace_id = ws.id, container_ref, "stopping orphaned container");
                match self.runtime().stop(container_ref).await {
                    Ok(()) | Err(RuntimeError::NotFound(_)) => Ok(ReconcileAction::OrphanStopped),
                    Err(e) => Err(e.into()),
                }
            }
            (false, Observed::Missing) if ws.container().is_some() => {
                self.persist(ws, &StatusUpdate::stopped(None, ws.host_port))
                    .await?;
                Ok(ReconcileAction::RefCleared)
            }
            (false, _) => Ok(ReconcileAction::InSync),
        }
    }
}
