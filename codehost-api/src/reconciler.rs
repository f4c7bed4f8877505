use codehost_orchestrator::{ReconcileReport, WorkspaceOrchestrator};
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info};

/// Periodically converge stored workspace state with the engine.
pub async fn start_reconciler_task(orchestrator: WorkspaceOrchestrator, interval_secs: u64) {
    let mut interval = interval(Duration::from_secs(interval_secs.max(1)));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(
        "Reconciler task running (checks every {} seconds)",
        interval_secs
    );

    loop {
        interval.tick().await;

        if let Err(e) = run_reconcile_pass(&orchestrator).await {
            error!("Reconcile pass failed: {}", e);
        }
    }
}

pub async fn run_reconcile_pass(
    orchestrator: &WorkspaceOrchestrator,
) -> anyhow::Result<ReconcileReport> {
    let report = orchestrator.reconcile_all().await?;

    if report.failed > 0 {
        error!(
            checked = report.checked,
            failed = report.failed,
            "some workspaces could not be reconciled"
        );
    } else {
        debug!(checked = report.checked, "reconcile pass complete");
    }

    Ok(report)
}
