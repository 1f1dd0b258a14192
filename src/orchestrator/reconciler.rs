use std::sync::Arc;

use tokio::time::interval;
use tracing::{error, info};

use super::Orchestrator;

/// Periodic registry/runtime alignment. Single-flight: a tick that fires
/// while the previous run is still going is skipped, not queued.
pub(super) fn spawn_reconciler(orchestrator: Arc<Orchestrator>) {
    tokio::spawn(async move {
        let mut shutdown = orchestrator.shutdown_signal();
        let mut ticker = interval(orchestrator.config.reconcile_interval);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => {
                    info!("Reconciler stopped by shutdown");
                    return;
                }
            }

            match orchestrator.reconcile().await {
                Ok(true) => {}
                Ok(false) => info!("Reconciliation already in progress, skipping tick"),
                Err(e) => error!("Reconciliation failed: {}", e),
            }
        }
    });
}
