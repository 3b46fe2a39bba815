use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::services::cache::{GenerationalCache, RefreshOutcome};

/// Handle for the background refresh task
pub struct RefreshSchedulerHandle {
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl RefreshSchedulerHandle {
    /// Stops the scheduler and waits for an in-flight refresh to finish
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        tracing::info!("Refresh scheduler shutdown signal sent");
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "Refresh scheduler task panicked");
        }
    }
}

/// Spawns a task that refreshes on startup and then every `interval`
pub fn spawn(cache: Arc<GenerationalCache>, interval: Duration) -> RefreshSchedulerHandle {
    let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
    let task = tokio::spawn(async move {
        refresh_task(cache, interval, shutdown_rx).await;
    });
    RefreshSchedulerHandle { shutdown_tx, task }
}

async fn refresh_task(
    cache: Arc<GenerationalCache>,
    interval: Duration,
    mut shutdown_rx: mpsc::Receiver<()>,
) {
    tracing::info!(interval_secs = interval.as_secs(), "Refresh scheduler started");

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            // First tick fires immediately
            _ = ticker.tick() => {
                match cache.refresh().await {
                    Ok(RefreshOutcome::Completed(report)) => tracing::debug!(
                        generation = report.generation,
                        "Scheduled refresh completed"
                    ),
                    Ok(RefreshOutcome::LeaseHeld) => {
                        tracing::debug!("Scheduled refresh skipped, lease held")
                    }
                    Err(e) => tracing::error!(error = %e, "Scheduled refresh failed"),
                }
            }
            _ = shutdown_rx.recv() => {
                tracing::info!("Refresh scheduler shutting down");
                break;
            }
        }
    }
}
