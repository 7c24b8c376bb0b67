use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::{watch, Semaphore};

// Import from the main crate
use dockyard::config::Config;
use dockyard::{init_tracing, shutdown_signal};
use dockyard::services::JobExecutor;
use dockyard::state::AppState;

/// How long one dequeue blocks before the loop checks for shutdown
const DEQUEUE_WAIT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    tracing::info!("Starting dockyard worker...");

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;
    let concurrency = config.worker_concurrency.max(1);
    let visibility = config.job_visibility_timeout;

    // Initialize application state
    tracing::info!("Connecting to backing services...");
    let state = AppState::new(config)
        .await
        .context("Failed to initialize application state")?;
    tracing::info!("Connections established");

    // Set up graceful shutdown
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    // Spawn shutdown signal handler
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("Shutdown signal received, stopping worker...");
        let _ = shutdown_tx.send(true);
    });

    let executor = JobExecutor::new(state.clone());
    let permits = Arc::new(Semaphore::new(concurrency));

    // Periodically hand out jobs a crashed worker left in processing
    let recovery_state = state.clone();
    let mut recovery_shutdown = shutdown_rx.clone();
    let recovery = tokio::spawn(async move {
        let mut ticker = tokio::time::interval((visibility / 2).max(Duration::from_secs(1)));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match recovery_state.job_queue.recover_stalled(visibility).await {
                        Ok(0) => {}
                        Ok(n) => tracing::warn!(recovered = n, "Recovered stalled jobs"),
                        Err(e) => tracing::error!(error = %e, "Stalled job recovery failed"),
                    }
                }
                _ = recovery_shutdown.changed() => break,
            }
        }
    });

    // Worker loop
    tracing::info!(concurrency, "Worker started, waiting for jobs...");
    loop {
        // Check for shutdown
        if *shutdown_rx.borrow() {
            tracing::info!("Shutdown requested, exiting worker loop");
            break;
        }

        let permit = tokio::select! {
            permit = permits.clone().acquire_owned() => permit.context("Worker semaphore closed")?,
            _ = shutdown_rx.changed() => continue,
        };

        // Try to dequeue a job (blocks up to DEQUEUE_WAIT)
        match state.job_queue.dequeue(DEQUEUE_WAIT).await {
            Ok(Some(job)) => {
                let executor = executor.clone();
                tokio::spawn(async move {
                    let job_id = job.id;
                    if let Err(e) = executor.process(job).await {
                        tracing::error!(job_id = %job_id, error = %e, "Failed to record job outcome");
                    }
                    drop(permit);
                });
            }
            Ok(None) => {
                // No job available, continue loop (dequeue already waited)
            }
            Err(e) => {
                tracing::error!(error = %e, "Error dequeuing job");
                // Brief sleep on error to prevent tight loop
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }

    // Let in-flight jobs finish
    let _ = permits.acquire_many(concurrency as u32).await;
    recovery.abort();

    tracing::info!("Worker shutdown complete");
    Ok(())
}
