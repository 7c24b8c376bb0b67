use anyhow::Context;
use tokio::sync::watch;
use tokio::time::{interval, Instant, MissedTickBehavior};
use uuid::Uuid;

// Import from the main crate
use dockyard::config::Config;
use dockyard::queue::{Job, JobKind};
use dockyard::services::Monitor;
use dockyard::state::AppState;
use dockyard::{init_tracing, shutdown_signal};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    tracing::info!("Starting dockyard monitor...");

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;

    // Initialize application state
    tracing::info!("Connecting to backing services...");
    let state = AppState::new(config)
        .await
        .context("Failed to initialize application state")?;
    tracing::info!("Connections established");

    // Set up graceful shutdown
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("Shutdown signal received, stopping monitor...");
        let _ = shutdown_tx.send(true);
    });

    let owner = Uuid::new_v4().to_string();
    let lease_ttl = state.config.leader_lease_ttl;
    let cleanup_interval = state.config.cleanup_interval;

    let mut ticker = interval(state.config.monitor_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut leading = false;
    let mut next_sweep = Instant::now();

    tracing::info!(owner = %owner, "Monitor started");
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown_rx.changed() => break,
        }

        match state.lease.acquire_or_renew(&owner, lease_ttl).await {
            Ok(is_leader) => {
                if is_leader != leading {
                    tracing::info!(owner = %owner, leader = is_leader, "Leadership changed");
                    leading = is_leader;
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Leader lease check failed");
                leading = false;
            }
        }
        if !leading {
            continue;
        }

        match Monitor::tick(&state).await {
            Ok(summary) if summary.checked > 0 => {
                tracing::debug!(
                    checked = summary.checked,
                    finalized = summary.finalized,
                    failed = summary.failed,
                    requeued = summary.requeued,
                    "Monitor tick"
                );
            }
            Ok(_) => {}
            Err(e) => tracing::error!(error = %e, "Monitor tick failed"),
        }

        if Instant::now() >= next_sweep {
            let job = Job::new(JobKind::CleanupSweep).with_max_attempts(state.config.job_max_attempts);
            match state.job_queue.enqueue(job).await {
                Ok(job_id) => {
                    tracing::info!(job_id = %job_id, "Cleanup sweep scheduled");
                    next_sweep = Instant::now() + cleanup_interval;
                }
                Err(e) => tracing::error!(error = %e, "Failed to schedule cleanup sweep"),
            }
        }
    }

    if leading {
        if let Err(e) = state.lease.release(&owner).await {
            tracing::warn!(error = %e, "Failed to release leader lease");
        }
    }

    tracing::info!("Monitor shutdown complete");
    Ok(())
}
