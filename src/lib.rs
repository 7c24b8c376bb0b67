// Library crate for dockyard
// Exports modules for use by the server, worker and monitor binaries and tests

pub mod config;
pub mod entity;
pub mod error;
pub mod handlers;
pub mod models;
pub mod queue;
pub mod repositories;
pub mod routing;
pub mod runtime;
pub mod services;
pub mod state;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::handlers::{
    create_deployment, get_deployment, get_job_status, get_queue_stats, list_dead_jobs,
    preview_routing, reactivate_project, regenerate_routing, requeue_job, rollback_alias,
};
use crate::state::AppState;

/// Build the control API router with the given state. The API is only
/// reachable on the internal network and carries no auth.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        // Deployment routes
        .route(
            "/api/projects/{project_id}/deployments",
            post(create_deployment),
        )
        .route("/api/deployments/{id}", get(get_deployment))
        // Alias routes
        .route("/api/aliases/{key}/rollback", post(rollback_alias))
        // Project routes
        .route(
            "/api/projects/{project_id}/routing",
            get(preview_routing).post(regenerate_routing),
        )
        .route(
            "/api/projects/{project_id}/reactivate",
            post(reactivate_project),
        )
        // Job management routes
        .route("/api/jobs/stats", get(get_queue_stats))
        .route("/api/jobs/dead", get(list_dead_jobs))
        .route("/api/jobs/{job_id}", get(get_job_status))
        .route("/api/jobs/{job_id}/requeue", post(requeue_job))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Install the tracing subscriber for a binary. `RUST_LOG` sets the filter
/// (default `info`); `LOG_FORMAT=json` switches to JSON lines.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    if std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")) {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
