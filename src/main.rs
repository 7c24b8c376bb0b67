use anyhow::Context;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use dockyard::config::Config;
use dockyard::handlers::{
    AliasResponse, CreateDeploymentRequest, DeploymentResponse, JobListResponse,
    JobStatusResponse, QueueStatsResponse, ReactivateResponse, RoutingResponse,
};
use dockyard::models::{
    AliasKind, Conclusion, ContainerStatus, DeploymentStatus, FailureKind, Trigger,
};
use dockyard::state::AppState;
use dockyard::{build_router, handlers, init_tracing, shutdown_signal};

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::deployment::create_deployment,
        handlers::deployment::get_deployment,
        handlers::alias::rollback_alias,
        handlers::routing::preview_routing,
        handlers::routing::regenerate_routing,
        handlers::project::reactivate_project,
        handlers::job::get_job_status,
        handlers::job::list_dead_jobs,
        handlers::job::requeue_job,
        handlers::job::get_queue_stats,
    ),
    components(schemas(
        CreateDeploymentRequest,
        DeploymentResponse,
        AliasResponse,
        RoutingResponse,
        ReactivateResponse,
        JobStatusResponse,
        JobListResponse,
        QueueStatsResponse,
        DeploymentStatus,
        Conclusion,
        FailureKind,
        ContainerStatus,
        Trigger,
        AliasKind,
    )),
    tags(
        (name = "Deployments", description = "Deployment intake and status"),
        (name = "Aliases", description = "Alias rollback"),
        (name = "Routing", description = "Routing preview and regeneration"),
        (name = "Projects", description = "Project lifecycle"),
        (name = "Jobs", description = "Job queue management endpoints")
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;
    let addr = config.server_addr();

    // Initialize application state (connects to PostgreSQL, Redis and the engine)
    tracing::info!("Connecting to backing services...");
    let state = AppState::new(config)
        .await
        .context("Failed to initialize application state")?;
    tracing::info!("Connections established");

    // Build the main application router
    let app = build_router(state)
        // Add Swagger UI
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    tracing::info!("Server started on http://{}", addr);
    tracing::info!("Swagger UI: http://{}/swagger-ui/", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    Ok(())
}
