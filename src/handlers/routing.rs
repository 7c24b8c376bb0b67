use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::routing::RoutingSnapshot;
use crate::services::RoutingService;
use crate::state::AppState;

// ============ Response DTOs ============

#[derive(Debug, Serialize, ToSchema)]
pub struct RoutingResponse {
    pub project_id: Uuid,
    /// Router names, sorted
    pub routers: Vec<String>,
    /// File content as written to the routing directory; empty when the
    /// project has no routes
    pub content: String,
}

impl RoutingResponse {
    fn new(project_id: Uuid, snapshot: &RoutingSnapshot) -> AppResult<Self> {
        let content = if snapshot.is_empty() {
            String::new()
        } else {
            snapshot.render()?
        };
        Ok(Self {
            project_id,
            routers: snapshot.http.routers.keys().cloned().collect(),
            content,
        })
    }
}

// ============ Handlers ============

/// Preview the routing the project would get, without writing it
#[utoipa::path(
    get,
    path = "/api/projects/{project_id}/routing",
    params(
        ("project_id" = Uuid, Path, description = "Project ID")
    ),
    responses(
        (status = 200, description = "Computed routing", body = RoutingResponse),
        (status = 404, description = "Project not found")
    ),
    tag = "Routing"
)]
pub async fn preview_routing(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
) -> AppResult<Json<RoutingResponse>> {
    ensure_project(&state, project_id).await?;
    let snapshot = RoutingService::resolve(&state, project_id).await?;
    Ok(Json(RoutingResponse::new(project_id, &snapshot)?))
}

/// Regenerate and write the project's routing file
#[utoipa::path(
    post,
    path = "/api/projects/{project_id}/routing",
    params(
        ("project_id" = Uuid, Path, description = "Project ID")
    ),
    responses(
        (status = 200, description = "Routing written", body = RoutingResponse),
        (status = 404, description = "Project not found")
    ),
    tag = "Routing"
)]
pub async fn regenerate_routing(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
) -> AppResult<Json<RoutingResponse>> {
    ensure_project(&state, project_id).await?;
    let snapshot = RoutingService::regenerate(&state, project_id).await?;
    Ok(Json(RoutingResponse::new(project_id, &snapshot)?))
}

async fn ensure_project(state: &AppState, project_id: Uuid) -> AppResult<()> {
    state
        .store
        .find_project(project_id)
        .await?
        .map(|_| ())
        .ok_or_else(|| AppError::NotFound("Project".to_string()))
}
