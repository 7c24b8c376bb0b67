use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::AppResult;
use crate::handlers::DeploymentResponse;
use crate::services::CleanupService;
use crate::state::AppState;

// ============ Response DTOs ============

#[derive(Debug, Serialize, ToSchema)]
pub struct ReactivateResponse {
    pub project_id: Uuid,
    /// Fresh deployments, one per environment alias; empty when the project
    /// was already active
    pub deployments: Vec<DeploymentResponse>,
}

// ============ Handlers ============

/// Wake an inactive project and redeploy its environments
#[utoipa::path(
    post,
    path = "/api/projects/{project_id}/reactivate",
    params(
        ("project_id" = Uuid, Path, description = "Project ID")
    ),
    responses(
        (status = 200, description = "Project reactivated", body = ReactivateResponse),
        (status = 404, description = "Project not found")
    ),
    tag = "Projects"
)]
pub async fn reactivate_project(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
) -> AppResult<Json<ReactivateResponse>> {
    let deployments = CleanupService::reactivate(&state, project_id).await?;

    Ok(Json(ReactivateResponse {
        project_id,
        deployments: deployments.into_iter().map(Into::into).collect(),
    }))
}
