use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::handlers::validate_required;
use crate::models::{Conclusion, ContainerStatus, Deployment, DeploymentStatus, FailureKind, Trigger};
use crate::services::{CreateDeployment, DeploymentService};
use crate::state::AppState;

// ============ Request/Response DTOs ============

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateDeploymentRequest {
    pub branch: String,
    pub commit_sha: String,
    pub commit_message: Option<String>,
    /// Defaults to `api`
    pub trigger: Option<Trigger>,
    /// Deploy to this environment instead of matching the branch
    pub environment_id: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DeploymentResponse {
    pub id: Uuid,
    pub project_id: Uuid,
    pub environment_id: String,
    pub branch: String,
    pub commit_sha: String,
    pub commit_message: Option<String>,
    pub trigger: Trigger,
    pub status: DeploymentStatus,
    pub conclusion: Option<Conclusion>,
    pub failure_kind: Option<FailureKind>,
    pub failure_reason: Option<String>,
    pub container_status: Option<ContainerStatus>,
    pub image: String,
    pub env_keys: Vec<String>,
    #[schema(value_type = String)]
    pub created_at: time::OffsetDateTime,
    #[schema(value_type = Option<String>)]
    pub started_at: Option<time::OffsetDateTime>,
    #[schema(value_type = Option<String>)]
    pub concluded_at: Option<time::OffsetDateTime>,
}

impl From<Deployment> for DeploymentResponse {
    fn from(d: Deployment) -> Self {
        // Values may be secrets; only the keys leave the engine
        let env_keys = d.env_vars.keys().cloned().collect();
        Self {
            id: d.id,
            project_id: d.project_id,
            environment_id: d.environment_id,
            branch: d.branch,
            commit_sha: d.commit_sha,
            commit_message: d.commit_message,
            trigger: d.trigger,
            status: d.status,
            conclusion: d.conclusion,
            failure_kind: d.failure_kind,
            failure_reason: d.failure_reason,
            container_status: d.container_status,
            image: d.config.image,
            env_keys,
            created_at: d.created_at,
            started_at: d.started_at,
            concluded_at: d.concluded_at,
        }
    }
}

// ============ Handlers ============

/// Create a deployment and enqueue its start
#[utoipa::path(
    post,
    path = "/api/projects/{project_id}/deployments",
    params(
        ("project_id" = Uuid, Path, description = "Project ID")
    ),
    request_body = CreateDeploymentRequest,
    responses(
        (status = 201, description = "Deployment created", body = DeploymentResponse),
        (status = 400, description = "Validation error"),
        (status = 404, description = "Project not found")
    ),
    tag = "Deployments"
)]
pub async fn create_deployment(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
    Json(payload): Json<CreateDeploymentRequest>,
) -> AppResult<(StatusCode, Json<DeploymentResponse>)> {
    validate_required(&payload.branch, "Branch", 255)?;
    validate_required(&payload.commit_sha, "Commit SHA", 64)?;

    let deployment = DeploymentService::create(
        &state,
        CreateDeployment {
            project_id,
            branch: payload.branch.trim().to_string(),
            commit_sha: payload.commit_sha.trim().to_string(),
            commit_message: payload.commit_message,
            trigger: payload.trigger.unwrap_or(Trigger::Api),
            environment_id: payload.environment_id,
        },
    )
    .await?;

    Ok((StatusCode::CREATED, Json(deployment.into())))
}

/// Get a deployment by ID
#[utoipa::path(
    get,
    path = "/api/deployments/{id}",
    params(
        ("id" = Uuid, Path, description = "Deployment ID")
    ),
    responses(
        (status = 200, description = "Deployment found", body = DeploymentResponse),
        (status = 404, description = "Deployment not found")
    ),
    tag = "Deployments"
)]
pub async fn get_deployment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<DeploymentResponse>> {
    let deployment = state
        .store
        .find_deployment(id)
        .await?
        .ok_or_else(|| AppError::NotFound("Deployment".to_string()))?;

    Ok(Json(deployment.into()))
}
