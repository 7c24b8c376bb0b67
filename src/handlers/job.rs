use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::handlers::LimitParams;
use crate::queue::Job;
use crate::state::AppState;

// ============ Response DTOs ============

/// Job status response
#[derive(Debug, Serialize, ToSchema)]
pub struct JobStatusResponse {
    pub job_id: Uuid,
    pub job_type: String,
    pub deployment_id: Option<Uuid>,
    pub project_id: Option<Uuid>,
    pub status: String,
    pub attempt: u32,
    pub max_attempts: u32,
    #[schema(value_type = String)]
    pub run_at: time::OffsetDateTime,
    #[schema(value_type = String)]
    pub created_at: time::OffsetDateTime,
    #[schema(value_type = Option<String>)]
    pub started_at: Option<time::OffsetDateTime>,
    #[schema(value_type = Option<String>)]
    pub completed_at: Option<time::OffsetDateTime>,
    pub error_message: Option<String>,
}

impl From<Job> for JobStatusResponse {
    fn from(job: Job) -> Self {
        Self {
            job_id: job.id,
            job_type: job.kind.as_str().to_string(),
            deployment_id: job.kind.deployment_id(),
            project_id: job.kind.project_id(),
            status: job.status.as_str().to_string(),
            attempt: job.attempt,
            max_attempts: job.max_attempts,
            run_at: job.run_at,
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
            error_message: job.error_message,
        }
    }
}

/// Job list response
#[derive(Debug, Serialize, ToSchema)]
pub struct JobListResponse {
    pub data: Vec<JobStatusResponse>,
    pub total: u64,
    pub limit: u64,
}

/// Queue statistics
#[derive(Debug, Serialize, ToSchema)]
pub struct QueueStatsResponse {
    pub pending: u64,
    pub delayed: u64,
    pub processing: u64,
    pub dead: u64,
}

// ============ Handlers ============

/// Get job status by ID
#[utoipa::path(
    get,
    path = "/api/jobs/{job_id}",
    params(
        ("job_id" = Uuid, Path, description = "Job ID")
    ),
    responses(
        (status = 200, description = "Job status", body = JobStatusResponse),
        (status = 404, description = "Job not found")
    ),
    tag = "Jobs"
)]
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> AppResult<Json<JobStatusResponse>> {
    let job = state
        .job_queue
        .get_job(job_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Job".to_string()))?;

    Ok(Json(job.into()))
}

/// List dead jobs, newest first
#[utoipa::path(
    get,
    path = "/api/jobs/dead",
    params(
        LimitParams
    ),
    responses(
        (status = 200, description = "Dead jobs", body = JobListResponse)
    ),
    tag = "Jobs"
)]
pub async fn list_dead_jobs(
    State(state): State<AppState>,
    Query(params): Query<LimitParams>,
) -> AppResult<Json<JobListResponse>> {
    let limit = params.limit();

    let data: Vec<JobStatusResponse> = state
        .job_queue
        .list_dead(limit)
        .await?
        .into_iter()
        .map(Into::into)
        .collect();
    let total = data.len() as u64;

    Ok(Json(JobListResponse { data, total, limit }))
}

/// Requeue a dead or failed job
#[utoipa::path(
    post,
    path = "/api/jobs/{job_id}/requeue",
    params(
        ("job_id" = Uuid, Path, description = "Job ID")
    ),
    responses(
        (status = 200, description = "Job requeued", body = JobStatusResponse),
        (status = 404, description = "Job not found"),
        (status = 400, description = "Only dead or failed jobs can be requeued")
    ),
    tag = "Jobs"
)]
pub async fn requeue_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> AppResult<Json<JobStatusResponse>> {
    state.job_queue.requeue(job_id).await?;

    // Get updated job
    let job = state
        .job_queue
        .get_job(job_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Job".to_string()))?;

    Ok(Json(job.into()))
}

/// Get queue statistics
#[utoipa::path(
    get,
    path = "/api/jobs/stats",
    responses(
        (status = 200, description = "Queue statistics", body = QueueStatsResponse)
    ),
    tag = "Jobs"
)]
pub async fn get_queue_stats(State(state): State<AppState>) -> AppResult<Json<QueueStatsResponse>> {
    let stats = state.job_queue.stats().await?;

    Ok(Json(QueueStatsResponse {
        pending: stats.pending,
        delayed: stats.delayed,
        processing: stats.processing,
        dead: stats.dead,
    }))
}
