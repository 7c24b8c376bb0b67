use std::time::Duration;

use crate::error::AppResult;
use crate::queue::{Job, JobKind, JobStatus};
use crate::services::cleanup::CleanupService;
use crate::services::deployment::DeploymentService;
use crate::services::routing::RoutingService;
use crate::state::AppState;

/// Job executor that dispatches queued jobs to their handlers
#[derive(Clone)]
pub struct JobExecutor {
    state: AppState,
}

impl JobExecutor {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Run the handler for one job
    pub async fn execute(&self, job: &Job) -> AppResult<()> {
        let state = &self.state;
        match &job.kind {
            JobKind::DeployStart { deployment_id } => {
                DeploymentService::start(state, *deployment_id, job.is_final_attempt()).await
            }
            JobKind::DeployFinalize { deployment_id } => {
                DeploymentService::finalize(state, *deployment_id).await
            }
            JobKind::DeployFail {
                deployment_id,
                reason,
            } => DeploymentService::fail(state, *deployment_id, reason.clone()).await,
            JobKind::CleanupSweep => CleanupService::sweep(state).await.map(|_| ()),
            JobKind::CleanupProject { project_id } => {
                CleanupService::cleanup_project(state, *project_id)
                    .await
                    .map(|_| ())
            }
            JobKind::RoutingRegenerate { project_id } => {
                RoutingService::regenerate(state, *project_id).await.map(|_| ())
            }
            JobKind::ProjectReactivate { project_id } => {
                CleanupService::reactivate(state, *project_id)
                    .await
                    .map(|_| ())
            }
        }
    }

    /// Execute a dequeued job and record the outcome on the queue
    pub async fn process(&self, job: Job) -> AppResult<JobStatus> {
        let job_id = job.id;
        let job_type = job.kind.as_str();
        tracing::info!(
            job_id = %job_id,
            job_type,
            attempt = job.attempt,
            "Processing job"
        );

        match self.execute(&job).await {
            Ok(()) => {
                self.state.job_queue.complete_job(job_id).await?;
                tracing::info!(job_id = %job_id, job_type, "Job completed");
                Ok(JobStatus::Completed)
            }
            Err(e) => {
                let retryable = e.is_retryable();
                tracing::error!(
                    job_id = %job_id,
                    job_type,
                    error = %e,
                    retryable,
                    "Job failed"
                );
                self.state
                    .job_queue
                    .fail_job(job_id, e.to_string(), retryable)
                    .await
            }
        }
    }

    /// Dequeue and process one job, waiting up to `wait`
    pub async fn run_next(&self, wait: Duration) -> AppResult<Option<JobStatus>> {
        match self.state.job_queue.dequeue(wait).await? {
            Some(job) => self.process(job).await.map(Some),
            None => Ok(None),
        }
    }

    /// Process due jobs until the queue has none left. Returns how many ran.
    pub async fn drain(&self) -> AppResult<usize> {
        let mut processed = 0;
        while self.run_next(Duration::ZERO).await?.is_some() {
            processed += 1;
        }
        Ok(processed)
    }
}
