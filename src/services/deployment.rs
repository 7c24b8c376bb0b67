use std::time::Duration;

use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{
    ContainerStatus, Deployment, DeploymentStatus, FailureKind, FailureReason, NewDeployment,
    Project, ProjectStatus, StatusTransition, Trigger,
};
use crate::queue::JobKind;
use crate::services::alias::AliasService;
use crate::services::container::build_container_spec;
use crate::services::environment::environment_for_branch;
use crate::services::monitor::{Assessment, Monitor};
use crate::services::publisher::{EventType, StatusEvent};
use crate::services::routing::RoutingService;
use crate::services::start_command::validate_start_command;
use crate::services::{new_job, publish};
use crate::state::AppState;

/// Trigger intake for a new deployment
#[derive(Debug, Clone)]
pub struct CreateDeployment {
    pub project_id: Uuid,
    pub branch: String,
    pub commit_sha: String,
    pub commit_message: Option<String>,
    pub trigger: Trigger,
    /// Skip branch matching and deploy to this environment
    pub environment_id: Option<String>,
}

/// Deployment state machine: create, start, finalize, fail
pub struct DeploymentService;

impl DeploymentService {
    /// Insert a `pending` deployment with a frozen copy of the project's
    /// config and enqueue `deploy_start`
    pub async fn create(state: &AppState, input: CreateDeployment) -> AppResult<Deployment> {
        let project = state
            .store
            .find_project(input.project_id)
            .await?
            .filter(|p| p.status != ProjectStatus::Deleted)
            .ok_or_else(|| AppError::NotFound("Project".to_string()))?;

        let environment = match &input.environment_id {
            Some(id) => project
                .environment_by_id(id)
                .filter(|env| env.is_active())
                .ok_or_else(|| AppError::Validation(format!("Unknown environment: {}", id)))?,
            None => environment_for_branch(&project, &input.branch).ok_or_else(|| {
                AppError::Validation(format!(
                    "No environment matches branch {}",
                    input.branch
                ))
            })?,
        };

        if input.commit_sha.trim().is_empty() {
            return Err(AppError::Validation("Commit SHA is required".to_string()));
        }
        validate_start_command(&project.config.start_command)?;

        let deployment = state
            .store
            .insert_deployment(NewDeployment {
                project_id: project.id,
                environment_id: environment.id.clone(),
                branch: input.branch,
                commit_sha: input.commit_sha,
                commit_message: input.commit_message,
                trigger: input.trigger,
                config: project.config.clone(),
                env_vars: project.env_vars_for(&environment.slug),
            })
            .await?;

        state
            .job_queue
            .enqueue(new_job(
                state,
                JobKind::DeployStart {
                    deployment_id: deployment.id,
                },
            ))
            .await?;

        tracing::info!(
            deployment_id = %deployment.id,
            project_id = %project.id,
            environment_id = %deployment.environment_id,
            branch = %deployment.branch,
            "Deployment created"
        );
        publish(
            state,
            StatusEvent::deployment(EventType::DeploymentCreated, &deployment),
        )
        .await;

        Ok(deployment)
    }

    /// Create (or reuse) and start the runner container, then hand the row
    /// to the Monitor by moving it to `in_progress`.
    ///
    /// Transient engine errors are returned for the queue to retry, except
    /// on the final attempt where the deployment is failed instead.
    pub async fn start(state: &AppState, deployment_id: Uuid, final_attempt: bool) -> AppResult<()> {
        let deployment = Self::load(state, deployment_id).await?;
        if deployment.status != DeploymentStatus::Pending {
            tracing::info!(
                deployment_id = %deployment_id,
                status = %deployment.status,
                "Deployment already started, skipping"
            );
            return Ok(());
        }

        let project = state.store.find_project(deployment.project_id).await?;
        let Some(project) = project.filter(|p| p.is_active()) else {
            return Self::skip(state, deployment_id).await;
        };

        if let Err(e) = validate_start_command(&deployment.config.start_command) {
            let reason = FailureReason::new(FailureKind::Setup, e.to_string());
            return Self::fail(state, deployment_id, reason).await;
        }

        match Self::launch(state, &project, &deployment).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_retryable() && !final_attempt => {
                tracing::warn!(
                    deployment_id = %deployment_id,
                    error = %e,
                    "Container start failed, will retry"
                );
                Err(e)
            }
            Err(e) => {
                let reason = FailureReason::new(FailureKind::Setup, e.to_string());
                Self::fail(state, deployment_id, reason).await
            }
        }
    }

    async fn launch(state: &AppState, project: &Project, deployment: &Deployment) -> AppResult<()> {
        let spec = build_container_spec(&state.config, &project.slug, deployment);

        // Redelivery finds the container created by an earlier attempt
        let container_id = match state.runtime.find_by_deployment(deployment.id).await? {
            Some(existing) => existing.id,
            None => state.runtime.create(&spec).await?,
        };
        state
            .store
            .set_container(deployment.id, &container_id, ContainerStatus::Created)
            .await?;

        state.runtime.start(&container_id).await?;
        state
            .store
            .set_container_status(deployment.id, ContainerStatus::Running)
            .await?;

        let moved = state
            .store
            .transition(
                deployment.id,
                &[DeploymentStatus::Pending],
                StatusTransition::in_progress(),
            )
            .await?;
        if !moved {
            tracing::info!(deployment_id = %deployment.id, "Deployment moved on concurrently");
            return Ok(());
        }

        tracing::info!(
            deployment_id = %deployment.id,
            container_id = %container_id,
            "Container started, monitoring"
        );
        let started = Self::load(state, deployment.id).await?;
        publish(
            state,
            StatusEvent::deployment(EventType::DeploymentStatusUpdate, &started),
        )
        .await;

        Ok(())
    }

    async fn skip(state: &AppState, deployment_id: Uuid) -> AppResult<()> {
        let moved = state
            .store
            .transition(
                deployment_id,
                &[DeploymentStatus::Pending],
                StatusTransition::skipped(),
            )
            .await?;
        if moved {
            tracing::info!(deployment_id = %deployment_id, "Project not active, deployment skipped");
            let skipped = Self::load(state, deployment_id).await?;
            publish(
                state,
                StatusEvent::deployment(EventType::DeploymentStatusUpdate, &skipped),
            )
            .await;
        }
        Ok(())
    }

    /// Promote a ready deployment: conclude it `succeeded`, swap its
    /// aliases, regenerate routing and schedule cleanup of what it replaced.
    pub async fn finalize(state: &AppState, deployment_id: Uuid) -> AppResult<()> {
        let deployment = Self::load(state, deployment_id).await?;

        match deployment.status {
            DeploymentStatus::Completed if deployment.is_succeeded() => {
                // The container may have been retired since the row concluded
                match Monitor::assess(state, &deployment).await? {
                    Assessment::Ready => {}
                    Assessment::NotReady => {
                        return Err(AppError::Runtime(format!(
                            "Container of deployment {} not ready, replay deferred",
                            deployment_id
                        )));
                    }
                    Assessment::Failed(reason) => {
                        tracing::warn!(
                            deployment_id = %deployment_id,
                            reason = %reason.message,
                            "Refusing to promote deployment without a live container"
                        );
                        return Err(AppError::ContainerNotLive {
                            deployment_id,
                            reason: reason.message,
                        });
                    }
                }
                tracing::info!(deployment_id = %deployment_id, "Replaying finalize side effects");
            }
            DeploymentStatus::InProgress => {
                match Monitor::assess(state, &deployment).await? {
                    Assessment::Ready => {}
                    Assessment::NotReady => {
                        // Let the Monitor look again on its next tick
                        state.store.release_handoff(deployment_id).await?;
                        tracing::info!(deployment_id = %deployment_id, "Deployment not ready, hand-off released");
                        return Ok(());
                    }
                    Assessment::Failed(reason) => {
                        return Self::fail(state, deployment_id, reason).await;
                    }
                }

                let moved = state
                    .store
                    .transition(
                        deployment_id,
                        &[DeploymentStatus::InProgress],
                        StatusTransition::succeeded(),
                    )
                    .await?;
                if !moved {
                    let current = Self::load(state, deployment_id).await?;
                    if !current.is_succeeded() {
                        return Err(Self::invalid_transition(&current));
                    }
                }
            }
            _ => return Err(Self::invalid_transition(&deployment)),
        }

        let deployment = Self::load(state, deployment_id).await?;
        let project = state
            .store
            .find_project(deployment.project_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Project".to_string()))?;

        AliasService::swap_all(state, &project, &deployment).await?;
        RoutingService::regenerate_or_schedule(state, project.id).await;

        state
            .job_queue
            .enqueue(
                new_job(
                    state,
                    JobKind::CleanupProject {
                        project_id: project.id,
                    },
                )
                .delayed(state.config.drain_grace),
            )
            .await?;

        tracing::info!(
            deployment_id = %deployment_id,
            project_id = %project.id,
            "Deployment succeeded"
        );
        publish(
            state,
            StatusEvent::deployment(EventType::DeploymentStatusUpdate, &deployment),
        )
        .await;

        Ok(())
    }

    /// Conclude a deployment `failed` and tear down its container. Aliases
    /// are left alone.
    pub async fn fail(state: &AppState, deployment_id: Uuid, reason: FailureReason) -> AppResult<()> {
        let deployment = Self::load(state, deployment_id).await?;
        if deployment.is_terminal() {
            tracing::info!(
                deployment_id = %deployment_id,
                conclusion = ?deployment.conclusion,
                "Deployment already completed, ignoring failure"
            );
            return Ok(());
        }

        let moved = state
            .store
            .transition(
                deployment_id,
                &[DeploymentStatus::InProgress, DeploymentStatus::Pending],
                StatusTransition::failed(reason.clone()),
            )
            .await?;
        if !moved {
            tracing::info!(deployment_id = %deployment_id, "Deployment concluded concurrently");
            return Ok(());
        }

        tracing::warn!(
            deployment_id = %deployment_id,
            kind = %reason.kind,
            reason = %reason.message,
            "Deployment failed"
        );

        Self::remove_container(state, &deployment, state.config.stop_grace).await;

        let failed = Self::load(state, deployment_id).await?;
        publish(
            state,
            StatusEvent::deployment(EventType::DeploymentStatusUpdate, &failed)
                .with_message(reason.message),
        )
        .await;

        Ok(())
    }

    /// Stop and remove the deployment's container. Engine errors are only
    /// logged; the orphan sweep removes whatever is left.
    pub(crate) async fn remove_container(state: &AppState, deployment: &Deployment, grace: Duration) {
        let container_id = match &deployment.container_id {
            Some(id) => Some(id.clone()),
            None => match state.runtime.find_by_deployment(deployment.id).await {
                Ok(found) => found.map(|c| c.id),
                Err(e) => {
                    tracing::warn!(deployment_id = %deployment.id, error = %e, "Container lookup failed");
                    return;
                }
            },
        };
        let Some(container_id) = container_id else {
            return;
        };

        if let Err(e) = state.runtime.stop(&container_id, grace).await {
            tracing::warn!(deployment_id = %deployment.id, error = %e, "Container stop failed");
        }
        match state.runtime.remove(&container_id).await {
            Ok(()) => {
                if let Err(e) = state
                    .store
                    .set_container_status(deployment.id, ContainerStatus::Removed)
                    .await
                {
                    tracing::warn!(deployment_id = %deployment.id, error = %e, "Failed to record container removal");
                }
            }
            Err(e) => {
                tracing::warn!(deployment_id = %deployment.id, error = %e, "Container removal failed");
            }
        }
    }

    async fn load(state: &AppState, deployment_id: Uuid) -> AppResult<Deployment> {
        state
            .store
            .find_deployment(deployment_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Deployment".to_string()))
    }

    fn invalid_transition(deployment: &Deployment) -> AppError {
        let status = match deployment.conclusion {
            Some(conclusion) => format!("{}/{}", deployment.status, conclusion),
            None => deployment.status.to_string(),
        };
        AppError::InvalidTransition {
            deployment_id: deployment.id,
            status,
        }
    }
}
