use std::collections::HashSet;

use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{
    AliasKind, ContainerStatus, Deployment, DeploymentStatus, DomainStatus, FailureKind,
    FailureReason, Project, ProjectStatus, Trigger,
};
use crate::runtime::ContainerInfo;
use crate::services::deployment::{CreateDeployment, DeploymentService};
use crate::services::publisher::{EventType, StatusEvent};
use crate::services::publish;
use crate::services::routing::RoutingService;
use crate::state::AppState;

/// Counters from one cleanup sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Containers of superseded deployments stopped and removed
    pub retired: usize,
    pub deactivated: usize,
    pub orphans_removed: usize,
    /// Deleted projects whose rows were purged
    pub purged: usize,
    pub routing_regenerated: usize,
    /// Pending deployments failed because they never started
    pub stale_failed: usize,
    /// Projects or passes skipped after an error
    pub failed: usize,
}

/// Retires superseded containers, deactivates idle projects, purges deleted
/// ones, fails deployments that never started and removes orphaned
/// containers
pub struct CleanupService;

impl CleanupService {
    /// Full pass over every project, then the orphan check. One project's
    /// error is logged and counted; the rest of the sweep carries on.
    pub async fn sweep(state: &AppState) -> AppResult<SweepReport> {
        let mut report = SweepReport::default();
        let now = OffsetDateTime::now_utc();

        match Self::fail_stale_pending(state, now).await {
            Ok(failed) => report.stale_failed = failed,
            Err(e) => {
                tracing::error!(error = %e, "Stale pending check failed");
                report.failed += 1;
            }
        }

        for project in state.store.list_projects().await? {
            if let Err(e) = Self::sweep_project(state, &project, now, &mut report).await {
                tracing::error!(project_id = %project.id, error = %e, "Project cleanup failed");
                report.failed += 1;
            }
        }

        match Self::remove_orphans(state).await {
            Ok(removed) => report.orphans_removed = removed,
            Err(e) => {
                tracing::error!(error = %e, "Orphan check failed");
                report.failed += 1;
            }
        }

        tracing::info!(
            retired = report.retired,
            deactivated = report.deactivated,
            orphans_removed = report.orphans_removed,
            purged = report.purged,
            routing_regenerated = report.routing_regenerated,
            stale_failed = report.stale_failed,
            failed = report.failed,
            "Cleanup sweep finished"
        );
        Ok(report)
    }

    async fn sweep_project(
        state: &AppState,
        project: &Project,
        now: OffsetDateTime,
        report: &mut SweepReport,
    ) -> AppResult<()> {
        match project.status {
            ProjectStatus::Deleted => {
                Self::purge(state, project).await?;
                report.purged += 1;
            }
            ProjectStatus::Active if Self::is_idle(state, project, now) => {
                Self::deactivate(state, project).await?;
                report.deactivated += 1;
            }
            ProjectStatus::Active | ProjectStatus::Inactive => {
                if project.is_active() {
                    report.retired += Self::retire_superseded(state, project.id).await?;
                }
                RoutingService::regenerate_or_schedule(state, project.id).await;
                report.routing_regenerated += 1;
            }
        }
        Ok(())
    }

    /// Fail `pending` deployments whose start job is long gone, for example
    /// dead-lettered after a worker stalled on its last attempt
    async fn fail_stale_pending(state: &AppState, now: OffsetDateTime) -> AppResult<usize> {
        let mut failed = 0;
        for deployment in state
            .store
            .list_deployments_by_status(DeploymentStatus::Pending)
            .await?
        {
            if now - deployment.created_at < state.config.start_timeout {
                continue;
            }

            let reason = FailureReason::new(
                FailureKind::Setup,
                format!(
                    "Deployment did not start within {}s",
                    state.config.start_timeout.as_secs()
                ),
            );
            match DeploymentService::fail(state, deployment.id, reason).await {
                Ok(()) => failed += 1,
                Err(e) => {
                    tracing::warn!(deployment_id = %deployment.id, error = %e, "Failed to conclude stale deployment");
                }
            }
        }
        Ok(failed)
    }

    /// Post-finalize cleanup for one project
    pub async fn cleanup_project(state: &AppState, project_id: Uuid) -> AppResult<usize> {
        Self::retire_superseded(state, project_id).await
    }

    fn is_idle(state: &AppState, project: &Project, now: OffsetDateTime) -> bool {
        let last_seen = project.last_traffic_at.unwrap_or(project.created_at);
        now - last_seen > state.config.inactivity_window
    }

    /// Stop and remove containers of concluded deployments no alias
    /// references. Waits until the latest swap has drained, and leaves
    /// alone succeeded deployments whose own swap has not happened yet.
    async fn retire_superseded(state: &AppState, project_id: Uuid) -> AppResult<usize> {
        let aliases = state.store.list_aliases_by_project(project_id).await?;

        let now = OffsetDateTime::now_utc();
        let last_swap = aliases.iter().map(|a| a.updated_at).max();
        if let Some(last_swap) = last_swap {
            if now - last_swap < state.config.drain_grace {
                tracing::debug!(project_id = %project_id, "Latest swap still draining");
                return Ok(0);
            }
        }

        let mut keep: HashSet<Uuid> = aliases.iter().map(|a| a.deployment_id).collect();
        if state.config.retain_previous {
            keep.extend(aliases.iter().filter_map(|a| a.previous_deployment_id));
        }

        let mut retired = 0;
        for deployment in state.store.list_deployments_by_project(project_id).await? {
            if !deployment.is_terminal()
                || keep.contains(&deployment.id)
                || deployment.container_status == Some(ContainerStatus::Removed)
                || deployment.container_id.is_none()
            {
                continue;
            }
            if Self::awaiting_promotion(state, &deployment, last_swap, now) {
                tracing::debug!(
                    deployment_id = %deployment.id,
                    "Succeeded deployment not yet promoted, keeping container"
                );
                continue;
            }

            DeploymentService::remove_container(state, &deployment, state.config.stop_grace)
                .await;
            tracing::info!(
                deployment_id = %deployment.id,
                project_id = %project_id,
                "Superseded container retired"
            );
            retired += 1;
        }

        Ok(retired)
    }

    /// A succeeded deployment concluded after the latest swap may still be
    /// waiting for its own finalize to move the aliases
    fn awaiting_promotion(
        state: &AppState,
        deployment: &Deployment,
        last_swap: Option<OffsetDateTime>,
        now: OffsetDateTime,
    ) -> bool {
        if !deployment.is_succeeded() {
            return false;
        }
        let Some(concluded_at) = deployment.concluded_at else {
            return false;
        };
        last_swap.map_or(true, |swap| concluded_at > swap)
            || now - concluded_at < state.config.drain_grace
    }

    /// Put an idle project to sleep: domains disabled, live containers
    /// stopped but kept, routing file removed
    async fn deactivate(state: &AppState, project: &Project) -> AppResult<()> {
        state
            .store
            .set_project_status(project.id, ProjectStatus::Inactive)
            .await?;
        state
            .store
            .set_domain_status(project.id, DomainStatus::Active, DomainStatus::Disabled)
            .await?;

        for deployment in state.store.list_deployments_by_project(project.id).await? {
            if !Self::has_live_container(&deployment) {
                continue;
            }
            let Some(container_id) = &deployment.container_id else {
                continue;
            };
            match state.runtime.stop(container_id, state.config.stop_grace).await {
                Ok(()) => {
                    state
                        .store
                        .set_container_status(deployment.id, ContainerStatus::Stopped)
                        .await?;
                }
                Err(e) => {
                    tracing::warn!(deployment_id = %deployment.id, error = %e, "Container stop failed");
                }
            }
        }

        state.routing.remove(project.id).await?;

        tracing::info!(project_id = %project.id, "Project deactivated after inactivity");
        publish(
            state,
            StatusEvent::project(EventType::ProjectDeactivated, project.id),
        )
        .await;

        Ok(())
    }

    fn has_live_container(deployment: &Deployment) -> bool {
        deployment.is_succeeded()
            && matches!(
                deployment.container_status,
                Some(ContainerStatus::Created | ContainerStatus::Running)
            )
    }

    /// Wake a project: re-enable domains and redeploy the current commit of
    /// every environment alias. Reactivating an active project does nothing.
    pub async fn reactivate(state: &AppState, project_id: Uuid) -> AppResult<Vec<Deployment>> {
        let project = state
            .store
            .find_project(project_id)
            .await?
            .filter(|p| p.status != ProjectStatus::Deleted)
            .ok_or_else(|| AppError::NotFound("Project".to_string()))?;

        if project.is_active() {
            tracing::info!(project_id = %project_id, "Project already active");
            return Ok(Vec::new());
        }

        let now = OffsetDateTime::now_utc();
        state
            .store
            .set_project_status(project_id, ProjectStatus::Active)
            .await?;
        state
            .store
            .set_domain_status(project_id, DomainStatus::Disabled, DomainStatus::Active)
            .await?;
        state.store.record_traffic(project_id, now).await?;

        let mut created = Vec::new();
        for alias in state.store.list_aliases_by_project(project_id).await? {
            if alias.kind != AliasKind::Environment {
                continue;
            }
            let Some(current) = state.store.find_deployment(alias.deployment_id).await? else {
                continue;
            };

            let deployment = DeploymentService::create(
                state,
                CreateDeployment {
                    project_id,
                    branch: current.branch.clone(),
                    commit_sha: current.commit_sha.clone(),
                    commit_message: current.commit_message.clone(),
                    trigger: Trigger::Reactivation,
                    environment_id: Some(current.environment_id.clone()),
                },
            )
            .await?;
            created.push(deployment);
        }

        tracing::info!(
            project_id = %project_id,
            deployments = created.len(),
            "Project reactivated"
        );
        publish(
            state,
            StatusEvent::project(EventType::ProjectReactivated, project_id),
        )
        .await;

        Ok(created)
    }

    /// Remove everything a deleted project left behind
    async fn purge(state: &AppState, project: &Project) -> AppResult<()> {
        for deployment in state.store.list_deployments_by_project(project.id).await? {
            if deployment.container_status != Some(ContainerStatus::Removed) {
                DeploymentService::remove_container(state, &deployment, state.config.stop_grace)
                    .await;
            }
        }

        state.store.delete_aliases_by_project(project.id).await?;
        state.store.delete_domains_by_project(project.id).await?;
        state.store.delete_deployments_by_project(project.id).await?;
        state.store.delete_project(project.id).await?;
        state.routing.remove(project.id).await?;

        tracing::info!(project_id = %project.id, "Deleted project purged");
        Ok(())
    }

    /// Remove managed containers whose deployment row no longer accounts
    /// for them
    async fn remove_orphans(state: &AppState) -> AppResult<usize> {
        let mut removed = 0;
        for container in state.runtime.list_managed().await? {
            let Some(reason) = Self::orphan_reason(state, &container).await? else {
                continue;
            };

            if let Err(e) = state.runtime.remove(&container.id).await {
                tracing::warn!(container_id = %container.id, error = %e, "Orphan removal failed");
                continue;
            }
            tracing::info!(
                container_id = %container.id,
                name = %container.name,
                reason,
                "Orphaned container removed"
            );
            removed += 1;
        }
        Ok(removed)
    }

    async fn orphan_reason(
        state: &AppState,
        container: &ContainerInfo,
    ) -> AppResult<Option<&'static str>> {
        let Some(deployment_id) = container.deployment_id() else {
            return Ok(Some("no deployment label"));
        };
        let Some(deployment) = state.store.find_deployment(deployment_id).await? else {
            return Ok(Some("deployment row missing"));
        };

        if deployment
            .container_id
            .as_deref()
            .is_some_and(|id| id != container.id)
        {
            return Ok(Some("row references another container"));
        }
        if deployment.is_terminal() && !deployment.is_succeeded() {
            return Ok(Some("deployment concluded without success"));
        }
        if deployment.container_status == Some(ContainerStatus::Removed) {
            return Ok(Some("container recorded as removed"));
        }
        Ok(None)
    }
}
