use std::collections::HashMap;

use uuid::Uuid;

use crate::error::AppResult;
use crate::queue::{retry_backoff, JobKind};
use crate::routing::{build_snapshot, RoutingInput, RoutingSnapshot};
use crate::services::publisher::{EventType, StatusEvent};
use crate::services::{new_job, publish};
use crate::state::AppState;

pub struct RoutingService;

impl RoutingService {
    /// Compute the project's routing from current store state. Unknown
    /// projects resolve to an empty snapshot.
    pub async fn resolve(state: &AppState, project_id: Uuid) -> AppResult<RoutingSnapshot> {
        let Some(project) = state.store.find_project(project_id).await? else {
            return Ok(RoutingSnapshot::default());
        };
        if !project.is_active() {
            return Ok(RoutingSnapshot::default());
        }

        let aliases = state.store.list_aliases_by_project(project_id).await?;
        let domains = state.store.list_domains_by_project(project_id).await?;

        let mut deployments = HashMap::new();
        for alias in &aliases {
            if deployments.contains_key(&alias.deployment_id) {
                continue;
            }
            if let Some(deployment) = state.store.find_deployment(alias.deployment_id).await? {
                deployments.insert(deployment.id, deployment);
            }
        }

        Ok(build_snapshot(
            &state.config,
            &RoutingInput {
                project: &project,
                aliases: &aliases,
                domains: &domains,
                deployments: &deployments,
            },
        ))
    }

    /// Resolve and atomically replace the project's routing file
    pub async fn regenerate(state: &AppState, project_id: Uuid) -> AppResult<RoutingSnapshot> {
        let snapshot = Self::resolve(state, project_id).await?;
        state.routing.apply(project_id, &snapshot).await?;

        tracing::info!(
            project_id = %project_id,
            routers = snapshot.http.routers.len(),
            "Routing regenerated"
        );
        Ok(snapshot)
    }

    /// Regenerate; on failure publish a `routing_error` event and schedule a
    /// `routing_regenerate` job instead of failing the caller
    pub async fn regenerate_or_schedule(state: &AppState, project_id: Uuid) {
        let Err(e) = Self::regenerate(state, project_id).await else {
            return;
        };

        tracing::error!(project_id = %project_id, error = %e, "Routing regeneration failed");
        publish(
            state,
            StatusEvent::project(EventType::RoutingError, project_id).with_message(e.to_string()),
        )
        .await;

        let job = new_job(state, JobKind::RoutingRegenerate { project_id }).delayed(retry_backoff(1));
        if let Err(e) = state.job_queue.enqueue(job).await {
            tracing::error!(project_id = %project_id, error = %e, "Failed to schedule routing regeneration");
        }
    }
}
