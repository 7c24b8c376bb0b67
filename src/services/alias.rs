use time::OffsetDateTime;

use crate::error::{AppError, AppResult};
use crate::models::{Alias, AliasTarget, Deployment, Project, SwapOutcome};
use crate::services::environment::alias_targets;
use crate::services::publisher::{EventType, StatusEvent};
use crate::services::publish;
use crate::services::routing::RoutingService;
use crate::state::AppState;

/// Attempts at a version CAS before giving up and letting the job retry
const MAX_SWAP_ATTEMPTS: usize = 5;

pub struct AliasService;

impl AliasService {
    /// Point every alias the deployment satisfies at it
    pub async fn swap_all(
        state: &AppState,
        project: &Project,
        deployment: &Deployment,
    ) -> AppResult<Vec<(String, SwapOutcome)>> {
        let mut outcomes = Vec::new();
        for target in alias_targets(project, deployment) {
            let outcome = Self::swap(state, &target, deployment).await?;
            tracing::info!(
                alias = %target.key,
                deployment_id = %deployment.id,
                outcome = ?outcome,
                "Alias updated"
            );
            outcomes.push((target.key, outcome));
        }
        Ok(outcomes)
    }

    /// Swap `previous <- current, current <- deployment` on one alias under
    /// a CAS on its version. A finalize that arrives after a newer
    /// deployment went live, or after its own deployment was rolled back
    /// from, leaves the alias alone.
    pub async fn swap(
        state: &AppState,
        target: &AliasTarget,
        deployment: &Deployment,
    ) -> AppResult<SwapOutcome> {
        for _ in 0..MAX_SWAP_ATTEMPTS {
            let now = OffsetDateTime::now_utc();

            let Some(current) = state.store.find_alias(&target.key).await? else {
                let alias = Alias {
                    key: target.key.clone(),
                    project_id: deployment.project_id,
                    kind: target.kind,
                    value: target.value.clone(),
                    deployment_id: deployment.id,
                    previous_deployment_id: None,
                    rolled_back_at: None,
                    version: 1,
                    created_at: now,
                    updated_at: now,
                };
                if state.store.insert_alias(&alias).await? {
                    return Ok(SwapOutcome::Created);
                }
                continue;
            };

            if current.deployment_id == deployment.id {
                return Ok(SwapOutcome::Unchanged);
            }
            if current.rolled_back_at.is_some()
                && current.previous_deployment_id == Some(deployment.id)
            {
                return Ok(SwapOutcome::Superseded);
            }
            if let Some(live) = state.store.find_deployment(current.deployment_id).await? {
                if live.is_succeeded() && live.created_at > deployment.created_at {
                    return Ok(SwapOutcome::Superseded);
                }
            }

            let next = Alias {
                kind: target.kind,
                value: target.value.clone(),
                deployment_id: deployment.id,
                previous_deployment_id: Some(current.deployment_id),
                rolled_back_at: None,
                version: current.version + 1,
                updated_at: now,
                ..current.clone()
            };
            if state.store.update_alias(&next, current.version).await? {
                return Ok(SwapOutcome::Swapped);
            }

            tracing::debug!(alias = %target.key, version = current.version, "Alias changed concurrently, retrying");
        }

        Err(AppError::Database(format!(
            "Alias {} kept changing during swap",
            target.key
        )))
    }

    /// Point the alias back at its previous deployment
    pub async fn rollback(state: &AppState, key: &str) -> AppResult<Alias> {
        let alias = state
            .store
            .find_alias(key)
            .await?
            .ok_or_else(|| AppError::NotFound("Alias".to_string()))?;

        let previous_id = match alias.previous_deployment_id {
            Some(id) if alias.rolled_back_at.is_none() => id,
            _ => return Err(AppError::NoPreviousDeployment(key.to_string())),
        };

        let previous = state
            .store
            .find_deployment(previous_id)
            .await?
            .filter(|d| d.is_succeeded())
            .ok_or_else(|| AppError::PreviousNotLive(key.to_string()))?;

        let container = match &previous.container_id {
            Some(container_id) => state.runtime.inspect(container_id).await?,
            None => state.runtime.find_by_deployment(previous.id).await?,
        };
        if !container.is_some_and(|c| c.is_running()) {
            return Err(AppError::PreviousNotLive(key.to_string()));
        }

        let now = OffsetDateTime::now_utc();
        let next = Alias {
            deployment_id: previous.id,
            previous_deployment_id: Some(alias.deployment_id),
            rolled_back_at: Some(now),
            version: alias.version + 1,
            updated_at: now,
            ..alias.clone()
        };
        if !state.store.update_alias(&next, alias.version).await? {
            return Err(AppError::Conflict(format!(
                "Alias {} changed during rollback",
                key
            )));
        }

        tracing::info!(
            alias = %key,
            deployment_id = %previous.id,
            rolled_back_from = %alias.deployment_id,
            "Alias rolled back"
        );

        RoutingService::regenerate_or_schedule(state, alias.project_id).await;
        publish(
            state,
            StatusEvent::deployment(EventType::DeploymentRollback, &previous)
                .with_message(format!("Alias {} rolled back", key)),
        )
        .await;

        Ok(next)
    }
}
