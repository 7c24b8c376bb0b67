use futures::stream::{self, StreamExt};
use time::OffsetDateTime;

use crate::error::AppResult;
use crate::models::{
    Deployment, DeploymentStatus, FailureKind, FailureReason, Handoff, BUILD_EXIT_CODE,
};
use crate::queue::{Job, JobKind};
use crate::runtime::ContainerState;
use crate::services::new_job;
use crate::state::AppState;

/// What the Monitor concluded about one deployment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assessment {
    Ready,
    NotReady,
    Failed(FailureReason),
}

/// Per-tick counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub checked: usize,
    pub finalized: usize,
    pub failed: usize,
    /// Lost hand-offs enqueued again
    pub requeued: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Waiting,
    Finalize,
    Fail,
    Requeued,
}

/// Polls `in_progress` deployments and hands each one off exactly once
pub struct Monitor;

impl Monitor {
    /// One polling pass over every `in_progress` deployment
    pub async fn tick(state: &AppState) -> AppResult<TickSummary> {
        let deployments = state
            .store
            .list_deployments_by_status(DeploymentStatus::InProgress)
            .await?;
        let now = OffsetDateTime::now_utc();

        let outcomes: Vec<Outcome> = stream::iter(deployments)
            .map(|deployment| async move {
                match Self::evaluate(state, &deployment, now).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        // Engine and probe errors are transient
                        tracing::warn!(
                            deployment_id = %deployment.id,
                            error = %e,
                            "Monitor check failed"
                        );
                        Outcome::Waiting
                    }
                }
            })
            .buffer_unordered(state.config.probe_concurrency.max(1))
            .collect()
            .await;

        let mut summary = TickSummary {
            checked: outcomes.len(),
            ..TickSummary::default()
        };
        for outcome in outcomes {
            match outcome {
                Outcome::Finalize => summary.finalized += 1,
                Outcome::Fail => summary.failed += 1,
                Outcome::Requeued => summary.requeued += 1,
                Outcome::Waiting => {}
            }
        }

        Ok(summary)
    }

    async fn evaluate(
        state: &AppState,
        deployment: &Deployment,
        now: OffsetDateTime,
    ) -> AppResult<Outcome> {
        if let Some(handoff) = &deployment.handoff {
            let Some(claimed_at) = deployment.handoff_at else {
                return Ok(Outcome::Waiting);
            };
            if now - claimed_at < state.config.handoff_timeout {
                return Ok(Outcome::Waiting);
            }

            // The job was lost; whoever re-stamps the marker enqueues again
            if !state.store.refresh_handoff(deployment.id, claimed_at).await? {
                return Ok(Outcome::Waiting);
            }
            state
                .job_queue
                .enqueue(Self::handoff_job(state, deployment, handoff))
                .await?;
            tracing::warn!(deployment_id = %deployment.id, "Hand-off job lost, enqueued again");
            return Ok(Outcome::Requeued);
        }

        let timed_out = deployment
            .started_at
            .is_some_and(|started| now - started >= state.config.deployment_timeout);
        if timed_out {
            let reason = FailureReason::new(
                FailureKind::Timeout,
                format!(
                    "Deployment did not become ready within {}s",
                    state.config.deployment_timeout.as_secs()
                ),
            );
            return Self::hand_off(state, deployment, Handoff::Fail { reason }).await;
        }

        match Self::assess(state, deployment).await? {
            Assessment::Ready => Self::hand_off(state, deployment, Handoff::Finalize).await,
            Assessment::NotReady => Ok(Outcome::Waiting),
            Assessment::Failed(reason) => {
                Self::hand_off(state, deployment, Handoff::Fail { reason }).await
            }
        }
    }

    /// Inspect the container and probe it when running
    pub async fn assess(state: &AppState, deployment: &Deployment) -> AppResult<Assessment> {
        let info = match &deployment.container_id {
            Some(container_id) => state.runtime.inspect(container_id).await?,
            None => state.runtime.find_by_deployment(deployment.id).await?,
        };
        let Some(info) = info else {
            return Ok(Assessment::Failed(FailureReason::new(
                FailureKind::Runtime,
                "Container not found",
            )));
        };

        match info.state {
            ContainerState::Exited {
                code: BUILD_EXIT_CODE,
            } => Ok(Assessment::Failed(FailureReason::new(
                FailureKind::Build,
                format!("Build failed (exit code {})", BUILD_EXIT_CODE),
            ))),
            ContainerState::Exited { code } => Ok(Assessment::Failed(FailureReason::new(
                FailureKind::Runtime,
                format!("Container exited with code {}", code),
            ))),
            ContainerState::Dead => Ok(Assessment::Failed(FailureReason::new(
                FailureKind::Runtime,
                "Container is dead",
            ))),
            ContainerState::Running => {
                let Some(address) = info.ip_address.as_deref() else {
                    return Ok(Assessment::NotReady);
                };
                let probe = state.probe.check(address, state.config.runner_port);
                match tokio::time::timeout(state.config.probe_timeout, probe).await {
                    Ok(Ok(true)) => Ok(Assessment::Ready),
                    Ok(Ok(false)) | Err(_) => Ok(Assessment::NotReady),
                    Ok(Err(e)) => Err(e),
                }
            }
            ContainerState::Created | ContainerState::Other => Ok(Assessment::NotReady),
        }
    }

    /// Claim the hand-off marker; only the winner enqueues. A failed
    /// enqueue releases the marker for the next tick.
    async fn hand_off(
        state: &AppState,
        deployment: &Deployment,
        handoff: Handoff,
    ) -> AppResult<Outcome> {
        if !state
            .store
            .claim_handoff(deployment.id, handoff.clone())
            .await?
        {
            return Ok(Outcome::Waiting);
        }

        let job = Self::handoff_job(state, deployment, &handoff);
        if let Err(e) = state.job_queue.enqueue(job).await {
            state.store.release_handoff(deployment.id).await?;
            return Err(e);
        }

        Ok(match handoff {
            Handoff::Finalize => {
                tracing::info!(deployment_id = %deployment.id, "Deployment ready, finalizing");
                Outcome::Finalize
            }
            Handoff::Fail { reason } => {
                tracing::info!(
                    deployment_id = %deployment.id,
                    kind = %reason.kind,
                    reason = %reason.message,
                    "Deployment failing"
                );
                Outcome::Fail
            }
        })
    }

    fn handoff_job(state: &AppState, deployment: &Deployment, handoff: &Handoff) -> Job {
        let kind = match handoff {
            Handoff::Finalize => JobKind::DeployFinalize {
                deployment_id: deployment.id,
            },
            Handoff::Fail { reason } => JobKind::DeployFail {
                deployment_id: deployment.id,
                reason: reason.clone(),
            },
        };
        new_job(state, kind)
    }
}
