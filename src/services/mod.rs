pub mod alias;
pub mod cleanup;
pub mod container;
pub mod deployment;
pub mod environment;
pub mod executor;
pub mod lease;
pub mod monitor;
pub mod probe;
pub mod publisher;
pub mod routing;
pub mod start_command;

pub use alias::AliasService;
pub use cleanup::{CleanupService, SweepReport};
pub use deployment::{CreateDeployment, DeploymentService};
pub use executor::JobExecutor;
pub use monitor::{Assessment, Monitor, TickSummary};
pub use publisher::{EventType, StatusEvent};
pub use routing::RoutingService;
pub use start_command::validate_start_command;

use crate::queue::{Job, JobKind};
use crate::state::AppState;

/// New job carrying the configured attempt budget
pub(crate) fn new_job(state: &AppState, kind: JobKind) -> Job {
    Job::new(kind).with_max_attempts(state.config.job_max_attempts)
}

/// Events are best effort; a lost event never fails the operation
pub(crate) async fn publish(state: &AppState, event: StatusEvent) {
    let event_type = event.event_type.as_str();
    if let Err(e) = state.publisher.publish(event).await {
        tracing::warn!(event_type, error = %e, "Failed to publish event");
    }
}
