pub mod alias;
pub mod common;
pub mod deployment;
pub mod job;
pub mod project;
pub mod routing;

pub use alias::{rollback_alias, AliasResponse};
pub use common::{validate_required, LimitParams};
pub use deployment::{
    create_deployment, get_deployment, CreateDeploymentRequest, DeploymentResponse,
};
pub use job::{
    get_job_status, get_queue_stats, list_dead_jobs, requeue_job, JobListResponse,
    JobStatusResponse, QueueStatsResponse,
};
pub use project::{reactivate_project, ReactivateResponse};
pub use routing::{preview_routing, regenerate_routing, RoutingResponse};
