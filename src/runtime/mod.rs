pub mod docker;
pub mod memory;

pub use docker::DockerRuntime;
pub use memory::InMemoryRuntime;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::AppResult;

/// Label marking containers owned by the engine
pub const MANAGED_LABEL: &str = "dockyard.managed";
pub const DEPLOYMENT_LABEL: &str = "deployment_id";
pub const PROJECT_LABEL: &str = "project_id";
pub const ENVIRONMENT_LABEL: &str = "environment_id";
pub const BRANCH_LABEL: &str = "branch";

/// Log driver settings for a runner container
#[derive(Debug, Clone, PartialEq)]
pub struct LogConfig {
    pub driver: String,
    pub options: BTreeMap<String, String>,
}

/// Everything needed to create a runner container
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub command: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    pub network: String,
    pub working_dir: String,
    pub cpus: f64,
    pub memory_mb: i64,
    pub log: Option<LogConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Created,
    Running,
    Exited { code: i64 },
    /// The engine gave up on the container; it will not run again
    Dead,
    /// Paused, restarting, removing
    Other,
}

/// Result of inspecting a container
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    pub state: ContainerState,
    /// Address on the runner network, once running
    pub ip_address: Option<String>,
    pub labels: BTreeMap<String, String>,
}

impl ContainerInfo {
    pub fn deployment_id(&self) -> Option<Uuid> {
        self.labels
            .get(DEPLOYMENT_LABEL)
            .and_then(|id| Uuid::parse_str(id).ok())
    }

    pub fn is_running(&self) -> bool {
        self.state == ContainerState::Running
    }
}

/// Container engine operations used by the orchestrator
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Create a container; an existing container with the same name is
    /// returned instead of failing.
    async fn create(&self, spec: &ContainerSpec) -> AppResult<String>;

    async fn start(&self, container_id: &str) -> AppResult<()>;

    /// Stop with a grace period; missing or stopped containers are fine
    async fn stop(&self, container_id: &str, grace: Duration) -> AppResult<()>;

    /// Force-remove; missing containers are fine
    async fn remove(&self, container_id: &str) -> AppResult<()>;

    /// `None` when the container does not exist
    async fn inspect(&self, container_id: &str) -> AppResult<Option<ContainerInfo>>;

    async fn find_by_deployment(&self, deployment_id: Uuid) -> AppResult<Option<ContainerInfo>>;

    /// All containers carrying the managed label, running or not
    async fn list_managed(&self) -> AppResult<Vec<ContainerInfo>>;
}
