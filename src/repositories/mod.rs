pub mod alias;
pub mod deployment;
pub mod domain;
pub mod memory;
pub mod project;

pub use memory::InMemoryStore;

use async_trait::async_trait;
use sea_orm::DatabaseConnection;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::{
    Alias, ContainerStatus, Deployment, DeploymentStatus, Domain, DomainStatus, Handoff,
    NewDeployment, NewProject, Project, ProjectStatus, StatusTransition,
};

/// Projects are owned by the web layer; the engine reads them and flips
/// their status.
#[async_trait]
pub trait ProjectRepository: Send + Sync {
    async fn insert_project(&self, input: NewProject) -> AppResult<Project>;

    async fn find_project(&self, id: Uuid) -> AppResult<Option<Project>>;

    async fn list_projects(&self) -> AppResult<Vec<Project>>;

    /// Set the status; `inactive` stamps `deactivated_at`, `active` clears it
    async fn set_project_status(&self, id: Uuid, status: ProjectStatus) -> AppResult<()>;

    async fn record_traffic(&self, id: Uuid, at: OffsetDateTime) -> AppResult<()>;

    async fn delete_project(&self, id: Uuid) -> AppResult<()>;
}

#[async_trait]
pub trait DeploymentRepository: Send + Sync {
    async fn insert_deployment(&self, input: NewDeployment) -> AppResult<Deployment>;

    async fn find_deployment(&self, id: Uuid) -> AppResult<Option<Deployment>>;

    async fn list_deployments_by_status(
        &self,
        status: DeploymentStatus,
    ) -> AppResult<Vec<Deployment>>;

    /// Newest first
    async fn list_deployments_by_project(&self, project_id: Uuid) -> AppResult<Vec<Deployment>>;

    /// Compare-and-set on status. Returns false when the row is not in any
    /// of `from`.
    async fn transition(
        &self,
        id: Uuid,
        from: &[DeploymentStatus],
        to: StatusTransition,
    ) -> AppResult<bool>;

    async fn set_container(
        &self,
        id: Uuid,
        container_id: &str,
        status: ContainerStatus,
    ) -> AppResult<()>;

    async fn set_container_status(&self, id: Uuid, status: ContainerStatus) -> AppResult<()>;

    /// Claim the hand-off marker of an `in_progress` row that has none.
    async fn claim_handoff(&self, id: Uuid, handoff: Handoff) -> AppResult<bool>;

    /// Re-stamp a claimed marker, only if it still carries `claimed_at`.
    async fn refresh_handoff(&self, id: Uuid, claimed_at: OffsetDateTime) -> AppResult<bool>;

    async fn release_handoff(&self, id: Uuid) -> AppResult<()>;

    async fn delete_deployments_by_project(&self, project_id: Uuid) -> AppResult<u64>;
}

#[async_trait]
pub trait AliasRepository: Send + Sync {
    async fn find_alias(&self, key: &str) -> AppResult<Option<Alias>>;

    async fn list_aliases_by_project(&self, project_id: Uuid) -> AppResult<Vec<Alias>>;

    /// Insert a new alias. Returns false if the key already exists.
    async fn insert_alias(&self, alias: &Alias) -> AppResult<bool>;

    /// Write `alias` if the stored version still equals `expected_version`.
    async fn update_alias(&self, alias: &Alias, expected_version: i64) -> AppResult<bool>;

    async fn delete_aliases_by_project(&self, project_id: Uuid) -> AppResult<u64>;
}

#[async_trait]
pub trait DomainRepository: Send + Sync {
    async fn insert_domain(&self, domain: &Domain) -> AppResult<()>;

    async fn list_domains_by_project(&self, project_id: Uuid) -> AppResult<Vec<Domain>>;

    /// Move every domain of the project in `from` to `to`.
    async fn set_domain_status(
        &self,
        project_id: Uuid,
        from: DomainStatus,
        to: DomainStatus,
    ) -> AppResult<u64>;

    async fn delete_domains_by_project(&self, project_id: Uuid) -> AppResult<u64>;
}

/// Everything the engine persists
pub trait Store: ProjectRepository + DeploymentRepository + AliasRepository + DomainRepository {}

impl<T> Store for T where
    T: ProjectRepository + DeploymentRepository + AliasRepository + DomainRepository
{
}

/// PostgreSQL store through SeaORM
#[derive(Clone)]
pub struct PgStore {
    db: DatabaseConnection,
}

impl PgStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}
