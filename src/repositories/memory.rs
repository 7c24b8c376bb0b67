use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{
    Alias, ContainerStatus, Deployment, DeploymentStatus, Domain, DomainStatus, Handoff,
    NewDeployment, NewProject, Project, ProjectStatus, StatusTransition,
};
use crate::repositories::{
    AliasRepository, DeploymentRepository, DomainRepository, ProjectRepository,
};

/// In-memory store for tests; same compare-and-set semantics as `PgStore`
#[derive(Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<Mutex<InMemoryStoreInner>>,
}

#[derive(Default)]
struct InMemoryStoreInner {
    projects: HashMap<Uuid, Project>,
    deployments: HashMap<Uuid, Deployment>,
    aliases: BTreeMap<String, Alias>,
    domains: HashMap<Uuid, Domain>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProjectRepository for InMemoryStore {
    async fn insert_project(&self, input: NewProject) -> AppResult<Project> {
        let mut inner = self.inner.lock().await;
        if inner.projects.values().any(|p| p.slug == input.slug) {
            return Err(AppError::Conflict(format!("Project slug {}", input.slug)));
        }

        let now = OffsetDateTime::now_utc();
        let project = Project {
            id: Uuid::new_v4(),
            name: input.name,
            slug: input.slug,
            status: ProjectStatus::Active,
            environments: input.environments,
            config: input.config,
            env_vars: input.env_vars,
            last_traffic_at: Some(now),
            deactivated_at: None,
            created_at: now,
            updated_at: now,
        };
        inner.projects.insert(project.id, project.clone());
        Ok(project)
    }

    async fn find_project(&self, id: Uuid) -> AppResult<Option<Project>> {
        let inner = self.inner.lock().await;
        Ok(inner.projects.get(&id).cloned())
    }

    async fn list_projects(&self) -> AppResult<Vec<Project>> {
        let inner = self.inner.lock().await;
        let mut projects: Vec<Project> = inner.projects.values().cloned().collect();
        projects.sort_by_key(|p| p.created_at);
        Ok(projects)
    }

    async fn set_project_status(&self, id: Uuid, status: ProjectStatus) -> AppResult<()> {
        let mut inner = self.inner.lock().await;
        let project = inner
            .projects
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound("Project".to_string()))?;

        let now = OffsetDateTime::now_utc();
        project.status = status;
        project.updated_at = now;
        match status {
            ProjectStatus::Inactive => project.deactivated_at = Some(now),
            ProjectStatus::Active => project.deactivated_at = None,
            ProjectStatus::Deleted => {}
        }
        Ok(())
    }

    async fn record_traffic(&self, id: Uuid, at: OffsetDateTime) -> AppResult<()> {
        let mut inner = self.inner.lock().await;
        if let Some(project) = inner.projects.get_mut(&id) {
            project.last_traffic_at = Some(at);
        }
        Ok(())
    }

    async fn delete_project(&self, id: Uuid) -> AppResult<()> {
        let mut inner = self.inner.lock().await;
        inner
            .projects
            .remove(&id)
            .ok_or_else(|| AppError::NotFound("Project".to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl DeploymentRepository for InMemoryStore {
    async fn insert_deployment(&self, input: NewDeployment) -> AppResult<Deployment> {
        let deployment = Deployment {
            id: Uuid::new_v4(),
            project_id: input.project_id,
            environment_id: input.environment_id,
            branch: input.branch,
            commit_sha: input.commit_sha,
            commit_message: input.commit_message,
            trigger: input.trigger,
            status: DeploymentStatus::Pending,
            conclusion: None,
            failure_kind: None,
            failure_reason: None,
            container_id: None,
            container_status: None,
            handoff: None,
            handoff_at: None,
            config: input.config,
            env_vars: input.env_vars,
            created_at: OffsetDateTime::now_utc(),
            started_at: None,
            concluded_at: None,
        };

        let mut inner = self.inner.lock().await;
        inner.deployments.insert(deployment.id, deployment.clone());
        Ok(deployment)
    }

    async fn find_deployment(&self, id: Uuid) -> AppResult<Option<Deployment>> {
        let inner = self.inner.lock().await;
        Ok(inner.deployments.get(&id).cloned())
    }

    async fn list_deployments_by_status(
        &self,
        status: DeploymentStatus,
    ) -> AppResult<Vec<Deployment>> {
        let inner = self.inner.lock().await;
        let mut deployments: Vec<Deployment> = inner
            .deployments
            .values()
            .filter(|d| d.status == status)
            .cloned()
            .collect();
        deployments.sort_by_key(|d| d.created_at);
        Ok(deployments)
    }

    async fn list_deployments_by_project(&self, project_id: Uuid) -> AppResult<Vec<Deployment>> {
        let inner = self.inner.lock().await;
        let mut deployments: Vec<Deployment> = inner
            .deployments
            .values()
            .filter(|d| d.project_id == project_id)
            .cloned()
            .collect();
        deployments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(deployments)
    }

    async fn transition(
        &self,
        id: Uuid,
        from: &[DeploymentStatus],
        to: StatusTransition,
    ) -> AppResult<bool> {
        let mut inner = self.inner.lock().await;
        let Some(deployment) = inner.deployments.get_mut(&id) else {
            return Ok(false);
        };
        if !from.contains(&deployment.status) {
            return Ok(false);
        }

        let now = OffsetDateTime::now_utc();
        deployment.status = to.to;
        deployment.conclusion = to.conclusion;
        deployment.failure_kind = to.failure.as_ref().map(|f| f.kind);
        deployment.failure_reason = to.failure.map(|f| f.message);
        match to.to {
            DeploymentStatus::InProgress => deployment.started_at = Some(now),
            DeploymentStatus::Completed => deployment.concluded_at = Some(now),
            DeploymentStatus::Pending => {}
        }
        Ok(true)
    }

    async fn set_container(
        &self,
        id: Uuid,
        container_id: &str,
        status: ContainerStatus,
    ) -> AppResult<()> {
        let mut inner = self.inner.lock().await;
        let taken = inner
            .deployments
            .values()
            .any(|d| d.id != id && d.container_id.as_deref() == Some(container_id));
        if taken {
            return Err(AppError::Database(format!(
                "container {} already belongs to another deployment",
                container_id
            )));
        }

        if let Some(deployment) = inner.deployments.get_mut(&id) {
            deployment.container_id = Some(container_id.to_string());
            deployment.container_status = Some(status);
        }
        Ok(())
    }

    async fn set_container_status(&self, id: Uuid, status: ContainerStatus) -> AppResult<()> {
        let mut inner = self.inner.lock().await;
        if let Some(deployment) = inner.deployments.get_mut(&id) {
            deployment.container_status = Some(status);
        }
        Ok(())
    }

    async fn claim_handoff(&self, id: Uuid, handoff: Handoff) -> AppResult<bool> {
        let mut inner = self.inner.lock().await;
        match inner.deployments.get_mut(&id) {
            Some(d) if d.status == DeploymentStatus::InProgress && d.handoff.is_none() => {
                d.handoff = Some(handoff);
                d.handoff_at = Some(OffsetDateTime::now_utc());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn refresh_handoff(&self, id: Uuid, claimed_at: OffsetDateTime) -> AppResult<bool> {
        let mut inner = self.inner.lock().await;
        match inner.deployments.get_mut(&id) {
            Some(d) if d.handoff_at == Some(claimed_at) => {
                d.handoff_at = Some(OffsetDateTime::now_utc());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release_handoff(&self, id: Uuid) -> AppResult<()> {
        let mut inner = self.inner.lock().await;
        if let Some(deployment) = inner.deployments.get_mut(&id) {
            deployment.handoff = None;
            deployment.handoff_at = None;
        }
        Ok(())
    }

    async fn delete_deployments_by_project(&self, project_id: Uuid) -> AppResult<u64> {
        let mut inner = self.inner.lock().await;
        let before = inner.deployments.len();
        inner.deployments.retain(|_, d| d.project_id != project_id);
        Ok((before - inner.deployments.len()) as u64)
    }
}

#[async_trait]
impl AliasRepository for InMemoryStore {
    async fn find_alias(&self, key: &str) -> AppResult<Option<Alias>> {
        let inner = self.inner.lock().await;
        Ok(inner.aliases.get(key).cloned())
    }

    async fn list_aliases_by_project(&self, project_id: Uuid) -> AppResult<Vec<Alias>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .aliases
            .values()
            .filter(|a| a.project_id == project_id)
            .cloned()
            .collect())
    }

    async fn insert_alias(&self, alias: &Alias) -> AppResult<bool> {
        let mut inner = self.inner.lock().await;
        if inner.aliases.contains_key(&alias.key) {
            return Ok(false);
        }
        inner.aliases.insert(alias.key.clone(), alias.clone());
        Ok(true)
    }

    async fn update_alias(&self, alias: &Alias, expected_version: i64) -> AppResult<bool> {
        let mut inner = self.inner.lock().await;
        match inner.aliases.get_mut(&alias.key) {
            Some(stored) if stored.version == expected_version => {
                stored.deployment_id = alias.deployment_id;
                stored.previous_deployment_id = alias.previous_deployment_id;
                stored.rolled_back_at = alias.rolled_back_at;
                stored.version = alias.version;
                stored.updated_at = alias.updated_at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_aliases_by_project(&self, project_id: Uuid) -> AppResult<u64> {
        let mut inner = self.inner.lock().await;
        let before = inner.aliases.len();
        inner.aliases.retain(|_, a| a.project_id != project_id);
        Ok((before - inner.aliases.len()) as u64)
    }
}

#[async_trait]
impl DomainRepository for InMemoryStore {
    async fn insert_domain(&self, domain: &Domain) -> AppResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.domains.values().any(|d| d.hostname == domain.hostname) {
            return Err(AppError::Conflict(format!("Domain {}", domain.hostname)));
        }
        inner.domains.insert(domain.id, domain.clone());
        Ok(())
    }

    async fn list_domains_by_project(&self, project_id: Uuid) -> AppResult<Vec<Domain>> {
        let inner = self.inner.lock().await;
        let mut domains: Vec<Domain> = inner
            .domains
            .values()
            .filter(|d| d.project_id == project_id)
            .cloned()
            .collect();
        domains.sort_by(|a, b| a.hostname.cmp(&b.hostname));
        Ok(domains)
    }

    async fn set_domain_status(
        &self,
        project_id: Uuid,
        from: DomainStatus,
        to: DomainStatus,
    ) -> AppResult<u64> {
        let mut inner = self.inner.lock().await;
        let now = OffsetDateTime::now_utc();
        let mut changed = 0;
        for domain in inner.domains.values_mut() {
            if domain.project_id == project_id && domain.status == from {
                domain.status = to;
                domain.updated_at = now;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn delete_domains_by_project(&self, project_id: Uuid) -> AppResult<u64> {
        let mut inner = self.inner.lock().await;
        let before = inner.domains.len();
        inner.domains.retain(|_, d| d.project_id != project_id);
        Ok((before - inner.domains.len()) as u64)
    }
}
