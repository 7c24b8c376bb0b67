use time::OffsetDateTime;
use uuid::Uuid;

use dockyard::models::{
    Deployment, DeploymentConfig, Domain, DomainKind, DomainStatus, EnvVar, NewProject, Project,
    ProjectEnvironment, Trigger,
};
use dockyard::repositories::{DomainRepository, ProjectRepository};
use dockyard::services::{CreateDeployment, DeploymentService};
use dockyard::state::AppState;

/// Factory for creating test data
pub struct Factory<'a> {
    state: &'a AppState,
}

fn environment(id: &str, name: &str, slug: &str, branch: &str) -> ProjectEnvironment {
    ProjectEnvironment {
        id: id.to_string(),
        name: name.to_string(),
        slug: slug.to_string(),
        branch: branch.to_string(),
        status: "active".to_string(),
    }
}

#[allow(dead_code)]
impl<'a> Factory<'a> {
    pub fn new(state: &'a AppState) -> Self {
        Self { state }
    }

    /// Project with production on `main`, staging on `develop` and previews
    /// on `feature/*`
    pub async fn create_project(&self) -> Project {
        let unique = Uuid::new_v4().simple().to_string();
        self.create_project_with_slug(&format!("shop-{}", &unique[..8]))
            .await
    }

    pub async fn create_project_with_slug(&self, slug: &str) -> Project {
        let input = NewProject {
            name: format!("Test Project {}", slug),
            slug: slug.to_string(),
            environments: vec![
                environment("prod", "Production", "production", "main"),
                environment("staging", "Staging", "staging", "develop"),
                environment("preview", "Preview", "preview", "feature/*"),
            ],
            config: DeploymentConfig {
                image: "python-3.12".to_string(),
                root_directory: None,
                install_command: Some("pip install -r requirements.txt".to_string()),
                build_command: None,
                start_command: "gunicorn app:app --bind 0.0.0.0:8000".to_string(),
                cpus: None,
                memory_mb: None,
            },
            env_vars: vec![
                EnvVar {
                    key: "DEBUG".to_string(),
                    value: "0".to_string(),
                    environment: None,
                },
                EnvVar {
                    key: "DEBUG".to_string(),
                    value: "1".to_string(),
                    environment: Some("staging".to_string()),
                },
            ],
        };

        self.state.store.insert_project(input).await.unwrap()
    }

    /// Bind a custom domain to an environment
    pub async fn create_domain(
        &self,
        project_id: Uuid,
        hostname: &str,
        environment_id: &str,
        kind: DomainKind,
    ) -> Domain {
        let now = OffsetDateTime::now_utc();
        let domain = Domain {
            id: Uuid::new_v4(),
            project_id,
            hostname: hostname.to_string(),
            environment_id: environment_id.to_string(),
            kind,
            status: DomainStatus::Active,
            created_at: now,
            updated_at: now,
        };
        self.state.store.insert_domain(&domain).await.unwrap();
        domain
    }

    /// Create a pending deployment (and its `deploy_start` job)
    pub async fn create_deployment(&self, project_id: Uuid, branch: &str, sha: &str) -> Deployment {
        DeploymentService::create(
            self.state,
            CreateDeployment {
                project_id,
                branch: branch.to_string(),
                commit_sha: sha.to_string(),
                commit_message: Some(format!("Commit {}", sha)),
                trigger: Trigger::Webhook,
                environment_id: None,
            },
        )
        .await
        .unwrap()
    }
}
