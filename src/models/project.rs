use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Id of the production environment, always the first in the list
pub const PRODUCTION_ENVIRONMENT_ID: &str = "prod";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Active,
    Inactive,
    Deleted,
}

string_enum!(ProjectStatus {
    Active => "active",
    Inactive => "inactive",
    Deleted => "deleted",
});

/// One entry of a project's ordered environment list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectEnvironment {
    pub id: String,
    pub name: String,
    pub slug: String,
    /// Branch pattern; may contain `*` wildcards
    #[serde(default)]
    pub branch: String,
    #[serde(default = "default_environment_status")]
    pub status: String,
}

fn default_environment_status() -> String {
    "active".to_string()
}

impl ProjectEnvironment {
    pub fn is_active(&self) -> bool {
        self.status == "active"
    }

    pub fn is_production(&self) -> bool {
        self.id == PRODUCTION_ENVIRONMENT_ID
    }
}

/// Deployment config template, frozen onto every deployment at creation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentConfig {
    /// Runner image name without the runner prefix, e.g. `python-3.12`
    pub image: String,
    #[serde(default)]
    pub root_directory: Option<String>,
    #[serde(default)]
    pub install_command: Option<String>,
    #[serde(default)]
    pub build_command: Option<String>,
    pub start_command: String,
    #[serde(default)]
    pub cpus: Option<f64>,
    #[serde(default)]
    pub memory_mb: Option<i64>,
}

/// Environment variable, optionally scoped to one environment slug
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub key: String,
    pub value: String,
    #[serde(default)]
    pub environment: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub status: ProjectStatus,
    pub environments: Vec<ProjectEnvironment>,
    pub config: DeploymentConfig,
    pub env_vars: Vec<EnvVar>,
    pub last_traffic_at: Option<OffsetDateTime>,
    pub deactivated_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl Project {
    pub fn is_active(&self) -> bool {
        self.status == ProjectStatus::Active
    }

    pub fn active_environments(&self) -> impl Iterator<Item = &ProjectEnvironment> {
        self.environments.iter().filter(|env| env.is_active())
    }

    pub fn environment_by_id(&self, id: &str) -> Option<&ProjectEnvironment> {
        self.environments.iter().find(|env| env.id == id)
    }

    /// Flattened env vars for one environment: scoped values override
    /// unscoped ones with the same key.
    pub fn env_vars_for(&self, environment_slug: &str) -> BTreeMap<String, String> {
        let mut vars: BTreeMap<String, String> = self
            .env_vars
            .iter()
            .filter(|var| var.environment.is_none())
            .map(|var| (var.key.clone(), var.value.clone()))
            .collect();

        for var in &self.env_vars {
            if var.environment.as_deref() == Some(environment_slug) {
                vars.insert(var.key.clone(), var.value.clone());
            }
        }

        vars
    }
}

/// Input for inserting a project; used by seeding and tests
#[derive(Debug, Clone)]
pub struct NewProject {
    pub name: String,
    pub slug: String,
    pub environments: Vec<ProjectEnvironment>,
    pub config: DeploymentConfig,
    pub env_vars: Vec<EnvVar>,
}
