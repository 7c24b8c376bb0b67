use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use utoipa::ToSchema;
use uuid::Uuid;

use super::project::DeploymentConfig;

/// Exit code the init script uses when install or build fails
pub const BUILD_EXIT_CODE: i64 = 86;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Pending,
    InProgress,
    Completed,
}

string_enum!(DeploymentStatus {
    Pending => "pending",
    InProgress => "in_progress",
    Completed => "completed",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Conclusion {
    Succeeded,
    Failed,
    Skipped,
}

string_enum!(Conclusion {
    Succeeded => "succeeded",
    Failed => "failed",
    Skipped => "skipped",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Setup,
    Build,
    Runtime,
    Timeout,
}

string_enum!(FailureKind {
    Setup => "setup",
    Build => "build",
    Runtime => "runtime",
    Timeout => "timeout",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ContainerStatus {
    Created,
    Running,
    Stopped,
    Removed,
}

string_enum!(ContainerStatus {
    Created => "created",
    Running => "running",
    Stopped => "stopped",
    Removed => "removed",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Webhook,
    User,
    Api,
    Reactivation,
}

string_enum!(Trigger {
    Webhook => "webhook",
    User => "user",
    Api => "api",
    Reactivation => "reactivation",
});

/// Why a deployment failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct FailureReason {
    pub kind: FailureKind,
    pub message: String,
}

impl FailureReason {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Marker the Monitor claims before enqueueing a terminal job for a row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Handoff {
    Finalize,
    Fail { reason: FailureReason },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployment {
    pub id: Uuid,
    pub project_id: Uuid,
    pub environment_id: String,
    pub branch: String,
    pub commit_sha: String,
    pub commit_message: Option<String>,
    pub trigger: Trigger,
    pub status: DeploymentStatus,
    pub conclusion: Option<Conclusion>,
    pub failure_kind: Option<FailureKind>,
    pub failure_reason: Option<String>,
    pub container_id: Option<String>,
    pub container_status: Option<ContainerStatus>,
    pub handoff: Option<Handoff>,
    pub handoff_at: Option<OffsetDateTime>,
    /// Frozen at creation; never re-read from the project
    pub config: DeploymentConfig,
    pub env_vars: BTreeMap<String, String>,
    pub created_at: OffsetDateTime,
    pub started_at: Option<OffsetDateTime>,
    pub concluded_at: Option<OffsetDateTime>,
}

impl Deployment {
    /// Container name, also the DNS name on the runner network
    pub fn container_name(&self) -> String {
        container_name(self.id)
    }

    pub fn is_succeeded(&self) -> bool {
        self.status == DeploymentStatus::Completed && self.conclusion == Some(Conclusion::Succeeded)
    }

    pub fn is_terminal(&self) -> bool {
        self.status == DeploymentStatus::Completed
    }
}

pub fn container_name(deployment_id: Uuid) -> String {
    format!("runner-{}", deployment_id.simple())
}

/// Input for inserting a pending deployment
#[derive(Debug, Clone)]
pub struct NewDeployment {
    pub project_id: Uuid,
    pub environment_id: String,
    pub branch: String,
    pub commit_sha: String,
    pub commit_message: Option<String>,
    pub trigger: Trigger,
    pub config: DeploymentConfig,
    pub env_vars: BTreeMap<String, String>,
}

/// Target of a status compare-and-set
#[derive(Debug, Clone)]
pub struct StatusTransition {
    pub to: DeploymentStatus,
    pub conclusion: Option<Conclusion>,
    pub failure: Option<FailureReason>,
}

impl StatusTransition {
    pub fn in_progress() -> Self {
        Self {
            to: DeploymentStatus::InProgress,
            conclusion: None,
            failure: None,
        }
    }

    pub fn succeeded() -> Self {
        Self {
            to: DeploymentStatus::Completed,
            conclusion: Some(Conclusion::Succeeded),
            failure: None,
        }
    }

    pub fn skipped() -> Self {
        Self {
            to: DeploymentStatus::Completed,
            conclusion: Some(Conclusion::Skipped),
            failure: None,
        }
    }

    pub fn failed(reason: FailureReason) -> Self {
        Self {
            to: DeploymentStatus::Completed,
            conclusion: Some(Conclusion::Failed),
            failure: Some(reason),
        }
    }
}
