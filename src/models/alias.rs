use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AliasKind {
    Branch,
    Environment,
    EnvironmentId,
}

string_enum!(AliasKind {
    Branch => "branch",
    Environment => "environment",
    EnvironmentId => "environment_id",
});

/// Stable hostname label pointing at the live deployment for a branch or
/// environment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alias {
    /// Hostname label, unique across projects
    pub key: String,
    pub project_id: Uuid,
    pub kind: AliasKind,
    /// Branch name or environment id
    pub value: String,
    pub deployment_id: Uuid,
    pub previous_deployment_id: Option<Uuid>,
    pub rolled_back_at: Option<OffsetDateTime>,
    pub version: i64,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Alias key a deployment satisfies, computed before the swap
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasTarget {
    pub key: String,
    pub kind: AliasKind,
    pub value: String,
}

/// Outcome of pointing an alias at a deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapOutcome {
    Created,
    Swapped,
    /// Already pointing at the deployment
    Unchanged,
    /// A newer deployment is live; left alone
    Superseded,
}
