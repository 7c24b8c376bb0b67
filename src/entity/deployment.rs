use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "deployments")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub project_id: Uuid,
    pub environment_id: String,
    pub branch: String,
    pub commit_sha: String,
    pub commit_message: Option<String>,
    pub trigger: String,
    pub status: String,
    pub conclusion: Option<String>,
    pub failure_kind: Option<String>,
    pub failure_reason: Option<String>,
    #[sea_orm(unique)]
    pub container_id: Option<String>,
    pub container_status: Option<String>,
    pub handoff: Option<Json>,
    pub handoff_at: Option<TimeDateTimeWithTimeZone>,
    pub config: Json,
    pub env_vars: Json,
    pub created_at: TimeDateTimeWithTimeZone,
    pub started_at: Option<TimeDateTimeWithTimeZone>,
    pub concluded_at: Option<TimeDateTimeWithTimeZone>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::project::Entity",
        from = "Column::ProjectId",
        to = "super::project::Column::Id"
    )]
    Project,
}

impl Related<super::project::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Project.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
