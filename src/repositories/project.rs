use async_trait::async_trait;
use sea_orm::sea_query::Expr;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::entity::project::{self, ActiveModel, Column, Entity as ProjectEntity};
use crate::error::{AppError, AppResult};
use crate::models::{NewProject, Project, ProjectStatus};
use crate::repositories::{PgStore, ProjectRepository};

#[async_trait]
impl ProjectRepository for PgStore {
    async fn insert_project(&self, input: NewProject) -> AppResult<Project> {
        let now = OffsetDateTime::now_utc();
        let model = ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(input.name),
            slug: Set(input.slug),
            status: Set(ProjectStatus::Active.as_str().to_string()),
            environments: Set(serde_json::to_value(&input.environments)?),
            config: Set(serde_json::to_value(&input.config)?),
            env_vars: Set(serde_json::to_value(&input.env_vars)?),
            last_traffic_at: Set(Some(now)),
            deactivated_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let result = model.insert(&self.db).await?;
        result.try_into()
    }

    async fn find_project(&self, id: Uuid) -> AppResult<Option<Project>> {
        ProjectEntity::find_by_id(id)
            .one(&self.db)
            .await?
            .map(Project::try_from)
            .transpose()
    }

    async fn list_projects(&self) -> AppResult<Vec<Project>> {
        let models = ProjectEntity::find()
            .order_by_asc(Column::CreatedAt)
            .all(&self.db)
            .await?;

        models.into_iter().map(Project::try_from).collect()
    }

    async fn set_project_status(&self, id: Uuid, status: ProjectStatus) -> AppResult<()> {
        let now = OffsetDateTime::now_utc();
        let mut update = ProjectEntity::update_many()
            .col_expr(Column::Status, Expr::value(status.as_str()))
            .col_expr(Column::UpdatedAt, Expr::value(now));

        update = match status {
            ProjectStatus::Inactive => update.col_expr(Column::DeactivatedAt, Expr::value(now)),
            ProjectStatus::Active => update.col_expr(
                Column::DeactivatedAt,
                Expr::value(Option::<OffsetDateTime>::None),
            ),
            ProjectStatus::Deleted => update,
        };

        let result = update.filter(Column::Id.eq(id)).exec(&self.db).await?;
        if result.rows_affected == 0 {
            return Err(AppError::NotFound("Project".to_string()));
        }

        Ok(())
    }

    async fn record_traffic(&self, id: Uuid, at: OffsetDateTime) -> AppResult<()> {
        ProjectEntity::update_many()
            .col_expr(Column::LastTrafficAt, Expr::value(at))
            .filter(Column::Id.eq(id))
            .exec(&self.db)
            .await?;

        Ok(())
    }

    async fn delete_project(&self, id: Uuid) -> AppResult<()> {
        let result = ProjectEntity::delete_by_id(id).exec(&self.db).await?;

        if result.rows_affected == 0 {
            return Err(AppError::NotFound("Project".to_string()));
        }

        Ok(())
    }
}

// Conversion from SeaORM model to our domain model
impl TryFrom<project::Model> for Project {
    type Error = AppError;

    fn try_from(m: project::Model) -> Result<Self, Self::Error> {
        Ok(Self {
            id: m.id,
            name: m.name,
            slug: m.slug,
            status: m.status.parse()?,
            environments: serde_json::from_value(m.environments)?,
            config: serde_json::from_value(m.config)?,
            env_vars: serde_json::from_value(m.env_vars)?,
            last_traffic_at: m.last_traffic_at,
            deactivated_at: m.deactivated_at,
            created_at: m.created_at,
            updated_at: m.updated_at,
        })
    }
}
