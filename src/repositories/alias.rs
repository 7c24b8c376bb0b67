use async_trait::async_trait;
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set};
use uuid::Uuid;

use crate::entity::alias::{self, ActiveModel, Column, Entity as AliasEntity};
use crate::error::{AppError, AppResult};
use crate::models::Alias;
use crate::repositories::{AliasRepository, PgStore};

#[async_trait]
impl AliasRepository for PgStore {
    async fn find_alias(&self, key: &str) -> AppResult<Option<Alias>> {
        AliasEntity::find_by_id(key.to_string())
            .one(&self.db)
            .await?
            .map(Alias::try_from)
            .transpose()
    }

    async fn list_aliases_by_project(&self, project_id: Uuid) -> AppResult<Vec<Alias>> {
        let models = AliasEntity::find()
            .filter(Column::ProjectId.eq(project_id))
            .order_by_asc(Column::Key)
            .all(&self.db)
            .await?;

        models.into_iter().map(Alias::try_from).collect()
    }

    async fn insert_alias(&self, alias: &Alias) -> AppResult<bool> {
        let model = ActiveModel {
            key: Set(alias.key.clone()),
            project_id: Set(alias.project_id),
            kind: Set(alias.kind.as_str().to_string()),
            value: Set(alias.value.clone()),
            deployment_id: Set(alias.deployment_id),
            previous_deployment_id: Set(alias.previous_deployment_id),
            rolled_back_at: Set(alias.rolled_back_at),
            version: Set(alias.version),
            created_at: Set(alias.created_at),
            updated_at: Set(alias.updated_at),
        };

        let inserted = AliasEntity::insert(model)
            .on_conflict(OnConflict::column(Column::Key).do_nothing().to_owned())
            .exec_without_returning(&self.db)
            .await?;

        Ok(inserted == 1)
    }

    async fn update_alias(&self, alias: &Alias, expected_version: i64) -> AppResult<bool> {
        let result = AliasEntity::update_many()
            .col_expr(Column::DeploymentId, Expr::value(alias.deployment_id))
            .col_expr(
                Column::PreviousDeploymentId,
                Expr::value(alias.previous_deployment_id),
            )
            .col_expr(Column::RolledBackAt, Expr::value(alias.rolled_back_at))
            .col_expr(Column::Version, Expr::value(alias.version))
            .col_expr(Column::UpdatedAt, Expr::value(alias.updated_at))
            .filter(Column::Key.eq(alias.key.as_str()))
            .filter(Column::Version.eq(expected_version))
            .exec(&self.db)
            .await?;

        Ok(result.rows_affected == 1)
    }

    async fn delete_aliases_by_project(&self, project_id: Uuid) -> AppResult<u64> {
        let result = AliasEntity::delete_many()
            .filter(Column::ProjectId.eq(project_id))
            .exec(&self.db)
            .await?;

        Ok(result.rows_affected)
    }
}

// Conversion from SeaORM model to our domain model
impl TryFrom<alias::Model> for Alias {
    type Error = AppError;

    fn try_from(m: alias::Model) -> Result<Self, Self::Error> {
        Ok(Self {
            key: m.key,
            project_id: m.project_id,
            kind: m.kind.parse()?,
            value: m.value,
            deployment_id: m.deployment_id,
            previous_deployment_id: m.previous_deployment_id,
            rolled_back_at: m.rolled_back_at,
            version: m.version,
            created_at: m.created_at,
            updated_at: m.updated_at,
        })
    }
}
