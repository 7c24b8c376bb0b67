use async_trait::async_trait;
use sea_orm::sea_query::Expr;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::entity::domain::{self, ActiveModel, Column, Entity as DomainEntity};
use crate::error::{AppError, AppResult};
use crate::models::{Domain, DomainStatus};
use crate::repositories::{DomainRepository, PgStore};

#[async_trait]
impl DomainRepository for PgStore {
    async fn insert_domain(&self, domain: &Domain) -> AppResult<()> {
        let model = ActiveModel {
            id: Set(domain.id),
            project_id: Set(domain.project_id),
            hostname: Set(domain.hostname.clone()),
            environment_id: Set(domain.environment_id.clone()),
            kind: Set(domain.kind.to_string()),
            status: Set(domain.status.as_str().to_string()),
            created_at: Set(domain.created_at),
            updated_at: Set(domain.updated_at),
        };

        model.insert(&self.db).await?;
        Ok(())
    }

    async fn list_domains_by_project(&self, project_id: Uuid) -> AppResult<Vec<Domain>> {
        let models = DomainEntity::find()
            .filter(Column::ProjectId.eq(project_id))
            .order_by_asc(Column::Hostname)
            .all(&self.db)
            .await?;

        models.into_iter().map(Domain::try_from).collect()
    }

    async fn set_domain_status(
        &self,
        project_id: Uuid,
        from: DomainStatus,
        to: DomainStatus,
    ) -> AppResult<u64> {
        let result = DomainEntity::update_many()
            .col_expr(Column::Status, Expr::value(to.as_str()))
            .col_expr(Column::UpdatedAt, Expr::value(OffsetDateTime::now_utc()))
            .filter(Column::ProjectId.eq(project_id))
            .filter(Column::Status.eq(from.as_str()))
            .exec(&self.db)
            .await?;

        Ok(result.rows_affected)
    }

    async fn delete_domains_by_project(&self, project_id: Uuid) -> AppResult<u64> {
        let result = DomainEntity::delete_many()
            .filter(Column::ProjectId.eq(project_id))
            .exec(&self.db)
            .await?;

        Ok(result.rows_affected)
    }
}

impl TryFrom<domain::Model> for Domain {
    type Error = AppError;

    fn try_from(m: domain::Model) -> Result<Self, Self::Error> {
        Ok(Self {
            id: m.id,
            project_id: m.project_id,
            hostname: m.hostname,
            environment_id: m.environment_id,
            kind: m.kind.parse()?,
            status: m.status.parse()?,
            created_at: m.created_at,
            updated_at: m.updated_at,
        })
    }
}
