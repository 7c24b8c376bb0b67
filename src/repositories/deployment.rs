use async_trait::async_trait;
use sea_orm::sea_query::Expr;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::entity::deployment::{self, ActiveModel, Column, Entity as DeploymentEntity};
use crate::error::{AppError, AppResult};
use crate::models::{
    ContainerStatus, Deployment, DeploymentStatus, Handoff, NewDeployment, StatusTransition,
};
use crate::repositories::{DeploymentRepository, PgStore};

#[async_trait]
impl DeploymentRepository for PgStore {
    async fn insert_deployment(&self, input: NewDeployment) -> AppResult<Deployment> {
        let model = ActiveModel {
            id: Set(Uuid::new_v4()),
            project_id: Set(input.project_id),
            environment_id: Set(input.environment_id),
            branch: Set(input.branch),
            commit_sha: Set(input.commit_sha),
            commit_message: Set(input.commit_message),
            trigger: Set(input.trigger.as_str().to_string()),
            status: Set(DeploymentStatus::Pending.as_str().to_string()),
            conclusion: Set(None),
            failure_kind: Set(None),
            failure_reason: Set(None),
            container_id: Set(None),
            container_status: Set(None),
            handoff: Set(None),
            handoff_at: Set(None),
            config: Set(serde_json::to_value(&input.config)?),
            env_vars: Set(serde_json::to_value(&input.env_vars)?),
            created_at: Set(OffsetDateTime::now_utc()),
            started_at: Set(None),
            concluded_at: Set(None),
        };

        let result = model.insert(&self.db).await?;
        result.try_into()
    }

    async fn find_deployment(&self, id: Uuid) -> AppResult<Option<Deployment>> {
        DeploymentEntity::find_by_id(id)
            .one(&self.db)
            .await?
            .map(Deployment::try_from)
            .transpose()
    }

    async fn list_deployments_by_status(
        &self,
        status: DeploymentStatus,
    ) -> AppResult<Vec<Deployment>> {
        let models = DeploymentEntity::find()
            .filter(Column::Status.eq(status.as_str()))
            .order_by_asc(Column::CreatedAt)
            .all(&self.db)
            .await?;

        models.into_iter().map(Deployment::try_from).collect()
    }

    async fn list_deployments_by_project(&self, project_id: Uuid) -> AppResult<Vec<Deployment>> {
        let models = DeploymentEntity::find()
            .filter(Column::ProjectId.eq(project_id))
            .order_by_desc(Column::CreatedAt)
            .all(&self.db)
            .await?;

        models.into_iter().map(Deployment::try_from).collect()
    }

    async fn transition(
        &self,
        id: Uuid,
        from: &[DeploymentStatus],
        to: StatusTransition,
    ) -> AppResult<bool> {
        let now = OffsetDateTime::now_utc();
        let mut update = DeploymentEntity::update_many()
            .col_expr(Column::Status, Expr::value(to.to.as_str()))
            .col_expr(
                Column::Conclusion,
                Expr::value(to.conclusion.map(|c| c.as_str().to_string())),
            )
            .col_expr(
                Column::FailureKind,
                Expr::value(to.failure.as_ref().map(|f| f.kind.as_str().to_string())),
            )
            .col_expr(
                Column::FailureReason,
                Expr::value(to.failure.map(|f| f.message)),
            );

        update = match to.to {
            DeploymentStatus::InProgress => update.col_expr(Column::StartedAt, Expr::value(now)),
            DeploymentStatus::Completed => update.col_expr(Column::ConcludedAt, Expr::value(now)),
            DeploymentStatus::Pending => update,
        };

        let result = update
            .filter(Column::Id.eq(id))
            .filter(Column::Status.is_in(from.iter().map(|s| s.as_str())))
            .exec(&self.db)
            .await?;

        Ok(result.rows_affected == 1)
    }

    async fn set_container(
        &self,
        id: Uuid,
        container_id: &str,
        status: ContainerStatus,
    ) -> AppResult<()> {
        DeploymentEntity::update_many()
            .col_expr(Column::ContainerId, Expr::value(container_id))
            .col_expr(Column::ContainerStatus, Expr::value(status.as_str()))
            .filter(Column::Id.eq(id))
            .exec(&self.db)
            .await?;

        Ok(())
    }

    async fn set_container_status(&self, id: Uuid, status: ContainerStatus) -> AppResult<()> {
        DeploymentEntity::update_many()
            .col_expr(Column::ContainerStatus, Expr::value(status.as_str()))
            .filter(Column::Id.eq(id))
            .exec(&self.db)
            .await?;

        Ok(())
    }

    async fn claim_handoff(&self, id: Uuid, handoff: Handoff) -> AppResult<bool> {
        let result = DeploymentEntity::update_many()
            .col_expr(Column::Handoff, Expr::value(serde_json::to_value(&handoff)?))
            .col_expr(Column::HandoffAt, Expr::value(OffsetDateTime::now_utc()))
            .filter(Column::Id.eq(id))
            .filter(Column::Status.eq(DeploymentStatus::InProgress.as_str()))
            .filter(Column::Handoff.is_null())
            .exec(&self.db)
            .await?;

        Ok(result.rows_affected == 1)
    }

    async fn refresh_handoff(&self, id: Uuid, claimed_at: OffsetDateTime) -> AppResult<bool> {
        let result = DeploymentEntity::update_many()
            .col_expr(Column::HandoffAt, Expr::value(OffsetDateTime::now_utc()))
            .filter(Column::Id.eq(id))
            .filter(Column::HandoffAt.eq(claimed_at))
            .exec(&self.db)
            .await?;

        Ok(result.rows_affected == 1)
    }

    async fn release_handoff(&self, id: Uuid) -> AppResult<()> {
        DeploymentEntity::update_many()
            .col_expr(
                Column::Handoff,
                Expr::value(Option::<serde_json::Value>::None),
            )
            .col_expr(
                Column::HandoffAt,
                Expr::value(Option::<OffsetDateTime>::None),
            )
            .filter(Column::Id.eq(id))
            .exec(&self.db)
            .await?;

        Ok(())
    }

    async fn delete_deployments_by_project(&self, project_id: Uuid) -> AppResult<u64> {
        let result = DeploymentEntity::delete_many()
            .filter(Column::ProjectId.eq(project_id))
            .exec(&self.db)
            .await?;

        Ok(result.rows_affected)
    }
}

// Conversion from SeaORM model to our domain model
impl TryFrom<deployment::Model> for Deployment {
    type Error = AppError;

    fn try_from(m: deployment::Model) -> Result<Self, Self::Error> {
        Ok(Self {
            id: m.id,
            project_id: m.project_id,
            environment_id: m.environment_id,
            branch: m.branch,
            commit_sha: m.commit_sha,
            commit_message: m.commit_message,
            trigger: m.trigger.parse()?,
            status: m.status.parse()?,
            conclusion: m.conclusion.map(|c| c.parse()).transpose()?,
            failure_kind: m.failure_kind.map(|k| k.parse()).transpose()?,
            failure_reason: m.failure_reason,
            container_id: m.container_id,
            container_status: m.container_status.map(|s| s.parse()).transpose()?,
            handoff: m.handoff.map(serde_json::from_value).transpose()?,
            handoff_at: m.handoff_at,
            config: serde_json::from_value(m.config)?,
            env_vars: serde_json::from_value(m.env_vars)?,
            created_at: m.created_at,
            started_at: m.started_at,
            concluded_at: m.concluded_at,
        })
    }
}
