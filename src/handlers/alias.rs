use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::{Alias, AliasKind};
use crate::services::AliasService;
use crate::state::AppState;

// ============ Response DTOs ============

#[derive(Debug, Serialize, ToSchema)]
pub struct AliasResponse {
    pub key: String,
    pub project_id: Uuid,
    pub kind: AliasKind,
    pub value: String,
    pub deployment_id: Uuid,
    pub previous_deployment_id: Option<Uuid>,
    #[schema(value_type = Option<String>)]
    pub rolled_back_at: Option<time::OffsetDateTime>,
    pub version: i64,
    #[schema(value_type = String)]
    pub updated_at: time::OffsetDateTime,
}

impl From<Alias> for AliasResponse {
    fn from(a: Alias) -> Self {
        Self {
            key: a.key,
            project_id: a.project_id,
            kind: a.kind,
            value: a.value,
            deployment_id: a.deployment_id,
            previous_deployment_id: a.previous_deployment_id,
            rolled_back_at: a.rolled_back_at,
            version: a.version,
            updated_at: a.updated_at,
        }
    }
}

// ============ Handlers ============

/// Point an alias back at its previous deployment
#[utoipa::path(
    post,
    path = "/api/aliases/{key}/rollback",
    params(
        ("key" = String, Path, description = "Alias key (hostname label)")
    ),
    responses(
        (status = 200, description = "Alias rolled back", body = AliasResponse),
        (status = 404, description = "Alias not found"),
        (status = 409, description = "No live previous deployment")
    ),
    tag = "Aliases"
)]
pub async fn rollback_alias(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> AppResult<Json<AliasResponse>> {
    let alias = AliasService::rollback(&state, &key).await?;
    Ok(Json(alias.into()))
}
