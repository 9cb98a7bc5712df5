/*
 * Responsibility
 * - /api/v0/{identities,clients,roles,groups,schemas,rules} の CRUD handler (kind ごとに共通)
 * - 単体 route の認可は middleware 済み、一覧は item ごとに worker pool で filter
 */
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde_json::Value;

use crate::error::AppError;
use crate::middleware::auth::authorization::filter_collection;
use crate::services::auth::Principal;
use crate::services::authz::Relation;
use crate::services::resources::ResourceKind;
use crate::state::AppState;

pub async fn list(
    kind: ResourceKind,
    State(state): State<AppState>,
    principal: Principal,
) -> Result<Json<Vec<Value>>, AppError> {
    let items = state.store.list(kind).await?;

    let candidates: Vec<(String, Value)> = items
        .into_iter()
        .filter_map(|item| match kind.item_id(&item) {
            Some(id) => Some((id, item)),
            None => {
                // Items without an id can never be authorized
                tracing::warn!(kind = kind.collection(), "upstream item without id dropped");
                None
            }
        })
        .collect();

    let total = candidates.len();
    let allowed =
        filter_collection(&state.authz, &principal, kind, Relation::CanView, candidates).await?;
    tracing::debug!(
        kind = kind.collection(),
        total,
        allowed = allowed.len(),
        "collection filtered"
    );

    Ok(Json(allowed))
}

pub async fn get(
    kind: ResourceKind,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    Ok(Json(state.store.get(kind, &id).await?))
}

pub async fn create(
    kind: ResourceKind,
    State(state): State<AppState>,
    Json(item): Json<Value>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let created = state.store.create(kind, item).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn update(
    kind: ResourceKind,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(item): Json<Value>,
) -> Result<Json<Value>, AppError> {
    Ok(Json(state.store.update(kind, &id, item).await?))
}

pub async fn delete(
    kind: ResourceKind,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.store.delete(kind, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}
