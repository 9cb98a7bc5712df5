/*
 * Responsibility
 * - GET /api/v0/status (疎通用, allow-list)
 * - GET /api/v0/metrics (Prometheus text exposition)
 */
use axum::{
    Json,
    extract::State,
    http::{StatusCode, header},
    response::IntoResponse,
};
use serde_json::json;

use crate::state::AppState;

pub async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let pool = state.authz.pool().stats();
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION"),
            "authentication": state.authenticator.is_some(),
            "worker_pool": {
                "submitted": pool.submitted,
                "active": pool.active,
                "completed": pool.completed,
                "rejected": pool.rejected,
            },
        })),
    )
}

pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.obs.render(),
    )
}
