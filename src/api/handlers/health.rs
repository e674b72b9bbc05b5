use crate::AppState;
use axum::{Json, extract::State, response::IntoResponse};
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub database: String,
    pub storage: String,
    pub version: String,
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "System health status", body = HealthResponse)
    ),
    tag = "system"
)]
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let db_status = if state.db.ping().await.is_ok() {
        "connected"
    } else {
        "disconnected"
    };

    let roots = state.file_store.roots();
    let storage_ready = match roots.resolve(roots.active_key()) {
        Ok(root) => tokio::fs::try_exists(root).await.unwrap_or(false),
        Err(_) => false,
    };
    let temp_ready = tokio::fs::try_exists(roots.temp_root())
        .await
        .unwrap_or(false);
    let storage_status = if storage_ready && temp_ready {
        "ready"
    } else {
        "missing"
    };

    Json(HealthResponse {
        status: "ok".to_string(),
        database: db_status.to_string(),
        storage: storage_status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
