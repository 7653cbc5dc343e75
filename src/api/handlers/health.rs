use crate::AppState;
use axum::{Json, extract::State, response::IntoResponse};
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    /// `ready` when the upload folder exists, `missing` otherwise
    pub staging_status: String,
    pub staged_files: usize,
    pub model: String,
    pub version: String,
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service health status", body = HealthResponse)
    ),
    tag = "system"
)]
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let staging_status = match tokio::fs::metadata(state.staging.root()).await {
        Ok(meta) if meta.is_dir() => "ready",
        _ => "missing",
    };

    Json(HealthResponse {
        status: "ok".to_string(),
        staging_status: staging_status.to_string(),
        staged_files: state.staging.count().await,
        model: state.extractor.model_name().to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

pub async fn index() -> &'static str {
    "Image extraction service is live."
}
