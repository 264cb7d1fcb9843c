//! Liveness check

use axum::Json;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    /// Always `ok`
    pub status: String,
}

/// GET /health
#[utoipa::path(
    get,
    path = "/health",
    tag = "service",
    summary = "Liveness check",
    responses(
        (status = 200, description = "The process is up", body = HealthResponse)
    )
)]
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}
