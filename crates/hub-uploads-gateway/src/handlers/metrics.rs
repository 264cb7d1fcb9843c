//! Metrics proxy
//!
//! The exporter listens on its own port; `/metrics` on the API port relays it
//! so a single ingress can expose both.

use crate::{ApiError, AppState};
use axum::{
    extract::State,
    http::{HeaderValue, header},
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::warn;

const DEFAULT_METRICS_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// GET /metrics
#[utoipa::path(
    get,
    path = "/metrics",
    tag = "service",
    summary = "Prometheus metrics",
    responses(
        (status = 200, description = "Metrics in Prometheus text format", body = String, content_type = "text/plain"),
        (status = 502, description = "The metrics exporter is unreachable", body = crate::ErrorBody)
    )
)]
pub async fn metrics(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let url = state.metrics_url.as_str();

    let upstream = state.http.get(url).send().await.map_err(|e| {
        warn!(url = %url, error = %e, "Metrics exporter unreachable");
        ApiError::metrics_unavailable()
    })?;

    if !upstream.status().is_success() {
        warn!(url = %url, status = %upstream.status(), "Metrics exporter returned an error");
        return Err(ApiError::metrics_unavailable());
    }

    let content_type = upstream
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| HeaderValue::from_bytes(v.as_bytes()).ok())
        .unwrap_or_else(|| HeaderValue::from_static(DEFAULT_METRICS_CONTENT_TYPE));

    let body = upstream.bytes().await.map_err(|e| {
        warn!(url = %url, error = %e, "Failed to read metrics exporter response");
        ApiError::metrics_unavailable()
    })?;

    Ok(([(header::CONTENT_TYPE, content_type)], body).into_response())
}
