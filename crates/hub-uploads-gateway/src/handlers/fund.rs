//! Funding handler

use crate::{ApiError, AppState, ErrorBody};
use axum::{
    Json,
    extract::{Path, State},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};
use utoipa::ToSchema;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct FundResponse {
    /// Amount paid, in the backend token's atomic unit, as a decimal string
    pub price: String,
}

/// Parse the byte count of a funding request
///
/// Only plain ascii digits are accepted: no sign, no whitespace, no exponent.
pub fn parse_byte_count(raw: &str) -> Result<u64, ApiError> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ApiError::invalid(format!(
            "byte count must be a positive integer, got {:?}",
            raw
        )));
    }

    let bytes: u64 = raw
        .parse()
        .map_err(|_| ApiError::invalid(format!("byte count {} is out of range", raw)))?;

    if bytes == 0 {
        return Err(ApiError::invalid("byte count must be greater than zero"));
    }

    Ok(bytes)
}

/// POST /fund/{bytes} - Pre-pay storage for a number of bytes
#[utoipa::path(
    post,
    path = "/fund/{bytes}",
    tag = "funding",
    summary = "Fund storage",
    description = "Quotes the price of storing `bytes` bytes and pays it from the gateway's wallet. \
Every call moves funds.",
    params(
        ("bytes" = String, Path, description = "Number of bytes to pay for (positive integer)")
    ),
    responses(
        (status = 200, description = "Funding submitted", body = FundResponse),
        (status = 400, description = "Byte count is not a positive integer", body = ErrorBody),
        (status = 501, description = "The configured backend has no funding", body = ErrorBody),
        (status = 502, description = "The storage backend failed", body = ErrorBody)
    )
)]
pub async fn fund(
    State(state): State<Arc<AppState>>,
    Path(raw): Path<String>,
) -> Result<Json<FundResponse>, ApiError> {
    let bytes = parse_byte_count(&raw)?;

    match state.uploader.fund(bytes).await {
        Ok(price) => {
            info!(
                backend = state.uploader.backend(),
                bytes,
                price = %price,
                "Funding completed"
            );
            Ok(Json(FundResponse {
                price: price.to_string(),
            }))
        }
        Err(e) => {
            error!(
                backend = state.uploader.backend(),
                bytes,
                error = %e,
                "Funding failed"
            );
            Err(ApiError::Fund(e))
        }
    }
}
