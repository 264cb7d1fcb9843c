//! OpenAPI document for the gateway API

use crate::error::{ErrorBody, ErrorDetail};
use crate::handlers;
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "hub-uploads",
        description = "Upload gateway in front of decentralized storage networks. \
Content is stored by the configured backend and served from the configured gateway."
    ),
    paths(
        handlers::health::health,
        handlers::uploads::upload,
        handlers::fund::fund,
        handlers::metrics::metrics,
    ),
    components(schemas(
        handlers::HealthResponse,
        handlers::UploadResponse,
        handlers::FundResponse,
        ErrorBody,
        ErrorDetail,
    )),
    tags(
        (name = "uploads", description = "Content uploads"),
        (name = "funding", description = "Storage pre-payment"),
        (name = "service", description = "Health and metrics"),
    )
)]
pub struct ApiDoc;
