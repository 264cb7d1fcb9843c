//! HTTP middleware

use axum::{
    body::Body,
    http::{HeaderName, HeaderValue, Request},
    middleware::Next,
    response::Response,
};

/// Response header carrying the request id
pub static REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

/// Request ID extension
#[derive(Clone, Debug)]
pub struct RequestId(pub String);

/// Request ID middleware - adds x-request-id header
pub async fn request_id_middleware(mut request: Request<Body>, next: Next) -> Response {
    let request_id = uuid::Uuid::new_v4().to_string();
    request
        .extensions_mut()
        .insert(RequestId(request_id.clone()));

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response
            .headers_mut()
            .insert(REQUEST_ID_HEADER.clone(), value);
    }
    response
}

/// Logging middleware
pub async fn logging_middleware(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let request_id = request
        .extensions()
        .get::<RequestId>()
        .map(|id| id.0.clone())
        .unwrap_or_default();
    let start = std::time::Instant::now();

    let response = next.run(request).await;

    tracing::info!(
        request_id = %request_id,
        method = %method,
        uri = %uri,
        status = %response.status().as_u16(),
        duration_ms = %start.elapsed().as_millis(),
        "Request completed"
    );

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, middleware as axum_middleware, routing::get};
    use axum_test::TestServer;

    #[tokio::test]
    async fn test_request_id_header() {
        let app = Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(axum_middleware::from_fn(logging_middleware))
            .layer(axum_middleware::from_fn(request_id_middleware));
        let server = TestServer::new(app).unwrap();

        let first = server.get("/").await;
        let second = server.get("/").await;

        let first_id = first.header("x-request-id");
        let second_id = second.header("x-request-id");
        assert!(uuid::Uuid::parse_str(first_id.to_str().unwrap()).is_ok());
        assert_ne!(first_id, second_id);
    }
}
