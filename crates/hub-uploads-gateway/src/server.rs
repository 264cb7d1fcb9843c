//! Server startup and lifecycle

use crate::{AppState, GatewayConfig, metrics, routes};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

/// Run server with graceful shutdown
///
/// The metrics exporter is bound first so that the proxied `/metrics` route
/// points at the address it actually got.
pub async fn run_server_with_shutdown(
    mut config: GatewayConfig,
    shutdown_signal: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let metrics_listener = TcpListener::bind(config.metrics_bind_addr()).await?;
    let metrics_addr = metrics_listener.local_addr()?;
    config.metrics_port = metrics_addr.port();

    let state = Arc::new(AppState::new(config.clone())?.with_metrics_addr(metrics_addr));

    let exporter = tokio::spawn(metrics::serve_exporter(
        metrics_listener,
        state.metrics.clone(),
    ));

    let app = routes::create_router(state);

    let addr = config.bind_addr();
    let listener = TcpListener::bind(&addr).await?;

    info!("hub-uploads listening on http://{}", listener.local_addr()?);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await;

    exporter.abort();
    if let Err(e) = &served {
        error!(error = %e, "Gateway server failed");
    }
    served?;

    info!("Gateway shutdown complete");

    Ok(())
}
