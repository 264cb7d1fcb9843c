//! hub-uploads - upload gateway for decentralized storage

use clap::Parser;
use hub_uploads_gateway::{BackendKind, GatewayConfig, run_server_with_shutdown};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "hub-uploads")]
#[command(about = "Upload gateway for decentralized storage networks")]
#[command(version)]
struct Args {
    /// Host to bind to
    #[arg(short = 'H', long, default_value = "0.0.0.0", env = "HOST")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value = "3000", env = "PORT")]
    port: u16,

    /// Port of the Prometheus exporter
    #[arg(long, default_value = "9464", env = "METRICS_PORT")]
    metrics_port: u16,

    /// Gateway base URL stored content is served from
    #[arg(long, env = "GATEWAY_URL")]
    gateway_url: String,

    /// Storage backend: bundler (ANS-104 data items), w3up (ucanto
    /// store/add + upload/add) or memory
    #[arg(long, value_enum, default_value = "bundler", env = "STORAGE_BACKEND")]
    backend: BackendKind,

    /// Bundler node URL
    #[arg(long, default_value = "https://node1.irys.xyz", env = "BUNDLER_URL")]
    bundler_url: String,

    /// Bundler wallet key (JWK JSON)
    #[arg(long, env = "BUNDLER_KEY", hide_env_values = true)]
    bundler_key: Option<String>,

    /// Bundler payment token
    #[arg(long, default_value = "arweave", env = "BUNDLER_TOKEN")]
    bundler_token: String,

    /// Arweave gateway funding transfers are posted to
    #[arg(long, default_value = "https://arweave.net", env = "ARWEAVE_URL")]
    arweave_url: String,

    /// w3up service URL
    #[arg(long, default_value = "https://up.web3.storage", env = "W3_URL")]
    w3_url: String,

    /// w3up service DID
    #[arg(long, default_value = "did:web:web3.storage", env = "W3_SERVICE_DID")]
    w3_service_did: String,

    /// w3up agent signing key
    #[arg(long, env = "W3_KEY", hide_env_values = true)]
    w3_key: Option<String>,

    /// w3up space delegation (base64 CAR)
    #[arg(long, env = "W3_PROOF", hide_env_values = true)]
    w3_proof: Option<String>,

    /// Maximum upload size in bytes
    #[arg(long, default_value = "262144000", env = "MAX_FILE_SIZE")]
    max_file_size: u64,

    /// Timeout for storage backend requests, in seconds
    #[arg(long, default_value = "120", env = "BACKEND_TIMEOUT_SECS")]
    backend_timeout_secs: u64,

    /// Disable CORS headers
    #[arg(long, env = "HUB_NO_CORS")]
    no_cors: bool,

    /// Enable debug logging
    #[arg(short, long, env = "HUB_DEBUG")]
    debug: bool,

    /// Emit logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Setup logging
    let log_level = if args.debug { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "hub_uploads_gateway={level},hub_uploads_storage={level},tower_http={level}",
            level = log_level
        )
        .into()
    });
    let registry = tracing_subscriber::registry().with(filter);
    if args.log_json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    let config = GatewayConfig {
        host: args.host,
        port: args.port,
        metrics_port: args.metrics_port,
        gateway_url: args.gateway_url,
        backend: args.backend,
        bundler_url: args.bundler_url,
        bundler_key: args.bundler_key,
        bundler_token: args.bundler_token,
        arweave_url: args.arweave_url,
        w3_url: args.w3_url,
        w3_service_did: args.w3_service_did,
        w3_key: args.w3_key,
        w3_proof: args.w3_proof,
        max_file_size: args.max_file_size,
        backend_timeout_secs: args.backend_timeout_secs,
        cors_enabled: !args.no_cors,
    }
    .validated()?;

    tracing::info!(
        "Starting hub-uploads on {}:{} (metrics on port {})",
        config.host,
        config.port,
        config.metrics_port
    );
    tracing::info!("Gateway: {}", config.gateway_url);

    run_server_with_shutdown(config, shutdown_signal()).await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
