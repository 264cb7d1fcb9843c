//! Upload latency metrics and the Prometheus exporter
//!
//! Upload durations land in a histogram labelled by outcome. The registry is
//! served on its own port and reverse-proxied by the gateway at `/metrics`.

use axum::{Router, http::header, response::IntoResponse, routing::get};
use prometheus::{Encoder, HistogramOpts, HistogramVec, Registry, TextEncoder};
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tracing::info;

/// Histogram of upload durations in milliseconds
pub const UPLOAD_TIME_METRIC: &str = "hub_uploads_file_upload_time";

/// Bucket boundaries (ms)
pub const UPLOAD_TIME_BUCKETS: [f64; 5] = [100.0, 200.0, 400.0, 800.0, 1600.0];

/// Outcome label of an upload observation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStatus {
    Completed,
    Failed,
}

impl UploadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }
}

/// Upload metrics backed by a dedicated Prometheus registry
#[derive(Clone)]
pub struct UploadMetrics {
    registry: Registry,
    upload_time: HistogramVec,
}

impl UploadMetrics {
    /// Create the instruments and register them
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let upload_time = HistogramVec::new(
            HistogramOpts::new(UPLOAD_TIME_METRIC, "Time for file upload (ms)")
                .buckets(UPLOAD_TIME_BUCKETS.to_vec()),
            &["status"],
        )?;
        registry.register(Box::new(upload_time.clone()))?;

        Ok(Self {
            registry,
            upload_time,
        })
    }

    /// Record one upload duration
    pub fn observe(&self, status: UploadStatus, duration: Duration) {
        self.upload_time
            .with_label_values(&[status.as_str()])
            .observe(duration.as_secs_f64() * 1000.0);
    }

    /// Start timing an upload
    ///
    /// The returned timer records exactly once: on [`UploadTimer::finish`],
    /// or as `FAILED` if it is dropped unfinished.
    pub fn start_upload(&self) -> UploadTimer {
        UploadTimer {
            metrics: self.clone(),
            started: Instant::now(),
            finished: false,
        }
    }

    /// Number of observations recorded for `status`
    pub fn count(&self, status: UploadStatus) -> u64 {
        self.upload_time
            .with_label_values(&[status.as_str()])
            .get_sample_count()
    }

    /// Render the registry in Prometheus text format
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// Records an upload's duration when finished or dropped
pub struct UploadTimer {
    metrics: UploadMetrics,
    started: Instant,
    finished: bool,
}

impl UploadTimer {
    /// Record the outcome and return the elapsed time
    pub fn finish(mut self, status: UploadStatus) -> Duration {
        let elapsed = self.started.elapsed();
        self.metrics.observe(status, elapsed);
        self.finished = true;
        elapsed
    }
}

impl Drop for UploadTimer {
    fn drop(&mut self) {
        if !self.finished {
            self.metrics
                .observe(UploadStatus::Failed, self.started.elapsed());
        }
    }
}

/// Router of the standalone exporter
pub fn exporter_router(metrics: UploadMetrics) -> Router {
    Router::new().route(
        "/metrics",
        get(move || {
            let metrics = metrics.clone();
            async move {
                match metrics.render() {
                    Ok(body) => (
                        [(header::CONTENT_TYPE, TextEncoder::new().format_type().to_string())],
                        body,
                    )
                        .into_response(),
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to encode metrics");
                        axum::http::StatusCode::INTERNAL_SERVER_ERROR.into_response()
                    }
                }
            }
        }),
    )
}

/// Serve the exporter on an already bound listener
pub async fn serve_exporter(listener: TcpListener, metrics: UploadMetrics) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("Metrics exporter listening on http://{}/metrics", addr);
    }
    axum::serve(listener, exporter_router(metrics)).await
}
