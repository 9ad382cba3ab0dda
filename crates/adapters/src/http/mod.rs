//! Prometheus metrics endpoint.

use std::future::Future;
use std::io;
use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::routing::get;
use infrastructure::metrics::AgentMetrics;
use tracing::info;

const OPENMETRICS_CONTENT_TYPE: &str = "application/openmetrics-text; version=1.0.0; charset=utf-8";

/// Serve the encoded metrics registry at `path` until `shutdown`
/// resolves.
pub async fn run_metrics_server(
    metrics: Arc<AgentMetrics>,
    listen: &str,
    path: &str,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> io::Result<()> {
    let app = Router::new()
        .route(path, get(render_metrics))
        .with_state(metrics);

    let listener = tokio::net::TcpListener::bind(listen).await?;
    info!(listen, path, "metrics endpoint listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}

async fn render_metrics(
    State(metrics): State<Arc<AgentMetrics>>,
) -> ([(axum::http::HeaderName, &'static str); 1], String) {
    ([(CONTENT_TYPE, OPENMETRICS_CONTENT_TYPE)], metrics.encode())
}
