//! Prometheus metrics endpoint.
//!
//! Installs the global recorder and serves the scrape endpoint plus a
//! health probe over HTTP.

use axum::{Router, extract::State, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use snafu::prelude::*;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::error;

use crate::error::{MetricsError, PrometheusInitSnafu};

/// Install the Prometheus recorder and start the metrics HTTP server.
///
/// The server exposes:
/// - `/metrics` - Prometheus metrics in text format
/// - `/health` - liveness probe (returns 200 OK)
///
/// # Example
///
/// ```ignore
/// let addr = "0.0.0.0:9090".parse()?;
/// starling::metrics::init(addr)?;
/// ```
pub fn init(addr: SocketAddr) -> Result<(), MetricsError> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .context(PrometheusInitSnafu)?;

    // Serve scrapes in the background for the life of the process
    tokio::spawn(run_server(addr, handle));

    Ok(())
}

async fn run_server(addr: SocketAddr, handle: PrometheusHandle) {
    let app = Router::new()
        .route("/metrics", get(render_metrics))
        .route("/health", get(health))
        .with_state(handle);

    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Could not bind metrics endpoint on {}: {}", addr, e);
            return;
        }
    };

    if let Err(e) = axum::serve(listener, app).await {
        error!("Metrics endpoint failed: {}", e);
    }
}

async fn render_metrics(State(handle): State<PrometheusHandle>) -> String {
    handle.render()
}

async fn health() -> &'static str {
    "ok\n"
}
