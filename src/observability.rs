//! Observability for Scribe: logging and metrics.

use metrics::gauge;
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::ObservabilityConfig;
use crate::error::{Result, ScribeError};

/// Initialize logging from config. `RUST_LOG` wins over the configured
/// level when set.
pub fn init(config: &ObservabilityConfig) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| ScribeError::Internal(format!("Failed to init logging: {}", e)))?;
    } else {
        subscriber
            .with(fmt::layer())
            .try_init()
            .map_err(|e| ScribeError::Internal(format!("Failed to init logging: {}", e)))?;
    }

    info!("Observability initialized");
    Ok(())
}

/// Run the Prometheus metrics server.
pub async fn run_metrics_server(config: ObservabilityConfig) -> Result<()> {
    let builder = PrometheusBuilder::new();

    let handle = builder
        .install_recorder()
        .map_err(|e| ScribeError::Internal(format!("Failed to install metrics recorder: {}", e)))?;

    register_metrics();

    let app = axum::Router::new().route(
        "/metrics",
        axum::routing::get(move || async move { handle.render() }),
    );

    let listener = TcpListener::bind(config.metrics_addr).await?;
    info!(addr = %config.metrics_addr, "Metrics server listening");

    axum::serve(listener, app)
        .await
        .map_err(|e| ScribeError::Network(e.to_string()))?;

    Ok(())
}

/// Register standard metrics.
fn register_metrics() {
    gauge!("scribe_sessions_active").set(0.0);
    gauge!("scribe_clients_connected").set(0.0);
    gauge!("scribe_registry_sessions").set(0.0);
}
