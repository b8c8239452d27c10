use anyhow::{Context, Result};
use imageviewer_pipeline::aws::load_sdk_config;
use imageviewer_pipeline::{S3ObjectStore, SqsNotificationQueue};
use imageviewer_storage::{serve_until_signal, AppState, Config};
use std::sync::Arc;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        bucket = %config.aws.bucket,
        "Starting ImageViewer storage API"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    // Initialize components
    let sdk_config = load_sdk_config(&config.aws).await;

    let store = Arc::new(
        S3ObjectStore::new(&sdk_config, &config.aws).context("Failed to initialize object store")?,
    );
    let queue = Arc::new(
        SqsNotificationQueue::new(&sdk_config, &config.queue.queue_url)
            .context("Failed to initialize notification queue")?,
    );

    // Create API state
    let api_state = AppState::new(store, queue, config.presigned_url_expiry());

    // Serve until a shutdown signal, or fail if the server stops on its own
    serve_until_signal(api_state, config.api.clone(), shutdown_signal())
        .await
        .context("Storage API terminated")?;

    info!("Storage API stopped");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();

    builder
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
