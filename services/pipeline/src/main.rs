use anyhow::{Context, Result};
use imageviewer_pipeline::aws::load_sdk_config;
use imageviewer_pipeline::{
    LabelingWorker, NotificationQueue, PipelineConfig, RekognitionClassifier, S3ObjectStore,
    SqsNotificationQueue, WorkerSettings,
};
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let mut config = PipelineConfig::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    config.apply_min_confidence_override();

    info!(
        service = %config.service.name,
        bucket = %config.aws.bucket,
        queue_url = %config.queue.queue_url,
        "Starting ImageViewer labeling worker"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    let sdk_config = load_sdk_config(&config.aws).await;

    let store = Arc::new(
        S3ObjectStore::new(&sdk_config, &config.aws).context("Failed to initialize object store")?,
    );
    let queue = Arc::new(
        SqsNotificationQueue::new(&sdk_config, &config.queue.queue_url)
            .context("Failed to initialize notification queue")?,
    );
    let classifier = Arc::new(RekognitionClassifier::new(&sdk_config));

    let mut worker = LabelingWorker::new(queue, store, classifier, WorkerSettings::from(&config));

    if let Some(ref dead_letter_url) = config.queue.dead_letter_queue_url {
        let dead_letter: Arc<dyn NotificationQueue> = Arc::new(
            SqsNotificationQueue::new(&sdk_config, dead_letter_url)
                .context("Failed to initialize dead-letter queue")?,
        );
        worker = worker.with_dead_letter_queue(dead_letter);
    }

    let shutdown = CancellationToken::new();

    // Spawn worker task
    let worker_handle = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { worker.run(shutdown).await }
    });

    info!("Labeling worker started successfully");

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutting down labeling worker");
    shutdown.cancel();

    if let Err(e) = worker_handle.await {
        error!(error = %e, "Labeling worker task failed");
    }

    info!("Labeling worker stopped");

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
