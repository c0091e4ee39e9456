use anyhow::{Context, Result};
use aws_config::BehaviorVersion;
use gallery_service::api::{start_api_server, AppState};
use gallery_service::{
    Config, ModerationWorker, QueueConsumer, RekognitionAnalyzer, S3ObjectStore, SqsEventQueue,
    UploadCoordinator, UploadSettings,
};
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        bucket = %config.s3.bucket,
        "Starting Gallery Service"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    // One AWS configuration shared by every client
    let sdk_config = aws_config::defaults(BehaviorVersion::latest())
        .region(aws_config::Region::new(config.aws.region.clone()))
        .load()
        .await;

    let store = Arc::new(S3ObjectStore::new(&sdk_config, &config.s3));
    let shutdown = CancellationToken::new();
    let mut tasks = Vec::new();

    if config.api.enabled {
        let state = AppState {
            coordinator: Arc::new(UploadCoordinator::new(
                store.clone(),
                UploadSettings::from(&config),
            )),
        };
        let api_config = config.api.clone();
        let api_shutdown = shutdown.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = start_api_server(state, &api_config, api_shutdown).await {
                error!(error = %e, "API server error");
            }
        }));
    }

    if config.sqs.enabled {
        let analyzer = Arc::new(RekognitionAnalyzer::new(&sdk_config, &config.rekognition));
        let queue = Arc::new(
            SqsEventQueue::new(&sdk_config, &config.sqs)
                .context("Failed to initialize SQS queue")?,
        );
        let worker = Arc::new(ModerationWorker::new(
            store.clone(),
            analyzer,
            &config.moderation,
        ));
        let consumer = QueueConsumer::new(queue, worker);
        let consumer_shutdown = shutdown.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = consumer.run(consumer_shutdown).await {
                error!(error = %e, "Queue consumer error");
            }
        }));
    }

    if tasks.is_empty() {
        warn!("Neither the API nor the queue consumer is enabled");
        return Ok(());
    }

    info!("Gallery service started successfully");

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutting down gallery service");
    shutdown.cancel();

    for task in tasks {
        if let Err(e) = task.await {
            warn!(error = %e, "Task did not shut down cleanly");
        }
    }

    info!("Gallery service stopped");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
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
