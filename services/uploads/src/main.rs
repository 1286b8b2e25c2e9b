use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uploads_service::api::{start_api_server, AppState};
use uploads_service::{
    AuditLog, Config, EdgeFunctionClient, PgRepository, RateLimiter, RemoteFunctionClient,
    S3ObjectStore, UploadPipeline,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        "Starting uploads service"
    );

    init_metrics(config.service.metrics_port)?;

    let repository = Arc::new(
        PgRepository::new(&config.database)
            .await
            .context("Failed to initialize repository")?,
    );

    if config.database.run_migrations {
        repository
            .run_migrations()
            .await
            .context("Failed to run database migrations")?;
    }

    let object_store = Arc::new(
        S3ObjectStore::new(&config.s3)
            .await
            .context("Failed to initialize object store")?,
    );

    let remote_function = Arc::new(
        RemoteFunctionClient::new(&config.remote, &config.uploads)
            .context("Failed to initialize remote function client")?,
    );
    let remote_edge = Arc::new(
        EdgeFunctionClient::new(&config.remote, &config.uploads)
            .context("Failed to initialize edge function client")?,
    );

    let pipeline = UploadPipeline::new(
        object_store.clone(),
        repository.clone(),
        repository.clone(),
        remote_function,
        remote_edge,
        &config.uploads,
    );

    let api_state = AppState {
        pipeline: Arc::new(pipeline),
        audit: AuditLog::new(repository.clone(), config.uploads.step_timeout()),
        repository,
        object_store,
        rate_limiter: Arc::new(RateLimiter::new(&config.rate_limit)),
        presigned_url_expiry: config.presigned_url_expiry(),
    };

    info!(
        max_image_size_bytes = config.uploads.max_image_size_bytes,
        window_ms = config.rate_limit.window_ms,
        "Uploads service started successfully"
    );

    start_api_server(api_state, &config.api, shutdown_signal())
        .await
        .context("API server error")?;

    info!("Uploads service stopped");

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

    info!(port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
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
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
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

    info!("Shutting down uploads service");
}
