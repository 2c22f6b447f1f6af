use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use reelsmith_cloud::{ResultPublisher, S3ObjectStore};
use reelsmith_pipeline::{
    BundledModel, ModelLocator, ModelResolver, PipelineLoader, PipelineManager, ProgressSink,
    SmokeLoader, WorkerProcessLoader,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use reelsmith_worker::app::build_app_router;
use reelsmith_worker::config::{LogFormat, PipelineBackend, WorkerConfig};
use reelsmith_worker::handler::JobHandler;
use reelsmith_worker::progress::{FanoutProgressSink, TracingProgressSink, WebhookProgressSink};
use reelsmith_worker::staging::AssetStager;
use reelsmith_worker::state::AppState;

const DEFAULT_LOG_FILTER: &str =
    "reelsmith_worker=debug,reelsmith_pipeline=debug,reelsmith_cloud=info,tower_http=info";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = WorkerConfig::from_env().context("Failed to load configuration")?;
    init_tracing(config.log_format);

    tokio::fs::create_dir_all(&config.work_dir)
        .await
        .with_context(|| format!("Failed to create work dir {}", config.work_dir.display()))?;

    // --- Storage ---
    let store = Arc::new(S3ObjectStore::connect(config.storage.clone()).await);
    let publisher = ResultPublisher::new(store)
        .with_prefix(&config.upload_prefix)
        .with_expiry(Duration::from_secs(config.presign_expiry_secs));

    // --- Pipeline ---
    let (resolver, loader) = pipeline_parts(&config);
    let manager = Arc::new(PipelineManager::new(resolver, loader));

    // --- Progress ---
    let mut progress = FanoutProgressSink::new().with(Arc::new(TracingProgressSink));
    if let Some(url) = &config.progress_webhook_url {
        let webhook = WebhookProgressSink::new(url.as_str())
            .context("Failed to build progress webhook client")?;
        progress = progress.with(Arc::new(webhook));
        tracing::info!(%url, "Progress webhook enabled");
    }
    let progress: Arc<dyn ProgressSink> = Arc::new(progress);

    let stager = AssetStager::new(&config.work_dir).context("Failed to build asset stager")?;
    let handler = Arc::new(
        JobHandler::new(Arc::clone(&manager), stager, publisher, &config.work_dir)
            .with_progress(progress),
    );

    // Load the model before the first job arrives. Jobs wait on the lease.
    let warmup = Arc::clone(&manager);
    tokio::spawn(async move {
        match warmup.acquire().await {
            Ok(lease) => tracing::info!(instance = lease.instance_id(), "Pipeline warmed up"),
            Err(e) => tracing::error!(error = %e, "Pipeline warm-up failed, will retry on first job"),
        }
    });

    let app = build_app_router(
        AppState::new(handler),
        Duration::from_secs(config.request_timeout_secs),
    );

    let host = config
        .host
        .parse::<IpAddr>()
        .with_context(|| format!("Invalid HOST {:?}", config.host))?;
    let addr = SocketAddr::new(host, config.port);
    tracing::info!(%addr, "Starting worker");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Server stopped accepting connections, cleaning up");
    manager.shutdown().await;
    tracing::info!("Shutdown complete");

    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

fn pipeline_parts(config: &WorkerConfig) -> (Arc<dyn ModelResolver>, Arc<dyn PipelineLoader>) {
    match &config.backend {
        PipelineBackend::Script { python, script } => {
            let model = &config.model;
            let locator = ModelLocator::new(
                model.search_paths.clone(),
                model.filename.clone(),
                model.model_id.clone(),
                model.registry_url.clone(),
                model.cache_dir.clone(),
            )
            .with_fallback(model.fallback_model_id.clone())
            .with_checksum(model.sha256.clone());
            tracing::info!(
                python = %python.display(),
                script = %script.display(),
                model_id = %model.model_id,
                "Using worker-process pipeline",
            );
            (
                Arc::new(locator),
                Arc::new(WorkerProcessLoader::new(python.clone(), script.clone())),
            )
        }
        PipelineBackend::Smoke => {
            let output_root: PathBuf = config.work_dir.join("outputs");
            tracing::info!(output_root = %output_root.display(), "Using smoke pipeline");
            (
                Arc::new(BundledModel),
                Arc::new(SmokeLoader::new("ffmpeg", output_root)),
            )
        }
    }
}

/// Wait for SIGINT (Ctrl-C) or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
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
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
