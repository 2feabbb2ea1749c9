use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use forma_collab::{ExtractionApi, RenderApi};
use forma_core::collaborators::{Extractor, Renderer};
use forma_db::{JobStore, PgJobStore};
use forma_events::EventBus;
use forma_pipeline::Orchestrator;
use forma_worker::events::EventLogger;
use forma_worker::{JobDispatcher, WorkerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let fmt_layer = if json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "forma_worker=debug,forma_pipeline=debug".into()),
        )
        .with(fmt_layer)
        .init();

    let config = WorkerConfig::from_env().context("Invalid worker configuration")?;
    tracing::info!(
        worker = %config.worker_name,
        max_concurrent_jobs = config.max_concurrent_jobs,
        "Worker starting",
    );

    // --- Database ---
    let pool = forma_db::create_pool(&config.database_url, config.db_max_connections)
        .await
        .context("Failed to connect to database")?;
    forma_db::health_check(&pool)
        .await
        .context("Database health check failed")?;
    tracing::info!("Database connection established");

    forma_db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!("Database migrations applied");

    // --- Collaborators ---
    let extractor = ExtractionApi::new(&config.extraction_url, config.collab_timeout)
        .context("Failed to build extraction client")?;
    let renderer = RenderApi::new(&config.render_url, config.collab_timeout)
        .context("Failed to build render client")?;

    // --- Pipeline ---
    let store: Arc<dyn JobStore> = Arc::new(PgJobStore::new(pool));
    let event_bus = Arc::new(EventBus::default());
    let orchestrator = Orchestrator::new(
        Arc::clone(&store),
        Arc::clone(&event_bus),
        Arc::new(extractor) as Arc<dyn Extractor>,
        Arc::new(renderer) as Arc<dyn Renderer>,
        config.pipeline_settings(),
    )
    .context("Failed to build pipeline")?;

    let cancel = CancellationToken::new();

    let logger_handle = tokio::spawn(EventLogger::run(event_bus.subscribe(), cancel.clone()));

    let dispatcher = JobDispatcher::new(
        store,
        orchestrator.runner(),
        config.max_concurrent_jobs,
        config.poll_interval,
    );
    let dispatcher_cancel = cancel.clone();
    let dispatcher_handle = tokio::spawn(async move { dispatcher.run(dispatcher_cancel).await });

    shutdown_signal().await;

    // --- Shutdown ---
    cancel.cancel();
    if tokio::time::timeout(Duration::from_secs(30), dispatcher_handle)
        .await
        .is_err()
    {
        tracing::warn!("Dispatcher did not stop within 30s");
    }
    let _ = tokio::time::timeout(Duration::from_secs(5), logger_handle).await;

    tracing::info!("Worker stopped");
    Ok(())
}

/// Wait for SIGINT or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
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
        () = ctrl_c => tracing::info!("Received SIGINT, shutting down"),
        () = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}
