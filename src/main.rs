use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use lessonbook::clock::SystemClock;
use lessonbook::config::Config;
use lessonbook::engine::{Engine, InMemoryStore, Stores};
use lessonbook::http::{self, AppState};
use lessonbook::model::LessonCatalog;
use lessonbook::notify::NotifyHub;
use lessonbook::profiles::InMemoryProfiles;
use lessonbook::reaper;
use lessonbook::webhook::{StripeSignatureVerifier, WebhookProcessor};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env()?;
    lessonbook::observability::init(config.metrics_port);

    std::fs::create_dir_all(&config.data_dir)?;
    let store = Arc::new(InMemoryStore::open(&config.journal_path())?);
    let engine = Arc::new(Engine::new(
        Stores::in_memory(store.clone()),
        LessonCatalog::standard(),
        config.zone,
        Arc::new(SystemClock),
    ));

    if config.webhook_secret.is_none() {
        tracing::warn!("STRIPE_WEBHOOK_SECRET not set; every webhook will be rejected");
    }
    let webhooks = Arc::new(WebhookProcessor::new(
        engine.clone(),
        Arc::new(StripeSignatureVerifier::new(config.webhook_secret.clone())),
        Arc::new(InMemoryProfiles::new()),
        Arc::new(NotifyHub::new()),
    ));

    let sync = tokio::spawn(reaper::run_status_sync(engine.clone(), config.sync_interval));
    let compactor = tokio::spawn(reaper::run_compactor(store.clone(), config.compact_threshold));

    let addr = config.listen_addr();
    let listener = TcpListener::bind(&addr).await?;
    info!("lessonbook listening on {addr}");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  utc offset: {}", config.zone.offset());
    info!("  status sync every {}s", config.sync_interval.as_secs());
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    http::serve(listener, AppState::new(engine, webhooks), shutdown_signal()).await?;

    sync.abort();
    compactor.abort();
    info!("lessonbook stopped");
    Ok(())
}

/// Resolves on ctrl-c or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    };
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                tracing::error!("failed to register SIGTERM handler: {e}");
                ctrl_c.await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await;
    }
    info!("shutdown signal received, draining requests");
}
