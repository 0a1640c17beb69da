use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use mediacache::MediaStore;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use fetcher::config::AppConfig;
use fetcher::delivery::ChatClient;
use fetcher::notify::ReleaseNotifier;
use fetcher::orchestrator::Orchestrator;
use fetcher::routes_jobs::router;
use fetcher::state::AppState;
use fetcher::telegram::TelegramClient;
use fetcher::worker_loop::run_worker_loop;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cfg = AppConfig::from_env()?;

    // --- SQLite (cache + history) ---
    let store = MediaStore::open(&cfg.database_path)
        .await
        .with_context(|| format!("Failed to open database at {}", cfg.database_path.display()))?;
    store.ping().await.context("Database ping failed")?;
    info!(path=%cfg.database_path.display(), "database: ok");

    tokio::fs::create_dir_all(&cfg.pipeline.download_dir)
        .await
        .context("Failed to create download directory")?;

    // --- Chat platform, connected lazily on first use ---
    let telegram = Arc::new(TelegramClient::new(cfg.telegram_api_url.clone(), cfg.bot_token.clone()));
    if cfg.pipeline.backup_channel.is_none() {
        warn!("BACKUP_CHANNEL_ID not set: archiving and cache population disabled");
    }
    let chat: Arc<dyn ChatClient> = telegram;

    let cache = store.cache(chrono::Duration::days(cfg.cache_retention_days));
    let history = store.history(cfg.history_limit);
    let notifier = ReleaseNotifier::new(cfg.release_webhook_url.clone(), cfg.api_secret.clone());
    let orchestrator = Orchestrator::new(
        cfg.pipeline.clone(),
        cache,
        history.clone(),
        chat,
        notifier,
        cfg.queue_capacity,
    )?;

    let shutdown = CancellationToken::new();
    let worker = tokio::spawn(run_worker_loop(orchestrator.clone(), shutdown.clone()));

    let app_state = Arc::new(AppState::new(orchestrator, store, history, cfg.api_secret.clone()));
    let app = router(app_state);

    let addr = &cfg.bind_addr;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    println!("fetcher listening on http://{addr}");

    let stop = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            stop.cancel();
        })
        .await
        .context("HTTP server failed")?;

    shutdown.cancel();
    // A job mid-transfer is not waited on for long.
    let _ = tokio::time::timeout(Duration::from_secs(5), worker).await;
    info!("fetcher: stopped");
    Ok(())
}
