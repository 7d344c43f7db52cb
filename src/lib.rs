pub mod config;
pub mod server;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use config::AppConfig;
use server::AppState;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

const DEFAULT_LOG_FILTER: &str = "pluto_channels_lib=info,pluto_channels=info,tower_http=info";

pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Runs the guide scheduler and HTTP server until Ctrl+C.
pub async fn run() -> Result<(), BoxError> {
    init_tracing();
    let config = AppConfig::from_env();
    info!(
        data_dir = %config.data_dir.display(),
        output_dir = %config.output_dir.display(),
        "starting pluto-channels {}",
        env!("CARGO_PKG_VERSION")
    );

    let listener = server::bind_listener(config.port).await?;
    let port = listener.local_addr()?.port();
    let state = Arc::new(AppState::new(&config, port).await?);

    let shutdown = CancellationToken::new();

    // ── Guide scheduler ────────────────────────────────────────────────────
    let scheduler = state.scheduler.clone();
    let scheduler_shutdown = shutdown.clone();
    let scheduler_task = tokio::spawn(async move { scheduler.run(scheduler_shutdown).await });

    // ── Ctrl+C → cooperative shutdown ──────────────────────────────────────
    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for shutdown signal: {e}");
            return;
        }
        info!("shutdown requested");
        signal_shutdown.cancel();
    });

    server::start_server(state, listener, shutdown.clone()).await;
    shutdown.cancel();
    if let Err(e) = scheduler_task.await {
        warn!("scheduler task ended abnormally: {e}");
    }
    Ok(())
}
