//! Startup helpers for the live desk server.

use std::process::ExitCode;

use crate::config::DeskConfig;
use crate::server::{self, AppState};

/// Install the `tracing` subscriber used by the binaries.
///
/// Honors `RUST_LOG`, with `info` as the default level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .try_init();
}

/// Run the desk server (used by the `livedesk` binary).
///
/// # Returns
/// `ExitCode::SUCCESS` on graceful shutdown, `1` on failure.
#[must_use]
pub fn run() -> ExitCode {
    init_tracing();
    tracing::info!("Starting live desk v{}", env!("CARGO_PKG_VERSION"));

    let config = match DeskConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Invalid configuration: {e}");
            return ExitCode::from(1);
        }
    };
    tracing::info!(
        private_api = %config.endpoints.private_api_url,
        public_api = %config.endpoints.public_api_url,
        "Backend endpoints"
    );

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("Failed to create runtime: {e}");
            return ExitCode::from(1);
        }
    };

    if let Err(e) = rt.block_on(serve_desk(config)) {
        tracing::error!("Server error: {e}");
        return ExitCode::from(1);
    }

    ExitCode::SUCCESS
}

async fn serve_desk(config: DeskConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let port = config.server.port;
    let (state, poller) = AppState::from_config(config).await?;
    let poller_shutdown = poller.shutdown_notifier();
    let poller_task = poller.spawn();

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to listen for shutdown signal: {e}");
            std::future::pending::<()>().await;
        }
        tracing::info!("Shutdown requested");
    };
    let served = server::serve(state, port, shutdown).await;

    poller_shutdown.notify_one();
    if let Err(e) = poller_task.await {
        tracing::warn!("Poller task ended abnormally: {e}");
    }
    served
}
