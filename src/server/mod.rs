//! Local HTTP surface of the supervisor desk.
//!
//! A desk UI renders from these endpoints:
//! - `GET /api/conversations`: active list published by the poller
//! - `POST /api/conversations/{id}/open`: open one conversation live
//! - `/api/live/*`: view, takeover, supervisor messages, finalize, close

pub mod routes;
pub mod state;

pub use routes::create_router;
pub use state::{AppState, OpenConversation};

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Router with the desk routes, permissive CORS and request tracing.
pub fn desk_app(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    create_router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Serve the desk on `port` until `shutdown_signal` completes.
///
/// # Errors
/// Returns an error if the listener cannot be bound or the server fails.
pub async fn serve<F>(
    state: Arc<AppState>,
    port: u16,
    shutdown_signal: F,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "Live desk listening");

    axum::serve(listener, desk_app(state))
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    Ok(())
}
