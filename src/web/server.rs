use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tower_http::services::ServeDir;

use crate::backend::Backend;
use crate::session::SessionManager;

/// State shared across all web request handlers
pub struct WebState<B> {
    pub sessions: Arc<SessionManager<B>>,
    pub title: String,
}

/// Create the axum router. Anything not routed explicitly is served from `www`.
pub fn create_router<B: Backend>(state: Arc<WebState<B>>, www: &Path) -> Router {
    Router::new()
        .merge(super::api::api_routes())
        .merge(super::websocket::ws_routes())
        .merge(super::assets::asset_routes())
        .fallback_service(ServeDir::new(www))
        .with_state(state)
}

/// Serve until `signal` resolves, then drain every session before returning.
pub async fn start_web_server<B, F>(
    listen: &str,
    www: &Path,
    state: Arc<WebState<B>>,
    signal: F,
) -> Result<()>
where
    B: Backend,
    F: Future<Output = ()> + Send + 'static,
{
    let shutdown = state.sessions.shutdown().clone();
    let app = create_router(state, www);

    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .with_context(|| format!("Failed to bind {}", listen))?;

    tracing::info!(addr = %listen, www = %www.display(), "Web server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            signal.await;
            shutdown.shutdown().await;
        })
        .await?;

    tracing::info!("Web server stopped");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Couldn't listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Couldn't listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    tracing::trace!(signals = ?["SIGINT", "SIGTERM"], "Listening for signals");

    tokio::select! {
        _ = interrupt => tracing::info!(signal = "SIGINT", "Terminating"),
        _ = terminate => tracing::info!(signal = "SIGTERM", "Terminating"),
    }
}
