use std::sync::Arc;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;

use super::server::WebState;
use super::transport;
use crate::backend::Backend;

pub fn ws_routes<B: Backend>() -> Router<Arc<WebState<B>>> {
    Router::new().route("/v1", get(ws_handler::<B>))
}

async fn ws_handler<B: Backend>(
    State(state): State<Arc<WebState<B>>>,
    ws: WebSocketUpgrade,
) -> Response {
    // Sessions would be refused anyway; don't bother upgrading.
    if state.sessions.shutdown().is_triggered() {
        return (StatusCode::SERVICE_UNAVAILABLE, "Shutting down").into_response();
    }

    ws.on_upgrade(move |socket| handle_socket(socket, state))
        .into_response()
}

async fn handle_socket<B: Backend>(socket: WebSocket, state: Arc<WebState<B>>) {
    tracing::debug!("WebSocket connected");

    let (reader, writer) = transport::split(socket);
    state.sessions.serve(reader, writer).await;

    tracing::debug!("WebSocket disconnected");
}
