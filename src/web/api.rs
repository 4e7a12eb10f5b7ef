use std::sync::Arc;

use axum::extract::State;
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use serde::Serialize;

use super::server::WebState;
use crate::backend::Backend;

/// API routes
pub fn api_routes<B: Backend>() -> Router<Arc<WebState<B>>> {
    Router::new().route("/api/status", get(status::<B>))
}

#[derive(Debug, Serialize)]
pub struct Status {
    pub active: usize,
    /// `null` when unbounded
    pub capacity: Option<usize>,
    pub shutting_down: bool,
}

async fn status<B: Backend>(State(state): State<Arc<WebState<B>>>) -> Json<Status> {
    let registry = state.sessions.registry();
    Json(Status {
        active: registry.len(),
        capacity: registry.capacity(),
        shutting_down: state.sessions.shutdown().is_triggered(),
    })
}
