use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use rust_embed::Embed;

use super::server::WebState;
use crate::backend::Backend;

#[derive(Embed)]
#[folder = "web/dist/"]
struct Asset;

const TITLE_PLACEHOLDER: &str = "{{title}}";

pub fn asset_routes<B: Backend>() -> Router<Arc<WebState<B>>> {
    Router::new()
        .route("/", get(index_handler::<B>))
        .route("/assets/{*path}", get(static_handler))
}

async fn index_handler<B: Backend>(State(state): State<Arc<WebState<B>>>) -> Response {
    match Asset::get("index.html") {
        Some(content) => Html(render_index(
            &String::from_utf8_lossy(content.data.as_ref()),
            &state.title,
        ))
        .into_response(),
        None => {
            tracing::warn!("index.html missing from embedded assets");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn static_handler(axum::extract::Path(path): axum::extract::Path<String>) -> Response {
    let path = format!("assets/{}", path);
    match Asset::get(&path) {
        Some(content) => {
            let mime = mime_guess::from_path(&path)
                .first_or_octet_stream()
                .to_string();
            ([(header::CONTENT_TYPE, mime)], content.data.to_vec()).into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

fn render_index(template: &str, title: &str) -> String {
    template.replace(TITLE_PLACEHOLDER, &escape_html(title))
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
