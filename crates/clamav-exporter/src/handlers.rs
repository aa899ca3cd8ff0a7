//! HTTP request handlers and router assembly.

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{Html, Response};
use axum::routing::get;
use tower_http::compression::CompressionLayer;
use tracing::error;

use crate::metrics;
use crate::state::{AppState, ExporterState};

/// Builds the router: the telemetry endpoint plus a landing page at `/`
/// unless metrics are served there.
pub(crate) fn router(state: ExporterState) -> Router {
    let mut app = Router::new().route(&state.telemetry_path, get(handle_metrics));
    if state.telemetry_path != "/" {
        app = app.route("/", get(handle_landing));
    }
    app.with_state(Arc::new(state))
        .layer(CompressionLayer::new())
}

// ============================================================
// Metrics
// ============================================================

pub(crate) async fn handle_metrics(State(state): AppState) -> Result<Response, StatusCode> {
    let snapshot = state.collector.scrape().await;
    let body = metrics::render(snapshot.as_ref(), &chrono::Local).map_err(|e| {
        error!(error = %e, "failed to render metrics");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Response::builder()
        .header(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)
        .body(Body::from(body))
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

// ============================================================
// Landing page
// ============================================================

pub(crate) async fn handle_landing(State(state): AppState) -> Html<String> {
    Html(format!(
        "<html>\n\
         <head><title>ClamAV Exporter</title></head>\n\
         <body>\n\
         <h1>ClamAV Exporter</h1>\n\
         <p><a href=\"{path}\">Metrics</a></p>\n\
         </body>\n\
         </html>\n",
        path = escape_html(&state.telemetry_path)
    ))
}

/// Escapes text for use in HTML content and double-quoted attributes.
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
