//! Prometheus exposition endpoint.

use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};

use crate::state::AppState;

/// Handler for `GET /metrics`.
pub async fn metrics_handler(State(state): State<AppState>) -> Response {
    let body = state.gateway.metrics().render_prometheus();
    ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body).into_response()
}
