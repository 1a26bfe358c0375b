//! Bearer-token authorization for the control plane.

use axum::{
    Json,
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::warn;

use crate::state::AppState;

/// Require `Authorization: Bearer <token>` when a token is configured.
///
/// Missing header yields 401, a mismatched token 403. With no configured
/// token every request passes.
pub async fn auth_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = state.gateway.config.authorization_token.clone() else {
        return next.run(request).await;
    };

    let header = request
        .headers()
        .get("authorization")
        .and_then(|value| value.to_str().ok());

    match header {
        None => {
            warn!(path = %request.uri().path(), "Missing authorization header");
            (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "message": "missing authorization" })),
            )
                .into_response()
        }
        Some(header) if header != format!("Bearer {expected}") => {
            warn!(path = %request.uri().path(), "Invalid authorization token");
            (
                StatusCode::FORBIDDEN,
                Json(json!({ "message": "invalid authorization" })),
            )
                .into_response()
        }
        Some(_) => next.run(request).await,
    }
}
