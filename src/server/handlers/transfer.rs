//! Warm-transfer endpoint.

use axum::response::IntoResponse;
use axum::{
    Json,
    extract::{Path, State},
    response::Response,
};
use serde_json::Value;

use crate::state::AppState;

/// Handler for `POST /transfer/{session_id}`.
///
/// Body: `{ "to_uri": string, "transfer_delay"?: number }` (delay defaults
/// to 1 second). Stores the pending transfer target on the call; the
/// transfer itself happens at soft-hangup time.
///
/// Responses:
/// * 200 `{ "status": "ok", "to_uri": ..., "session_id": ... }`
/// * 400 missing `to_uri` or call not confirmed
/// * 404 unknown session
/// * 500 call state inspection failed
pub async fn transfer_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    match state
        .gateway
        .handle_transfer_request(&session_id, body)
        .await
    {
        Ok(payload) => Json(payload).into_response(),
        Err(err) => err.into_response(),
    }
}
