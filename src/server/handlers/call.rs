//! Outbound call origination endpoint.

use axum::{Json, extract::State, response::Response};
use axum::response::IntoResponse;
use serde_json::Value;

use crate::state::AppState;

/// Handler for `POST /call`.
///
/// Body: `{ "to_uri": string, "env_info"?: object, "communication_id"?: string }`.
/// Creates a backend session, allocates an outbound call leg, binds the
/// two, and dials.
///
/// Responses:
/// * 200 `{ "message": "ok", "session_id": ... }`
/// * 400 missing `to_uri`
/// * 503 SIP driver not attached
/// * 500 backend or dial failure
pub async fn call_handler(State(state): State<AppState>, Json(body): Json<Value>) -> Response {
    match state.gateway.handle_call_request(body).await {
        Ok(payload) => Json(payload).into_response(),
        Err(err) => err.into_response(),
    }
}
