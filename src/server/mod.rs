//! Control-plane REST server.
//!
//! Routes: `POST /call` and `POST /transfer/{session_id}` behind bearer
//! auth (when configured), plus unauthenticated `GET /health` and
//! `GET /metrics`.

pub mod handlers;

use axum::{
    Router, middleware,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::middleware::auth_middleware;
use crate::state::AppState;

/// Build the control-plane router.
pub fn create_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/call", post(handlers::call::call_handler))
        .route(
            "/transfer/{session_id}",
            post(handlers::transfer::transfer_handler),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .route("/health", get(handlers::health::health_handler))
        .route("/metrics", get(handlers::metrics::metrics_handler))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind the listener and serve until shutdown.
pub async fn serve(state: AppState) -> anyhow::Result<()> {
    let address = state.gateway.config.rest_address();
    let listener = tokio::net::TcpListener::bind(&address).await?;
    tracing::info!(address, "REST server listening");
    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
        })
        .await?;
    Ok(())
}
