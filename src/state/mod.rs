//! Shared application state for the control plane.

use std::sync::Arc;

use crate::registry::Gateway;

/// State handed to every axum handler.
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
}

impl AppState {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        Self { gateway }
    }
}
