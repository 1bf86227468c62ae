pub mod health;
pub mod sessions;
pub mod webhook;

use axum::Router;

use crate::state::AppState;

/// Build the complete API router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(health::router())
        .merge(webhook::router())
        .merge(sessions::router())
        .with_state(state)
}
