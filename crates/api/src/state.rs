//! Shared application state for the Axum API server.

use std::sync::Arc;

use sqlx::PgPool;

use amanah_common::config::AppConfig;
use amanah_connector::manager::SessionManager;
use amanah_engine::ingest::ReconciliationMatcher;

/// Application state shared across all route handlers via Axum `State`.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: AppConfig,
    pub sessions: Arc<SessionManager>,
    pub matcher: ReconciliationMatcher,
}

impl AppState {
    pub fn new(
        pool: PgPool,
        config: AppConfig,
        sessions: Arc<SessionManager>,
        matcher: ReconciliationMatcher,
    ) -> Self {
        Self {
            pool,
            config,
            sessions,
            matcher,
        }
    }
}
