//! Amanah API server binary entrypoint.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use amanah_common::config::AppConfig;
use amanah_common::db::create_pool;
use amanah_connector::gateway::GatewayConnector;
use amanah_connector::manager::SessionManager;
use amanah_connector::repo::PgSessionRepo;
use amanah_engine::composer::NotificationComposer;
use amanah_engine::ingest::ReconciliationMatcher;

use amanah_api::routes::create_router;
use amanah_api::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("amanah_api=debug,amanah_engine=debug,tower_http=debug")
        }))
        .init();

    tracing::info!("Starting Amanah API server...");

    // Load configuration
    let config = AppConfig::from_env()?;

    // Create database connection pool
    let pool = create_pool(&config.database_url, config.db_max_connections).await?;
    tracing::info!("Database pool created");

    // Run migrations
    sqlx::migrate!("../../migrations").run(&pool).await?;
    tracing::info!("Database migrations applied");

    // Session manager over the messaging gateway
    let connector = Arc::new(GatewayConnector::new(
        config.gateway_url.clone(),
        config.gateway_api_key.clone(),
    ));
    let repo = Arc::new(PgSessionRepo::new(pool.clone()));
    let sessions = Arc::new(SessionManager::new(
        connector,
        repo,
        config.sessions_dir.clone().into(),
        config.reconnect_max_retries,
        Duration::from_millis(config.reconnect_base_delay_ms),
    ));

    // Resume sessions persisted by earlier runs so QR and send flows are
    // immediately available.
    sessions.resume_persisted().await?;

    let composer = NotificationComposer::new(pool.clone(), config.phone_country_code.clone());
    let matcher = ReconciliationMatcher::new(pool.clone(), composer, config.match_window_hours);

    // Build application state
    let port = config.api_port;
    let state = AppState::new(pool, config, sessions, matcher);

    // Build router
    let app = create_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("API server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
