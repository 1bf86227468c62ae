//! Background worker binary: resumes persisted sessions and drains the job
//! queue.

use std::sync::Arc;
use std::time::Duration;

use amanah_common::config::AppConfig;
use amanah_common::db;
use amanah_connector::gateway::GatewayConnector;
use amanah_connector::manager::SessionManager;
use amanah_connector::repo::PgSessionRepo;
use amanah_engine::queue::JobStore;
use amanah_worker::runner::JobWorker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "amanah_worker=info,amanah_connector=info".into()),
        )
        .json()
        .init();

    tracing::info!("Amanah worker starting...");

    // Load configuration
    let config = AppConfig::from_env()?;

    // Connect to database
    let pool = db::create_pool(&config.database_url, config.db_max_connections).await?;

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

    // Resume sessions persisted by earlier runs; per-session failures are
    // logged inside and must not keep the worker down.
    sessions.resume_persisted().await?;

    let worker = JobWorker::new(
        JobStore::new(pool),
        sessions,
        config.worker_poll_interval_ms,
        config.worker_send_delay_ms,
        config.worker_max_attempts,
    );

    // Run with graceful shutdown on Ctrl+C
    tokio::select! {
        result = worker.run() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Job worker exited with error");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal, stopping gracefully...");
        }
    }

    tracing::info!("Amanah worker stopped.");
    Ok(())
}
