//! PostgreSQL pool construction shared by the API server and the worker.

use std::time::Duration;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// Open the shared connection pool.
///
/// Both binaries hit the store continuously — the worker polls the job table
/// every tick, the matcher runs several queries per webhook item — so
/// acquisition is kept short: if a connection cannot be obtained within a few
/// seconds the store is effectively down and the caller should fail loudly
/// rather than let requests pile up behind the pool.
pub async fn create_pool(database_url: &str, max_connections: u32) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(3))
        .connect(database_url)
        .await?;

    tracing::info!(max_connections, "PostgreSQL pool ready");
    Ok(pool)
}
