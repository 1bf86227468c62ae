//! Durable session status records.
//!
//! The in-memory registry is authoritative for live state; this repository
//! mirrors status transitions into `wa_sessions` so the admin surface can
//! observe sessions and so `resume_persisted` knows what to restart after a
//! process restart.

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use amanah_common::error::AppError;
use amanah_common::types::{SessionStatus, WaSession};

#[async_trait]
pub trait SessionRepo: Send + Sync {
    /// Create the session row if it does not exist yet.
    async fn ensure(&self, session_name: &str) -> Result<(), AppError>;

    /// Record a status transition.
    async fn set_status(&self, session_name: &str, status: SessionStatus) -> Result<(), AppError>;

    /// Record a successful connect together with the remote identity.
    async fn set_connected(
        &self,
        session_name: &str,
        phone_number: Option<&str>,
    ) -> Result<(), AppError>;

    /// All registered session names, for boot-time resume.
    async fn list_names(&self) -> Result<Vec<String>, AppError>;

    /// Fetch one session row.
    async fn get(&self, session_name: &str) -> Result<Option<WaSession>, AppError>;
}

/// PostgreSQL-backed implementation.
pub struct PgSessionRepo {
    pool: PgPool,
}

impl PgSessionRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionRepo for PgSessionRepo {
    async fn ensure(&self, session_name: &str) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO wa_sessions (id, session_name, status)
            VALUES ($1, $2, 'disconnected')
            ON CONFLICT (session_name) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(session_name)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn set_status(&self, session_name: &str, status: SessionStatus) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE wa_sessions SET status = $2, updated_at = NOW() WHERE session_name = $1",
        )
        .bind(session_name)
        .bind(status)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn set_connected(
        &self,
        session_name: &str,
        phone_number: Option<&str>,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE wa_sessions
            SET status = 'connected', phone_number = $2, updated_at = NOW()
            WHERE session_name = $1
            "#,
        )
        .bind(session_name)
        .bind(phone_number)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_names(&self) -> Result<Vec<String>, AppError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT session_name FROM wa_sessions ORDER BY created_at")
                .fetch_all(&self.pool)
                .await?;

        Ok(rows.into_iter().map(|(name,)| name).collect())
    }

    async fn get(&self, session_name: &str) -> Result<Option<WaSession>, AppError> {
        let session: Option<WaSession> =
            sqlx::query_as("SELECT * FROM wa_sessions WHERE session_name = $1")
                .bind(session_name)
                .fetch_optional(&self.pool)
                .await?;

        Ok(session)
    }
}
