//! Durable job queue backed by the `jobs` table.
//!
//! Jobs are appended by the composer and the reconciliation matcher and
//! drained FIFO by a single polling worker. There is no uniqueness
//! constraint: duplicate enqueues are executed independently. Delivery is
//! at-least-once; a crash between a successful send and the status update
//! replays the job.

use sqlx::PgPool;
use uuid::Uuid;

use amanah_common::error::AppError;
use amanah_common::types::{Job, JobType};

/// Access layer for the `jobs` table.
#[derive(Clone)]
pub struct JobStore {
    pool: PgPool,
}

impl JobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Append a new pending job.
    pub async fn enqueue(
        &self,
        job_type: JobType,
        payload: &serde_json::Value,
    ) -> Result<Job, AppError> {
        let job: Job = sqlx::query_as(
            r#"
            INSERT INTO jobs (id, job_type, payload, status, attempts)
            VALUES ($1, $2, $3, 'pending', 0)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(job_type.to_string())
        .bind(payload)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(job_id = %job.id, job_type = %job.job_type, "Job enqueued");
        Ok(job)
    }

    /// The single oldest pending job, FIFO by creation time.
    pub async fn fetch_next_pending(&self) -> Result<Option<Job>, AppError> {
        let job: Option<Job> = sqlx::query_as(
            "SELECT * FROM jobs WHERE status = 'pending' ORDER BY created_at ASC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(job)
    }

    /// Claim a job before execution.
    pub async fn mark_processing(&self, id: Uuid) -> Result<(), AppError> {
        sqlx::query("UPDATE jobs SET status = 'processing', updated_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Record a successful execution.
    pub async fn complete(&self, id: Uuid, result: &str) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE jobs SET status = 'completed', result = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(result)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Record a failed execution attempt.
    ///
    /// Increments `attempts`; the job goes back to `pending` (implicit retry
    /// on the next tick) while the new count is below `max_attempts`, and to
    /// terminal `failed` once the ceiling is reached. Returns the updated row.
    pub async fn fail(&self, id: Uuid, error: &str, max_attempts: i32) -> Result<Job, AppError> {
        let job: Job = sqlx::query_as(
            r#"
            UPDATE jobs
            SET attempts = attempts + 1,
                status = CASE WHEN attempts + 1 < $3 THEN 'pending' ELSE 'failed' END,
                result = $2,
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(error)
        .bind(max_attempts)
        .fetch_one(&self.pool)
        .await?;

        Ok(job)
    }

    /// Fail a job terminally without retry bookkeeping. Used for jobs that
    /// can never succeed, such as an unknown job type.
    pub async fn fail_terminal(&self, id: Uuid, error: &str) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE jobs SET status = 'failed', result = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Fetch one job by id.
    pub async fn get(&self, id: Uuid) -> Result<Option<Job>, AppError> {
        let job: Option<Job> = sqlx::query_as("SELECT * FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(job)
    }
}
