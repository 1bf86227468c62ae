//! Polling job runner.
//!
//! A single loop: every tick, claim the oldest pending job, execute it, and
//! record the outcome. Strictly one job in flight per process — the serial
//! drain doubles as send pacing toward the messaging provider, so a parallel
//! pool would change delivery behavior, not just throughput. Running a second
//! worker process against the same store introduces a double-dequeue race
//! this design does not defend against.

use std::sync::Arc;
use std::time::Duration;

use amanah_common::error::AppError;
use amanah_common::types::{Job, JobStatus, JobType, SendMessagePayload};
use amanah_connector::manager::SessionManager;
use amanah_engine::queue::JobStore;

/// Polls the job table and executes jobs one at a time.
pub struct JobWorker {
    jobs: JobStore,
    sessions: Arc<SessionManager>,
    poll_interval: Duration,
    send_delay: Duration,
    max_attempts: i32,
}

impl JobWorker {
    pub fn new(
        jobs: JobStore,
        sessions: Arc<SessionManager>,
        poll_interval_ms: u64,
        send_delay_ms: u64,
        max_attempts: i32,
    ) -> Self {
        Self {
            jobs,
            sessions,
            poll_interval: Duration::from_millis(poll_interval_ms),
            send_delay: Duration::from_millis(send_delay_ms),
            max_attempts,
        }
    }

    /// Run the polling loop indefinitely. A failed tick is logged and the
    /// loop continues; only the caller's shutdown signal stops it.
    pub async fn run(&self) -> anyhow::Result<()> {
        tracing::info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            max_attempts = self.max_attempts,
            "Job worker started"
        );

        loop {
            if let Err(e) = self.tick().await {
                tracing::error!(error = %e, "Worker tick failed");
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// One poll cycle: claim and execute at most one job.
    pub async fn tick(&self) -> Result<(), AppError> {
        let Some(job) = self.jobs.fetch_next_pending().await? else {
            return Ok(());
        };

        tracing::info!(job_id = %job.id, job_type = %job.job_type, attempts = job.attempts, "Processing job");
        self.jobs.mark_processing(job.id).await?;

        let job_type = match job.job_type.parse::<JobType>() {
            Ok(job_type) => job_type,
            Err(reason) => {
                // Retrying cannot make an unknown type executable.
                tracing::error!(job_id = %job.id, job_type = %job.job_type, "Unknown job type");
                self.jobs.fail_terminal(job.id, &reason).await?;
                return Ok(());
            }
        };

        match self.execute(job_type, &job).await {
            Ok(detail) => {
                self.jobs.complete(job.id, &detail).await?;
                tracing::info!(job_id = %job.id, "Job completed");
            }
            Err(e) => {
                let updated = self
                    .jobs
                    .fail(job.id, &e.to_string(), self.max_attempts)
                    .await?;
                match updated.status {
                    JobStatus::Pending => tracing::warn!(
                        job_id = %job.id,
                        attempts = updated.attempts,
                        error = %e,
                        "Job failed, will retry"
                    ),
                    _ => tracing::error!(
                        job_id = %job.id,
                        attempts = updated.attempts,
                        error = %e,
                        "Job failed terminally"
                    ),
                }
            }
        }

        Ok(())
    }

    async fn execute(&self, job_type: JobType, job: &Job) -> Result<String, AppError> {
        match job_type {
            JobType::SendMessage => {
                let payload: SendMessagePayload = serde_json::from_value(job.payload.clone())
                    .map_err(|e| AppError::Validation(format!("bad send payload: {e}")))?;

                // Small fixed delay as a crude provider rate-limit mitigation.
                tokio::time::sleep(self.send_delay).await;

                self.sessions
                    .send_text(&payload.session_name, &payload.target, &payload.message)
                    .await?;

                Ok("Sent successfully".to_string())
            }
        }
    }
}
