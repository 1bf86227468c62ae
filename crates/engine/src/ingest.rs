//! Bank-mutation ingestion and donation reconciliation.
//!
//! Webhook-delivered mutation events are persisted idempotently as an audit
//! log, and incoming credits are matched against pending donations by exact
//! `total_amount` within a trailing time window. Each event in a batch is
//! processed independently: an error in one item never aborts the rest.

use std::collections::HashMap;

use chrono::{Duration, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use amanah_common::error::AppError;
use amanah_common::types::{BankMutation, Donation, MutationEvent};

use crate::composer::{NotificationComposer, format_amount};

/// Event code of the confirmation template.
const DONATION_CONFIRMED: &str = "DONATION_CONFIRMED";

/// Recipients shorter than this are treated as absent (legacy records).
const MIN_RECIPIENT_LEN: usize = 6;

/// Ingests mutation events and auto-confirms matching pending donations.
#[derive(Clone)]
pub struct ReconciliationMatcher {
    pool: PgPool,
    composer: NotificationComposer,
    match_window: Duration,
}

impl ReconciliationMatcher {
    pub fn new(pool: PgPool, composer: NotificationComposer, match_window_hours: i64) -> Self {
        Self {
            pool,
            composer,
            match_window: Duration::hours(match_window_hours),
        }
    }

    /// Ingest a raw webhook body: either a single mutation object or an
    /// array of them. Returns the number of mutations stored. Malformed or
    /// failing items are logged and skipped so the batch always completes.
    pub async fn ingest_raw(&self, body: serde_json::Value) -> usize {
        let items = match body {
            serde_json::Value::Array(items) => items,
            single => vec![single],
        };

        let mut events = Vec::with_capacity(items.len());
        for item in items {
            match serde_json::from_value::<MutationEvent>(item) {
                Ok(event) => events.push(event),
                Err(e) => {
                    tracing::error!(error = %e, "Skipping malformed mutation item");
                }
            }
        }

        self.ingest(events).await
    }

    /// Ingest already-decoded mutation events. Returns the stored count.
    pub async fn ingest(&self, events: Vec<MutationEvent>) -> usize {
        let mut processed = 0;

        for event in &events {
            // Events without an amount or description carry nothing to
            // reconcile or audit.
            if event.amount.is_none() || event.description.is_none() {
                tracing::debug!("Skipping mutation without amount or description");
                continue;
            }

            match self.process_event(event).await {
                Ok(true) => processed += 1,
                Ok(false) => {
                    tracing::info!(
                        transaction_id = event.mutation_id.as_deref().unwrap_or("-"),
                        "Duplicate mutation skipped"
                    );
                }
                Err(e) => {
                    tracing::error!(error = %e, "Error processing mutation item");
                }
            }
        }

        processed
    }

    /// Persist one event and attempt reconciliation. Returns `Ok(false)` for
    /// a dedup skip, `Ok(true)` when a mutation row was stored.
    async fn process_event(&self, event: &MutationEvent) -> Result<bool, AppError> {
        // Dedup is only possible when the provider sent a transaction id;
        // without one, duplicate storage is an accepted risk.
        if let Some(transaction_id) = &event.mutation_id {
            let existing: Option<(Uuid,)> =
                sqlx::query_as("SELECT id FROM bank_mutations WHERE transaction_id = $1")
                    .bind(transaction_id)
                    .fetch_optional(&self.pool)
                    .await?;
            if existing.is_some() {
                return Ok(false);
            }
        }

        let bank_account_id = match &event.account_number {
            Some(account_number) => {
                let account: Option<(Uuid,)> =
                    sqlx::query_as("SELECT id FROM bank_accounts WHERE account_number = $1")
                        .bind(account_number)
                        .fetch_optional(&self.pool)
                        .await?;
                account.map(|(id,)| id)
            }
            None => None,
        };

        // Stored unconditionally as an audit record, matched or not.
        let mutation: BankMutation = sqlx::query_as(
            r#"
            INSERT INTO bank_mutations
                (id, transaction_id, date, description, amount, direction, balance,
                 bank_account_id, raw_payload)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&event.mutation_id)
        .bind(event.resolved_date())
        .bind(event.description.as_deref().unwrap_or_default())
        .bind(event.amount.unwrap_or_default())
        .bind(event.resolved_direction())
        .bind(event.balance)
        .bind(bank_account_id)
        .bind(
            serde_json::to_value(event)
                .map_err(|e| AppError::Internal(format!("raw payload serialize failed: {e}")))?,
        )
        .fetch_one(&self.pool)
        .await?;

        if event.is_credit() {
            self.try_match_donation(&mutation).await?;
        }

        Ok(true)
    }

    /// Confirm the pending donation matching this credit, if any.
    ///
    /// Candidate predicate: status waiting, `total_amount` exactly equal to
    /// the mutation amount, created within the trailing window. When several
    /// qualify the oldest wins. The guarded update keeps the transition
    /// one-shot: a donation that is no longer `waiting` is never touched, so
    /// duplicate credit events cannot re-confirm it.
    async fn try_match_donation(&self, mutation: &BankMutation) -> Result<(), AppError> {
        let cutoff = Utc::now() - self.match_window;

        let donation: Option<Donation> = sqlx::query_as(
            r#"
            UPDATE donations
            SET status = 'confirmed', confirmed_at = NOW()
            WHERE id = (
                SELECT id FROM donations
                WHERE status = 'waiting'
                  AND total_amount = $1
                  AND created_at >= $2
                ORDER BY created_at ASC
                LIMIT 1
            )
              AND status = 'waiting'
            RETURNING *
            "#,
        )
        .bind(mutation.amount)
        .bind(cutoff)
        .fetch_optional(&self.pool)
        .await?;

        let Some(donation) = donation else {
            return Ok(());
        };

        tracing::info!(
            donation_id = %donation.id,
            mutation_id = %mutation.id,
            amount = mutation.amount,
            "Donation auto-confirmed"
        );

        if donation.whatsapp.len() >= MIN_RECIPIENT_LEN {
            let variables = HashMap::from([
                (
                    "name".to_string(),
                    donation
                        .donor_name
                        .clone()
                        .unwrap_or_else(|| "Donatur".to_string()),
                ),
                ("amount".to_string(), format_amount(donation.amount)),
            ]);

            // The donation is already confirmed at this point; a failed
            // notification must not undo or re-run the match.
            if let Err(e) = self
                .composer
                .send(DONATION_CONFIRMED, &donation.whatsapp, &variables)
                .await
            {
                tracing::error!(donation_id = %donation.id, error = %e, "Confirmation notification failed");
            }
        }

        Ok(())
    }
}
