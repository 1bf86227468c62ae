//! Notification composition: template resolution, variable substitution,
//! phone normalization, and enqueueing the resulting send job.

use std::collections::HashMap;

use sqlx::PgPool;

use amanah_common::error::AppError;
use amanah_common::types::{JobType, NotificationTemplate, SendMessagePayload};

use crate::queue::JobStore;

/// Substitute every `{{key}}` occurrence in `template` with its value.
///
/// No escaping, no nested substitution; tokens without a matching variable
/// are left verbatim.
pub fn render_template(template: &str, variables: &HashMap<String, String>) -> String {
    let mut message = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        let Some(end) = rest[start + 2..].find("}}") else {
            break;
        };
        let key = &rest[start + 2..start + 2 + end];
        message.push_str(&rest[..start]);
        match variables.get(key) {
            Some(value) => message.push_str(value),
            None => message.push_str(&rest[start..start + end + 4]),
        }
        rest = &rest[start + end + 4..];
    }
    message.push_str(rest);
    message
}

/// Normalize a recipient number: strip every non-digit character and rewrite
/// a leading national-trunk `0` to the country code (e.g. `0812…` → `62812…`).
pub fn normalize_phone(raw: &str, country_code: &str) -> String {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    match digits.strip_prefix('0') {
        Some(rest) => format!("{country_code}{rest}"),
        None => digits,
    }
}

/// Format an amount in rupiah with dot thousands separators: `Rp 50.000`.
pub fn format_amount(amount: i64) -> String {
    let digits = amount.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(c);
    }
    if amount < 0 {
        format!("-Rp {grouped}")
    } else {
        format!("Rp {grouped}")
    }
}

/// Resolves templates and turns events into queued send jobs.
#[derive(Clone)]
pub struct NotificationComposer {
    pool: PgPool,
    jobs: JobStore,
    country_code: String,
}

impl NotificationComposer {
    pub fn new(pool: PgPool, country_code: String) -> Self {
        let jobs = JobStore::new(pool.clone());
        Self {
            pool,
            jobs,
            country_code,
        }
    }

    /// Compose and enqueue a notification for `event_code`.
    ///
    /// Returns `Ok(false)` when the notification is skipped — no active
    /// template for the code, or no connected session to send from. Neither
    /// is an error; callers treat it as "notification skipped".
    pub async fn send(
        &self,
        event_code: &str,
        recipient: &str,
        variables: &HashMap<String, String>,
    ) -> Result<bool, AppError> {
        tracing::info!(event_code, recipient, "Composing notification");

        let template: Option<NotificationTemplate> = sqlx::query_as(
            "SELECT * FROM notification_templates WHERE code = $1 AND is_active = TRUE LIMIT 1",
        )
        .bind(event_code)
        .fetch_optional(&self.pool)
        .await?;

        let Some(template) = template else {
            tracing::info!(event_code, "No active template, skipping notification");
            return Ok(false);
        };

        let session: Option<(String,)> = sqlx::query_as(
            "SELECT session_name FROM wa_sessions WHERE status = 'connected' LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        let Some((session_name,)) = session else {
            tracing::warn!(event_code, "No connected session, skipping notification");
            return Ok(false);
        };

        let payload = SendMessagePayload {
            session_name,
            target: normalize_phone(recipient, &self.country_code),
            message: render_template(&template.message_template, variables),
        };

        self.jobs
            .enqueue(
                JobType::SendMessage,
                &serde_json::to_value(&payload)
                    .map_err(|e| AppError::Internal(format!("payload serialize failed: {e}")))?,
            )
            .await?;

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_render_substitutes_every_occurrence() {
        let rendered = render_template(
            "Halo {{name}}, donasi {{name}} sebesar {{amount}} diterima",
            &vars(&[("name", "Budi"), ("amount", "Rp 50.007")]),
        );
        assert_eq!(rendered, "Halo Budi, donasi Budi sebesar Rp 50.007 diterima");
    }

    #[test]
    fn test_render_leaves_unmatched_tokens_verbatim() {
        let rendered = render_template("Halo {{name}}, kode {{code}}", &vars(&[("name", "Budi")]));
        assert_eq!(rendered, "Halo Budi, kode {{code}}");
    }

    #[test]
    fn test_render_does_not_nest() {
        // A substituted value that itself looks like a token stays literal.
        let rendered = render_template("{{a}}", &vars(&[("a", "{{b}}"), ("b", "x")]));
        assert_eq!(rendered, "{{b}}");
    }

    #[test]
    fn test_normalize_strips_punctuation() {
        assert_eq!(normalize_phone("+62 812-3456-789", "62"), "628123456789");
    }

    #[test]
    fn test_normalize_rewrites_trunk_prefix() {
        assert_eq!(normalize_phone("08123456789", "62"), "628123456789");
    }

    #[test]
    fn test_normalize_keeps_already_prefixed_numbers() {
        assert_eq!(normalize_phone("628123456789", "62"), "628123456789");
    }

    #[test]
    fn test_format_amount_groups_thousands() {
        assert_eq!(format_amount(50_007), "Rp 50.007");
        assert_eq!(format_amount(1_500_000), "Rp 1.500.000");
        assert_eq!(format_amount(999), "Rp 999");
        assert_eq!(format_amount(0), "Rp 0");
    }
}
