use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a messaging session.
///
/// `failed` is reached when the reconnect ceiling is exhausted; a session in
/// that state needs an explicit restart (and usually a fresh QR handshake).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Disconnected,
    Scanning,
    Connected,
    Failed,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Disconnected => write!(f, "disconnected"),
            SessionStatus::Scanning => write!(f, "scanning"),
            SessionStatus::Connected => write!(f, "connected"),
            SessionStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Status of a queued job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Processing => write!(f, "processing"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Kinds of deferred work the worker knows how to execute.
///
/// `jobs.job_type` is stored as free text so a row with a type this build
/// does not know still loads; the worker fails such jobs terminally instead
/// of choking on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    SendMessage,
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobType::SendMessage => write!(f, "send_message"),
        }
    }
}

impl std::str::FromStr for JobType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "send_message" => Ok(JobType::SendMessage),
            other => Err(format!("Unknown job type: {other}")),
        }
    }
}

/// Direction of a bank mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MutationDirection {
    Credit,
    Debit,
}

impl std::fmt::Display for MutationDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MutationDirection::Credit => write!(f, "credit"),
            MutationDirection::Debit => write!(f, "debit"),
        }
    }
}

/// Donation lifecycle. `confirmed` and `cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DonationStatus {
    Waiting,
    Confirmed,
    Cancelled,
}

impl std::fmt::Display for DonationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DonationStatus::Waiting => write!(f, "waiting"),
            DonationStatus::Confirmed => write!(f, "confirmed"),
            DonationStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A registered messaging session.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct WaSession {
    pub id: Uuid,
    pub session_name: String,
    pub status: SessionStatus,
    pub phone_number: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A durable unit of deferred work.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Job {
    pub id: Uuid,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub status: JobStatus,
    pub attempts: i32,
    pub result: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Payload of a `send_message` job. Serialized into `jobs.payload`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessagePayload {
    pub session_name: String,
    /// Digits only, country-code prefixed.
    pub target: String,
    pub message: String,
}

/// A local bank account that webhook mutations can be linked to.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct BankAccount {
    pub id: Uuid,
    pub bank_name: Option<String>,
    pub account_number: String,
    pub account_holder: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One bank transaction event, persisted verbatim as an audit record.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct BankMutation {
    pub id: Uuid,
    pub transaction_id: Option<String>,
    pub date: DateTime<Utc>,
    pub description: String,
    pub amount: i64,
    pub direction: MutationDirection,
    pub balance: Option<i64>,
    pub bank_account_id: Option<Uuid>,
    pub raw_payload: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// A donation awaiting (or past) bank-transfer confirmation.
///
/// `total_amount` is fixed at creation as `amount + unique_code` and is the
/// reconciliation key: incoming credits are matched against it exactly.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Donation {
    pub id: Uuid,
    pub donor_name: Option<String>,
    pub whatsapp: String,
    pub amount: i64,
    pub unique_code: i32,
    pub total_amount: i64,
    pub status: DonationStatus,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// A message template with `{{var}}` placeholders, looked up by event code.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct NotificationTemplate {
    pub id: Uuid,
    pub code: String,
    pub message_template: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// One mutation record as delivered by the bank webhook provider.
///
/// Field names follow the provider's wire format. `direction` ("IN"/"OUT")
/// and `type` ("CR"/"DB") are both optional; when neither is present the sign
/// of `amount` decides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutationEvent {
    pub amount: Option<i64>,
    pub description: Option<String>,
    /// Free-form provider timestamp; parsed leniently, falls back to now.
    pub date: Option<String>,
    #[serde(rename = "type")]
    pub mutation_type: Option<String>,
    pub balance: Option<i64>,
    pub account_number: Option<String>,
    pub mutation_id: Option<String>,
    pub direction: Option<String>,
}

impl MutationEvent {
    /// Whether this event represents incoming funds.
    pub fn is_credit(&self) -> bool {
        if let Some(direction) = &self.direction {
            return direction.eq_ignore_ascii_case("in");
        }
        if let Some(kind) = &self.mutation_type {
            return kind.eq_ignore_ascii_case("cr");
        }
        self.amount.unwrap_or(0) > 0
    }

    /// Parse the provider timestamp, accepting RFC 3339 or the common
    /// `YYYY-MM-DD HH:MM:SS` shape. Unparseable or absent dates fall back to
    /// the ingestion time.
    pub fn resolved_date(&self) -> DateTime<Utc> {
        let Some(raw) = self.date.as_deref() else {
            return Utc::now();
        };
        if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
            return parsed.with_timezone(&Utc);
        }
        if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
            return naive.and_utc();
        }
        Utc::now()
    }

    /// Resolved direction for persistence.
    pub fn resolved_direction(&self) -> MutationDirection {
        if self.is_credit() {
            MutationDirection::Credit
        } else {
            MutationDirection::Debit
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bare_event() -> MutationEvent {
        MutationEvent {
            amount: None,
            description: None,
            date: None,
            mutation_type: None,
            balance: None,
            account_number: None,
            mutation_id: None,
            direction: None,
        }
    }

    #[test]
    fn test_direction_wins_over_type_and_sign() {
        let event = MutationEvent {
            amount: Some(-100),
            mutation_type: Some("DB".into()),
            direction: Some("IN".into()),
            ..bare_event()
        };
        assert!(event.is_credit());
    }

    #[test]
    fn test_out_direction_beats_credit_type() {
        // An explicit direction always decides; a contradictory type marker
        // does not turn an outgoing mutation into a credit.
        let event = MutationEvent {
            amount: Some(100),
            mutation_type: Some("CR".into()),
            direction: Some("OUT".into()),
            ..bare_event()
        };
        assert!(!event.is_credit());
        assert_eq!(event.resolved_direction(), MutationDirection::Debit);
    }

    #[test]
    fn test_credit_detected_from_type() {
        let event = MutationEvent {
            amount: Some(50_000),
            mutation_type: Some("cr".into()),
            ..bare_event()
        };
        assert!(event.is_credit());
        assert_eq!(event.resolved_direction(), MutationDirection::Credit);
    }

    #[test]
    fn test_debit_detected_from_type() {
        let event = MutationEvent {
            amount: Some(50_000),
            mutation_type: Some("DB".into()),
            ..bare_event()
        };
        assert!(!event.is_credit());
        assert_eq!(event.resolved_direction(), MutationDirection::Debit);
    }

    #[test]
    fn test_credit_falls_back_to_amount_sign() {
        let event = MutationEvent {
            amount: Some(75_000),
            ..bare_event()
        };
        assert!(event.is_credit());
    }

    #[test]
    fn test_resolved_date_accepts_provider_format() {
        let event = MutationEvent {
            date: Some("2024-01-01 10:00:00".into()),
            ..bare_event()
        };
        let parsed = event.resolved_date();
        assert_eq!(parsed.to_rfc3339(), "2024-01-01T10:00:00+00:00");
    }

    #[test]
    fn test_job_type_round_trips_through_text() {
        assert_eq!(JobType::SendMessage.to_string(), "send_message");
        assert_eq!(
            "send_message".parse::<JobType>().unwrap(),
            JobType::SendMessage
        );
        assert!("broadcast_carrier_pigeon".parse::<JobType>().is_err());
    }

    #[test]
    fn test_send_message_payload_wire_shape() {
        let payload = SendMessagePayload {
            session_name: "primary".into(),
            target: "628123456789".into(),
            message: "hello".into(),
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["sessionName"], "primary");
        assert_eq!(value["target"], "628123456789");
    }
}
