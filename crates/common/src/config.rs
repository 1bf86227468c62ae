use serde::Deserialize;

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// PostgreSQL connection string
    pub database_url: String,

    /// Maximum number of PostgreSQL connections in the pool (default: 20)
    pub db_max_connections: u32,

    /// Base URL of the messaging gateway daemon
    pub gateway_url: String,

    /// Optional bearer token for the messaging gateway
    pub gateway_api_key: Option<String>,

    /// Root directory for per-session credential storage
    pub sessions_dir: String,

    /// Job poll tick in milliseconds (default: 5000)
    pub worker_poll_interval_ms: u64,

    /// Fixed delay before each send, a crude provider rate-limit mitigation
    pub worker_send_delay_ms: u64,

    /// Attempt ceiling before a job is terminally failed (default: 3)
    pub worker_max_attempts: i32,

    /// Reconnect ceiling before a session is marked failed (default: 5)
    pub reconnect_max_retries: u32,

    /// Base of the exponential reconnect backoff in milliseconds
    pub reconnect_base_delay_ms: u64,

    /// Trailing window for donation matching in hours (default: 24)
    pub match_window_hours: i64,

    /// Country code that a leading national-trunk `0` is rewritten to
    pub phone_country_code: String,

    /// API server bind port (default: 3000)
    pub api_port: u16,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            database_url: std::env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL environment variable is required"))?,
            db_max_connections: std::env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("DB_MAX_CONNECTIONS must be a valid u32"))?,
            gateway_url: std::env::var("GATEWAY_URL")
                .unwrap_or_else(|_| "http://localhost:3001".to_string()),
            gateway_api_key: std::env::var("GATEWAY_API_KEY").ok(),
            sessions_dir: std::env::var("SESSIONS_DIR")
                .unwrap_or_else(|_| "./wa_sessions".to_string()),
            worker_poll_interval_ms: std::env::var("WORKER_POLL_INTERVAL_MS")
                .unwrap_or_else(|_| "5000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("WORKER_POLL_INTERVAL_MS must be a valid u64"))?,
            worker_send_delay_ms: std::env::var("WORKER_SEND_DELAY_MS")
                .unwrap_or_else(|_| "2000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("WORKER_SEND_DELAY_MS must be a valid u64"))?,
            worker_max_attempts: std::env::var("WORKER_MAX_ATTEMPTS")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("WORKER_MAX_ATTEMPTS must be a valid i32"))?,
            reconnect_max_retries: std::env::var("RECONNECT_MAX_RETRIES")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("RECONNECT_MAX_RETRIES must be a valid u32"))?,
            reconnect_base_delay_ms: std::env::var("RECONNECT_BASE_DELAY_MS")
                .unwrap_or_else(|_| "1000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("RECONNECT_BASE_DELAY_MS must be a valid u64"))?,
            match_window_hours: std::env::var("MATCH_WINDOW_HOURS")
                .unwrap_or_else(|_| "24".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("MATCH_WINDOW_HOURS must be a valid i64"))?,
            phone_country_code: std::env::var("PHONE_COUNTRY_CODE")
                .unwrap_or_else(|_| "62".to_string()),
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("API_PORT must be a valid u16"))?,
        })
    }
}
