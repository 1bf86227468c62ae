//! HTTP implementation of [`Connector`] against the messaging gateway daemon.
//!
//! The gateway multiplexes real network connections and exposes them per
//! session: `POST /api/sessions/{name}/start` opens (or resumes) a session,
//! `GET /api/sessions/{name}/events` long-polls lifecycle events, and
//! `POST /api/sessions/{name}/send-text` transmits a message. Encryption and
//! the pairing protocol itself live entirely on the gateway side.
//!
//! The events endpoint fans out per consumer: each poller holds its own
//! cursor and receives its own copy of every event. The API server and the
//! worker both run a session manager over the same sessions and rely on this
//! — with consume-once delivery one process would see only part of the
//! lifecycle. `start` is idempotent on the gateway side for the same reason.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::{mpsc, watch};

use amanah_common::error::AppError;

use crate::connector::{CloseReason, Connection, ConnectionEvent, ConnectionHandle, Connector};

/// Consecutive event-poll failures tolerated before the connection is
/// declared closed.
const MAX_POLL_FAILURES: u32 = 3;

/// Pause between failed polls.
const POLL_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Lifecycle event as delivered by the gateway's event endpoint.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum GatewayEvent {
    Qr {
        qr: String,
    },
    Open {
        phone_number: Option<String>,
    },
    Creds {
        creds: serde_json::Value,
    },
    Closed {
        reason: String,
        detail: Option<String>,
    },
}

impl GatewayEvent {
    fn into_connection_event(self) -> ConnectionEvent {
        match self {
            GatewayEvent::Qr { qr } => ConnectionEvent::Qr(qr),
            GatewayEvent::Open { phone_number } => ConnectionEvent::Open { phone_number },
            GatewayEvent::Creds { creds } => ConnectionEvent::CredsUpdate(creds),
            GatewayEvent::Closed { reason, detail } => {
                let reason = if reason == "logged_out" {
                    CloseReason::LoggedOut
                } else {
                    CloseReason::Transient(detail.unwrap_or(reason))
                };
                ConnectionEvent::Closed { reason }
            }
        }
    }
}

/// Connector that talks to the messaging gateway over HTTP.
pub struct GatewayConnector {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl GatewayConnector {
    pub fn new(base_url: String, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    /// Load credentials persisted by a previous run, if any.
    async fn load_creds(auth_dir: &Path) -> Option<serde_json::Value> {
        let raw = tokio::fs::read(auth_dir.join("creds.json")).await.ok()?;
        serde_json::from_slice(&raw).ok()
    }

    /// Long-poll the event endpoint, forwarding events until the connection
    /// closes, the poll fails repeatedly, or the handle is closed.
    async fn poll_events(
        client: reqwest::Client,
        events_url: String,
        api_key: Option<String>,
        tx: mpsc::Sender<ConnectionEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut failures = 0u32;

        loop {
            let mut request = client.get(&events_url);
            if let Some(key) = &api_key {
                request = request.bearer_auth(key);
            }

            let response = tokio::select! {
                response = request.send() => response,
                _ = shutdown.changed() => return,
            };

            let batch: Result<Vec<GatewayEvent>, _> = match response {
                Ok(response) if response.status().is_success() => response.json().await,
                Ok(response) => Err(response.error_for_status().unwrap_err()),
                Err(e) => Err(e),
            };

            match batch {
                Ok(events) => {
                    failures = 0;
                    for event in events {
                        let event = event.into_connection_event();
                        let closed = matches!(event, ConnectionEvent::Closed { .. });
                        if tx.send(event).await.is_err() {
                            return;
                        }
                        if closed {
                            return;
                        }
                    }
                }
                Err(e) => {
                    failures += 1;
                    tracing::warn!(error = %e, failures, "Gateway event poll failed");
                    if failures >= MAX_POLL_FAILURES {
                        let _ = tx
                            .send(ConnectionEvent::Closed {
                                reason: CloseReason::Transient(format!(
                                    "event poll failed {failures} times: {e}"
                                )),
                            })
                            .await;
                        return;
                    }
                    tokio::select! {
                        _ = tokio::time::sleep(POLL_RETRY_DELAY) => {}
                        _ = shutdown.changed() => return,
                    }
                }
            }
        }
    }
}

#[async_trait]
impl Connector for GatewayConnector {
    async fn connect(&self, session_name: &str, auth_dir: &Path) -> Result<Connection, AppError> {
        let creds = Self::load_creds(auth_dir).await;
        let resuming = creds.is_some();

        let start_url = format!("{}/api/sessions/{}/start", self.base_url, session_name);
        let response = self
            .authorize(self.client.post(&start_url))
            .json(&serde_json::json!({ "creds": creds }))
            .send()
            .await
            .map_err(|e| AppError::Gateway(format!("session start failed: {e}")))?;

        if !response.status().is_success() {
            return Err(AppError::Gateway(format!(
                "session start returned {}",
                response.status()
            )));
        }

        tracing::info!(session = session_name, resuming, "Gateway session started");

        let (tx, rx) = mpsc::channel(64);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let events_url = format!("{}/api/sessions/{}/events", self.base_url, session_name);
        tokio::spawn(Self::poll_events(
            self.client.clone(),
            events_url,
            self.api_key.clone(),
            tx,
            shutdown_rx,
        ));

        let handle = Arc::new(GatewayHandle {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            api_key: self.api_key.clone(),
            session_name: session_name.to_string(),
            shutdown: shutdown_tx,
        });

        Ok(Connection { handle, events: rx })
    }
}

/// Command handle for one gateway-managed session.
pub struct GatewayHandle {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    session_name: String,
    shutdown: watch::Sender<bool>,
}

impl GatewayHandle {
    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }
}

#[async_trait]
impl ConnectionHandle for GatewayHandle {
    async fn send_text(&self, jid: &str, body: &str) -> Result<(), AppError> {
        let url = format!(
            "{}/api/sessions/{}/send-text",
            self.base_url, self.session_name
        );
        let response = self
            .authorize(self.client.post(&url))
            .json(&serde_json::json!({ "jid": jid, "text": body }))
            .send()
            .await
            .map_err(|e| AppError::Gateway(format!("send failed: {e}")))?;

        if !response.status().is_success() {
            return Err(AppError::Gateway(format!(
                "send returned {}",
                response.status()
            )));
        }

        Ok(())
    }

    async fn close(&self) {
        // Stops the poll loop; the gateway is told to drop the session too,
        // but a failure there is not actionable here.
        let _ = self.shutdown.send(true);

        let url = format!("{}/api/sessions/{}/stop", self.base_url, self.session_name);
        if let Err(e) = self.authorize(self.client.post(&url)).send().await {
            tracing::warn!(session = %self.session_name, error = %e, "Gateway stop failed");
        }
    }
}
