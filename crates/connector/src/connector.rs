//! Transport seam between the session manager and the messaging network.
//!
//! Connection lifecycle events arrive over a typed mpsc channel rather than
//! callback wiring, so ordering is deterministic and testable: the manager
//! drains one receiver per live connection.

use std::path::Path;

use async_trait::async_trait;
use tokio::sync::mpsc;

use amanah_common::error::AppError;

/// Why a connection closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Explicit logout on the remote side. Terminal: the stored credentials
    /// are dead and a new QR handshake is required.
    LoggedOut,
    /// Anything else (network drop, gateway restart). Eligible for reconnect
    /// with the same durable credentials.
    Transient(String),
}

/// Lifecycle events emitted by a live connection.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// A QR payload for the credential handshake. Each event supersedes the
    /// previous one; only the latest is worth showing.
    Qr(String),
    /// The connection is open and authenticated.
    Open { phone_number: Option<String> },
    /// Updated credential material to persist for restart-resume.
    CredsUpdate(serde_json::Value),
    /// The connection closed. No further events follow.
    Closed { reason: CloseReason },
}

/// Handle for interacting with one live connection.
#[async_trait]
pub trait ConnectionHandle: Send + Sync {
    /// Send a text message to a network address (JID).
    async fn send_text(&self, jid: &str, body: &str) -> Result<(), AppError>;

    /// Tear the connection down. Idempotent.
    async fn close(&self);
}

/// A freshly opened connection: a command handle plus its event stream.
pub struct Connection {
    pub handle: std::sync::Arc<dyn ConnectionHandle>,
    pub events: mpsc::Receiver<ConnectionEvent>,
}

/// Factory for connections to the messaging network.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a connection for `session_name`, presenting any credentials
    /// already persisted under `auth_dir`.
    async fn connect(&self, session_name: &str, auth_dir: &Path) -> Result<Connection, AppError>;
}
