//! Session registry and per-session connection state machine.
//!
//! Lifecycle per session:
//! `start` → connecting → (QR pending ↔ connecting) → connected → closed,
//! where a close either reconnects with the same durable credentials
//! (transient cause, bounded exponential backoff) or terminates (explicit
//! logout, or backoff ceiling exhausted → `failed`).
//!
//! The manager is an explicit instance owned by the composing binary and
//! passed to collaborators; there is no process-wide singleton.

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::mpsc;

use amanah_common::error::AppError;
use amanah_common::types::SessionStatus;

use crate::backoff::reconnect_delay;
use crate::connector::{CloseReason, ConnectionEvent, ConnectionHandle, Connector};
use crate::repo::SessionRepo;

/// Live state of one registered session.
struct SessionEntry {
    /// Absent while the connection is still being established.
    handle: Option<Arc<dyn ConnectionHandle>>,
    status: SessionStatus,
    /// Single-slot QR payload: overwritten by each handshake event, cleared
    /// on connect. Never persisted.
    qr: Option<String>,
    phone_number: Option<String>,
}

impl SessionEntry {
    fn connecting() -> Self {
        Self {
            handle: None,
            status: SessionStatus::Disconnected,
            qr: None,
            phone_number: None,
        }
    }
}

/// Read-only snapshot of a session's cached state.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SessionView {
    pub status: SessionStatus,
    pub phone_number: Option<String>,
    pub qr_pending: bool,
}

/// Owns one connection state machine per named session.
pub struct SessionManager {
    connector: Arc<dyn Connector>,
    repo: Arc<dyn SessionRepo>,
    sessions_dir: PathBuf,
    reconnect_max_retries: u32,
    reconnect_base_delay: Duration,
    sessions: Mutex<HashMap<String, SessionEntry>>,
    reconnect_attempts: Mutex<HashMap<String, u32>>,
    /// Per-session generation token, bumped by `delete_session`. A connection
    /// or scheduled reconnect carrying a stale generation belongs to a deleted
    /// session and must not restart it.
    generations: Mutex<HashMap<String, u64>>,
}

impl SessionManager {
    pub fn new(
        connector: Arc<dyn Connector>,
        repo: Arc<dyn SessionRepo>,
        sessions_dir: PathBuf,
        reconnect_max_retries: u32,
        reconnect_base_delay: Duration,
    ) -> Self {
        Self {
            connector,
            repo,
            sessions_dir,
            reconnect_max_retries,
            reconnect_base_delay,
            sessions: Mutex::new(HashMap::new()),
            reconnect_attempts: Mutex::new(HashMap::new()),
            generations: Mutex::new(HashMap::new()),
        }
    }

    fn lock_sessions(&self) -> MutexGuard<'_, HashMap<String, SessionEntry>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_attempts(&self) -> MutexGuard<'_, HashMap<String, u32>> {
        self.reconnect_attempts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    fn lock_generations(&self) -> MutexGuard<'_, HashMap<String, u64>> {
        self.generations.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn generation(&self, session_name: &str) -> u64 {
        self.lock_generations()
            .get(session_name)
            .copied()
            .unwrap_or(0)
    }

    fn auth_dir(&self, session_name: &str) -> PathBuf {
        self.sessions_dir.join(session_name)
    }

    /// Start (or resume) a session. No-op if a live entry already exists.
    ///
    /// Returns an explicitly boxed future: the reconnect path re-enters this
    /// function, and the concrete type would otherwise be infinitely
    /// recursive.
    pub fn start_session<'a>(
        self: &'a Arc<Self>,
        session_name: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'a>> {
        Box::pin(async move {
            {
                let mut sessions = self.lock_sessions();
                if sessions.contains_key(session_name) {
                    return Ok(());
                }
                // Placeholder blocks concurrent starts of the same session
                // while the connection is being established.
                sessions.insert(session_name.to_string(), SessionEntry::connecting());
            }

            tracing::info!(session = session_name, "Starting session");

            let result = self.open_connection(session_name).await;
            if let Err(e) = &result {
                tracing::error!(session = session_name, error = %e, "Session start failed");
                self.lock_sessions().remove(session_name);
            }
            result
        })
    }

    async fn open_connection(self: &Arc<Self>, session_name: &str) -> Result<(), AppError> {
        self.repo.ensure(session_name).await?;

        let generation = self.generation(session_name);
        let auth_dir = self.auth_dir(session_name);
        tokio::fs::create_dir_all(&auth_dir)
            .await
            .map_err(|e| AppError::Internal(format!("cannot create credential dir: {e}")))?;

        let connection = self.connector.connect(session_name, &auth_dir).await?;

        {
            let mut sessions = self.lock_sessions();
            match sessions.get_mut(session_name) {
                Some(entry) => entry.handle = Some(connection.handle),
                // Deleted while connecting; drop the fresh connection.
                None => {
                    let handle = connection.handle;
                    tokio::spawn(async move { handle.close().await });
                    return Ok(());
                }
            }
        }

        let manager = Arc::clone(self);
        let name = session_name.to_string();
        tokio::spawn(async move {
            manager
                .drive_events(name, generation, auth_dir, connection.events)
                .await;
        });

        Ok(())
    }

    /// Drain one connection's event stream until it closes, then decide
    /// between reconnect and terminal shutdown.
    async fn drive_events(
        self: Arc<Self>,
        session_name: String,
        generation: u64,
        auth_dir: PathBuf,
        mut events: mpsc::Receiver<ConnectionEvent>,
    ) {
        let close_reason = loop {
            match events.recv().await {
                Some(ConnectionEvent::Qr(qr)) => {
                    tracing::info!(session = %session_name, "QR generated");
                    if let Some(entry) = self.lock_sessions().get_mut(&session_name) {
                        entry.qr = Some(qr);
                        entry.status = SessionStatus::Scanning;
                    }
                    if let Err(e) = self
                        .repo
                        .set_status(&session_name, SessionStatus::Scanning)
                        .await
                    {
                        tracing::error!(session = %session_name, error = %e, "Status update failed");
                    }
                }
                Some(ConnectionEvent::Open { phone_number }) => {
                    tracing::info!(
                        session = %session_name,
                        phone = phone_number.as_deref().unwrap_or("unknown"),
                        "Session connected"
                    );
                    if let Some(entry) = self.lock_sessions().get_mut(&session_name) {
                        entry.qr = None;
                        entry.status = SessionStatus::Connected;
                        entry.phone_number = phone_number.clone();
                    }
                    self.lock_attempts().remove(&session_name);
                    if let Err(e) = self
                        .repo
                        .set_connected(&session_name, phone_number.as_deref())
                        .await
                    {
                        tracing::error!(session = %session_name, error = %e, "Status update failed");
                    }
                }
                Some(ConnectionEvent::CredsUpdate(creds)) => {
                    if let Err(e) = persist_creds(&auth_dir, &creds).await {
                        tracing::error!(session = %session_name, error = %e, "Credential persist failed");
                    }
                }
                Some(ConnectionEvent::Closed { reason }) => break reason,
                None => break CloseReason::Transient("event stream ended".to_string()),
            }
        };

        // A bumped generation means delete_session already tore this
        // connection down; its stream ending must not look like a transient
        // drop, or the deleted session would reconnect and recreate the
        // credential dir the delete just wiped.
        if self.generation(&session_name) != generation {
            tracing::info!(session = %session_name, "Connection closed for deleted session");
            return;
        }

        self.lock_sessions().remove(&session_name);

        match close_reason {
            CloseReason::LoggedOut => {
                tracing::info!(session = %session_name, "Session logged out, not retrying");
                self.lock_attempts().remove(&session_name);
                if let Err(e) = self
                    .repo
                    .set_status(&session_name, SessionStatus::Disconnected)
                    .await
                {
                    tracing::error!(session = %session_name, error = %e, "Status update failed");
                }
            }
            CloseReason::Transient(detail) => {
                tracing::warn!(session = %session_name, detail = %detail, "Connection closed");
                self.reconnect(session_name, generation).await;
            }
        }
    }

    /// Reconnect with exponential backoff up to the configured ceiling, after
    /// which the session is marked failed instead of retried forever. Aborts
    /// if the session is deleted while waiting.
    async fn reconnect(self: Arc<Self>, session_name: String, generation: u64) {
        loop {
            let attempt = {
                let mut attempts = self.lock_attempts();
                let counter = attempts.entry(session_name.clone()).or_insert(0);
                *counter += 1;
                *counter
            };

            if attempt > self.reconnect_max_retries {
                tracing::error!(
                    session = %session_name,
                    retries = self.reconnect_max_retries,
                    "Reconnect ceiling reached, marking session failed"
                );
                if let Err(e) = self
                    .repo
                    .set_status(&session_name, SessionStatus::Failed)
                    .await
                {
                    tracing::error!(session = %session_name, error = %e, "Status update failed");
                }
                return;
            }

            let delay = reconnect_delay(self.reconnect_base_delay, attempt);
            tracing::info!(
                session = %session_name,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Scheduling reconnect"
            );
            tokio::time::sleep(delay).await;

            if self.generation(&session_name) != generation {
                tracing::info!(session = %session_name, "Session deleted during backoff, stopping reconnect");
                return;
            }

            match self.start_session(&session_name).await {
                Ok(()) => return,
                Err(e) => {
                    tracing::warn!(session = %session_name, error = %e, "Reconnect attempt failed");
                }
            }
        }
    }

    /// Send a text message through a connected session.
    ///
    /// The recipient is a digits-only, country-code-prefixed number; it is
    /// formatted into the network's addressing scheme here.
    pub async fn send_text(
        &self,
        session_name: &str,
        recipient: &str,
        body: &str,
    ) -> Result<(), AppError> {
        let handle = {
            let sessions = self.lock_sessions();
            let entry = sessions
                .get(session_name)
                .ok_or_else(|| AppError::SessionNotActive(session_name.to_string()))?;
            if entry.status != SessionStatus::Connected {
                return Err(AppError::SessionNotActive(session_name.to_string()));
            }
            entry
                .handle
                .clone()
                .ok_or_else(|| AppError::SessionNotActive(session_name.to_string()))?
        };

        let jid = format!("{recipient}@s.whatsapp.net");
        handle.send_text(&jid, body).await
    }

    /// Terminate a session and wipe its durable credentials. Idempotent.
    pub async fn delete_session(&self, session_name: &str) -> Result<(), AppError> {
        // Invalidate the live connection and any scheduled reconnect before
        // tearing anything down.
        *self
            .lock_generations()
            .entry(session_name.to_string())
            .or_insert(0) += 1;

        let entry = self.lock_sessions().remove(session_name);
        if let Some(SessionEntry {
            handle: Some(handle),
            ..
        }) = entry
        {
            handle.close().await;
        }
        self.lock_attempts().remove(session_name);

        match tokio::fs::remove_dir_all(self.auth_dir(session_name)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(AppError::Internal(format!(
                    "cannot remove credential dir: {e}"
                )));
            }
        }

        self.repo
            .set_status(session_name, SessionStatus::Disconnected)
            .await?;

        tracing::info!(session = session_name, "Session deleted");
        Ok(())
    }

    /// Current QR payload, if a handshake is pending.
    pub fn qr_code(&self, session_name: &str) -> Option<String> {
        self.lock_sessions()
            .get(session_name)
            .and_then(|entry| entry.qr.clone())
    }

    /// Cached status of a live entry. `None` when no entry exists.
    pub fn status(&self, session_name: &str) -> Option<SessionStatus> {
        self.lock_sessions()
            .get(session_name)
            .map(|entry| entry.status)
    }

    /// Snapshot of a live entry for the admin surface.
    pub fn view(&self, session_name: &str) -> Option<SessionView> {
        self.lock_sessions()
            .get(session_name)
            .map(|entry| SessionView {
                status: entry.status,
                phone_number: entry.phone_number.clone(),
                qr_pending: entry.qr.is_some(),
            })
    }

    /// Start every session present in the durable store. Called once at boot
    /// so a restart resumes without re-handshake. Per-session failures are
    /// logged and skipped.
    pub async fn resume_persisted(self: &Arc<Self>) -> Result<usize, AppError> {
        let names = self.repo.list_names().await?;
        let mut started = 0;
        for name in names {
            match self.start_session(&name).await {
                Ok(()) => started += 1,
                Err(e) => {
                    tracing::error!(session = %name, error = %e, "Resume failed");
                }
            }
        }
        tracing::info!(started, "Resumed persisted sessions");
        Ok(started)
    }
}

async fn persist_creds(auth_dir: &std::path::Path, creds: &serde_json::Value) -> Result<(), AppError> {
    let raw = serde_json::to_vec(creds)
        .map_err(|e| AppError::Internal(format!("credential serialize failed: {e}")))?;
    tokio::fs::write(auth_dir.join("creds.json"), raw)
        .await
        .map_err(|e| AppError::Internal(format!("credential write failed: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use amanah_common::types::WaSession;

    use super::*;
    use crate::connector::Connection;

    struct MockHandle {
        sent: Arc<Mutex<Vec<(String, String)>>>,
        senders: Arc<Mutex<Vec<mpsc::Sender<ConnectionEvent>>>>,
    }

    #[async_trait]
    impl ConnectionHandle for MockHandle {
        async fn send_text(&self, jid: &str, body: &str) -> Result<(), AppError> {
            self.sent
                .lock()
                .unwrap()
                .push((jid.to_string(), body.to_string()));
            Ok(())
        }

        async fn close(&self) {
            // Like the gateway handle: closing stops event delivery, so the
            // manager-side receiver sees the stream end.
            self.senders.lock().unwrap().clear();
        }
    }

    /// Connector whose event streams are driven interactively by the test.
    struct MockConnector {
        connects: AtomicU32,
        senders: Arc<Mutex<Vec<mpsc::Sender<ConnectionEvent>>>>,
        sent: Arc<Mutex<Vec<(String, String)>>>,
    }

    impl MockConnector {
        fn new() -> Self {
            Self {
                connects: AtomicU32::new(0),
                senders: Arc::new(Mutex::new(Vec::new())),
                sent: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn connect_count(&self) -> u32 {
            self.connects.load(Ordering::SeqCst)
        }

        async fn emit(&self, event: ConnectionEvent) {
            let tx = self
                .senders
                .lock()
                .unwrap()
                .last()
                .cloned()
                .expect("no live connection");
            tx.send(event).await.expect("event channel closed");
        }
    }

    #[async_trait]
    impl Connector for MockConnector {
        async fn connect(&self, _name: &str, _auth_dir: &std::path::Path) -> Result<Connection, AppError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            let (tx, rx) = mpsc::channel(16);
            self.senders.lock().unwrap().push(tx);
            Ok(Connection {
                handle: Arc::new(MockHandle {
                    sent: Arc::clone(&self.sent),
                    senders: Arc::clone(&self.senders),
                }),
                events: rx,
            })
        }
    }

    #[derive(Default)]
    struct MemoryRepo {
        statuses: Mutex<HashMap<String, SessionStatus>>,
        phones: Mutex<HashMap<String, Option<String>>>,
    }

    impl MemoryRepo {
        fn status_of(&self, name: &str) -> Option<SessionStatus> {
            self.statuses.lock().unwrap().get(name).copied()
        }
    }

    #[async_trait]
    impl SessionRepo for MemoryRepo {
        async fn ensure(&self, name: &str) -> Result<(), AppError> {
            self.statuses
                .lock()
                .unwrap()
                .entry(name.to_string())
                .or_insert(SessionStatus::Disconnected);
            Ok(())
        }

        async fn set_status(&self, name: &str, status: SessionStatus) -> Result<(), AppError> {
            self.statuses
                .lock()
                .unwrap()
                .insert(name.to_string(), status);
            Ok(())
        }

        async fn set_connected(&self, name: &str, phone: Option<&str>) -> Result<(), AppError> {
            self.statuses
                .lock()
                .unwrap()
                .insert(name.to_string(), SessionStatus::Connected);
            self.phones
                .lock()
                .unwrap()
                .insert(name.to_string(), phone.map(str::to_string));
            Ok(())
        }

        async fn list_names(&self) -> Result<Vec<String>, AppError> {
            let mut names: Vec<String> = self.statuses.lock().unwrap().keys().cloned().collect();
            names.sort();
            Ok(names)
        }

        async fn get(&self, name: &str) -> Result<Option<WaSession>, AppError> {
            Ok(self.status_of(name).map(|status| WaSession {
                id: uuid::Uuid::new_v4(),
                session_name: name.to_string(),
                status,
                phone_number: self.phones.lock().unwrap().get(name).cloned().flatten(),
                created_at: chrono::Utc::now(),
                updated_at: chrono::Utc::now(),
            }))
        }
    }

    struct Harness {
        manager: Arc<SessionManager>,
        connector: Arc<MockConnector>,
        repo: Arc<MemoryRepo>,
        _dir: tempfile::TempDir,
    }

    fn harness(max_retries: u32) -> Harness {
        let connector = Arc::new(MockConnector::new());
        let repo = Arc::new(MemoryRepo::default());
        let dir = tempfile::tempdir().unwrap();
        let manager = Arc::new(SessionManager::new(
            Arc::clone(&connector) as Arc<dyn Connector>,
            Arc::clone(&repo) as Arc<dyn SessionRepo>,
            dir.path().to_path_buf(),
            max_retries,
            Duration::from_millis(1),
        ));
        Harness {
            manager,
            connector,
            repo,
            _dir: dir,
        }
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not met within 2s");
    }

    #[tokio::test]
    async fn test_start_session_is_idempotent() {
        let h = harness(3);
        h.manager.start_session("primary").await.unwrap();
        h.manager.start_session("primary").await.unwrap();
        assert_eq!(h.connector.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_qr_event_sets_scanning_and_stores_payload() {
        let h = harness(3);
        h.manager.start_session("primary").await.unwrap();

        h.connector.emit(ConnectionEvent::Qr("2@first".into())).await;
        h.connector.emit(ConnectionEvent::Qr("2@second".into())).await;

        let manager = Arc::clone(&h.manager);
        wait_until(move || manager.qr_code("primary").as_deref() == Some("2@second")).await;
        assert_eq!(h.manager.status("primary"), Some(SessionStatus::Scanning));
        assert_eq!(h.repo.status_of("primary"), Some(SessionStatus::Scanning));
    }

    #[tokio::test]
    async fn test_open_event_connects_and_clears_qr() {
        let h = harness(3);
        h.manager.start_session("primary").await.unwrap();

        h.connector.emit(ConnectionEvent::Qr("2@qr".into())).await;
        h.connector
            .emit(ConnectionEvent::Open {
                phone_number: Some("628123456789".into()),
            })
            .await;

        let manager = Arc::clone(&h.manager);
        wait_until(move || manager.status("primary") == Some(SessionStatus::Connected)).await;
        assert_eq!(h.manager.qr_code("primary"), None);

        let view = h.manager.view("primary").unwrap();
        assert_eq!(view.phone_number.as_deref(), Some("628123456789"));
        assert!(!view.qr_pending);
        assert_eq!(h.repo.status_of("primary"), Some(SessionStatus::Connected));
    }

    #[tokio::test]
    async fn test_send_without_entry_fails_with_session_not_active() {
        let h = harness(3);
        let err = h
            .manager
            .send_text("missing", "628123", "halo")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::SessionNotActive(_)));
    }

    #[tokio::test]
    async fn test_send_before_connected_fails() {
        let h = harness(3);
        h.manager.start_session("primary").await.unwrap();
        let err = h
            .manager
            .send_text("primary", "628123", "halo")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::SessionNotActive(_)));
    }

    #[tokio::test]
    async fn test_send_formats_network_address() {
        let h = harness(3);
        h.manager.start_session("primary").await.unwrap();
        h.connector
            .emit(ConnectionEvent::Open { phone_number: None })
            .await;
        let manager = Arc::clone(&h.manager);
        wait_until(move || manager.status("primary") == Some(SessionStatus::Connected)).await;

        h.manager
            .send_text("primary", "628123456789", "halo")
            .await
            .unwrap();

        let sent = h.connector.sent.lock().unwrap().clone();
        assert_eq!(
            sent,
            vec![("628123456789@s.whatsapp.net".to_string(), "halo".to_string())]
        );
    }

    #[tokio::test]
    async fn test_logged_out_close_is_terminal() {
        let h = harness(3);
        h.manager.start_session("primary").await.unwrap();
        h.connector.emit(ConnectionEvent::Qr("2@qr".into())).await;
        h.connector
            .emit(ConnectionEvent::Closed {
                reason: CloseReason::LoggedOut,
            })
            .await;

        let manager = Arc::clone(&h.manager);
        wait_until(move || manager.status("primary").is_none()).await;
        let repo = Arc::clone(&h.repo);
        wait_until(move || repo.status_of("primary") == Some(SessionStatus::Disconnected)).await;

        // No reconnect may be scheduled after a logout.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.connector.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_transient_close_reconnects() {
        let h = harness(3);
        h.manager.start_session("primary").await.unwrap();
        h.connector
            .emit(ConnectionEvent::Closed {
                reason: CloseReason::Transient("stream error".into()),
            })
            .await;

        let connector = Arc::clone(&h.connector);
        wait_until(move || connector.connect_count() == 2).await;
    }

    #[tokio::test]
    async fn test_successful_connect_resets_backoff_counter() {
        let h = harness(1);
        h.manager.start_session("primary").await.unwrap();

        // First drop consumes the single allowed retry...
        h.connector
            .emit(ConnectionEvent::Closed {
                reason: CloseReason::Transient("drop 1".into()),
            })
            .await;
        let connector = Arc::clone(&h.connector);
        wait_until(move || connector.connect_count() == 2).await;

        // ...but a successful open resets the counter, so the next drop is
        // retried again instead of failing the session.
        h.connector
            .emit(ConnectionEvent::Open { phone_number: None })
            .await;
        let manager = Arc::clone(&h.manager);
        wait_until(move || manager.status("primary") == Some(SessionStatus::Connected)).await;

        h.connector
            .emit(ConnectionEvent::Closed {
                reason: CloseReason::Transient("drop 2".into()),
            })
            .await;
        let connector = Arc::clone(&h.connector);
        wait_until(move || connector.connect_count() == 3).await;
        assert_ne!(h.repo.status_of("primary"), Some(SessionStatus::Failed));
    }

    #[tokio::test]
    async fn test_reconnect_ceiling_marks_session_failed() {
        let h = harness(2);
        h.manager.start_session("primary").await.unwrap();

        for expected_connects in [2, 3] {
            h.connector
                .emit(ConnectionEvent::Closed {
                    reason: CloseReason::Transient("flaky".into()),
                })
                .await;
            let connector = Arc::clone(&h.connector);
            wait_until(move || connector.connect_count() == expected_connects).await;
        }

        // Third close exceeds the ceiling of 2 retries.
        h.connector
            .emit(ConnectionEvent::Closed {
                reason: CloseReason::Transient("flaky".into()),
            })
            .await;

        let repo = Arc::clone(&h.repo);
        wait_until(move || repo.status_of("primary") == Some(SessionStatus::Failed)).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.connector.connect_count(), 3);
    }

    #[tokio::test]
    async fn test_creds_update_is_persisted() {
        let h = harness(3);
        h.manager.start_session("primary").await.unwrap();

        let creds = serde_json::json!({"noise_key": "abc", "registered": true});
        h.connector
            .emit(ConnectionEvent::CredsUpdate(creds.clone()))
            .await;

        let path = h._dir.path().join("primary").join("creds.json");
        let probe = path.clone();
        wait_until(move || probe.exists()).await;
        let stored: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(stored, creds);
    }

    #[tokio::test]
    async fn test_delete_session_wipes_credentials_and_is_idempotent() {
        let h = harness(3);
        h.manager.start_session("primary").await.unwrap();
        assert!(h._dir.path().join("primary").exists());

        h.manager.delete_session("primary").await.unwrap();
        assert!(!h._dir.path().join("primary").exists());
        assert!(h.manager.status("primary").is_none());
        assert_eq!(
            h.repo.status_of("primary"),
            Some(SessionStatus::Disconnected)
        );

        // Second delete has nothing to do and still succeeds.
        h.manager.delete_session("primary").await.unwrap();
    }

    #[tokio::test]
    async fn test_deleted_session_is_not_resurrected() {
        let h = harness(3);
        h.manager.start_session("primary").await.unwrap();

        h.manager.delete_session("primary").await.unwrap();

        // Closing the handle ends the event stream; that must not be taken
        // for a transient drop and reconnected.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(h.connector.connect_count(), 1);
        assert!(h.manager.status("primary").is_none());
        assert!(!h._dir.path().join("primary").exists());
        assert_eq!(
            h.repo.status_of("primary"),
            Some(SessionStatus::Disconnected)
        );
    }

    #[tokio::test]
    async fn test_delete_during_backoff_stops_reconnect() {
        // Base delay long enough for the delete to land inside the sleep.
        let connector = Arc::new(MockConnector::new());
        let repo = Arc::new(MemoryRepo::default());
        let dir = tempfile::tempdir().unwrap();
        let manager = Arc::new(SessionManager::new(
            Arc::clone(&connector) as Arc<dyn Connector>,
            Arc::clone(&repo) as Arc<dyn SessionRepo>,
            dir.path().to_path_buf(),
            3,
            Duration::from_millis(200),
        ));

        manager.start_session("primary").await.unwrap();
        connector
            .emit(ConnectionEvent::Closed {
                reason: CloseReason::Transient("drop".into()),
            })
            .await;

        // Once the entry is gone the reconnect sleep has started.
        let m = Arc::clone(&manager);
        wait_until(move || m.status("primary").is_none()).await;
        manager.delete_session("primary").await.unwrap();

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(connector.connect_count(), 1);
        assert!(!dir.path().join("primary").exists());
    }

    #[tokio::test]
    async fn test_resume_persisted_starts_known_sessions() {
        let h = harness(3);
        h.repo.ensure("alpha").await.unwrap();
        h.repo.ensure("beta").await.unwrap();

        let started = h.manager.resume_persisted().await.unwrap();
        assert_eq!(started, 2);
        assert_eq!(h.connector.connect_count(), 2);
        assert!(h.manager.status("alpha").is_some());
        assert!(h.manager.status("beta").is_some());
    }
}
