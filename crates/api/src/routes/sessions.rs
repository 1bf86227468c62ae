//! Session admin routes: the start/status/send/delete surface of the
//! session manager plus the QR payload for the pairing flow.

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use amanah_common::error::AppError;
use amanah_common::types::SessionStatus;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/sessions/{name}/start", post(start_session))
        .route("/api/sessions/{name}", get(get_session).delete(delete_session))
        .route("/api/sessions/{name}/qr", get(get_qr))
        .route("/api/sessions/{name}/send", post(send_message))
}

/// POST /api/sessions/:name/start — Start (or resume) a session.
///
/// Idempotent: starting a live session is a no-op.
async fn start_session(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.sessions.start_session(&name).await?;
    let status = state
        .sessions
        .status(&name)
        .unwrap_or(SessionStatus::Disconnected);
    Ok(Json(json!({ "session": name, "status": status })))
}

/// GET /api/sessions/:name — Current session state.
///
/// Prefers the live in-memory entry; falls back to the durable record so
/// stopped sessions are still visible.
async fn get_session(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    if let Some(view) = state.sessions.view(&name) {
        return Ok(Json(json!({
            "session": name,
            "status": view.status,
            "phone_number": view.phone_number,
            "qr_pending": view.qr_pending,
            "live": true
        })));
    }

    let row: Option<(SessionStatus, Option<String>)> =
        sqlx::query_as("SELECT status, phone_number FROM wa_sessions WHERE session_name = $1")
            .bind(&name)
            .fetch_optional(&state.pool)
            .await?;

    match row {
        Some((status, phone_number)) => Ok(Json(json!({
            "session": name,
            "status": status,
            "phone_number": phone_number,
            "qr_pending": false,
            "live": false
        }))),
        None => Err(AppError::NotFound(format!("Session {name} not found"))),
    }
}

/// GET /api/sessions/:name/qr — Current QR payload for the pairing flow.
async fn get_qr(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    match state.sessions.qr_code(&name) {
        Some(qr) => Ok(Json(json!({ "session": name, "qr": qr }))),
        None => Err(AppError::NotFound(format!(
            "No QR pending for session {name}"
        ))),
    }
}

#[derive(Debug, Deserialize)]
struct SendMessageParams {
    target: String,
    message: String,
}

/// POST /api/sessions/:name/send — Send a text through a connected session.
async fn send_message(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(params): Json<SendMessageParams>,
) -> Result<Json<serde_json::Value>, AppError> {
    state
        .sessions
        .send_text(&name, &params.target, &params.message)
        .await?;
    Ok(Json(json!({ "sent": true })))
}

/// DELETE /api/sessions/:name — Terminate a session and wipe its credentials.
async fn delete_session(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.sessions.delete_session(&name).await?;
    Ok(Json(json!({ "deleted": true })))
}
