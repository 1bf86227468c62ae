//! Public webhook for bank mutation events.
//!
//! The provider pushes either a single mutation object or an array of them.
//! The response always acknowledges with a processed count — per-item
//! failures are logged inside the matcher, never surfaced, so the sender has
//! no reason to retry-storm the endpoint.

use axum::routing::post;
use axum::{Json, Router};
use serde_json::json;

use axum::extract::State;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/api/webhook/bank", post(ingest_mutations))
}

/// POST /api/webhook/bank — ingest one or many bank mutations.
async fn ingest_mutations(
    State(state): State<AppState>,
    Json(body): Json<serde_json::Value>,
) -> Json<serde_json::Value> {
    tracing::info!("Received bank webhook");

    let processed = state.matcher.ingest_raw(body).await;

    Json(json!({ "status": "ok", "processed": processed }))
}
