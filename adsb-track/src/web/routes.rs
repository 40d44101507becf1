//! REST API route handlers.
//!
//! Aircraft endpoints serve from the in-memory airspace. `/api/stats` adds
//! event log counts when a log path is configured.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use adsb_track_core::replay::now;

use crate::db::EventLog;
use crate::web::AppState;

#[derive(Deserialize)]
pub struct AircraftParams {
    active: Option<bool>,
}

/// GET /api/aircraft — aircraft list, most recently updated first.
///
/// `?active=true` drops aircraft silent for longer than the stale timeout.
pub async fn api_aircraft(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AircraftParams>,
) -> impl IntoResponse {
    let snapshot = state.airspace.all();
    let aircraft = if params.active == Some(true) {
        snapshot.active(now())
    } else {
        snapshot.newest_first()
    };

    Json(serde_json::to_value(&aircraft).unwrap_or(json!([])))
}

/// GET /api/aircraft/:address — single aircraft snapshot.
pub async fn api_aircraft_detail(
    State(state): State<Arc<AppState>>,
    Path(address): Path<String>,
) -> impl IntoResponse {
    match state.airspace.snapshot(&address) {
        Some(ac) => Json(json!({ "aircraft": ac })).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "Aircraft not found"})),
        )
            .into_response(),
    }
}

/// GET /api/airspace — address → snapshot map.
pub async fn api_airspace(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::to_value(state.airspace.all()).unwrap_or(json!({})))
}

/// GET /api/stats — live aircraft count, session, and log counts.
pub async fn api_stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let log = match state.db_path.clone() {
        Some(path) => tokio::task::spawn_blocking(move || {
            EventLog::open(&path).and_then(|log| log.stats())
        })
        .await
        .ok()
        .and_then(|r| r.map_err(|e| tracing::warn!("stats query failed: {e}")).ok())
        .and_then(|stats| serde_json::to_value(stats).ok()),
        None => None,
    };

    Json(json!({
        "aircraft": state.airspace.len(),
        "session": state.session,
        "log": log.unwrap_or(Value::Null),
    }))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
