//! Status API — axum routes over the live airspace.
//!
//! Handlers only ever read detached snapshots, so they run concurrently with
//! the recorder without holding the registry lock across an await. Log stats
//! open their own read connection.

use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};

use adsb_track_core::airspace::SharedAirspace;

pub mod routes;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

pub struct AppState {
    pub airspace: SharedAirspace,
    pub db_path: Option<String>,
    pub session: Option<String>,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/aircraft", axum::routing::get(routes::api_aircraft))
        .route(
            "/api/aircraft/:address",
            axum::routing::get(routes::api_aircraft_detail),
        )
        .route("/api/airspace", axum::routing::get(routes::api_airspace))
        .route("/api/stats", axum::routing::get(routes::api_stats))
        .with_state(state)
        .layer(cors)
}

/// Serve the status API until the listener fails.
pub async fn serve(state: Arc<AppState>, host: &str, port: u16) -> std::io::Result<()> {
    let app = build_router(state);
    let addr = format!("{host}:{port}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("status API listening on http://{addr}");
    axum::serve(listener, app).await
}
