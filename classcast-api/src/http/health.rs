//! Health check endpoint
//!
//! Reports process identity, local activity, and uptime for monitoring
//! probes and the fleet's post-boot verification.

use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use serde_json::json;

use crate::state::AppState;

/// Health check router
pub fn create_health_router() -> Router<AppState> {
    Router::new().route("/api/health", get(health_check))
}

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "OK",
        "instanceId": state.instance_id,
        "activeRooms": state.hub.room_count(),
        "activeWorkers": state.sfu.worker_count(),
        "uptime": state.started_at.elapsed().as_secs(),
    }))
}
