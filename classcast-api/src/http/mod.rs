//! Thin REST boundary sharing the room record with the signaling core.

pub mod error;
pub mod health;
pub mod redirect;
pub mod rooms;

pub use error::{AppError, AppResult};

use axum::{routing::get, Router};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::state::AppState;
use crate::websocket::websocket_handler;

/// Assemble the full HTTP surface: signaling WebSocket plus REST.
pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/ws", get(websocket_handler))
        .merge(health::create_health_router())
        .merge(rooms::create_rooms_router())
        .merge(redirect::create_redirect_router())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
