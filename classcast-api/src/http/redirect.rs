//! Redirects clients to the instance hosting their room.

use axum::{
    extract::{Path, Query, State},
    response::{IntoResponse, Redirect, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;

use classcast_core::models::RoomId;
use classcast_core::store::RoomStore;

use crate::http::error::{AppError, AppResult};
use crate::state::AppState;

pub fn create_redirect_router() -> Router<AppState> {
    Router::new().route("/api/redirect/{room_id}", get(redirect_to_room))
}

#[derive(Debug, Deserialize)]
struct RedirectQuery {
    /// `json=true` returns the URL instead of redirecting.
    json: Option<String>,
}

async fn redirect_to_room(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    Query(query): Query<RedirectQuery>,
) -> AppResult<Response> {
    let room_id = RoomId::from(room_id);

    let assignment = match &state.fleet {
        Some(fleet) => fleet.verify(&room_id).await,
        None => state.store.instance_assignment(&room_id).await?,
    };
    let Some(assignment) = assignment else {
        return Err(AppError::not_found("Room not found or has no active instance"));
    };

    let redirect_url = format!(
        "https://{}:{}/classroom/{}",
        assignment.public_address, state.config.fleet.app_port, room_id
    );

    if query.json.as_deref() == Some("true") {
        Ok(Json(json!({ "redirectUrl": redirect_url })).into_response())
    } else {
        Ok(Redirect::temporary(&redirect_url).into_response())
    }
}
