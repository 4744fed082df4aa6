//! Room creation and lookup endpoints.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};

use classcast_core::models::{RoomId, RoomRecord};
use classcast_core::store::RoomStore;

use crate::http::error::{AppError, AppResult};
use crate::state::AppState;

pub fn create_rooms_router() -> Router<AppState> {
    Router::new()
        .route("/api/create-room", post(create_room))
        .route("/api/check-room/{room_id}", get(check_room))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateRoomRequest {
    /// 6-character code; generated when omitted.
    room_id: Option<String>,
    teacher_name: String,
}

async fn create_room(
    State(state): State<AppState>,
    Json(request): Json<CreateRoomRequest>,
) -> AppResult<impl IntoResponse> {
    let room_id = match request.room_id {
        Some(id) => {
            let id = RoomId::from(id);
            if !id.is_valid_code() {
                return Err(AppError::bad_request("Invalid room ID"));
            }
            id
        }
        None => RoomId::generate(),
    };

    let record = RoomRecord::new(room_id.clone(), &request.teacher_name);
    if !state.store.create_room(&record).await? {
        return Err(AppError::conflict("Room already exists"));
    }
    info!(room_id = %room_id, teacher_name = %request.teacher_name, "Room created");

    let instance_url = match &state.fleet {
        Some(fleet) => {
            let assignment = fleet
                .acquire(&room_id, &request.teacher_name)
                .await
                .map_err(|err| {
                    error!(room_id = %room_id, error = %err, "Failed to provision room instance");
                    AppError::internal("Failed to create room")
                })?;
            Some(format!(
                "http://{}:{}",
                assignment.public_address, state.config.fleet.app_port
            ))
        }
        // No fleet on this deployment: this instance hosts the room.
        None => {
            state.store.set_instance_id(&room_id, &state.instance_id).await?;
            if let Some(address) = &state.config.server.public_address {
                state.store.set_public_address(&room_id, address).await?;
            }
            state
                .config
                .server
                .public_address
                .as_ref()
                .map(|address| format!("http://{}:{}", address, state.config.server.http_port))
        }
    };

    Ok((
        StatusCode::CREATED,
        Json(json!({ "roomId": room_id, "instanceUrl": instance_url })),
    ))
}

async fn check_room(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let room_id = RoomId::from(room_id);
    if !state.store.room_exists(&room_id).await? {
        return Ok(Json(json!({ "exists": false })));
    }

    let assignment = match &state.fleet {
        Some(fleet) => fleet.verify(&room_id).await,
        None => state.store.instance_assignment(&room_id).await?,
    };
    let instance_url = assignment.map(|assignment| {
        format!(
            "http://{}:{}",
            assignment.public_address, state.config.fleet.app_port
        )
    });

    Ok(Json(json!({ "exists": true, "instanceUrl": instance_url })))
}
