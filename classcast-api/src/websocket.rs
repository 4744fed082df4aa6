//! WebSocket endpoint wiring a socket to a [`ConnectionSession`].
//!
//! Each connection gets an outbound channel drained by a send task, a
//! subscription to SFU lifecycle events (filtered to this connection),
//! and a receive loop feeding the session. Unknown or malformed messages
//! are logged and ignored; the connection never closes over them.

use axum::{
    extract::{ws::Message, ws::WebSocket, State, WebSocketUpgrade},
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use classcast_core::models::id::generate_id;
use classcast_sfu::types::ConnectionId;
use classcast_sfu::MediaEvent;

use crate::protocol::{ClientMessage, ServerMessage};
use crate::session::{deliver, ConnectionSession};
use crate::state::AppState;

/// Signaling frames are small; anything bigger than this is garbage.
const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// WebSocket handler for the signaling channel.
pub async fn websocket_handler(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.max_message_size(MAX_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let connection_id = ConnectionId::new(generate_id());
    info!(connection_id = %connection_id, "WebSocket connection established");

    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    // Outbound: serialize and push everything queued for this client.
    let send_connection = connection_id.clone();
    let send_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let json = match serde_json::to_string(&message) {
                Ok(json) => json,
                Err(err) => {
                    warn!(connection_id = %send_connection, error = %err, "Failed to serialize outbound message");
                    continue;
                }
            };
            if ws_sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    // Relay producer-closed notifications addressed to this connection.
    let mut events = state.sfu.subscribe();
    let event_tx = tx.clone();
    let event_connection = connection_id.clone();
    let event_task = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(MediaEvent::ProducerClosed {
                    connection_id,
                    consumer_id,
                    kind,
                    ..
                }) if connection_id == event_connection => {
                    let _ = event_tx.send(ServerMessage::ProducerClosed { consumer_id, kind });
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(
                        connection_id = %event_connection,
                        missed,
                        "Dropped media events for slow connection"
                    );
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let mut session = ConnectionSession::new(state.clone(), connection_id.clone(), tx.clone());

    while let Some(message) = ws_receiver.next().await {
        match message {
            Ok(Message::Text(text)) => {
                let client_message = match serde_json::from_str::<ClientMessage>(text.as_str()) {
                    Ok(message) => message,
                    Err(err) => {
                        // Unknown message types are logged and ignored.
                        warn!(
                            connection_id = %connection_id,
                            error = %err,
                            "Ignoring unknown or malformed message"
                        );
                        continue;
                    }
                };
                debug!(connection_id = %connection_id, "Received message");
                let outcomes = session.handle(client_message).await;
                deliver(&state, &tx, outcomes);
            }
            Ok(Message::Close(_)) | Err(_) => break,
            // Pings/pongs/binary are not part of the protocol.
            Ok(_) => {}
        }
    }

    let outcomes = session.close().await;
    deliver(&state, &tx, outcomes);

    event_task.abort();
    drop(tx);
    let _ = send_task.await;
    info!(connection_id = %connection_id, "WebSocket connection closed");
}
