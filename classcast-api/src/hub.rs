//! In-memory hub routing messages to connected clients in rooms.
//!
//! Handles local (same-instance) message distribution. Each subscriber is
//! a live WebSocket connection's outbound channel; broadcasts can exclude
//! one user, which is how `newProducer` skips its originator.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use classcast_core::models::{Role, RoomId, UserId};
use classcast_sfu::types::ConnectionId;

use crate::protocol::ServerMessage;

/// Outbound channel of one connection.
pub type ConnectionHandle = mpsc::UnboundedSender<ServerMessage>;

/// One connected client in a room.
#[derive(Debug, Clone)]
pub struct Subscriber {
    pub connection_id: ConnectionId,
    pub user_id: UserId,
    pub name: String,
    pub role: Role,
    pub sender: ConnectionHandle,
}

/// Per-instance map of room to connected clients.
#[derive(Clone, Default)]
pub struct RoomHub {
    rooms: Arc<DashMap<RoomId, Vec<Subscriber>>>,
    connections: Arc<DashMap<ConnectionId, RoomId>>,
}

impl RoomHub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection in a room.
    pub fn join(&self, room_id: RoomId, subscriber: Subscriber) {
        self.connections
            .insert(subscriber.connection_id.clone(), room_id.clone());
        self.rooms
            .entry(room_id.clone())
            .or_default()
            .push(subscriber);
        debug!(room_id = %room_id, "Connection joined local room");
    }

    /// Remove a connection. Returns the room it was in and how many local
    /// members remain there.
    pub fn leave(&self, connection_id: &ConnectionId) -> Option<(RoomId, usize)> {
        let (_, room_id) = self.connections.remove(connection_id)?;

        let mut remaining = 0;
        if let Some(mut subscribers) = self.rooms.get_mut(&room_id) {
            subscribers.retain(|sub| sub.connection_id != *connection_id);
            remaining = subscribers.len();
        }
        if remaining == 0 {
            self.rooms.remove(&room_id);
            debug!(room_id = %room_id, "Local room has no more subscribers, removed");
        }

        Some((room_id, remaining))
    }

    /// Send a message to every local member of a room, optionally skipping
    /// one user. Dead connections are dropped from the hub. Returns the
    /// number of clients reached.
    pub fn broadcast(
        &self,
        room_id: &RoomId,
        message: &ServerMessage,
        exclude: Option<&UserId>,
    ) -> usize {
        let mut sent = 0;
        let mut dead = Vec::new();

        if let Some(subscribers) = self.rooms.get(room_id) {
            for subscriber in subscribers.iter() {
                if exclude == Some(&subscriber.user_id) {
                    continue;
                }
                match subscriber.sender.send(message.clone()) {
                    Ok(()) => sent += 1,
                    Err(err) => {
                        warn!(
                            room_id = %room_id,
                            user_id = %subscriber.user_id,
                            connection_id = %subscriber.connection_id,
                            error = %err,
                            "Failed to send to client, dropping connection"
                        );
                        dead.push(subscriber.connection_id.clone());
                    }
                }
            }
        }

        for connection_id in dead {
            self.leave(&connection_id);
        }

        sent
    }

    /// Number of local members in a room.
    #[must_use]
    pub fn member_count(&self, room_id: &RoomId) -> usize {
        self.rooms
            .get(room_id)
            .map(|subscribers| subscribers.len())
            .unwrap_or(0)
    }

    /// Number of rooms with at least one local member.
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Number of registered connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subscriber(conn: &str, user: &str) -> (Subscriber, mpsc::UnboundedReceiver<ServerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Subscriber {
                connection_id: ConnectionId::from(conn),
                user_id: UserId::from(user),
                name: user.to_string(),
                role: Role::Student,
                sender: tx,
            },
            rx,
        )
    }

    fn chat() -> ServerMessage {
        ServerMessage::Chat {
            user_id: UserId::from("u1"),
            name: "u1".to_string(),
            is_teacher: false,
            message: "hi".to_string(),
            timestamp: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_broadcast_reaches_all_members() {
        let hub = RoomHub::new();
        let room_id = RoomId::from("ABC123");
        let (sub1, mut rx1) = subscriber("c1", "u1");
        let (sub2, mut rx2) = subscriber("c2", "u2");
        hub.join(room_id.clone(), sub1);
        hub.join(room_id.clone(), sub2);

        assert_eq!(hub.broadcast(&room_id, &chat(), None), 2);
        assert!(rx1.recv().await.is_some());
        assert!(rx2.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_broadcast_excludes_originator() {
        let hub = RoomHub::new();
        let room_id = RoomId::from("ABC123");
        let (sub1, mut rx1) = subscriber("c1", "u1");
        let (sub2, mut rx2) = subscriber("c2", "u2");
        hub.join(room_id.clone(), sub1);
        hub.join(room_id.clone(), sub2);

        let sent = hub.broadcast(&room_id, &chat(), Some(&UserId::from("u1")));
        assert_eq!(sent, 1);
        assert!(rx2.try_recv().is_ok());
        assert!(rx1.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_leave_reports_remaining_members() {
        let hub = RoomHub::new();
        let room_id = RoomId::from("ABC123");
        let (sub1, _rx1) = subscriber("c1", "u1");
        let (sub2, _rx2) = subscriber("c2", "u2");
        hub.join(room_id.clone(), sub1);
        hub.join(room_id.clone(), sub2);

        assert_eq!(hub.leave(&ConnectionId::from("c1")), Some((room_id.clone(), 1)));
        assert_eq!(hub.leave(&ConnectionId::from("c2")), Some((room_id.clone(), 0)));
        assert_eq!(hub.room_count(), 0);
        assert!(hub.leave(&ConnectionId::from("c2")).is_none());
    }

    #[tokio::test]
    async fn test_dead_connections_are_pruned() {
        let hub = RoomHub::new();
        let room_id = RoomId::from("ABC123");
        let (sub1, rx1) = subscriber("c1", "u1");
        hub.join(room_id.clone(), sub1);

        drop(rx1);
        assert_eq!(hub.broadcast(&room_id, &chat(), None), 0);
        assert_eq!(hub.connection_count(), 0);
    }
}
