//! Per-connection signaling session.
//!
//! Each WebSocket connection owns one `ConnectionSession`: its identity
//! once joined, its producer transport, and its caller-keyed consumer
//! transports, so a disconnect tears everything down in one place. A
//! session moves UNJOINED → JOINED → CLOSED; every handler returns
//! explicit [`Dispatch`] outcomes (private reply, room broadcast, or
//! both) which the WebSocket loop then delivers. Handlers write the
//! store before returning, so a client's own follow-up query never sees
//! state older than its own action.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use classcast_core::models::{ChatRecord, PresenceRecord, Role, RoomId, UserId};
use classcast_core::store::RoomStore;
use classcast_sfu::engine::{DtlsParameters, EngineTransport, RtpCapabilities, RtpParameters};
use classcast_sfu::types::{ConnectionId, ConsumerId, MediaKind, ProducerId, TransportId};
use classcast_sfu::MediaError;

use crate::hub::{ConnectionHandle, Subscriber};
use crate::protocol::{
    ActiveProducerInfo, ClientMessage, ConsumedData, ConsumerTransportData, ProducedData, RoomUser,
    ServerMessage,
};
use crate::state::AppState;

/// How many buffered chat entries a late joiner receives.
const RECENT_CHAT_LIMIT: usize = 50;

/// Signaling failure taxonomy. Every variant becomes an `error` reply;
/// the connection always stays open.
#[derive(Debug, Error)]
pub enum SignalError {
    /// Malformed input or wrong role
    #[error("{0}")]
    Validation(String),

    /// Referenced room/transport/producer/consumer does not exist
    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Media(#[from] MediaError),

    #[error("Store error: {0}")]
    Store(#[from] classcast_core::Error),
}

impl SignalError {
    /// Message sent on the wire. Store failures stay opaque.
    fn wire_message(&self) -> String {
        match self {
            Self::Validation(message) | Self::NotFound(message) => message.clone(),
            Self::Media(err) => err.to_string(),
            Self::Store(_) => "Internal server error".to_string(),
        }
    }
}

/// Outcome of one handled message.
#[derive(Debug)]
pub enum Dispatch {
    /// Send to this connection only.
    Reply(ServerMessage),
    /// Send to every local member of the room, optionally excluding one
    /// user (the originator).
    Broadcast {
        room_id: RoomId,
        message: ServerMessage,
        exclude: Option<UserId>,
    },
}

/// Deliver handler outcomes: replies down the connection's own channel,
/// broadcasts through the hub.
pub fn deliver(state: &AppState, sender: &ConnectionHandle, outcomes: Vec<Dispatch>) {
    for outcome in outcomes {
        match outcome {
            Dispatch::Reply(message) => {
                let _ = sender.send(message);
            }
            Dispatch::Broadcast {
                room_id,
                message,
                exclude,
            } => {
                state.hub.broadcast(&room_id, &message, exclude.as_ref());
            }
        }
    }
}

struct Identity {
    user_id: UserId,
    room_id: RoomId,
    name: String,
    role: Role,
}

/// State machine for one client connection.
pub struct ConnectionSession {
    state: AppState,
    connection_id: ConnectionId,
    sender: ConnectionHandle,
    identity: Option<Identity>,
    producer_transport: Option<Arc<dyn EngineTransport>>,
    consumer_transports: HashMap<TransportId, Arc<dyn EngineTransport>>,
}

impl ConnectionSession {
    pub fn new(state: AppState, connection_id: ConnectionId, sender: ConnectionHandle) -> Self {
        Self {
            state,
            connection_id,
            sender,
            identity: None,
            producer_transport: None,
            consumer_transports: HashMap::new(),
        }
    }

    #[must_use]
    pub fn connection_id(&self) -> &ConnectionId {
        &self.connection_id
    }

    /// Handle one inbound message, turning failures into error replies.
    pub async fn handle(&mut self, message: ClientMessage) -> Vec<Dispatch> {
        match self.dispatch(message).await {
            Ok(outcomes) => outcomes,
            Err(err) => {
                warn!(
                    connection_id = %self.connection_id,
                    error = %err,
                    "Signaling request failed"
                );
                vec![Dispatch::Reply(ServerMessage::Error {
                    message: err.wire_message(),
                })]
            }
        }
    }

    async fn dispatch(&mut self, message: ClientMessage) -> Result<Vec<Dispatch>, SignalError> {
        match message {
            ClientMessage::Join {
                user_id,
                room_id,
                is_teacher,
                name,
            } => self.handle_join(user_id, room_id, is_teacher, name).await,
            ClientMessage::Chat { message } => self.handle_chat(message).await,
            ClientMessage::GetRouterRtpCapabilities => self.handle_router_capabilities().await,
            ClientMessage::CreateProducerTransport => self.handle_create_producer_transport().await,
            ClientMessage::ConnectProducerTransport { dtls_parameters } => {
                self.handle_connect_producer_transport(dtls_parameters).await
            }
            ClientMessage::Produce {
                kind,
                rtp_parameters,
            } => self.handle_produce(kind, rtp_parameters).await,
            ClientMessage::GetActiveProducers => self.handle_active_producers().await,
            ClientMessage::CreateConsumerTransport { transport_id } => {
                self.handle_create_consumer_transport(transport_id).await
            }
            ClientMessage::ConnectConsumerTransport {
                transport_id,
                dtls_parameters,
            } => {
                self.handle_connect_consumer_transport(transport_id, dtls_parameters)
                    .await
            }
            ClientMessage::Consume {
                transport_id,
                producer_id,
                rtp_capabilities,
            } => {
                self.handle_consume(transport_id, producer_id, rtp_capabilities)
                    .await
            }
            ClientMessage::ResumeConsumer { consumer_id } => {
                self.handle_resume_consumer(consumer_id).await
            }
        }
    }

    fn identity(&self) -> Result<&Identity, SignalError> {
        self.identity
            .as_ref()
            .ok_or_else(|| SignalError::Validation("Join a room first".to_string()))
    }

    fn teacher_identity(&self) -> Result<&Identity, SignalError> {
        let identity = self.identity()?;
        if !identity.role.is_teacher() {
            return Err(SignalError::Validation(
                "Only teachers can broadcast video".to_string(),
            ));
        }
        Ok(identity)
    }

    /// Announced address for transports: the room's recorded public
    /// address, then this instance's configured one; the SFU falls back
    /// to loopback when both are absent.
    async fn announced_address(&self, room_id: &RoomId) -> Option<String> {
        match self.state.store.public_address(room_id).await {
            Ok(Some(address)) => Some(address),
            Ok(None) => self.state.config.server.public_address.clone(),
            Err(err) => {
                warn!(room_id = %room_id, error = %err, "Failed to read room public address");
                self.state.config.server.public_address.clone()
            }
        }
    }

    async fn handle_join(
        &mut self,
        user_id: UserId,
        room_id: RoomId,
        is_teacher: bool,
        name: String,
    ) -> Result<Vec<Dispatch>, SignalError> {
        if self.identity.is_some() {
            return Err(SignalError::Validation("Already joined a room".to_string()));
        }
        let role = Role::from_is_teacher(is_teacher);

        self.state
            .store
            .add_member(
                &room_id,
                &PresenceRecord {
                    user_id: user_id.clone(),
                    name: name.clone(),
                    role,
                    instance_id: self.state.instance_id.clone(),
                },
            )
            .await?;

        // First teacher in lazily creates the room's router; the
        // capability descriptor goes to the store right away so other
        // instances can answer capability queries without a live router.
        if role.is_teacher() {
            let capabilities = self.state.sfu.ensure_router(&room_id).await?;
            self.state
                .store
                .set_capabilities(&room_id, &capabilities.0)
                .await?;
        }

        let users: Vec<RoomUser> = self
            .state
            .store
            .members(&room_id)
            .await?
            .into_iter()
            .map(|member| RoomUser {
                id: member.user_id,
                name: member.name,
                is_teacher: member.role.is_teacher(),
            })
            .collect();

        self.state.hub.join(
            room_id.clone(),
            Subscriber {
                connection_id: self.connection_id.clone(),
                user_id: user_id.clone(),
                name: name.clone(),
                role,
                sender: self.sender.clone(),
            },
        );

        let mut outcomes = vec![Dispatch::Broadcast {
            room_id: room_id.clone(),
            message: ServerMessage::UserJoined {
                user_id: user_id.clone(),
                name: name.clone(),
                is_teacher,
                users,
            },
            exclude: None,
        }];

        // Students catch up on the room's recent conversation.
        if !role.is_teacher() {
            let messages = self
                .state
                .store
                .recent_chat(&room_id, RECENT_CHAT_LIMIT)
                .await?;
            outcomes.push(Dispatch::Reply(ServerMessage::RecentMessages { messages }));
        }

        info!(
            connection_id = %self.connection_id,
            room_id = %room_id,
            user_id = %user_id,
            is_teacher,
            "User joined room"
        );
        self.identity = Some(Identity {
            user_id,
            room_id,
            name,
            role,
        });
        Ok(outcomes)
    }

    async fn handle_chat(&mut self, message: String) -> Result<Vec<Dispatch>, SignalError> {
        let identity = self.identity()?;
        let entry = ChatRecord {
            user_id: identity.user_id.clone(),
            name: identity.name.clone(),
            is_teacher: identity.role.is_teacher(),
            message,
            timestamp: Utc::now(),
        };
        let room_id = identity.room_id.clone();

        self.state.store.append_chat(&room_id, &entry).await?;

        Ok(vec![Dispatch::Broadcast {
            room_id,
            message: ServerMessage::Chat {
                user_id: entry.user_id,
                name: entry.name,
                is_teacher: entry.is_teacher,
                message: entry.message,
                timestamp: entry.timestamp,
            },
            exclude: None,
        }])
    }

    async fn handle_router_capabilities(&mut self) -> Result<Vec<Dispatch>, SignalError> {
        let room_id = self.identity()?.room_id.clone();

        // Local router first, then whatever a teacher's instance
        // persisted to the store.
        if let Some(capabilities) = self.state.sfu.room_capabilities(&room_id).await {
            return Ok(vec![Dispatch::Reply(ServerMessage::RouterRtpCapabilities {
                data: capabilities.0,
            })]);
        }
        match self.state.store.capabilities(&room_id).await? {
            Some(data) => Ok(vec![Dispatch::Reply(ServerMessage::RouterRtpCapabilities {
                data,
            })]),
            None => Err(SignalError::NotFound(
                "Room not properly initialized for media".to_string(),
            )),
        }
    }

    async fn handle_create_producer_transport(&mut self) -> Result<Vec<Dispatch>, SignalError> {
        let room_id = self.teacher_identity()?.room_id.clone();
        let announced = self.announced_address(&room_id).await;

        let (transport, params) = self.state.sfu.create_transport(&room_id, announced).await?;
        self.producer_transport = Some(transport);

        Ok(vec![Dispatch::Reply(ServerMessage::ProducerTransportCreated {
            data: params,
        })])
    }

    async fn handle_connect_producer_transport(
        &mut self,
        dtls_parameters: DtlsParameters,
    ) -> Result<Vec<Dispatch>, SignalError> {
        self.identity()?;
        let transport = self
            .producer_transport
            .as_ref()
            .ok_or_else(|| SignalError::NotFound("Transport not found".to_string()))?;

        transport.connect(dtls_parameters).await?;
        Ok(vec![Dispatch::Reply(ServerMessage::ProducerTransportConnected)])
    }

    async fn handle_produce(
        &mut self,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
    ) -> Result<Vec<Dispatch>, SignalError> {
        let identity = self.teacher_identity()?;
        let (room_id, user_id, name) = (
            identity.room_id.clone(),
            identity.user_id.clone(),
            identity.name.clone(),
        );
        let transport = self
            .producer_transport
            .clone()
            .ok_or_else(|| SignalError::NotFound("Transport not found".to_string()))?;

        let producer_id = self
            .state
            .sfu
            .produce(&room_id, &self.connection_id, &transport, kind, rtp_parameters)
            .await?;

        Ok(vec![
            Dispatch::Reply(ServerMessage::Produced {
                data: ProducedData {
                    id: producer_id.clone(),
                    kind,
                },
            }),
            Dispatch::Broadcast {
                room_id,
                message: ServerMessage::NewProducer {
                    producer_id,
                    kind,
                    teacher_id: user_id.clone(),
                    teacher_name: name,
                },
                exclude: Some(user_id),
            },
        ])
    }

    async fn handle_active_producers(&mut self) -> Result<Vec<Dispatch>, SignalError> {
        let room_id = self.identity()?.room_id.clone();

        let producers = self.state.sfu.active_producers(&room_id).await;
        let teacher = self
            .state
            .store
            .members(&room_id)
            .await
            .unwrap_or_default()
            .into_iter()
            .find(|member| member.role.is_teacher());
        let (teacher_id, teacher_name) = match teacher {
            Some(teacher) => (Some(teacher.user_id), Some(teacher.name)),
            None => (None, None),
        };

        let producers = producers
            .into_iter()
            .map(|producer| ActiveProducerInfo {
                id: producer.id,
                kind: producer.kind,
                teacher_id: teacher_id.clone(),
                teacher_name: teacher_name.clone(),
            })
            .collect();

        Ok(vec![Dispatch::Reply(ServerMessage::ActiveProducers {
            producers,
        })])
    }

    async fn handle_create_consumer_transport(
        &mut self,
        transport_id: TransportId,
    ) -> Result<Vec<Dispatch>, SignalError> {
        let room_id = self.identity()?.room_id.clone();
        let announced = self.announced_address(&room_id).await;

        let (transport, params) = self.state.sfu.create_transport(&room_id, announced).await?;
        self.consumer_transports
            .insert(transport_id.clone(), transport);

        Ok(vec![Dispatch::Reply(ServerMessage::ConsumerTransportCreated {
            data: ConsumerTransportData {
                transport_id,
                params,
            },
        })])
    }

    async fn handle_connect_consumer_transport(
        &mut self,
        transport_id: TransportId,
        dtls_parameters: DtlsParameters,
    ) -> Result<Vec<Dispatch>, SignalError> {
        self.identity()?;
        let transport = self
            .consumer_transports
            .get(&transport_id)
            .ok_or_else(|| SignalError::NotFound("Transport not found".to_string()))?;

        transport.connect(dtls_parameters).await?;
        Ok(vec![Dispatch::Reply(ServerMessage::ConsumerTransportConnected {
            transport_id,
        })])
    }

    async fn handle_consume(
        &mut self,
        transport_id: TransportId,
        producer_id: ProducerId,
        rtp_capabilities: RtpCapabilities,
    ) -> Result<Vec<Dispatch>, SignalError> {
        let room_id = self.identity()?.room_id.clone();

        if !self.state.sfu.has_room(&room_id).await {
            return Err(SignalError::NotFound("Room not found".to_string()));
        }
        let transport = self
            .consumer_transports
            .get(&transport_id)
            .cloned()
            .ok_or_else(|| SignalError::NotFound("Transport not found".to_string()))?;

        let descriptor = self
            .state
            .sfu
            .consume(
                &room_id,
                &self.connection_id,
                &transport,
                &producer_id,
                rtp_capabilities,
            )
            .await?;

        Ok(vec![Dispatch::Reply(ServerMessage::Consumed {
            data: ConsumedData {
                transport_id,
                consumer_id: descriptor.consumer_id,
                producer_id: descriptor.producer_id,
                kind: descriptor.kind,
                rtp_parameters: descriptor.rtp_parameters,
            },
        })])
    }

    async fn handle_resume_consumer(
        &mut self,
        consumer_id: ConsumerId,
    ) -> Result<Vec<Dispatch>, SignalError> {
        let room_id = self.identity()?.room_id.clone();
        self.state.sfu.resume_consumer(&room_id, &consumer_id).await?;
        Ok(vec![Dispatch::Reply(ServerMessage::ConsumerResumed {
            consumer_id,
        })])
    }

    /// Socket closed: remove the user locally and from the store,
    /// announce the departure, tear down this connection's media, and
    /// release the room's router if no local member remains. Returned
    /// broadcasts must still be delivered by the caller.
    pub async fn close(&mut self) -> Vec<Dispatch> {
        let mut outcomes = Vec::new();

        if let Some(identity) = self.identity.take() {
            let Identity {
                user_id,
                room_id,
                name,
                ..
            } = identity;

            let remaining = self
                .state
                .hub
                .leave(&self.connection_id)
                .map_or(0, |(_, remaining)| remaining);

            if let Err(err) = self.state.store.remove_member(&room_id, &user_id).await {
                warn!(room_id = %room_id, user_id = %user_id, error = %err, "Failed to remove member from store");
            }

            outcomes.push(Dispatch::Broadcast {
                room_id: room_id.clone(),
                message: ServerMessage::UserLeft {
                    user_id: user_id.clone(),
                    name,
                },
                exclude: None,
            });

            self.state
                .sfu
                .connection_closed(&room_id, &self.connection_id)
                .await;

            if remaining == 0 {
                self.state.sfu.release_room(&room_id).await;
            }

            info!(
                connection_id = %self.connection_id,
                room_id = %room_id,
                user_id = %user_id,
                remaining_local = remaining,
                "User left room"
            );
        }

        // Dropping the handles closes the engine resources.
        self.producer_transport = None;
        self.consumer_transports.clear();
        debug!(connection_id = %self.connection_id, "Connection session closed");
        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use classcast_core::config::Config;
    use classcast_core::models::InstanceId;
    use classcast_core::store::{MemoryStore, RoomStore};
    use classcast_sfu::engine::mock::MockEngine;
    use classcast_sfu::{SfuConfig, SfuManager};
    use serde_json::json;
    use tokio::sync::mpsc;

    async fn test_state_with_store(store: Arc<dyn RoomStore>, instance: &str) -> AppState {
        let engine = MockEngine::new();
        let sfu = SfuManager::new(
            &engine,
            SfuConfig {
                num_workers: 1,
                ..Default::default()
            },
        )
        .await
        .unwrap();
        AppState::new(
            InstanceId::from(instance),
            Arc::new(Config::default()),
            store,
            sfu,
            None,
        )
    }

    async fn test_state() -> AppState {
        test_state_with_store(Arc::new(MemoryStore::new()), "instance-a").await
    }

    struct Client {
        session: ConnectionSession,
        sender: ConnectionHandle,
        rx: mpsc::UnboundedReceiver<ServerMessage>,
    }

    impl Client {
        fn connect(state: &AppState, connection_id: &str) -> Self {
            let (sender, rx) = mpsc::unbounded_channel();
            Self {
                session: ConnectionSession::new(
                    state.clone(),
                    ConnectionId::from(connection_id),
                    sender.clone(),
                ),
                sender,
                rx,
            }
        }

        async fn send(&mut self, state: &AppState, message: ClientMessage) {
            let outcomes = self.session.handle(message).await;
            deliver(state, &self.sender, outcomes);
        }

        async fn close(&mut self, state: &AppState) {
            let outcomes = self.session.close().await;
            deliver(state, &self.sender, outcomes);
        }

        fn drain(&mut self) -> Vec<ServerMessage> {
            let mut messages = Vec::new();
            while let Ok(message) = self.rx.try_recv() {
                messages.push(message);
            }
            messages
        }
    }

    fn join(user: &str, room: &str, is_teacher: bool) -> ClientMessage {
        ClientMessage::Join {
            user_id: UserId::from(user),
            room_id: RoomId::from(room),
            is_teacher,
            name: format!("name-{user}"),
        }
    }

    fn good_caps() -> RtpCapabilities {
        RtpCapabilities(json!({ "codecs": [{ "mimeType": "video/VP8" }] }))
    }

    fn error_message(messages: &[ServerMessage]) -> Option<String> {
        messages.iter().find_map(|message| match message {
            ServerMessage::Error { message } => Some(message.clone()),
            _ => None,
        })
    }

    #[tokio::test]
    async fn test_teacher_join_creates_router_and_persists_capabilities() {
        let state = test_state().await;
        let mut teacher = Client::connect(&state, "c-teacher");
        teacher.send(&state, join("t1", "ABC123", true)).await;

        let room_id = RoomId::from("ABC123");
        assert!(state.sfu.has_room(&room_id).await);
        let stored = state.store.capabilities(&room_id).await.unwrap();
        assert_eq!(
            stored.map(RtpCapabilities),
            state.sfu.room_capabilities(&room_id).await
        );

        let messages = teacher.drain();
        assert!(matches!(messages[0], ServerMessage::UserJoined { .. }));
        // Teachers do not get history.
        assert!(!messages
            .iter()
            .any(|m| matches!(m, ServerMessage::RecentMessages { .. })));
    }

    #[tokio::test]
    async fn test_student_join_creates_no_router() {
        let state = test_state().await;
        let mut student = Client::connect(&state, "c-student");
        student.send(&state, join("s1", "ABC123", false)).await;

        assert!(!state.sfu.has_room(&RoomId::from("ABC123")).await);
        let messages = student.drain();
        assert!(matches!(messages[0], ServerMessage::UserJoined { .. }));
        assert!(matches!(messages[1], ServerMessage::RecentMessages { .. }));
    }

    #[tokio::test]
    async fn test_chat_history_survives_sender_disconnect() {
        let state = test_state().await;
        let room_id = RoomId::from("ABC123");

        let mut teacher = Client::connect(&state, "c-teacher");
        teacher.send(&state, join("t1", "ABC123", true)).await;
        let mut student = Client::connect(&state, "c-student");
        student.send(&state, join("s1", "ABC123", false)).await;

        teacher
            .send(
                &state,
                ClientMessage::Chat {
                    message: "hi".to_string(),
                },
            )
            .await;

        // Both connected members saw the chat broadcast.
        assert!(teacher
            .drain()
            .iter()
            .any(|m| matches!(m, ServerMessage::Chat { message, .. } if message == "hi")));
        assert!(student
            .drain()
            .iter()
            .any(|m| matches!(m, ServerMessage::Chat { message, .. } if message == "hi")));

        teacher.close(&state).await;
        assert!(state.store.room_exists(&room_id).await.unwrap());

        // A fresh joiner still receives the disconnected teacher's message.
        let mut late = Client::connect(&state, "c-late");
        late.send(&state, join("s2", "ABC123", false)).await;
        let history = late.drain().into_iter().find_map(|m| match m {
            ServerMessage::RecentMessages { messages } => Some(messages),
            _ => None,
        });
        let history = history.expect("late joiner gets recent-messages");
        assert!(history.iter().any(|entry| entry.message == "hi"));

        // Once everyone is gone, the room's store state is gone too.
        student.close(&state).await;
        late.close(&state).await;
        assert!(!state.store.room_exists(&room_id).await.unwrap());
        assert_eq!(state.store.member_count(&room_id).await.unwrap(), 0);
        assert!(state.store.recent_chat(&room_id, 50).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_students_cannot_broadcast() {
        let state = test_state().await;
        let mut teacher = Client::connect(&state, "c-teacher");
        teacher.send(&state, join("t1", "ABC123", true)).await;
        let mut student = Client::connect(&state, "c-student");
        student.send(&state, join("s1", "ABC123", false)).await;
        student.drain();

        student
            .send(&state, ClientMessage::CreateProducerTransport)
            .await;
        assert_eq!(
            error_message(&student.drain()).as_deref(),
            Some("Only teachers can broadcast video")
        );

        student
            .send(
                &state,
                ClientMessage::Produce {
                    kind: MediaKind::Video,
                    rtp_parameters: RtpParameters(json!({})),
                },
            )
            .await;
        assert_eq!(
            error_message(&student.drain()).as_deref(),
            Some("Only teachers can broadcast video")
        );
    }

    #[tokio::test]
    async fn test_negotiation_requires_join() {
        let state = test_state().await;
        let mut client = Client::connect(&state, "c-1");
        client
            .send(&state, ClientMessage::GetRouterRtpCapabilities)
            .await;
        assert_eq!(
            error_message(&client.drain()).as_deref(),
            Some("Join a room first")
        );
    }

    #[tokio::test]
    async fn test_double_join_rejected() {
        let state = test_state().await;
        let mut client = Client::connect(&state, "c-1");
        client.send(&state, join("t1", "ABC123", true)).await;
        client.drain();
        client.send(&state, join("t1", "XYZ789", true)).await;
        assert_eq!(
            error_message(&client.drain()).as_deref(),
            Some("Already joined a room")
        );
    }

    #[tokio::test]
    async fn test_full_broadcast_and_viewing_flow() {
        let state = test_state().await;
        let mut teacher = Client::connect(&state, "c-teacher");
        teacher.send(&state, join("t1", "ABC123", true)).await;
        let mut student = Client::connect(&state, "c-student");
        student.send(&state, join("s1", "ABC123", false)).await;
        teacher.drain();
        student.drain();

        // Teacher side: transport, handshake, produce.
        teacher
            .send(&state, ClientMessage::CreateProducerTransport)
            .await;
        let created = teacher.drain();
        assert!(matches!(
            created[0],
            ServerMessage::ProducerTransportCreated { .. }
        ));

        teacher
            .send(
                &state,
                ClientMessage::ConnectProducerTransport {
                    dtls_parameters: DtlsParameters(json!({})),
                },
            )
            .await;
        assert!(matches!(
            teacher.drain()[0],
            ServerMessage::ProducerTransportConnected
        ));

        teacher
            .send(
                &state,
                ClientMessage::Produce {
                    kind: MediaKind::Video,
                    rtp_parameters: RtpParameters(json!({})),
                },
            )
            .await;
        let produced = teacher.drain();
        let producer_id = produced
            .iter()
            .find_map(|m| match m {
                ServerMessage::Produced { data } => Some(data.id.clone()),
                _ => None,
            })
            .expect("produced reply");
        // The producing teacher is excluded from the newProducer broadcast.
        assert!(!produced
            .iter()
            .any(|m| matches!(m, ServerMessage::NewProducer { .. })));
        assert!(student
            .drain()
            .iter()
            .any(|m| matches!(m, ServerMessage::NewProducer { producer_id: id, .. } if *id == producer_id)));

        // Student side: list, transport, handshake, consume, resume.
        student.send(&state, ClientMessage::GetActiveProducers).await;
        let listed = student.drain();
        match &listed[0] {
            ServerMessage::ActiveProducers { producers } => {
                assert_eq!(producers.len(), 1);
                assert_eq!(producers[0].id, producer_id);
                assert_eq!(producers[0].teacher_id, Some(UserId::from("t1")));
            }
            other => panic!("unexpected reply: {other:?}"),
        }

        let transport_id = TransportId::from("viewer-1");
        student
            .send(
                &state,
                ClientMessage::CreateConsumerTransport {
                    transport_id: transport_id.clone(),
                },
            )
            .await;
        assert!(matches!(
            student.drain()[0],
            ServerMessage::ConsumerTransportCreated { .. }
        ));

        student
            .send(
                &state,
                ClientMessage::ConnectConsumerTransport {
                    transport_id: transport_id.clone(),
                    dtls_parameters: DtlsParameters(json!({})),
                },
            )
            .await;
        assert!(matches!(
            student.drain()[0],
            ServerMessage::ConsumerTransportConnected { .. }
        ));

        student
            .send(
                &state,
                ClientMessage::Consume {
                    transport_id: transport_id.clone(),
                    producer_id: producer_id.clone(),
                    rtp_capabilities: good_caps(),
                },
            )
            .await;
        let consumed = student.drain();
        let consumer_id = match &consumed[0] {
            ServerMessage::Consumed { data } => {
                assert_eq!(data.producer_id, producer_id);
                assert_eq!(data.transport_id, transport_id);
                data.consumer_id.clone()
            }
            other => panic!("unexpected reply: {other:?}"),
        };

        student
            .send(&state, ClientMessage::ResumeConsumer { consumer_id })
            .await;
        assert!(matches!(
            student.drain()[0],
            ServerMessage::ConsumerResumed { .. }
        ));
    }

    #[tokio::test]
    async fn test_consume_error_paths_are_distinct() {
        let state = test_state().await;
        let mut teacher = Client::connect(&state, "c-teacher");
        teacher.send(&state, join("t1", "ABC123", true)).await;
        let mut student = Client::connect(&state, "c-student");
        student.send(&state, join("s1", "ABC123", false)).await;
        teacher.drain();
        student.drain();

        // Unknown consumer transport.
        student
            .send(
                &state,
                ClientMessage::Consume {
                    transport_id: TransportId::from("nope"),
                    producer_id: ProducerId::from("p"),
                    rtp_capabilities: good_caps(),
                },
            )
            .await;
        assert_eq!(
            error_message(&student.drain()).as_deref(),
            Some("Transport not found")
        );

        let transport_id = TransportId::from("viewer-1");
        student
            .send(
                &state,
                ClientMessage::CreateConsumerTransport {
                    transport_id: transport_id.clone(),
                },
            )
            .await;
        student.drain();

        // Unknown producer.
        student
            .send(
                &state,
                ClientMessage::Consume {
                    transport_id: transport_id.clone(),
                    producer_id: ProducerId::from("missing"),
                    rtp_capabilities: good_caps(),
                },
            )
            .await;
        assert_eq!(
            error_message(&student.drain()).as_deref(),
            Some("Producer not found")
        );

        // Incompatible capabilities.
        teacher
            .send(&state, ClientMessage::CreateProducerTransport)
            .await;
        teacher.drain();
        teacher
            .send(
                &state,
                ClientMessage::Produce {
                    kind: MediaKind::Video,
                    rtp_parameters: RtpParameters(json!({})),
                },
            )
            .await;
        let producer_id = teacher
            .drain()
            .iter()
            .find_map(|m| match m {
                ServerMessage::Produced { data } => Some(data.id.clone()),
                _ => None,
            })
            .expect("produced");

        student
            .send(
                &state,
                ClientMessage::Consume {
                    transport_id,
                    producer_id,
                    rtp_capabilities: RtpCapabilities(json!({ "codecs": [] })),
                },
            )
            .await;
        assert_eq!(
            error_message(&student.drain()).as_deref(),
            Some("Cannot consume producer")
        );

        // Unknown consumer on resume.
        student
            .send(
                &state,
                ClientMessage::ResumeConsumer {
                    consumer_id: ConsumerId::from("missing"),
                },
            )
            .await;
        assert_eq!(
            error_message(&student.drain()).as_deref(),
            Some("Consumer not found")
        );
    }

    #[tokio::test]
    async fn test_capabilities_visible_across_instances() {
        let store: Arc<dyn RoomStore> = Arc::new(MemoryStore::new());
        let state_a = test_state_with_store(Arc::clone(&store), "instance-a").await;
        let state_b = test_state_with_store(Arc::clone(&store), "instance-b").await;

        let mut teacher = Client::connect(&state_a, "c-teacher");
        teacher.send(&state_a, join("t1", "ABC123", true)).await;

        // Different process: no local router, so the store copy answers.
        let mut student = Client::connect(&state_b, "c-student");
        student.send(&state_b, join("s1", "ABC123", false)).await;
        student.drain();
        student
            .send(&state_b, ClientMessage::GetRouterRtpCapabilities)
            .await;

        let reply = student.drain();
        let data = match &reply[0] {
            ServerMessage::RouterRtpCapabilities { data } => data.clone(),
            other => panic!("unexpected reply: {other:?}"),
        };
        let local = state_a
            .sfu
            .room_capabilities(&RoomId::from("ABC123"))
            .await
            .unwrap();
        assert_eq!(data, local.0);
    }

    #[tokio::test]
    async fn test_capabilities_unavailable_without_any_router() {
        let state = test_state().await;
        let mut student = Client::connect(&state, "c-student");
        student.send(&state, join("s1", "ABC123", false)).await;
        student.drain();
        student
            .send(&state, ClientMessage::GetRouterRtpCapabilities)
            .await;
        assert_eq!(
            error_message(&student.drain()).as_deref(),
            Some("Room not properly initialized for media")
        );
    }

    #[tokio::test]
    async fn test_last_local_disconnect_releases_router() {
        let state = test_state().await;
        let room_id = RoomId::from("ABC123");

        let mut teacher = Client::connect(&state, "c-teacher");
        teacher.send(&state, join("t1", "ABC123", true)).await;
        let mut student = Client::connect(&state, "c-student");
        student.send(&state, join("s1", "ABC123", false)).await;
        teacher.drain();
        student.drain();

        teacher.close(&state).await;
        // Student still there: the router survives, and the departure was
        // announced.
        assert!(state.sfu.has_room(&room_id).await);
        assert!(student
            .drain()
            .iter()
            .any(|m| matches!(m, ServerMessage::UserLeft { user_id, .. } if user_id.as_str() == "t1")));

        student.close(&state).await;
        assert!(!state.sfu.has_room(&room_id).await);
        assert_eq!(state.hub.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_active_producers_empty_without_router() {
        let state = test_state().await;
        let mut student = Client::connect(&state, "c-student");
        student.send(&state, join("s1", "ABC123", false)).await;
        student.drain();
        student.send(&state, ClientMessage::GetActiveProducers).await;
        match &student.drain()[0] {
            ServerMessage::ActiveProducers { producers } => assert!(producers.is_empty()),
            other => panic!("unexpected reply: {other:?}"),
        }
    }
}
