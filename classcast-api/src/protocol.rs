//! Signaling protocol - JSON message envelopes for WebSocket communication
//!
//! Every envelope carries a `type` discriminator. Payload fields are
//! camelCase; a handful of event names keep their historical dashed form
//! (`user-joined`, `user-left`, `recent-messages`). Errors always use the
//! uniform `{type: "error", message}` shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use classcast_core::models::{ChatRecord, RoomId, UserId};
use classcast_sfu::engine::{DtlsParameters, RtpCapabilities, RtpParameters, TransportParams};
use classcast_sfu::types::{ConsumerId, MediaKind, ProducerId, TransportId};

/// Client-to-server messages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    /// Enter a room as teacher or student
    #[serde(rename_all = "camelCase")]
    Join {
        user_id: UserId,
        room_id: RoomId,
        is_teacher: bool,
        name: String,
    },
    /// Send a chat message to the room
    Chat { message: String },
    /// Ask for the room router's codec capabilities
    GetRouterRtpCapabilities,
    /// Create the broadcast transport (teacher only)
    CreateProducerTransport,
    /// Complete the producer transport DTLS handshake
    #[serde(rename_all = "camelCase")]
    ConnectProducerTransport { dtls_parameters: DtlsParameters },
    /// Publish an audio or video stream
    #[serde(rename_all = "camelCase")]
    Produce {
        kind: MediaKind,
        rtp_parameters: RtpParameters,
    },
    /// List the room's live producers
    GetActiveProducers,
    /// Create a viewer transport, keyed by a caller-chosen id
    #[serde(rename_all = "camelCase")]
    CreateConsumerTransport { transport_id: TransportId },
    /// Complete a viewer transport DTLS handshake
    #[serde(rename_all = "camelCase")]
    ConnectConsumerTransport {
        transport_id: TransportId,
        dtls_parameters: DtlsParameters,
    },
    /// Attach to a producer through one of this connection's viewer
    /// transports
    #[serde(rename_all = "camelCase")]
    Consume {
        transport_id: TransportId,
        producer_id: ProducerId,
        rtp_capabilities: RtpCapabilities,
    },
    /// Start media flow on a paused consumer
    #[serde(rename_all = "camelCase")]
    ResumeConsumer { consumer_id: ConsumerId },
}

/// Server-to-client messages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    /// Someone joined; carries the room's current user list
    #[serde(rename = "user-joined", rename_all = "camelCase")]
    UserJoined {
        user_id: UserId,
        name: String,
        is_teacher: bool,
        users: Vec<RoomUser>,
    },
    /// Buffered chat history, delivered privately to late joiners
    #[serde(rename = "recent-messages")]
    RecentMessages { messages: Vec<ChatRecord> },
    /// Chat event broadcast to the room
    #[serde(rename_all = "camelCase")]
    Chat {
        user_id: UserId,
        name: String,
        is_teacher: bool,
        message: String,
        #[serde(with = "chrono::serde::ts_milliseconds")]
        timestamp: DateTime<Utc>,
    },
    /// Router codec capabilities
    RouterRtpCapabilities { data: serde_json::Value },
    /// Producer transport negotiation parameters
    ProducerTransportCreated { data: TransportParams },
    /// Producer transport handshake finished
    ProducerTransportConnected,
    /// The caller's producer was created
    Produced { data: ProducedData },
    /// A new producer is available (broadcast, excludes the producer)
    #[serde(rename_all = "camelCase")]
    NewProducer {
        producer_id: ProducerId,
        kind: MediaKind,
        teacher_id: UserId,
        teacher_name: String,
    },
    /// Live producers with the teacher's identity
    ActiveProducers { producers: Vec<ActiveProducerInfo> },
    /// Viewer transport negotiation parameters
    ConsumerTransportCreated { data: ConsumerTransportData },
    /// Viewer transport handshake finished
    #[serde(rename_all = "camelCase")]
    ConsumerTransportConnected { transport_id: TransportId },
    /// The caller's consumer was created (paused)
    Consumed { data: ConsumedData },
    /// A paused consumer is now playing
    #[serde(rename_all = "camelCase")]
    ConsumerResumed { consumer_id: ConsumerId },
    /// The producer feeding the named consumer closed; the client must
    /// renegotiate
    #[serde(rename_all = "camelCase")]
    ProducerClosed {
        consumer_id: ConsumerId,
        kind: MediaKind,
    },
    /// Someone left the room
    #[serde(rename = "user-left", rename_all = "camelCase")]
    UserLeft { user_id: UserId, name: String },
    /// Uniform error reply; the connection stays open
    Error { message: String },
}

/// One entry of the room's user list
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomUser {
    pub id: UserId,
    pub name: String,
    pub is_teacher: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProducedData {
    pub id: ProducerId,
    pub kind: MediaKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveProducerInfo {
    pub id: ProducerId,
    pub kind: MediaKind,
    pub teacher_id: Option<UserId>,
    pub teacher_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerTransportData {
    pub transport_id: TransportId,
    pub params: TransportParams,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumedData {
    pub transport_id: TransportId,
    pub consumer_id: ConsumerId,
    pub producer_id: ProducerId,
    pub kind: MediaKind,
    pub rtp_parameters: RtpParameters,
}
