//! Media engine seam.
//!
//! The SFU manager never talks to a concrete media stack; it drives these
//! traits. Codec capabilities, RTP parameters, and DTLS parameters cross
//! the seam as opaque JSON — the engine and the clients interpret them,
//! this crate only relays and persists them.
//!
//! Engine objects close when their last handle is dropped; removing a
//! handle from the manager's maps is what destroys the underlying
//! resource.

pub mod mediasoup;
pub mod mock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::MediaResult;
use crate::types::{ConsumerId, MediaKind, ProducerId, TransportId};

/// Router codec capabilities as negotiated with clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RtpCapabilities(pub serde_json::Value);

/// RTP send parameters supplied by a producing client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RtpParameters(pub serde_json::Value);

/// DTLS parameters supplied by a client to complete the transport
/// handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DtlsParameters(pub serde_json::Value);

/// Negotiation parameters announced to the client for a fresh transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportParams {
    pub id: String,
    pub ice_parameters: serde_json::Value,
    pub ice_candidates: serde_json::Value,
    pub dtls_parameters: serde_json::Value,
}

/// Where a transport listens and which address it announces to clients.
#[derive(Debug, Clone)]
pub struct TransportListen {
    /// Externally reachable address clients connect to.
    pub announced_address: String,
}

/// Factory for media workers.
#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Spawn worker number `index` of the pool.
    async fn create_worker(&self, index: usize) -> MediaResult<Arc<dyn EngineWorker>>;
}

/// A media-processing worker hosting routers.
#[async_trait]
pub trait EngineWorker: Send + Sync {
    fn id(&self) -> String;

    /// Create a router parameterized by a codec list.
    async fn create_router(&self, media_codecs: &serde_json::Value)
        -> MediaResult<Arc<dyn EngineRouter>>;
}

/// Per-room media-forwarding context.
#[async_trait]
pub trait EngineRouter: Send + Sync {
    fn id(&self) -> String;

    /// Capability descriptor clients negotiate against.
    fn rtp_capabilities(&self) -> RtpCapabilities;

    /// Whether a client with the given capabilities can consume the
    /// producer.
    fn can_consume(&self, producer_id: &ProducerId, rtp_capabilities: &RtpCapabilities) -> bool;

    async fn create_webrtc_transport(
        &self,
        listen: &TransportListen,
    ) -> MediaResult<Arc<dyn EngineTransport>>;
}

/// A negotiated network channel carrying producer or consumer media.
#[async_trait]
pub trait EngineTransport: Send + Sync {
    fn id(&self) -> TransportId;

    /// Parameters the client needs to complete ICE/DTLS negotiation.
    fn params(&self) -> TransportParams;

    /// Complete the DTLS handshake.
    async fn connect(&self, dtls_parameters: DtlsParameters) -> MediaResult<()>;

    async fn produce(
        &self,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
    ) -> MediaResult<Arc<dyn EngineProducer>>;

    async fn consume(
        &self,
        producer_id: &ProducerId,
        rtp_capabilities: RtpCapabilities,
        paused: bool,
    ) -> MediaResult<Arc<dyn EngineConsumer>>;
}

/// A published media source.
pub trait EngineProducer: Send + Sync {
    fn id(&self) -> ProducerId;
    fn kind(&self) -> MediaKind;
}

/// A per-viewer playback endpoint bound to one producer.
#[async_trait]
pub trait EngineConsumer: Send + Sync {
    fn id(&self) -> ConsumerId;
    fn producer_id(&self) -> ProducerId;
    fn kind(&self) -> MediaKind;
    fn rtp_parameters(&self) -> RtpParameters;
    fn paused(&self) -> bool;

    async fn pause(&self) -> MediaResult<()>;
    async fn resume(&self) -> MediaResult<()>;
}
