//! mediasoup-backed media engine.
//!
//! Thin adapter translating the engine seam onto the `mediasoup` crate.
//! Capability/parameter blobs are serde-converted at this boundary; the
//! rest of the crate never sees mediasoup types.

use async_trait::async_trait;
use mediasoup::data_structures::DtlsState;
use mediasoup::prelude as ms;
use mediasoup::prelude::Transport as _;
use mediasoup::worker::{WorkerLogLevel, WorkerLogTag};
use mediasoup::worker_manager::WorkerManager;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::SfuConfig;
use crate::engine::{
    DtlsParameters, EngineConsumer, EngineProducer, EngineRouter, EngineTransport, EngineWorker,
    MediaEngine, RtpCapabilities, RtpParameters, TransportListen, TransportParams,
};
use crate::error::{MediaError, MediaResult};
use crate::types;

/// Media engine backed by mediasoup workers.
pub struct MediasoupEngine {
    worker_manager: WorkerManager,
    rtc_min_port: u16,
    rtc_max_port: u16,
}

impl MediasoupEngine {
    #[must_use]
    pub fn new(config: &SfuConfig) -> Self {
        Self {
            worker_manager: WorkerManager::new(),
            rtc_min_port: config.rtc_min_port,
            rtc_max_port: config.rtc_max_port,
        }
    }
}

#[async_trait]
impl MediaEngine for MediasoupEngine {
    async fn create_worker(&self, index: usize) -> MediaResult<Arc<dyn EngineWorker>> {
        let mut settings = ms::WorkerSettings::default();
        settings.log_level = WorkerLogLevel::Warn;
        settings.log_tags = vec![
            WorkerLogTag::Info,
            WorkerLogTag::Ice,
            WorkerLogTag::Dtls,
            WorkerLogTag::Rtp,
            WorkerLogTag::Srtp,
            WorkerLogTag::Rtcp,
        ];
        settings.rtc_port_range = self.rtc_min_port..=self.rtc_max_port;

        let worker = self
            .worker_manager
            .create_worker(settings)
            .await
            .map_err(|e| MediaError::Worker(format!("Failed to create worker: {e}")))?;

        let worker_id = worker.id();
        info!(worker_id = %worker_id, index, "Created mediasoup worker");

        // A dead worker takes its routers and media with it; supervision
        // restarts the whole process.
        worker
            .on_dead(move |reason| {
                error!(worker_id = %worker_id, ?reason, "mediasoup worker died, exiting");
                std::process::exit(1);
            })
            .detach();

        Ok(Arc::new(MsWorker { worker }))
    }
}

struct MsWorker {
    worker: ms::Worker,
}

#[async_trait]
impl EngineWorker for MsWorker {
    fn id(&self) -> String {
        self.worker.id().to_string()
    }

    async fn create_router(
        &self,
        media_codecs: &serde_json::Value,
    ) -> MediaResult<Arc<dyn EngineRouter>> {
        let codecs: Vec<ms::RtpCodecCapability> = serde_json::from_value(media_codecs.clone())
            .map_err(|e| MediaError::Router(format!("Invalid media codec list: {e}")))?;

        let router = self
            .worker
            .create_router(ms::RouterOptions::new(codecs))
            .await
            .map_err(|e| MediaError::Router(format!("Failed to create router: {e}")))?;

        debug!(router_id = %router.id(), worker_id = %self.worker.id(), "Created router");
        Ok(Arc::new(MsRouter { router }))
    }
}

struct MsRouter {
    router: ms::Router,
}

#[async_trait]
impl EngineRouter for MsRouter {
    fn id(&self) -> String {
        self.router.id().to_string()
    }

    fn rtp_capabilities(&self) -> RtpCapabilities {
        RtpCapabilities(
            serde_json::to_value(self.router.rtp_capabilities())
                .unwrap_or(serde_json::Value::Null),
        )
    }

    fn can_consume(&self, producer_id: &types::ProducerId, rtp_capabilities: &RtpCapabilities) -> bool {
        let Ok(producer_id) = producer_id.as_str().parse::<ms::ProducerId>() else {
            return false;
        };
        let Ok(caps) = serde_json::from_value::<ms::RtpCapabilities>(rtp_capabilities.0.clone())
        else {
            return false;
        };
        self.router.can_consume(&producer_id, &caps)
    }

    async fn create_webrtc_transport(
        &self,
        listen: &TransportListen,
    ) -> MediaResult<Arc<dyn EngineTransport>> {
        let listen_info = ms::ListenInfo {
            protocol: ms::Protocol::Udp,
            ip: IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)),
            announced_address: Some(listen.announced_address.clone()),
            port: None,
            port_range: None,
            flags: None,
            send_buffer_size: None,
            recv_buffer_size: None,
        };

        let mut options =
            ms::WebRtcTransportOptions::new(ms::WebRtcTransportListenInfos::new(listen_info));
        options.enable_udp = true;
        options.enable_tcp = true;
        options.prefer_udp = true;
        options.initial_available_outgoing_bitrate = 1_000_000;

        let transport = self
            .router
            .create_webrtc_transport(options)
            .await
            .map_err(|e| MediaError::Transport(format!("Failed to create transport: {e}")))?;

        let transport_id = transport.id();
        transport
            .on_dtls_state_change(move |state| {
                debug!(transport_id = %transport_id, ?state, "Transport DTLS state change");
                if state == DtlsState::Closed {
                    warn!(transport_id = %transport_id, "Transport DTLS closed");
                }
            })
            .detach();

        debug!(transport_id = %transport.id(), "Created WebRTC transport");
        Ok(Arc::new(MsTransport { transport }))
    }
}

struct MsTransport {
    transport: ms::WebRtcTransport,
}

#[async_trait]
impl EngineTransport for MsTransport {
    fn id(&self) -> types::TransportId {
        types::TransportId::new(self.transport.id().to_string())
    }

    fn params(&self) -> TransportParams {
        TransportParams {
            id: self.transport.id().to_string(),
            ice_parameters: serde_json::to_value(self.transport.ice_parameters())
                .unwrap_or(serde_json::Value::Null),
            ice_candidates: serde_json::to_value(self.transport.ice_candidates())
                .unwrap_or(serde_json::Value::Null),
            dtls_parameters: serde_json::to_value(self.transport.dtls_parameters())
                .unwrap_or(serde_json::Value::Null),
        }
    }

    async fn connect(&self, dtls_parameters: DtlsParameters) -> MediaResult<()> {
        let dtls_parameters: ms::DtlsParameters = serde_json::from_value(dtls_parameters.0)
            .map_err(|e| MediaError::Transport(format!("Invalid DTLS parameters: {e}")))?;

        self.transport
            .connect(ms::WebRtcTransportRemoteParameters { dtls_parameters })
            .await
            .map_err(|e| MediaError::Transport(format!("Failed to connect transport: {e}")))
    }

    async fn produce(
        &self,
        kind: types::MediaKind,
        rtp_parameters: RtpParameters,
    ) -> MediaResult<Arc<dyn EngineProducer>> {
        let rtp_parameters: ms::RtpParameters = serde_json::from_value(rtp_parameters.0)
            .map_err(|e| MediaError::Producer(format!("Invalid RTP parameters: {e}")))?;

        let producer = self
            .transport
            .produce(ms::ProducerOptions::new(to_engine_kind(kind), rtp_parameters))
            .await
            .map_err(|e| MediaError::Producer(format!("Failed to create producer: {e}")))?;

        debug!(producer_id = %producer.id(), %kind, "Created producer");
        Ok(Arc::new(MsProducer { producer }))
    }

    async fn consume(
        &self,
        producer_id: &types::ProducerId,
        rtp_capabilities: RtpCapabilities,
        paused: bool,
    ) -> MediaResult<Arc<dyn EngineConsumer>> {
        let producer_id = producer_id
            .as_str()
            .parse::<ms::ProducerId>()
            .map_err(|e| MediaError::Consumer(format!("Invalid producer id: {e}")))?;
        let rtp_capabilities: ms::RtpCapabilities = serde_json::from_value(rtp_capabilities.0)
            .map_err(|e| MediaError::Consumer(format!("Invalid RTP capabilities: {e}")))?;

        let mut options = ms::ConsumerOptions::new(producer_id, rtp_capabilities);
        options.paused = paused;

        let consumer = self
            .transport
            .consume(options)
            .await
            .map_err(|e| MediaError::Consumer(format!("Failed to create consumer: {e}")))?;

        debug!(consumer_id = %consumer.id(), %producer_id, "Created consumer");
        Ok(Arc::new(MsConsumer { consumer }))
    }
}

struct MsProducer {
    producer: ms::Producer,
}

impl EngineProducer for MsProducer {
    fn id(&self) -> types::ProducerId {
        types::ProducerId::new(self.producer.id().to_string())
    }

    fn kind(&self) -> types::MediaKind {
        from_engine_kind(self.producer.kind())
    }
}

struct MsConsumer {
    consumer: ms::Consumer,
}

#[async_trait]
impl EngineConsumer for MsConsumer {
    fn id(&self) -> types::ConsumerId {
        types::ConsumerId::new(self.consumer.id().to_string())
    }

    fn producer_id(&self) -> types::ProducerId {
        types::ProducerId::new(self.consumer.producer_id().to_string())
    }

    fn kind(&self) -> types::MediaKind {
        from_engine_kind(self.consumer.kind())
    }

    fn rtp_parameters(&self) -> RtpParameters {
        RtpParameters(
            serde_json::to_value(self.consumer.rtp_parameters())
                .unwrap_or(serde_json::Value::Null),
        )
    }

    fn paused(&self) -> bool {
        self.consumer.paused()
    }

    async fn pause(&self) -> MediaResult<()> {
        self.consumer
            .pause()
            .await
            .map_err(|e| MediaError::Consumer(format!("Failed to pause consumer: {e}")))
    }

    async fn resume(&self) -> MediaResult<()> {
        self.consumer
            .resume()
            .await
            .map_err(|e| MediaError::Consumer(format!("Failed to resume consumer: {e}")))
    }
}

const fn to_engine_kind(kind: types::MediaKind) -> ms::MediaKind {
    match kind {
        types::MediaKind::Audio => ms::MediaKind::Audio,
        types::MediaKind::Video => ms::MediaKind::Video,
    }
}

const fn from_engine_kind(kind: ms::MediaKind) -> types::MediaKind {
    match kind {
        ms::MediaKind::Audio => types::MediaKind::Audio,
        ms::MediaKind::Video => types::MediaKind::Video,
    }
}
