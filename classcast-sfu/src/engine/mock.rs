//! In-memory media engine for tests and engine-less development.
//!
//! Implements the full engine seam with deterministic ids and no real
//! media. Compatibility checks succeed whenever the caller's capability
//! blob carries a non-empty `codecs` array, so tests can trigger both
//! outcomes.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::engine::{
    DtlsParameters, EngineConsumer, EngineProducer, EngineRouter, EngineTransport, EngineWorker,
    MediaEngine, RtpCapabilities, RtpParameters, TransportListen, TransportParams,
};
use crate::error::{MediaError, MediaResult};
use crate::types::{ConsumerId, MediaKind, ProducerId, TransportId};

type ProducerRegistry = Arc<Mutex<HashMap<ProducerId, MediaKind>>>;

/// Deterministic in-memory engine.
#[derive(Default)]
pub struct MockEngine {
    ids: Arc<AtomicU64>,
}

impl MockEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn next(ids: &AtomicU64) -> u64 {
    ids.fetch_add(1, Ordering::Relaxed)
}

#[async_trait]
impl MediaEngine for MockEngine {
    async fn create_worker(&self, index: usize) -> MediaResult<Arc<dyn EngineWorker>> {
        Ok(Arc::new(MockWorker {
            id: format!("mock-worker-{index}"),
            ids: Arc::clone(&self.ids),
        }))
    }
}

struct MockWorker {
    id: String,
    ids: Arc<AtomicU64>,
}

#[async_trait]
impl EngineWorker for MockWorker {
    fn id(&self) -> String {
        self.id.clone()
    }

    async fn create_router(
        &self,
        media_codecs: &serde_json::Value,
    ) -> MediaResult<Arc<dyn EngineRouter>> {
        Ok(Arc::new(MockRouter {
            id: format!("mock-router-{}", next(&self.ids)),
            capabilities: json!({
                "codecs": media_codecs,
                "headerExtensions": [],
            }),
            producers: ProducerRegistry::default(),
            ids: Arc::clone(&self.ids),
        }))
    }
}

struct MockRouter {
    id: String,
    capabilities: serde_json::Value,
    producers: ProducerRegistry,
    ids: Arc<AtomicU64>,
}

#[async_trait]
impl EngineRouter for MockRouter {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn rtp_capabilities(&self) -> RtpCapabilities {
        RtpCapabilities(self.capabilities.clone())
    }

    fn can_consume(&self, producer_id: &ProducerId, rtp_capabilities: &RtpCapabilities) -> bool {
        if !self.producers.lock().contains_key(producer_id) {
            return false;
        }
        rtp_capabilities
            .0
            .get("codecs")
            .and_then(|codecs| codecs.as_array())
            .is_some_and(|codecs| !codecs.is_empty())
    }

    async fn create_webrtc_transport(
        &self,
        listen: &TransportListen,
    ) -> MediaResult<Arc<dyn EngineTransport>> {
        Ok(Arc::new(MockTransport {
            id: TransportId::new(format!("mock-transport-{}", next(&self.ids))),
            announced_address: listen.announced_address.clone(),
            connected: AtomicBool::new(false),
            producers: Arc::clone(&self.producers),
            ids: Arc::clone(&self.ids),
        }))
    }
}

struct MockTransport {
    id: TransportId,
    announced_address: String,
    connected: AtomicBool,
    producers: ProducerRegistry,
    ids: Arc<AtomicU64>,
}

#[async_trait]
impl EngineTransport for MockTransport {
    fn id(&self) -> TransportId {
        self.id.clone()
    }

    fn params(&self) -> TransportParams {
        TransportParams {
            id: self.id.as_str().to_string(),
            ice_parameters: json!({
                "usernameFragment": format!("ufrag-{}", self.id),
                "password": format!("pwd-{}", self.id),
                "iceLite": true,
            }),
            ice_candidates: json!([{
                "foundation": "udpcandidate",
                "address": self.announced_address,
                "port": 40000,
                "protocol": "udp",
                "priority": 1_076_302_079_u64,
                "type": "host",
            }]),
            dtls_parameters: json!({
                "role": "auto",
                "fingerprints": [],
            }),
        }
    }

    async fn connect(&self, _dtls_parameters: DtlsParameters) -> MediaResult<()> {
        if self.connected.swap(true, Ordering::SeqCst) {
            return Err(MediaError::Transport(
                "Transport already connected".to_string(),
            ));
        }
        Ok(())
    }

    async fn produce(
        &self,
        kind: MediaKind,
        _rtp_parameters: RtpParameters,
    ) -> MediaResult<Arc<dyn EngineProducer>> {
        let id = ProducerId::new(format!("mock-producer-{}", next(&self.ids)));
        self.producers.lock().insert(id.clone(), kind);
        Ok(Arc::new(MockProducer {
            id,
            kind,
            producers: Arc::clone(&self.producers),
        }))
    }

    async fn consume(
        &self,
        producer_id: &ProducerId,
        _rtp_capabilities: RtpCapabilities,
        paused: bool,
    ) -> MediaResult<Arc<dyn EngineConsumer>> {
        let kind = self
            .producers
            .lock()
            .get(producer_id)
            .copied()
            .ok_or_else(|| MediaError::Producer("Unknown producer".to_string()))?;

        let id = ConsumerId::new(format!("mock-consumer-{}", next(&self.ids)));
        Ok(Arc::new(MockConsumer {
            rtp_parameters: RtpParameters(json!({ "codecs": [], "mid": id.as_str() })),
            id,
            producer_id: producer_id.clone(),
            kind,
            paused: AtomicBool::new(paused),
        }))
    }
}

struct MockProducer {
    id: ProducerId,
    kind: MediaKind,
    producers: ProducerRegistry,
}

impl EngineProducer for MockProducer {
    fn id(&self) -> ProducerId {
        self.id.clone()
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }
}

impl Drop for MockProducer {
    fn drop(&mut self) {
        self.producers.lock().remove(&self.id);
    }
}

struct MockConsumer {
    id: ConsumerId,
    producer_id: ProducerId,
    kind: MediaKind,
    rtp_parameters: RtpParameters,
    paused: AtomicBool,
}

#[async_trait]
impl EngineConsumer for MockConsumer {
    fn id(&self) -> ConsumerId {
        self.id.clone()
    }

    fn producer_id(&self) -> ProducerId {
        self.producer_id.clone()
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn rtp_parameters(&self) -> RtpParameters {
        self.rtp_parameters.clone()
    }

    fn paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    async fn pause(&self) -> MediaResult<()> {
        self.paused.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn resume(&self) -> MediaResult<()> {
        self.paused.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_media_codecs;

    async fn router() -> Arc<dyn EngineRouter> {
        let engine = MockEngine::new();
        let worker = engine.create_worker(0).await.unwrap();
        worker.create_router(&default_media_codecs()).await.unwrap()
    }

    fn listen() -> TransportListen {
        TransportListen {
            announced_address: "127.0.0.1".to_string(),
        }
    }

    fn good_caps() -> RtpCapabilities {
        RtpCapabilities(json!({ "codecs": [{ "mimeType": "video/VP8" }] }))
    }

    #[tokio::test]
    async fn test_can_consume_requires_live_producer_and_codecs() {
        let router = router().await;
        let transport = router.create_webrtc_transport(&listen()).await.unwrap();
        let producer = transport
            .produce(MediaKind::Video, RtpParameters(json!({})))
            .await
            .unwrap();

        assert!(router.can_consume(&producer.id(), &good_caps()));
        assert!(!router.can_consume(&producer.id(), &RtpCapabilities(json!({ "codecs": [] }))));
        assert!(!router.can_consume(&ProducerId::from("nope"), &good_caps()));
    }

    #[tokio::test]
    async fn test_dropping_producer_unregisters_it() {
        let router = router().await;
        let transport = router.create_webrtc_transport(&listen()).await.unwrap();
        let producer = transport
            .produce(MediaKind::Audio, RtpParameters(json!({})))
            .await
            .unwrap();
        let id = producer.id();

        drop(producer);
        assert!(!router.can_consume(&id, &good_caps()));
    }

    #[tokio::test]
    async fn test_consumer_starts_in_requested_pause_state() {
        let router = router().await;
        let transport = router.create_webrtc_transport(&listen()).await.unwrap();
        let producer = transport
            .produce(MediaKind::Video, RtpParameters(json!({})))
            .await
            .unwrap();

        let consumer = transport
            .consume(&producer.id(), good_caps(), true)
            .await
            .unwrap();
        assert!(consumer.paused());
        consumer.resume().await.unwrap();
        assert!(!consumer.paused());
    }

    #[tokio::test]
    async fn test_transport_double_connect_rejected() {
        let router = router().await;
        let transport = router.create_webrtc_transport(&listen()).await.unwrap();
        transport
            .connect(DtlsParameters(json!({})))
            .await
            .unwrap();
        assert!(transport.connect(DtlsParameters(json!({}))).await.is_err());
    }
}
