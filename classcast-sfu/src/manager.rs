//! SFU Manager - room-to-router orchestration
//!
//! Owns the worker pool and every room's media state. Lifecycle
//! notifications flow out through a broadcast channel instead of
//! per-object callbacks; the signaling layer subscribes and relays them to
//! the affected connections.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info};

use classcast_core::models::RoomId;

use crate::config::SfuConfig;
use crate::engine::{
    EngineTransport, MediaEngine, RtpCapabilities, RtpParameters, TransportListen, TransportParams,
};
use crate::error::{MediaError, MediaResult};
use crate::room::{ConsumerSeat, MediaRoom, ProducerSeat, RoomMedia};
use crate::types::{ConnectionId, ConsumerId, MediaKind, ProducerId};
use crate::worker_pool::WorkerPool;

/// Address announced for transports when the room record carries none.
const LOOPBACK_ADDRESS: &str = "127.0.0.1";

/// Capacity of the lifecycle event channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Media lifecycle events consumed by the signaling layer.
#[derive(Debug, Clone)]
pub enum MediaEvent {
    /// A producer closed; the named consumer was torn down with it and its
    /// owning connection must be told so the client can renegotiate.
    ProducerClosed {
        room_id: RoomId,
        connection_id: ConnectionId,
        consumer_id: ConsumerId,
        kind: MediaKind,
    },
}

/// A live producer as reported to clients.
#[derive(Debug, Clone)]
pub struct ActiveProducer {
    pub id: ProducerId,
    pub kind: MediaKind,
}

/// Everything a client needs to attach a freshly created consumer.
#[derive(Debug, Clone)]
pub struct ConsumerDescriptor {
    pub consumer_id: ConsumerId,
    pub producer_id: ProducerId,
    pub kind: MediaKind,
    pub rtp_parameters: RtpParameters,
}

/// SFU Manager - manages the worker pool and all per-room media state.
pub struct SfuManager {
    config: SfuConfig,
    pool: WorkerPool,
    rooms: RwLock<HashMap<RoomId, Arc<MediaRoom>>>,
    events: broadcast::Sender<MediaEvent>,
}

impl SfuManager {
    /// Initialize the worker pool and an empty room map.
    pub async fn new(engine: &dyn MediaEngine, config: SfuConfig) -> MediaResult<Arc<Self>> {
        let pool = WorkerPool::initialize(engine, config.num_workers).await?;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        info!(
            workers = pool.len(),
            rtc_min_port = config.rtc_min_port,
            rtc_max_port = config.rtc_max_port,
            "SFU manager initialized"
        );

        Ok(Arc::new(Self {
            config,
            pool,
            rooms: RwLock::new(HashMap::new()),
            events,
        }))
    }

    /// Subscribe to media lifecycle events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<MediaEvent> {
        self.events.subscribe()
    }

    /// Size of the worker pool.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.pool.len()
    }

    pub async fn has_room(&self, room_id: &RoomId) -> bool {
        self.rooms.read().await.contains_key(room_id)
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Capability descriptor of the room's live router, if it lives here.
    pub async fn room_capabilities(&self, room_id: &RoomId) -> Option<RtpCapabilities> {
        self.rooms
            .read()
            .await
            .get(room_id)
            .map(|room| room.rtp_capabilities())
    }

    /// Create the room's router if it does not exist yet; first writer
    /// wins. The write lock is held across router creation so concurrent
    /// teacher joins serialize and the loser reuses the winner's router.
    pub async fn ensure_router(&self, room_id: &RoomId) -> MediaResult<RtpCapabilities> {
        if let Some(room) = self.rooms.read().await.get(room_id) {
            return Ok(room.rtp_capabilities());
        }

        let mut rooms = self.rooms.write().await;
        if let Some(room) = rooms.get(room_id) {
            return Ok(room.rtp_capabilities());
        }

        let (worker, worker_index) = self.pool.checkout()?;
        let router = match worker.create_router(&self.config.media_codecs).await {
            Ok(router) => router,
            Err(err) => {
                self.pool.release(worker_index);
                return Err(err);
            }
        };

        info!(
            room_id = %room_id,
            router_id = %router.id(),
            worker_id = %worker.id(),
            "Created router for room"
        );

        let room = Arc::new(MediaRoom::new(room_id.clone(), router, worker_index));
        let capabilities = room.rtp_capabilities();
        rooms.insert(room_id.clone(), room);
        Ok(capabilities)
    }

    async fn room(&self, room_id: &RoomId) -> MediaResult<Arc<MediaRoom>> {
        self.rooms
            .read()
            .await
            .get(room_id)
            .cloned()
            .ok_or(MediaError::RoomNotFound)
    }

    /// Create a transport on the room's router, announced at the room's
    /// public address (loopback when none is recorded).
    pub async fn create_transport(
        &self,
        room_id: &RoomId,
        announced_address: Option<String>,
    ) -> MediaResult<(Arc<dyn EngineTransport>, TransportParams)> {
        let room = self.room(room_id).await?;
        let listen = TransportListen {
            announced_address: announced_address
                .unwrap_or_else(|| LOOPBACK_ADDRESS.to_string()),
        };

        let transport = room.router.create_webrtc_transport(&listen).await?;
        let params = transport.params();
        debug!(room_id = %room_id, transport_id = %params.id, "Created transport");
        Ok((transport, params))
    }

    /// Create a producer on the given transport, replacing any live
    /// producer of the same kind first. Consumers of the replaced producer
    /// are closed and their owners notified.
    pub async fn produce(
        &self,
        room_id: &RoomId,
        connection_id: &ConnectionId,
        transport: &Arc<dyn EngineTransport>,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
    ) -> MediaResult<ProducerId> {
        let room = self.room(room_id).await?;
        let mut media = room.media.lock().await;

        if let Some(previous) = media.producers.remove(&kind) {
            info!(
                room_id = %room_id,
                producer_id = %previous.producer.id(),
                %kind,
                "Replacing existing producer of same kind"
            );
            self.close_producer(room_id, &previous, &mut media);
        }

        let producer = transport.produce(kind, rtp_parameters).await?;
        let producer_id = producer.id();
        media.producers.insert(
            kind,
            ProducerSeat {
                producer,
                owner: connection_id.clone(),
            },
        );

        debug!(room_id = %room_id, producer_id = %producer_id, %kind, "Producer created");
        Ok(producer_id)
    }

    /// Close a producer's consumers, notifying each owner exactly once.
    /// The producer itself closes when its seat is dropped by the caller.
    fn close_producer(&self, room_id: &RoomId, seat: &ProducerSeat, media: &mut RoomMedia) {
        let producer_id = seat.producer.id();
        let doomed: Vec<ConsumerId> = media
            .consumers
            .iter()
            .filter(|(_, consumer)| consumer.producer_id == producer_id)
            .map(|(id, _)| id.clone())
            .collect();

        for consumer_id in doomed {
            if let Some(consumer_seat) = media.consumers.remove(&consumer_id) {
                let _ = self.events.send(MediaEvent::ProducerClosed {
                    room_id: room_id.clone(),
                    connection_id: consumer_seat.owner,
                    consumer_id,
                    kind: consumer_seat.kind,
                });
            }
        }
    }

    /// Current producers of a room; empty when the room has no router.
    pub async fn active_producers(&self, room_id: &RoomId) -> Vec<ActiveProducer> {
        let Ok(room) = self.room(room_id).await else {
            return Vec::new();
        };
        let media = room.media.lock().await;
        media
            .producers
            .values()
            .map(|seat| ActiveProducer {
                id: seat.producer.id(),
                kind: seat.producer.kind(),
            })
            .collect()
    }

    /// Create a paused consumer for an existing, compatible producer.
    pub async fn consume(
        &self,
        room_id: &RoomId,
        connection_id: &ConnectionId,
        transport: &Arc<dyn EngineTransport>,
        producer_id: &ProducerId,
        rtp_capabilities: RtpCapabilities,
    ) -> MediaResult<ConsumerDescriptor> {
        let room = self.room(room_id).await?;
        let mut media = room.media.lock().await;

        if !media
            .producers
            .values()
            .any(|seat| seat.producer.id() == *producer_id)
        {
            return Err(MediaError::ProducerNotFound);
        }

        if !room.router.can_consume(producer_id, &rtp_capabilities) {
            return Err(MediaError::CannotConsume);
        }

        let consumer = transport
            .consume(producer_id, rtp_capabilities, true)
            .await?;
        let descriptor = ConsumerDescriptor {
            consumer_id: consumer.id(),
            producer_id: producer_id.clone(),
            kind: consumer.kind(),
            rtp_parameters: consumer.rtp_parameters(),
        };

        media.consumers.insert(
            descriptor.consumer_id.clone(),
            ConsumerSeat {
                kind: consumer.kind(),
                consumer,
                owner: connection_id.clone(),
                producer_id: producer_id.clone(),
            },
        );

        debug!(
            room_id = %room_id,
            consumer_id = %descriptor.consumer_id,
            producer_id = %producer_id,
            "Consumer created (paused)"
        );
        Ok(descriptor)
    }

    /// Resume a paused consumer.
    pub async fn resume_consumer(
        &self,
        room_id: &RoomId,
        consumer_id: &ConsumerId,
    ) -> MediaResult<()> {
        let room = self.room(room_id).await?;
        let media = room.media.lock().await;
        let seat = media
            .consumers
            .get(consumer_id)
            .ok_or(MediaError::ConsumerNotFound)?;
        seat.consumer.resume().await?;
        debug!(room_id = %room_id, consumer_id = %consumer_id, "Consumer resumed");
        Ok(())
    }

    /// Tear down every producer and consumer a connection owns. Producers
    /// cascade to their consumers on other connections, which are notified.
    pub async fn connection_closed(&self, room_id: &RoomId, connection_id: &ConnectionId) {
        let Ok(room) = self.room(room_id).await else {
            return;
        };
        let mut media = room.media.lock().await;

        let owned_kinds: Vec<MediaKind> = media
            .producers
            .iter()
            .filter(|(_, seat)| seat.owner == *connection_id)
            .map(|(kind, _)| *kind)
            .collect();
        for kind in owned_kinds {
            if let Some(seat) = media.producers.remove(&kind) {
                self.close_producer(room_id, &seat, &mut media);
            }
        }

        // The closing connection's own consumers just go away.
        media
            .consumers
            .retain(|_, seat| seat.owner != *connection_id);

        debug!(room_id = %room_id, connection_id = %connection_id, "Closed connection media");
    }

    /// Drop the room's router and everything it owns, returning its worker
    /// capacity to the pool. Called when the room's last local member
    /// disconnects.
    pub async fn release_room(&self, room_id: &RoomId) {
        let Some(room) = self.rooms.write().await.remove(room_id) else {
            return;
        };

        let mut media = room.media.lock().await;
        let producers = media.producers.len();
        let consumers = media.consumers.len();
        media.consumers.clear();
        media.producers.clear();
        drop(media);

        self.pool.release(room.worker_index);
        info!(
            room_id = %room_id,
            producers,
            consumers,
            "Released room media resources"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::mock::MockEngine;
    use serde_json::json;

    async fn manager() -> Arc<SfuManager> {
        let engine = MockEngine::new();
        let config = SfuConfig {
            num_workers: 2,
            ..Default::default()
        };
        SfuManager::new(&engine, config).await.unwrap()
    }

    fn caps() -> RtpCapabilities {
        RtpCapabilities(json!({ "codecs": [{ "mimeType": "video/VP8" }] }))
    }

    fn params() -> RtpParameters {
        RtpParameters(json!({}))
    }

    fn conn(id: &str) -> ConnectionId {
        ConnectionId::from(id)
    }

    #[tokio::test]
    async fn test_ensure_router_is_idempotent() {
        let sfu = manager().await;
        let room_id = RoomId::from("ABC123");

        let first = sfu.ensure_router(&room_id).await.unwrap();
        let second = sfu.ensure_router(&room_id).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(sfu.room_count().await, 1);
    }

    #[tokio::test]
    async fn test_concurrent_teacher_joins_create_one_router() {
        let sfu = manager().await;
        let room_id = RoomId::from("ABC123");

        let mut handles = Vec::new();
        for _ in 0..10 {
            let sfu = Arc::clone(&sfu);
            let room_id = room_id.clone();
            handles.push(tokio::spawn(async move {
                sfu.ensure_router(&room_id).await
            }));
        }

        let mut capabilities = Vec::new();
        for handle in handles {
            capabilities.push(handle.await.unwrap().unwrap());
        }

        assert_eq!(sfu.room_count().await, 1);
        assert!(capabilities.windows(2).all(|pair| pair[0] == pair[1]));
    }

    #[tokio::test]
    async fn test_produce_replaces_same_kind() {
        let sfu = manager().await;
        let room_id = RoomId::from("ABC123");
        sfu.ensure_router(&room_id).await.unwrap();
        let (transport, _) = sfu.create_transport(&room_id, None).await.unwrap();

        let teacher = conn("teacher");
        let first = sfu
            .produce(&room_id, &teacher, &transport, MediaKind::Video, params())
            .await
            .unwrap();
        let second = sfu
            .produce(&room_id, &teacher, &transport, MediaKind::Video, params())
            .await
            .unwrap();
        assert_ne!(first, second);

        let producers = sfu.active_producers(&room_id).await;
        assert_eq!(producers.len(), 1);
        assert_eq!(producers[0].id, second);

        // A different kind coexists.
        sfu.produce(&room_id, &teacher, &transport, MediaKind::Audio, params())
            .await
            .unwrap();
        assert_eq!(sfu.active_producers(&room_id).await.len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_produce_leaves_one_producer_per_kind() {
        let sfu = manager().await;
        let room_id = RoomId::from("ABC123");
        sfu.ensure_router(&room_id).await.unwrap();
        let (transport, _) = sfu.create_transport(&room_id, None).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let sfu = Arc::clone(&sfu);
            let room_id = room_id.clone();
            let transport = Arc::clone(&transport);
            handles.push(tokio::spawn(async move {
                sfu.produce(&room_id, &conn("teacher"), &transport, MediaKind::Video, params())
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let producers = sfu.active_producers(&room_id).await;
        assert_eq!(producers.len(), 1);
        assert_eq!(producers[0].kind, MediaKind::Video);
    }

    #[tokio::test]
    async fn test_consume_unknown_producer_creates_nothing() {
        let sfu = manager().await;
        let room_id = RoomId::from("ABC123");
        sfu.ensure_router(&room_id).await.unwrap();
        let (transport, _) = sfu.create_transport(&room_id, None).await.unwrap();

        let result = sfu
            .consume(
                &room_id,
                &conn("student"),
                &transport,
                &ProducerId::from("missing"),
                caps(),
            )
            .await;
        assert!(matches!(result, Err(MediaError::ProducerNotFound)));

        // Resuming anything in the untouched room still finds no consumer.
        let resume = sfu
            .resume_consumer(&room_id, &ConsumerId::from("missing"))
            .await;
        assert!(matches!(resume, Err(MediaError::ConsumerNotFound)));
    }

    #[tokio::test]
    async fn test_consume_refused_on_capability_mismatch() {
        let sfu = manager().await;
        let room_id = RoomId::from("ABC123");
        sfu.ensure_router(&room_id).await.unwrap();
        let (transport, _) = sfu.create_transport(&room_id, None).await.unwrap();

        let producer_id = sfu
            .produce(&room_id, &conn("teacher"), &transport, MediaKind::Video, params())
            .await
            .unwrap();

        let incompatible = RtpCapabilities(json!({ "codecs": [] }));
        let result = sfu
            .consume(&room_id, &conn("student"), &transport, &producer_id, incompatible)
            .await;
        assert!(matches!(result, Err(MediaError::CannotConsume)));
    }

    #[tokio::test]
    async fn test_consumer_lifecycle_and_close_notification() {
        let sfu = manager().await;
        let room_id = RoomId::from("ABC123");
        sfu.ensure_router(&room_id).await.unwrap();
        let (producer_transport, _) = sfu.create_transport(&room_id, None).await.unwrap();
        let (consumer_transport, _) = sfu.create_transport(&room_id, None).await.unwrap();

        let mut events = sfu.subscribe();

        let producer_id = sfu
            .produce(&room_id, &conn("teacher"), &producer_transport, MediaKind::Video, params())
            .await
            .unwrap();
        let descriptor = sfu
            .consume(&room_id, &conn("student"), &consumer_transport, &producer_id, caps())
            .await
            .unwrap();

        sfu.resume_consumer(&room_id, &descriptor.consumer_id)
            .await
            .unwrap();

        // Replacing the producer closes the consumer and notifies its owner
        // exactly once.
        sfu.produce(&room_id, &conn("teacher"), &producer_transport, MediaKind::Video, params())
            .await
            .unwrap();

        let MediaEvent::ProducerClosed {
            connection_id,
            consumer_id,
            kind,
            ..
        } = events.try_recv().unwrap();
        assert_eq!(connection_id, conn("student"));
        assert_eq!(consumer_id, descriptor.consumer_id);
        assert_eq!(kind, MediaKind::Video);
        assert!(events.try_recv().is_err());

        // The consumer is gone.
        let resume = sfu.resume_consumer(&room_id, &descriptor.consumer_id).await;
        assert!(matches!(resume, Err(MediaError::ConsumerNotFound)));
    }

    #[tokio::test]
    async fn test_teacher_disconnect_cascades_to_student_consumers() {
        let sfu = manager().await;
        let room_id = RoomId::from("ABC123");
        sfu.ensure_router(&room_id).await.unwrap();
        let (producer_transport, _) = sfu.create_transport(&room_id, None).await.unwrap();
        let (consumer_transport, _) = sfu.create_transport(&room_id, None).await.unwrap();

        let producer_id = sfu
            .produce(&room_id, &conn("teacher"), &producer_transport, MediaKind::Audio, params())
            .await
            .unwrap();
        sfu.consume(&room_id, &conn("student"), &consumer_transport, &producer_id, caps())
            .await
            .unwrap();

        let mut events = sfu.subscribe();
        sfu.connection_closed(&room_id, &conn("teacher")).await;

        let MediaEvent::ProducerClosed { connection_id, .. } = events.try_recv().unwrap();
        assert_eq!(connection_id, conn("student"));
        assert!(sfu.active_producers(&room_id).await.is_empty());
    }

    #[tokio::test]
    async fn test_release_room_returns_worker_capacity() {
        let sfu = manager().await;
        let a = RoomId::from("AAAAAA");
        let b = RoomId::from("BBBBBB");
        let c = RoomId::from("CCCCCC");

        sfu.ensure_router(&a).await.unwrap();
        sfu.ensure_router(&b).await.unwrap();
        sfu.release_room(&a).await;
        assert!(!sfu.has_room(&a).await);

        // Worker 0 freed by the release is reused for the next room.
        sfu.ensure_router(&c).await.unwrap();
        assert_eq!(sfu.room_count().await, 2);
    }

    #[tokio::test]
    async fn test_transport_announces_room_address_or_loopback() {
        let sfu = manager().await;
        let room_id = RoomId::from("ABC123");
        sfu.ensure_router(&room_id).await.unwrap();

        let (_, announced) = sfu
            .create_transport(&room_id, Some("198.51.100.7".to_string()))
            .await
            .unwrap();
        assert_eq!(announced.ice_candidates[0]["address"], "198.51.100.7");

        let (_, fallback) = sfu.create_transport(&room_id, None).await.unwrap();
        assert_eq!(fallback.ice_candidates[0]["address"], "127.0.0.1");
    }
}
