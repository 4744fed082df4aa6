//! Per-room media state

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use classcast_core::models::RoomId;

use crate::engine::{EngineConsumer, EngineProducer, EngineRouter, RtpCapabilities};
use crate::types::{ConnectionId, ConsumerId, MediaKind, ProducerId};

/// A live producer and the connection that owns it.
pub(crate) struct ProducerSeat {
    pub producer: Arc<dyn EngineProducer>,
    pub owner: ConnectionId,
}

/// A live consumer, its owning connection, and the producer it follows.
pub(crate) struct ConsumerSeat {
    pub consumer: Arc<dyn EngineConsumer>,
    pub owner: ConnectionId,
    pub producer_id: ProducerId,
    pub kind: MediaKind,
}

/// Producers and consumers of one room. Guarded by the room's mutex so the
/// one-producer-per-kind invariant holds under concurrent handlers.
#[derive(Default)]
pub(crate) struct RoomMedia {
    pub producers: HashMap<MediaKind, ProducerSeat>,
    pub consumers: HashMap<ConsumerId, ConsumerSeat>,
}

/// One room's media context: the router, its worker binding, and the media
/// state behind a per-room lock.
pub struct MediaRoom {
    pub room_id: RoomId,
    pub(crate) router: Arc<dyn EngineRouter>,
    pub(crate) worker_index: usize,
    pub(crate) media: Mutex<RoomMedia>,
}

impl MediaRoom {
    pub(crate) fn new(room_id: RoomId, router: Arc<dyn EngineRouter>, worker_index: usize) -> Self {
        Self {
            room_id,
            router,
            worker_index,
            media: Mutex::new(RoomMedia::default()),
        }
    }

    #[must_use]
    pub fn rtp_capabilities(&self) -> RtpCapabilities {
        self.router.rtp_capabilities()
    }
}
