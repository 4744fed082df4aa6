//! Classcast SFU resource management.
//!
//! This crate owns the media side of a classroom: a bounded worker pool,
//! one router per room, and the producers/consumers forwarding the
//! teacher's streams to students. The media engine itself is consumed
//! behind the traits in [`engine`]; a mediasoup-backed implementation and
//! an in-memory mock ship with the crate.
//!
//! ## Architecture
//!
//! - **`WorkerPool`**: fixed pool of engine workers with load-counter
//!   balancing
//! - **`SfuManager`**: room-to-router map, producer/consumer lifecycle,
//!   event subscription
//! - **`MediaRoom`**: per-room media state behind its own async mutex
//!
//! Lifecycle notifications (producer closed) are delivered on a broadcast
//! channel consumed by the signaling layer instead of per-object callbacks.

pub mod config;
pub mod engine;
pub mod error;
pub mod manager;
pub mod room;
pub mod types;
pub mod worker_pool;

pub use config::{default_media_codecs, SfuConfig};
pub use error::{MediaError, MediaResult};
pub use manager::{ActiveProducer, ConsumerDescriptor, MediaEvent, SfuManager};
pub use types::{ConnectionId, ConsumerId, MediaKind, ProducerId, TransportId};
pub use worker_pool::WorkerPool;
