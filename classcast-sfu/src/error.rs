use thiserror::Error;

/// Custom error type for media operations
#[derive(Error, Debug)]
pub enum MediaError {
    #[error("Worker error: {0}")]
    Worker(String),

    #[error("Router error: {0}")]
    Router(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Producer error: {0}")]
    Producer(String),

    #[error("Consumer error: {0}")]
    Consumer(String),

    #[error("Room not found")]
    RoomNotFound,

    #[error("Producer not found")]
    ProducerNotFound,

    #[error("Consumer not found")]
    ConsumerNotFound,

    #[error("Cannot consume producer")]
    CannotConsume,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for media operations
pub type MediaResult<T> = Result<T, MediaError>;
