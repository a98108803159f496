//! Queue error types.

use thiserror::Error;

/// Result type for queue operations.
pub type Result<T> = std::result::Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("Payload encoding error: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
    #[error("Invalid queue name: {0:?}")]
    InvalidQueueName(String),
    #[error("Corrupt row in queue {queue}: {detail}")]
    CorruptRow { queue: String, detail: String },
    #[error("Storage task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
    #[error("Storage lock poisoned")]
    LockPoisoned,
}
