//! Error taxonomy for the notification pipeline.

use thiserror::Error;

/// All errors surfaced by BillNotify crates.
#[derive(Debug, Error)]
pub enum BillNotifyError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Calendar misconfiguration: {0}")]
    Calendar(String),

    /// The durable queue could not be reached; callers fall back to direct send.
    #[error("Queue unavailable: {0}")]
    QueueUnavailable(String),

    #[error("Queue error: {0}")]
    Queue(String),

    /// Transient send failure reported by a channel (network or provider).
    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Repository error: {0}")]
    Repository(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Task {task_id} exhausted {attempts} attempts")]
    RetriesExhausted { task_id: String, attempts: u32 },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, BillNotifyError>;
