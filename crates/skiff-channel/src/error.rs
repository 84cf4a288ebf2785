//! Error types for channel establishment and the data plane.

use thiserror::Error;

/// Channel-level errors
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Outbound queue is full; a backpressure signal, retryable with backoff
    #[error("send queue is full")]
    QueueFull,

    /// Channel is not open
    #[error("channel not open")]
    NotOpen,

    /// Channel closed
    #[error("channel closed: {0}")]
    Closed(String),

    /// Transport-level failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Establishment or candidate gathering timed out
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    /// Invalid state for the requested operation
    #[error("invalid state for operation")]
    InvalidState,
}

impl ChannelError {
    /// Whether the error is a backpressure signal worth retrying.
    #[must_use]
    pub fn is_backpressure(&self) -> bool {
        matches!(self, Self::QueueFull)
    }
}
