//! Error types for the SKIFF core protocol.

use thiserror::Error;

/// Frame-level errors.
///
/// A malformed inbound frame is dropped and decoding continues with the next
/// message; these are never fatal to the connection.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// Frame too short for its kind
    #[error("frame too short: expected at least {expected} bytes, got {actual}")]
    Truncated {
        /// Minimum size required
        expected: usize,
        /// Actual size received
        actual: usize,
    },

    /// Frame length does not match the exact length its kind requires
    #[error("frame length mismatch: expected exactly {expected} bytes, got {actual}")]
    LengthMismatch {
        /// Exact size required
        expected: usize,
        /// Actual size received
        actual: usize,
    },

    /// Unrecognized type tag
    #[error("unknown frame type: 0x{0:04X}")]
    UnknownType(u16),

    /// Variable-length field exceeds its 2-byte length prefix
    #[error("{field} too long: {len} bytes (maximum 65535)")]
    FieldTooLong {
        /// Which field overflowed
        field: &'static str,
        /// Its byte length
        len: usize,
    },

    /// Value exceeds the 48-bit wire range
    #[error("{field} out of range: {value} exceeds 2^48-1")]
    ValueOutOfRange {
        /// Which field overflowed
        field: &'static str,
        /// The offending value
        value: u64,
    },
}

/// Transfer-level errors.
///
/// Fatal to the current transfer only; the channel may remain usable for a
/// later transfer unless it itself closed.
#[derive(Debug, Error)]
pub enum TransferError {
    /// A transfer is already in progress on this peer
    #[error("a transfer is already in progress")]
    Busy,

    /// The channel closed underneath an active transfer
    #[error("channel lost: {0}")]
    ChannelLost(String),

    /// Non-retryable transport failure
    #[error("transport failure: {0}")]
    Transport(String),

    /// Too many consecutive chunk failures across the send window
    #[error("aborted after {failures} consecutive chunk failures")]
    TooManyFailures {
        /// Consecutive failure count at abort
        failures: u32,
    },

    /// Outbound frame could not be encoded
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Chunk payload could not be read from the source
    #[error("chunk read failed: {0}")]
    Source(#[from] std::io::Error),
}
