//! Tunable parameters for the transfer engines.

use std::time::Duration;

/// Default chunk payload size: 1 KiB under the 256 KiB message cap,
/// leaving headroom for the chunk frame header.
pub const DEFAULT_CHUNK_SIZE: u64 = 255 * 1024;

/// Default cap on chunk sends awaiting completion at once.
pub const DEFAULT_MAX_CONCURRENT: usize = 8;

/// Knobs for the sending side of a transfer.
///
/// The defaults match the tuning the protocol was deployed with; most
/// callers only ever toggle [`checksum`](Self::checksum).
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Requested chunk payload size in bytes. Clamped at transfer start so
    /// that a full chunk frame never exceeds the channel's message cap.
    pub chunk_size: u64,
    /// Upper bound on concurrently in-flight chunk sends.
    pub max_concurrent: usize,
    /// Attach a CRC-32 to every chunk frame.
    pub checksum: bool,
    /// Base delay for the linear backoff applied after a full send queue;
    /// attempt `n` waits `n * backoff_base`.
    pub backoff_base: Duration,
    /// Pause between consecutive resends during gap recovery.
    pub retransmit_delay: Duration,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            checksum: false,
            backoff_base: Duration::from_secs(1),
            retransmit_delay: Duration::from_millis(10),
        }
    }
}
