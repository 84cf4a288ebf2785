//! Events surfaced to the application by a [`Peer`](crate::peer::Peer).

use skiff_channel::Candidate;
use tokio::sync::mpsc;

use crate::transfer::{Transfer, TransferId};

/// Channel half used by the engines to publish [`PeerEvent`]s.
pub(crate) type EventSender = mpsc::UnboundedSender<PeerEvent>;

/// Everything an application observes about a peer and its transfers.
#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// A local candidate was discovered and should reach the remote peer
    CandidateDiscovered(Candidate),
    /// The data channel is open; transfers may begin
    Connected,
    /// The connection closed; any active transfer has already failed
    Closed {
        /// Transport-supplied close reason
        reason: String,
    },
    /// An incoming transfer was announced
    TransferStarted(Transfer),
    /// Periodic progress for the active incoming transfer
    TransferProgress {
        /// Transfer id
        id: TransferId,
        /// Completed fraction in `0.0..=1.0`
        fraction: f64,
        /// Chunks stored so far
        completed_chunks: u64,
        /// Total chunks expected
        total_chunks: u64,
    },
    /// An incoming transfer finished and its bytes are ready
    TransferComplete {
        /// Transfer id
        id: TransferId,
        /// File name from the announcement
        name: String,
        /// MIME type from the announcement
        mime: String,
        /// Reassembled file contents
        bytes: Vec<u8>,
    },
    /// An incoming transfer was abandoned
    TransferFailed {
        /// Transfer id
        id: TransferId,
        /// Human-readable cause
        reason: String,
        /// Fraction completed when the transfer died
        fraction: f64,
    },
}

/// Publish an event, ignoring a receiver that has gone away.
pub(crate) fn emit(events: &EventSender, event: PeerEvent) {
    let _ = events.send(event);
}
