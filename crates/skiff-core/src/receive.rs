//! Receiving side of a transfer: out-of-order reassembly, duplicate and
//! corrupt chunk rejection, throttled progress, and gap recovery.
//!
//! One transfer is active at a time. Chunks are buffered by index so
//! arrival order never matters; completion is checked after every stored
//! chunk because the end marker can overtake late chunks. When the end
//! marker finds gaps, the engine asks for a bounded retransmission and
//! keeps its buffer alive for the resent chunks.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::crc32;
use crate::event::{emit, EventSender, PeerEvent};
use crate::transfer::{Transfer, TransferId};

/// Most missing chunks a single retransmission request will name.
const MISSING_REQUEST_LIMIT: usize = 100;

/// Minimum gap between progress events.
const PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

/// Allowed slack between announced and reassembled size before a warning.
const SIZE_TOLERANCE: u64 = 1024;

/// Buffered state for the transfer currently being received.
struct ReceiveState {
    transfer: Transfer,
    chunks: HashMap<u64, Vec<u8>>,
    received_bytes: u64,
    last_progress: Option<Instant>,
}

impl ReceiveState {
    fn fraction(&self) -> f64 {
        if self.transfer.size == 0 {
            1.0
        } else {
            self.received_bytes as f64 / self.transfer.size as f64
        }
    }

    fn is_complete(&self) -> bool {
        self.chunks.len() as u64 >= self.transfer.total_chunks
    }

    /// Missing indices in ascending order, capped one past the request
    /// limit. The announced chunk count is untrusted wire input, so the
    /// scan stops as soon as recovery is known to be off the table; it
    /// visits at most `stored chunks + limit + 1` indices.
    fn missing_indices(&self) -> Vec<u64> {
        let mut missing = Vec::new();
        for index in 0..self.transfer.total_chunks {
            if !self.chunks.contains_key(&index) {
                missing.push(index);
                if missing.len() > MISSING_REQUEST_LIMIT {
                    break;
                }
            }
        }
        missing
    }
}

/// Drives the incoming side of the protocol for one peer.
pub(crate) struct ReceiveEngine {
    events: EventSender,
    current: Option<ReceiveState>,
}

impl ReceiveEngine {
    pub(crate) fn new(events: EventSender) -> Self {
        Self {
            events,
            current: None,
        }
    }

    /// Handles a transfer announcement. A new announcement replaces any
    /// transfer still in flight.
    pub(crate) fn on_file_start(&mut self, transfer: Transfer) {
        if let Some(previous) = self.current.take() {
            warn!(
                old = %previous.transfer.id,
                new = %transfer.id,
                "new transfer announced before the previous one finished"
            );
        }
        debug!(
            id = %transfer.id,
            name = %transfer.name,
            size = transfer.size,
            total_chunks = transfer.total_chunks,
            "incoming transfer"
        );
        emit(&self.events, PeerEvent::TransferStarted(transfer.clone()));
        self.current = Some(ReceiveState {
            transfer,
            chunks: HashMap::new(),
            received_bytes: 0,
            last_progress: None,
        });
        self.try_finalize();
    }

    /// Stores one chunk. Chunks for an unknown transfer, duplicates, and
    /// checksum mismatches are dropped; a mismatch is left for the gap
    /// recovery pass to repair.
    pub(crate) fn on_chunk(
        &mut self,
        id: TransferId,
        index: u64,
        checksum: Option<u32>,
        payload: Vec<u8>,
    ) {
        let Some(state) = self.current.as_mut() else {
            debug!(%id, index, "chunk for no active transfer, dropping");
            return;
        };
        if state.transfer.id != id {
            debug!(%id, active = %state.transfer.id, "chunk for a different transfer, dropping");
            return;
        }
        if let Some(expected) = checksum {
            let actual = crc32::checksum(&payload);
            if actual != expected {
                warn!(%id, index, expected, actual, "chunk checksum mismatch, dropping");
                return;
            }
        }
        if state.chunks.contains_key(&index) {
            debug!(%id, index, "duplicate chunk, dropping");
            return;
        }

        state.received_bytes += payload.len() as u64;
        state.chunks.insert(index, payload);

        let now = Instant::now();
        let due = state
            .last_progress
            .is_none_or(|last| now.duration_since(last) >= PROGRESS_INTERVAL);
        if due {
            state.last_progress = Some(now);
            emit(
                &self.events,
                PeerEvent::TransferProgress {
                    id,
                    fraction: state.fraction(),
                    completed_chunks: state.chunks.len() as u64,
                    total_chunks: state.transfer.total_chunks,
                },
            );
        }

        // The end marker may already have passed; the last resent chunk
        // has to complete the transfer on its own
        self.try_finalize();
    }

    /// Handles the end-of-transfer marker. Returns the indices to request
    /// when gaps remain and a retransmission is worth asking for.
    pub(crate) fn on_file_end(&mut self, id: TransferId) -> Option<Vec<u64>> {
        let state = self.current.as_ref()?;
        if state.transfer.id != id {
            debug!(%id, active = %state.transfer.id, "end marker for a different transfer, dropping");
            return None;
        }
        if state.is_complete() {
            self.try_finalize();
            return None;
        }

        let missing = state.missing_indices();
        if missing.len() > MISSING_REQUEST_LIMIT {
            warn!(
                %id,
                limit = MISSING_REQUEST_LIMIT,
                "too many gaps to recover, keeping buffer and waiting"
            );
            return None;
        }
        debug!(%id, missing = missing.len(), "requesting retransmission");
        Some(missing)
    }

    /// Fails the active transfer when the connection dies.
    pub(crate) fn on_channel_lost(&mut self, reason: &str) {
        if let Some(state) = self.current.take() {
            emit(
                &self.events,
                PeerEvent::TransferFailed {
                    id: state.transfer.id,
                    reason: format!("connection lost: {reason}"),
                    fraction: state.fraction(),
                },
            );
        }
    }

    /// Id of the transfer currently buffering, if any.
    pub(crate) fn active_id(&self) -> Option<TransferId> {
        self.current.as_ref().map(|state| state.transfer.id)
    }

    /// Reassembles and emits the file if every chunk has arrived.
    fn try_finalize(&mut self) {
        let complete = self.current.as_ref().is_some_and(ReceiveState::is_complete);
        if !complete {
            return;
        }
        let Some(state) = self.current.take() else {
            return;
        };

        if state.received_bytes.abs_diff(state.transfer.size) > SIZE_TOLERANCE {
            warn!(
                id = %state.transfer.id,
                announced = state.transfer.size,
                received = state.received_bytes,
                "reassembled size differs from announcement"
            );
        }

        let mut chunks = state.chunks;
        let mut bytes = Vec::with_capacity(state.received_bytes as usize);
        for index in 0..state.transfer.total_chunks {
            if let Some(chunk) = chunks.remove(&index) {
                bytes.extend_from_slice(&chunk);
            }
        }

        debug!(id = %state.transfer.id, bytes = bytes.len(), "transfer complete");
        emit(
            &self.events,
            PeerEvent::TransferComplete {
                id: state.transfer.id,
                name: state.transfer.name,
                mime: state.transfer.mime,
                bytes,
            },
        );
    }
}
