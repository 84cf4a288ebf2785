//! Sending side of a transfer: announcement, adaptive concurrent chunk
//! dispatch, retry with backoff, and gap-recovery resends.
//!
//! Chunks fly with up to `max_concurrent` sends in flight at once. A full
//! send queue is a recoverable fault: the chunk is retried with linear
//! backoff and the concurrency window shrinks after repeated pressure.
//! Five consecutive failed chunks abort the transfer.

use std::collections::VecDeque;
use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt};
use futures_util::stream::{FuturesUnordered, StreamExt};
use skiff_channel::{ChannelError, MessageChannel};
use tracing::{debug, warn};

use crate::config::TransferConfig;
use crate::crc32;
use crate::error::TransferError;
use crate::event::{emit, EventSender, PeerEvent};
use crate::frame::Message;
use crate::source::ChunkSource;
use crate::transfer::Transfer;

/// Send attempts per chunk before it counts as failed.
const MAX_CHUNK_ATTEMPTS: u32 = 3;

/// Floor for the shrunk concurrency window.
const MIN_CONCURRENT: usize = 2;

/// Consecutive chunk failures that abort the transfer.
const MAX_CONSECUTIVE_FAILURES: u32 = 5;

/// Queue-full events after which the concurrency window shrinks.
const QUEUE_FULL_SHRINK_THRESHOLD: u32 = 5;

/// Next window size after a queue-full signal past the shrink threshold:
/// 70% of the current window, repeatedly, down to the floor.
fn shrunk_window(current: usize) -> usize {
    (current * 7 / 10).max(MIN_CONCURRENT)
}

/// Outcome of one chunk's send attempts.
enum ChunkFault {
    /// Queue stayed full through every attempt; the chunk can be requeued
    Backpressure,
    /// The transfer cannot continue
    Fatal(TransferError),
}

/// Drives one outgoing transfer over an open data channel.
pub(crate) struct SendEngine {
    channel: Arc<dyn MessageChannel>,
    config: TransferConfig,
    events: EventSender,
}

impl SendEngine {
    pub(crate) fn new(
        channel: Arc<dyn MessageChannel>,
        config: TransferConfig,
        events: EventSender,
    ) -> Self {
        Self {
            channel,
            config,
            events,
        }
    }

    /// Sends the whole transfer: announcement, every chunk, then the end
    /// marker. Returns only once every chunk has been accepted by the
    /// channel or the transfer has failed.
    pub(crate) async fn run(
        &self,
        source: Arc<dyn ChunkSource>,
        transfer: &Transfer,
    ) -> Result<(), TransferError> {
        self.send_control(Message::FileStart {
            id: transfer.id,
            name: transfer.name.clone(),
            mime: transfer.mime.clone(),
            size: transfer.size,
            chunk_size: transfer.chunk_size,
            total_chunks: transfer.total_chunks,
        })
        .await?;

        let total = transfer.total_chunks;
        let mut completed = 0u64;
        let mut sent_bytes = 0u64;
        let mut next_chunk = 0u64;
        let mut failed: VecDeque<u64> = VecDeque::new();
        let mut concurrency = self.config.max_concurrent.max(1);
        let mut consecutive_failures = 0u32;
        let mut queue_full_events = 0u32;

        let mut in_flight: FuturesUnordered<BoxFuture<'_, (u64, Result<usize, ChunkFault>)>> =
            FuturesUnordered::new();

        while completed < total {
            // Top up the window: retry failed chunks before fresh ones
            while in_flight.len() < concurrency {
                let index = match failed.pop_front() {
                    Some(index) => index,
                    None if next_chunk < total => {
                        let index = next_chunk;
                        next_chunk += 1;
                        index
                    }
                    None => break,
                };
                let source = Arc::clone(&source);
                in_flight.push(
                    async move { (index, self.send_chunk(source.as_ref(), transfer, index).await) }
                        .boxed(),
                );
            }

            let Some((index, result)) = in_flight.next().await else {
                break;
            };

            match result {
                Ok(len) => {
                    completed += 1;
                    sent_bytes += len as u64;
                    consecutive_failures = 0;
                    let fraction = if transfer.size == 0 {
                        1.0
                    } else {
                        sent_bytes as f64 / transfer.size as f64
                    };
                    emit(
                        &self.events,
                        PeerEvent::TransferProgress {
                            id: transfer.id,
                            fraction,
                            completed_chunks: completed,
                            total_chunks: total,
                        },
                    );
                }
                Err(ChunkFault::Backpressure) => {
                    failed.push_back(index);
                    consecutive_failures += 1;
                    queue_full_events += 1;
                    if queue_full_events > QUEUE_FULL_SHRINK_THRESHOLD {
                        let shrunk = shrunk_window(concurrency);
                        if shrunk < concurrency {
                            debug!(from = concurrency, to = shrunk, "shrinking send window");
                            concurrency = shrunk;
                        }
                    }
                    if consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                        return Err(TransferError::TooManyFailures {
                            failures: consecutive_failures,
                        });
                    }
                }
                Err(ChunkFault::Fatal(error)) => return Err(error),
            }
        }

        self.send_control(Message::FileEnd { id: transfer.id }).await
    }

    /// Resends the requested chunks one at a time, then repeats the end
    /// marker so the receiver can re-check completion.
    pub(crate) async fn resend_missing(
        &self,
        source: Arc<dyn ChunkSource>,
        transfer: &Transfer,
        missing: &[u64],
    ) -> Result<(), TransferError> {
        debug!(id = %transfer.id, count = missing.len(), "resending missing chunks");
        for &index in missing {
            if index >= transfer.total_chunks {
                warn!(id = %transfer.id, index, "ignoring retransmit request past end of transfer");
                continue;
            }
            match self.send_chunk(source.as_ref(), transfer, index).await {
                Ok(_) => {}
                Err(ChunkFault::Fatal(error)) => return Err(error),
                Err(ChunkFault::Backpressure) => {
                    return Err(TransferError::TooManyFailures {
                        failures: MAX_CHUNK_ATTEMPTS,
                    });
                }
            }
            tokio::time::sleep(self.config.retransmit_delay).await;
        }
        self.send_control(Message::FileEnd { id: transfer.id }).await
    }

    /// Reads, frames, and sends one chunk with up to three attempts.
    async fn send_chunk(
        &self,
        source: &dyn ChunkSource,
        transfer: &Transfer,
        index: u64,
    ) -> Result<usize, ChunkFault> {
        let (offset, len) = transfer.chunk_span(index);
        let payload = source
            .read_chunk(offset, len)
            .await
            .map_err(|error| ChunkFault::Fatal(TransferError::Source(error)))?;
        let checksum = self.config.checksum.then(|| crc32::checksum(&payload));
        let frame = Message::ChunkData {
            id: transfer.id,
            index,
            checksum,
            payload,
        }
        .encode()
        .map_err(|error| ChunkFault::Fatal(error.into()))?;

        for attempt in 1..=MAX_CHUNK_ATTEMPTS {
            if !self.channel.is_open() {
                return Err(ChunkFault::Fatal(TransferError::ChannelLost(
                    "data channel closed mid-transfer".into(),
                )));
            }
            match self.channel.send(frame.clone()).await {
                Ok(()) => return Ok(len),
                Err(error) if error.is_backpressure() => {
                    if attempt == MAX_CHUNK_ATTEMPTS {
                        break;
                    }
                    debug!(index, attempt, "send queue full, backing off");
                    tokio::time::sleep(self.config.backoff_base * attempt).await;
                }
                Err(ChannelError::Closed(reason)) => {
                    return Err(ChunkFault::Fatal(TransferError::ChannelLost(reason)));
                }
                Err(ChannelError::NotOpen) => {
                    return Err(ChunkFault::Fatal(TransferError::ChannelLost(
                        "data channel not open".into(),
                    )));
                }
                Err(error) => {
                    return Err(ChunkFault::Fatal(TransferError::Transport(error.to_string())));
                }
            }
        }
        Err(ChunkFault::Backpressure)
    }

    /// Sends a control frame, retrying a full queue with the same backoff
    /// as chunk sends.
    async fn send_control(&self, message: Message) -> Result<(), TransferError> {
        let frame = message.encode()?;
        for attempt in 1..=MAX_CHUNK_ATTEMPTS {
            match self.channel.send(frame.clone()).await {
                Ok(()) => return Ok(()),
                Err(error) if error.is_backpressure() && attempt < MAX_CHUNK_ATTEMPTS => {
                    tokio::time::sleep(self.config.backoff_base * attempt).await;
                }
                Err(ChannelError::Closed(reason)) => {
                    return Err(TransferError::ChannelLost(reason));
                }
                Err(ChannelError::NotOpen) => {
                    return Err(TransferError::ChannelLost("data channel not open".into()));
                }
                Err(error) => return Err(TransferError::Transport(error.to_string())),
            }
        }
        Err(TransferError::TooManyFailures {
            failures: MAX_CHUNK_ATTEMPTS,
        })
    }
}
