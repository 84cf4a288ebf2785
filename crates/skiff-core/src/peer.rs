//! Peer facade: negotiation, the event reactor, and file sending.
//!
//! A [`Peer`] ties a channel session to the transfer engines. Negotiation
//! calls pass straight through to the session; once the channel is open,
//! [`Peer::run`] consumes session events, routes inbound frames to the
//! receive engine, and answers retransmission requests from the last
//! completed send. Outgoing files go through a cloneable [`FileSender`]
//! handle so sending does not block the reactor.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use skiff_channel::{
    Candidate, ChannelConfig, ChannelError, ChannelEvent, ChannelSession, ConnectionState,
    MessageChannel, Negotiation, SessionDescriptor, SignalingTransport, TransportEvent,
};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::{debug, warn};

use crate::config::TransferConfig;
use crate::error::TransferError;
use crate::event::{emit, EventSender, PeerEvent};
use crate::frame::{chunk_overhead, Message};
use crate::receive::ReceiveEngine;
use crate::send::SendEngine;
use crate::source::{ChunkSource, FileSource, MemorySource};
use crate::transfer::{Transfer, TransferId};

/// The last fully sent transfer, kept for gap recovery.
#[derive(Clone)]
struct SentRecord {
    transfer: Transfer,
    source: Arc<dyn ChunkSource>,
}

type SentSlot = Arc<Mutex<Option<SentRecord>>>;

/// One peer endpoint: a channel session plus both transfer engines.
pub struct Peer<T: SignalingTransport> {
    session: ChannelSession<T>,
    config: TransferConfig,
    events: EventSender,
    receive: ReceiveEngine,
    busy: Arc<AtomicBool>,
    last_sent: SentSlot,
}

impl<T: SignalingTransport> Peer<T> {
    /// Builds a peer over a signaling transport and its event stream.
    /// Returns the peer and the receiver for its [`PeerEvent`]s.
    pub fn new(
        transport: T,
        transport_events: mpsc::UnboundedReceiver<TransportEvent>,
        channel_config: ChannelConfig,
        config: TransferConfig,
    ) -> (Self, UnboundedReceiver<PeerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let peer = Self {
            session: ChannelSession::new(transport, transport_events, channel_config),
            config,
            events: tx.clone(),
            receive: ReceiveEngine::new(tx),
            busy: Arc::new(AtomicBool::new(false)),
            last_sent: Arc::new(Mutex::new(None)),
        };
        (peer, rx)
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.session.state()
    }

    /// Initiates negotiation; see [`ChannelSession::offer`].
    ///
    /// # Errors
    ///
    /// Propagates the session's negotiation errors.
    pub async fn offer(&mut self) -> Result<Negotiation, ChannelError> {
        self.session.offer().await
    }

    /// Answers a remote offer; see [`ChannelSession::answer`].
    ///
    /// # Errors
    ///
    /// Propagates the session's negotiation errors.
    pub async fn answer(&mut self, remote: &SessionDescriptor) -> Result<Negotiation, ChannelError> {
        self.session.answer(remote).await
    }

    /// Applies the remote answer to a locally initiated session.
    ///
    /// # Errors
    ///
    /// Propagates the session's negotiation errors.
    pub async fn apply_answer(&mut self, remote: &SessionDescriptor) -> Result<(), ChannelError> {
        self.session.apply_answer(remote).await
    }

    /// Submits a remote candidate received out of band.
    ///
    /// # Errors
    ///
    /// Propagates the transport's error for a rejected candidate.
    pub async fn add_candidate(&mut self, candidate: Candidate) -> Result<(), ChannelError> {
        self.session.add_candidate(candidate).await
    }

    /// Waits for the channel to open.
    ///
    /// # Errors
    ///
    /// Returns the session's timeout or close error.
    pub async fn wait_open(&mut self) -> Result<(), ChannelError> {
        self.session.wait_open().await
    }

    /// Handle for sending files. Cheap to clone; safe to use from another
    /// task while [`run`](Self::run) owns the peer.
    #[must_use]
    pub fn sender(&self) -> FileSender {
        FileSender {
            channel: self.session.data_channel(),
            config: self.config.clone(),
            events: self.events.clone(),
            busy: Arc::clone(&self.busy),
            last_sent: Arc::clone(&self.last_sent),
        }
    }

    /// Closes the session.
    pub fn close(&mut self) {
        self.session.close();
    }

    /// Consumes session events until the channel closes, driving the
    /// receive engine and gap recovery.
    pub async fn run(mut self) {
        while let Some(event) = self.session.next_event().await {
            match event {
                ChannelEvent::CandidateDiscovered(candidate) => {
                    emit(&self.events, PeerEvent::CandidateDiscovered(candidate));
                }
                ChannelEvent::Open => {
                    emit(&self.events, PeerEvent::Connected);
                }
                ChannelEvent::Message(bytes) => self.on_message(&bytes).await,
                ChannelEvent::Closed { reason } => {
                    self.receive.on_channel_lost(&reason);
                    emit(&self.events, PeerEvent::Closed { reason });
                    break;
                }
            }
        }
    }

    async fn on_message(&mut self, bytes: &[u8]) {
        let message = match Message::decode(bytes) {
            Ok(message) => message,
            Err(error) => {
                warn!(%error, len = bytes.len(), "dropping malformed frame");
                return;
            }
        };

        match message {
            Message::FileStart {
                id,
                name,
                mime,
                size,
                chunk_size,
                total_chunks,
            } => {
                self.receive.on_file_start(Transfer {
                    id,
                    name,
                    mime,
                    size,
                    chunk_size,
                    total_chunks,
                });
            }
            Message::ChunkData {
                id,
                index,
                checksum,
                payload,
            } => {
                self.receive.on_chunk(id, index, checksum, payload);
            }
            Message::FileEnd { id } => {
                if let Some(missing) = self.receive.on_file_end(id) {
                    self.request_retransmission(id, missing).await;
                }
            }
            Message::RetransmitRequest { id, missing } => {
                self.answer_retransmission(id, missing);
            }
        }
    }

    async fn request_retransmission(&mut self, id: TransferId, missing: Vec<u64>) {
        let request = Message::RetransmitRequest { id, missing };
        let frame = match request.encode() {
            Ok(frame) => frame,
            Err(error) => {
                warn!(%id, %error, "could not encode retransmission request");
                return;
            }
        };
        if let Err(error) = self.session.send(frame).await {
            warn!(%id, %error, "could not send retransmission request");
        }
    }

    /// Resends the requested chunks from the last completed send. Runs on
    /// its own task so a slow resend never stalls the reactor.
    fn answer_retransmission(&self, id: TransferId, missing: Vec<u64>) {
        let record = {
            let slot = match self.last_sent.lock() {
                Ok(slot) => slot,
                Err(poisoned) => poisoned.into_inner(),
            };
            slot.clone()
        };
        let Some(record) = record else {
            warn!(%id, "retransmission requested but nothing was sent");
            return;
        };
        if record.transfer.id != id {
            warn!(%id, last = %record.transfer.id, "retransmission requested for an unknown transfer");
            return;
        }

        debug!(%id, count = missing.len(), "answering retransmission request");
        let engine = SendEngine::new(
            self.session.data_channel(),
            self.config.clone(),
            self.events.clone(),
        );
        tokio::spawn(async move {
            if let Err(error) = engine
                .resend_missing(record.source, &record.transfer, &missing)
                .await
            {
                warn!(%id, %error, "retransmission failed");
            }
        });
    }
}

/// Clears the busy flag when a send finishes, however it finishes.
struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Cloneable handle for sending files over one peer's channel.
///
/// A peer sends one file at a time; a second send while one is active
/// fails fast with [`TransferError::Busy`].
#[derive(Clone)]
pub struct FileSender {
    channel: Arc<dyn MessageChannel>,
    config: TransferConfig,
    events: EventSender,
    busy: Arc<AtomicBool>,
    last_sent: SentSlot,
}

impl FileSender {
    /// Sends a file from an arbitrary chunk source.
    ///
    /// Resolves with the transfer id once every chunk has been handed to
    /// the channel and the end marker sent.
    ///
    /// # Errors
    ///
    /// [`TransferError::Busy`] if a send is already active; otherwise the
    /// engine's failure.
    pub async fn send_file(
        &self,
        name: impl Into<String>,
        mime: impl Into<String>,
        source: Arc<dyn ChunkSource>,
    ) -> Result<TransferId, TransferError> {
        if self.busy.swap(true, Ordering::SeqCst) {
            return Err(TransferError::Busy);
        }
        let _guard = BusyGuard(Arc::clone(&self.busy));

        // A full chunk frame must fit the channel's message cap
        let overhead = chunk_overhead(self.config.checksum) as u64;
        let cap = (self.channel.max_message_size() as u64)
            .saturating_sub(overhead)
            .max(1);
        let chunk_size = self.config.chunk_size.clamp(1, cap);

        let transfer = Transfer::new(
            TransferId::generate(),
            name,
            mime,
            source.len(),
            chunk_size,
        );
        debug!(
            id = %transfer.id,
            name = %transfer.name,
            size = transfer.size,
            chunk_size,
            total_chunks = transfer.total_chunks,
            "starting send"
        );

        let engine = SendEngine::new(
            Arc::clone(&self.channel),
            self.config.clone(),
            self.events.clone(),
        );
        engine.run(Arc::clone(&source), &transfer).await?;

        let record = SentRecord {
            transfer: transfer.clone(),
            source,
        };
        match self.last_sent.lock() {
            Ok(mut slot) => *slot = Some(record),
            Err(poisoned) => *poisoned.into_inner() = Some(record),
        }
        Ok(transfer.id)
    }

    /// Sends an in-memory payload.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`send_file`](Self::send_file).
    pub async fn send_bytes(
        &self,
        name: impl Into<String>,
        mime: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Result<TransferId, TransferError> {
        self.send_file(name, mime, Arc::new(MemorySource::new(bytes)))
            .await
    }

    /// Sends a file from disk, naming the transfer after the file.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`send_file`](Self::send_file), plus the I/O
    /// error from opening the file.
    pub async fn send_path(
        &self,
        path: impl AsRef<Path>,
        mime: impl Into<String>,
    ) -> Result<TransferId, TransferError> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_owned());
        let source = FileSource::open(path).await?;
        self.send_file(name, mime, Arc::new(source)).await
    }
}
