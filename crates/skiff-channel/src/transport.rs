//! Transport abstraction underneath the channel session.
//!
//! Route discovery and descriptor negotiation are treated as an opaque
//! primitive: an implementation produces descriptors, yields candidates and
//! channel events, and serializes outbound bytes. [`ChannelSession`] owns the
//! ordering and state rules on top of it.
//!
//! [`ChannelSession`]: crate::session::ChannelSession

use crate::candidate::Candidate;
use crate::error::ChannelError;
use async_trait::async_trait;
use std::sync::Arc;

/// Opaque negotiation descriptor, exchanged out of band via the rendezvous
/// collaborator. Contents are transport-specific and never inspected here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescriptor(pub String);

/// Events surfaced by the underlying transport.
///
/// Arrival order is significant and must never be reordered: end-of-transfer
/// gap detection in the layer above depends on it.
#[derive(Debug)]
pub enum TransportEvent {
    /// A local candidate was discovered during gathering
    CandidateGathered(Candidate),
    /// Local candidate gathering finished
    GatheringComplete,
    /// The duplex channel is ready to carry messages
    Opened,
    /// An inbound message arrived
    Message(Vec<u8>),
    /// The channel closed or failed
    Closed(String),
}

/// The duplex message channel the data plane runs over.
///
/// Ordered delivery, bounded automatic retransmission (not full reliability),
/// and a hard per-message size cap. `send` fails with
/// [`ChannelError::QueueFull`] when the transport's outbound queue is full;
/// that signal is retryable, everything else is not.
#[async_trait]
pub trait MessageChannel: Send + Sync {
    /// Queue one message for delivery.
    async fn send(&self, payload: Vec<u8>) -> Result<(), ChannelError>;

    /// Whether the channel is currently open.
    fn is_open(&self) -> bool;

    /// Largest message the channel will accept, in bytes.
    fn max_message_size(&self) -> usize;
}

/// The opaque establishment primitive.
///
/// Implementations perform the actual offer/answer negotiation and candidate
/// discovery; events flow back through the receiver handed to
/// [`ChannelSession::new`](crate::session::ChannelSession::new).
#[async_trait]
pub trait SignalingTransport: Send {
    /// Produce the local offer descriptor and start gathering candidates.
    async fn create_offer(&mut self) -> Result<SessionDescriptor, ChannelError>;

    /// Produce the local answer descriptor (remote offer already applied).
    async fn create_answer(&mut self) -> Result<SessionDescriptor, ChannelError>;

    /// Apply the remote peer's descriptor.
    async fn apply_remote(&mut self, descriptor: &SessionDescriptor)
    -> Result<(), ChannelError>;

    /// Apply a remote candidate.
    async fn add_candidate(&mut self, candidate: &Candidate) -> Result<(), ChannelError>;

    /// Handle to the duplex data channel (usable once the session is open).
    fn data_channel(&self) -> Arc<dyn MessageChannel>;

    /// Tear the transport down.
    fn close(&mut self);
}
