//! Channel session state machine.
//!
//! A [`ChannelSession`] drives one duplex channel from negotiation to open,
//! independent of file semantics. It owns the two ordering rules the layer
//! above depends on:
//!
//! - Remote candidates arriving before the remote descriptor is applied are
//!   buffered in arrival order and flushed, order preserved, exactly once
//!   right after it is applied; candidates arriving once open apply
//!   immediately.
//! - Transport events are consumed and surfaced strictly in arrival order.

use crate::candidate::Candidate;
use crate::error::ChannelError;
use crate::transport::{MessageChannel, SessionDescriptor, SignalingTransport, TransportEvent};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, timeout, timeout_at};

/// Session configuration parameters
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Bound on local candidate gathering
    pub gathering_timeout: Duration,
    /// Bound on whole-session establishment
    pub connect_timeout: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            gathering_timeout: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(30),
        }
    }
}

/// Connection state enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Initial state, no negotiation started
    New,
    /// Offer/answer exchange in progress
    Negotiating,
    /// Channel ready, data plane usable
    Open,
    /// Channel closed after being open
    Closed,
    /// Establishment failed before the channel opened
    Failed,
}

/// Events the session surfaces to its owner, in arrival order.
#[derive(Debug)]
pub enum ChannelEvent {
    /// A subnet-local candidate was discovered and should be relayed
    CandidateDiscovered(Candidate),
    /// The channel is open
    Open,
    /// An inbound message arrived
    Message(Vec<u8>),
    /// The channel closed or failed
    Closed {
        /// Human-readable close reason
        reason: String,
    },
}

/// Result of the local half of a negotiation: the descriptor plus the
/// subnet-local candidates gathered before completion or timeout.
#[derive(Debug)]
pub struct Negotiation {
    /// Local negotiation descriptor to relay out of band
    pub descriptor: SessionDescriptor,
    /// Subnet-local candidates gathered so far, in discovery order
    pub candidates: Vec<Candidate>,
}

/// One channel between two peers: negotiation plus open/close/send/receive.
pub struct ChannelSession<T: SignalingTransport> {
    transport: T,
    events: mpsc::UnboundedReceiver<TransportEvent>,
    config: ChannelConfig,
    state: ConnectionState,
    /// Remote candidates awaiting the remote descriptor, arrival order
    pending_candidates: Vec<Candidate>,
    remote_applied: bool,
    /// Events observed while gathering, replayed before new ones
    queued: VecDeque<ChannelEvent>,
}

impl<T: SignalingTransport> ChannelSession<T> {
    /// Create a session over a transport and its event stream.
    pub fn new(
        transport: T,
        events: mpsc::UnboundedReceiver<TransportEvent>,
        config: ChannelConfig,
    ) -> Self {
        Self {
            transport,
            events,
            config,
            state: ConnectionState::New,
            pending_candidates: Vec::new(),
            remote_applied: false,
            queued: VecDeque::new(),
        }
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Start a session as the initiating side.
    ///
    /// Produces the local offer descriptor and gathers candidates until the
    /// transport signals completion or the gathering timeout elapses,
    /// whichever first.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::InvalidState`] unless the session is new, or
    /// the transport's error if offer creation fails.
    pub async fn offer(&mut self) -> Result<Negotiation, ChannelError> {
        if self.state != ConnectionState::New {
            return Err(ChannelError::InvalidState);
        }

        let descriptor = self.transport.create_offer().await?;
        self.state = ConnectionState::Negotiating;
        let candidates = self.gather_candidates().await;

        Ok(Negotiation {
            descriptor,
            candidates,
        })
    }

    /// Start a session as the accepting side, answering a remote offer.
    ///
    /// Applies the remote descriptor (flushing any buffered candidates),
    /// produces the local answer, and gathers candidates.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::InvalidState`] unless the session is new, or
    /// the transport's error if negotiation fails.
    pub async fn answer(
        &mut self,
        remote: &SessionDescriptor,
    ) -> Result<Negotiation, ChannelError> {
        if self.state != ConnectionState::New {
            return Err(ChannelError::InvalidState);
        }

        self.state = ConnectionState::Negotiating;
        self.apply_remote_descriptor(remote).await?;
        let descriptor = self.transport.create_answer().await?;
        let candidates = self.gather_candidates().await;

        Ok(Negotiation {
            descriptor,
            candidates,
        })
    }

    /// Apply the remote answer to a locally initiated session.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::InvalidState`] unless an offer is outstanding,
    /// or the transport's error if the descriptor is rejected.
    pub async fn apply_answer(&mut self, remote: &SessionDescriptor) -> Result<(), ChannelError> {
        if self.state != ConnectionState::Negotiating || self.remote_applied {
            return Err(ChannelError::InvalidState);
        }
        self.apply_remote_descriptor(remote).await
    }

    /// Submit a remote candidate received out of band.
    ///
    /// Buffered until the remote descriptor has been applied; applied
    /// immediately afterwards, including while open.
    ///
    /// # Errors
    ///
    /// Propagates the transport's error for a candidate it rejects.
    pub async fn add_candidate(&mut self, candidate: Candidate) -> Result<(), ChannelError> {
        if !self.remote_applied {
            tracing::debug!(address = %candidate.address, "buffering candidate until remote descriptor applied");
            self.pending_candidates.push(candidate);
            return Ok(());
        }
        self.transport.add_candidate(&candidate).await
    }

    /// Wait for the channel to open, bounded by the connect timeout.
    ///
    /// Non-open events observed while waiting are queued and surfaced later
    /// by [`next_event`](Self::next_event) in their original order.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Timeout`] on expiry, or
    /// [`ChannelError::Closed`] if the channel fails first.
    pub async fn wait_open(&mut self) -> Result<(), ChannelError> {
        if self.state == ConnectionState::Open {
            return Ok(());
        }

        let wait = timeout(self.config.connect_timeout, async {
            loop {
                let Some(event) = self.events.recv().await else {
                    return Err(ChannelError::Closed("transport gone".into()));
                };
                match self.process(event) {
                    Some(ChannelEvent::Open) => return Ok(()),
                    Some(ChannelEvent::Closed { reason }) => {
                        return Err(ChannelError::Closed(reason));
                    }
                    Some(other) => self.queued.push_back(other),
                    None => {}
                }
            }
        })
        .await;

        match wait {
            Ok(result) => result,
            Err(_) => {
                self.state = ConnectionState::Failed;
                Err(ChannelError::Timeout("channel establishment"))
            }
        }
    }

    /// Send raw bytes over the open channel.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::NotOpen`] unless the session is open;
    /// otherwise the data channel's own result, including
    /// [`ChannelError::QueueFull`] backpressure.
    pub async fn send(&self, payload: Vec<u8>) -> Result<(), ChannelError> {
        if self.state != ConnectionState::Open {
            return Err(ChannelError::NotOpen);
        }
        self.transport.data_channel().send(payload).await
    }

    /// Handle to the data channel for the layer above.
    #[must_use]
    pub fn data_channel(&self) -> Arc<dyn MessageChannel> {
        self.transport.data_channel()
    }

    /// Next session event, in arrival order. `None` once the transport's
    /// event stream is exhausted.
    pub async fn next_event(&mut self) -> Option<ChannelEvent> {
        loop {
            if let Some(replayed) = self.queued.pop_front() {
                return Some(replayed);
            }
            let event = self.events.recv().await?;
            if let Some(surfaced) = self.process(event) {
                return Some(surfaced);
            }
        }
    }

    /// Close the session and release the transport.
    pub fn close(&mut self) {
        if self.state == ConnectionState::Open || self.state == ConnectionState::Negotiating {
            self.state = ConnectionState::Closed;
        }
        self.pending_candidates.clear();
        self.transport.close();
    }

    async fn apply_remote_descriptor(
        &mut self,
        remote: &SessionDescriptor,
    ) -> Result<(), ChannelError> {
        self.transport.apply_remote(remote).await?;
        self.remote_applied = true;

        // Flush exactly once, preserving arrival order. A candidate the
        // transport rejects is logged and skipped; the rest still apply.
        let pending = std::mem::take(&mut self.pending_candidates);
        if !pending.is_empty() {
            tracing::debug!(count = pending.len(), "flushing buffered candidates");
        }
        for candidate in &pending {
            if let Err(err) = self.transport.add_candidate(candidate).await {
                tracing::warn!(address = %candidate.address, %err, "buffered candidate rejected");
            }
        }
        Ok(())
    }

    /// Collect local candidates until gathering completes or times out.
    /// Non-candidate events seen here are queued for `next_event`.
    async fn gather_candidates(&mut self) -> Vec<Candidate> {
        let deadline = Instant::now() + self.config.gathering_timeout;
        let mut gathered = Vec::new();

        loop {
            let event = match timeout_at(deadline, self.events.recv()).await {
                Ok(Some(event)) => event,
                Ok(None) => break,
                Err(_) => {
                    tracing::debug!(
                        count = gathered.len(),
                        "candidate gathering timed out, advertising what we have"
                    );
                    break;
                }
            };

            match event {
                TransportEvent::CandidateGathered(candidate) => {
                    if candidate.is_subnet_local() {
                        gathered.push(candidate);
                    } else {
                        tracing::debug!(address = %candidate.address, "discarding non-local candidate");
                    }
                }
                TransportEvent::GatheringComplete => break,
                other => {
                    if let Some(surfaced) = self.process(other) {
                        self.queued.push_back(surfaced);
                    }
                }
            }
        }

        gathered
    }

    /// Apply one transport event to the state machine, mapping it to the
    /// event surfaced to the owner (if any).
    fn process(&mut self, event: TransportEvent) -> Option<ChannelEvent> {
        match event {
            TransportEvent::CandidateGathered(candidate) => {
                // Trickled candidates after the gathering window; same
                // subnet-local restriction as the gathered list.
                if candidate.is_subnet_local() {
                    Some(ChannelEvent::CandidateDiscovered(candidate))
                } else {
                    tracing::debug!(address = %candidate.address, "discarding non-local candidate");
                    None
                }
            }
            TransportEvent::GatheringComplete => None,
            TransportEvent::Opened => {
                tracing::debug!("channel open");
                self.state = ConnectionState::Open;
                Some(ChannelEvent::Open)
            }
            TransportEvent::Message(payload) => Some(ChannelEvent::Message(payload)),
            TransportEvent::Closed(reason) => {
                self.state = if self.state == ConnectionState::Open {
                    ConnectionState::Closed
                } else {
                    ConnectionState::Failed
                };
                tracing::debug!(%reason, state = ?self.state, "channel closed");
                Some(ChannelEvent::Closed { reason })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Records negotiation calls; send goes nowhere.
    struct MockTransport {
        log: Arc<Mutex<Vec<String>>>,
        channel: Arc<MockDataChannel>,
    }

    struct MockDataChannel;

    #[async_trait]
    impl MessageChannel for MockDataChannel {
        async fn send(&self, _payload: Vec<u8>) -> Result<(), ChannelError> {
            Ok(())
        }
        fn is_open(&self) -> bool {
            true
        }
        fn max_message_size(&self) -> usize {
            crate::MAX_MESSAGE_SIZE
        }
    }

    #[async_trait]
    impl SignalingTransport for MockTransport {
        async fn create_offer(&mut self) -> Result<SessionDescriptor, ChannelError> {
            self.log.lock().unwrap().push("offer".into());
            Ok(SessionDescriptor("local-offer".into()))
        }

        async fn create_answer(&mut self) -> Result<SessionDescriptor, ChannelError> {
            self.log.lock().unwrap().push("answer".into());
            Ok(SessionDescriptor("local-answer".into()))
        }

        async fn apply_remote(
            &mut self,
            descriptor: &SessionDescriptor,
        ) -> Result<(), ChannelError> {
            self.log.lock().unwrap().push(format!("remote:{}", descriptor.0));
            Ok(())
        }

        async fn add_candidate(&mut self, candidate: &Candidate) -> Result<(), ChannelError> {
            self.log
                .lock()
                .unwrap()
                .push(format!("cand:{}", candidate.encoded));
            Ok(())
        }

        fn data_channel(&self) -> Arc<dyn MessageChannel> {
            self.channel.clone()
        }

        fn close(&mut self) {
            self.log.lock().unwrap().push("close".into());
        }
    }

    fn harness() -> (
        ChannelSession<MockTransport>,
        mpsc::UnboundedSender<TransportEvent>,
        Arc<Mutex<Vec<String>>>,
    ) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = MockTransport {
            log: log.clone(),
            channel: Arc::new(MockDataChannel),
        };
        let config = ChannelConfig {
            gathering_timeout: Duration::from_millis(50),
            connect_timeout: Duration::from_millis(200),
        };
        (ChannelSession::new(transport, rx, config), tx, log)
    }

    fn local(encoded: &str) -> Candidate {
        Candidate::new("192.168.1.50:9000".parse().unwrap(), encoded)
    }

    #[tokio::test]
    async fn candidates_buffered_until_answer_applied_then_flushed_in_order() {
        let (mut session, _tx, log) = harness();

        session.offer().await.unwrap();

        session.add_candidate(local("c1")).await.unwrap();
        session.add_candidate(local("c2")).await.unwrap();
        session.add_candidate(local("c3")).await.unwrap();
        assert!(log.lock().unwrap().iter().all(|entry| !entry.starts_with("cand:")));

        session
            .apply_answer(&SessionDescriptor("remote-answer".into()))
            .await
            .unwrap();

        let entries = log.lock().unwrap().clone();
        let cands: Vec<_> = entries.iter().filter(|e| e.starts_with("cand:")).collect();
        assert_eq!(cands, vec!["cand:c1", "cand:c2", "cand:c3"]);

        // A candidate arriving afterwards applies immediately.
        session.add_candidate(local("c4")).await.unwrap();
        assert_eq!(log.lock().unwrap().last().unwrap(), "cand:c4");
    }

    #[tokio::test]
    async fn answering_side_applies_remote_before_answering() {
        let (mut session, _tx, log) = harness();

        session.add_candidate(local("early")).await.unwrap();
        session
            .answer(&SessionDescriptor("remote-offer".into()))
            .await
            .unwrap();

        let entries = log.lock().unwrap().clone();
        assert_eq!(entries[0], "remote:remote-offer");
        assert_eq!(entries[1], "cand:early");
        assert_eq!(entries[2], "answer");
    }

    #[tokio::test]
    async fn gathering_collects_local_only_until_complete() {
        let (mut session, tx, _log) = harness();

        tx.send(TransportEvent::CandidateGathered(local("a"))).unwrap();
        tx.send(TransportEvent::CandidateGathered(Candidate::new(
            "203.0.113.9:4000".parse().unwrap(),
            "public",
        )))
        .unwrap();
        tx.send(TransportEvent::CandidateGathered(local("b"))).unwrap();
        tx.send(TransportEvent::GatheringComplete).unwrap();

        let negotiation = session.offer().await.unwrap();
        let encoded: Vec<_> = negotiation
            .candidates
            .iter()
            .map(|c| c.encoded.as_str())
            .collect();
        assert_eq!(encoded, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn gathering_stops_at_timeout_without_complete_signal() {
        let (mut session, tx, _log) = harness();

        tx.send(TransportEvent::CandidateGathered(local("only"))).unwrap();
        // No GatheringComplete: the 50ms timeout ends collection.
        let negotiation = session.offer().await.unwrap();
        assert_eq!(negotiation.candidates.len(), 1);
    }

    #[tokio::test]
    async fn events_during_gathering_are_replayed_in_order() {
        let (mut session, tx, _log) = harness();

        tx.send(TransportEvent::Opened).unwrap();
        tx.send(TransportEvent::Message(vec![1, 2, 3])).unwrap();
        tx.send(TransportEvent::GatheringComplete).unwrap();

        session.offer().await.unwrap();
        assert_eq!(session.state(), ConnectionState::Open);

        assert!(matches!(session.next_event().await, Some(ChannelEvent::Open)));
        match session.next_event().await {
            Some(ChannelEvent::Message(payload)) => assert_eq!(payload, vec![1, 2, 3]),
            other => panic!("expected message, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn state_machine_reaches_open_then_closed() {
        let (mut session, tx, _log) = harness();
        tx.send(TransportEvent::GatheringComplete).unwrap();
        session.offer().await.unwrap();
        assert_eq!(session.state(), ConnectionState::Negotiating);

        tx.send(TransportEvent::Opened).unwrap();
        session.wait_open().await.unwrap();
        assert_eq!(session.state(), ConnectionState::Open);

        tx.send(TransportEvent::Closed("peer went away".into())).unwrap();
        match session.next_event().await {
            Some(ChannelEvent::Closed { reason }) => assert_eq!(reason, "peer went away"),
            other => panic!("expected close, got {other:?}"),
        }
        assert_eq!(session.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn failure_before_open_is_failed_not_closed() {
        let (mut session, tx, _log) = harness();
        tx.send(TransportEvent::GatheringComplete).unwrap();
        session.offer().await.unwrap();

        tx.send(TransportEvent::Closed("no route".into())).unwrap();
        session.next_event().await;
        assert_eq!(session.state(), ConnectionState::Failed);
    }

    #[tokio::test]
    async fn establishment_times_out() {
        let (mut session, tx, _log) = harness();
        tx.send(TransportEvent::GatheringComplete).unwrap();
        session.offer().await.unwrap();

        let err = session.wait_open().await.unwrap_err();
        assert!(matches!(err, ChannelError::Timeout(_)));
        assert_eq!(session.state(), ConnectionState::Failed);
    }

    #[tokio::test]
    async fn send_requires_open() {
        let (session, _tx, _log) = harness();
        let err = session.send(vec![0]).await.unwrap_err();
        assert!(matches!(err, ChannelError::NotOpen));
    }

    #[tokio::test]
    async fn second_offer_is_rejected() {
        let (mut session, tx, _log) = harness();
        tx.send(TransportEvent::GatheringComplete).unwrap();
        session.offer().await.unwrap();
        assert!(matches!(
            session.offer().await,
            Err(ChannelError::InvalidState)
        ));
    }
}
