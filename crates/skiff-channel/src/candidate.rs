//! Address candidates exchanged during channel establishment.

use std::net::{IpAddr, SocketAddr};

/// An address/route candidate produced by the underlying transport and
/// exchanged out of band through the rendezvous collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// Reachable address this candidate advertises
    pub address: SocketAddr,
    /// Transport-specific encoded form, relayed verbatim to the remote peer
    pub encoded: String,
}

impl Candidate {
    /// Create a candidate from an address and its encoded form
    #[must_use]
    pub fn new(address: SocketAddr, encoded: impl Into<String>) -> Self {
        Self {
            address,
            encoded: encoded.into(),
        }
    }

    /// Whether the candidate address falls in a private IPv4 range
    /// (10.0.0.0/8, 172.16.0.0/12, 192.168.0.0/16).
    ///
    /// Only such candidates are surfaced to the collaborator; the protocol
    /// deliberately restricts itself to same-subnet reachability and discards
    /// public and relay candidates.
    #[must_use]
    pub fn is_subnet_local(&self) -> bool {
        match self.address.ip() {
            IpAddr::V4(v4) => v4.is_private(),
            IpAddr::V6(_) => false,
        }
    }
}
