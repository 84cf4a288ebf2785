//! # SKIFF Channel
//!
//! Channel establishment for the SKIFF file-ferry protocol.
//!
//! This crate provides:
//! - The offer/answer negotiation state machine
//! - Asynchronous candidate buffering and subnet-local filtering
//! - The duplex message-channel abstraction the data plane runs over
//!
//! The actual address/route discovery mechanics are opaque: an implementation
//! of [`SignalingTransport`] yields negotiation descriptors and candidates,
//! and this crate only sequences them. File semantics live one layer up, in
//! `skiff-core`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod candidate;
pub mod error;
pub mod session;
pub mod transport;

pub use candidate::Candidate;
pub use error::ChannelError;
pub use session::{
    ChannelConfig, ChannelEvent, ChannelSession, ConnectionState, Negotiation,
};
pub use transport::{MessageChannel, SessionDescriptor, SignalingTransport, TransportEvent};

/// Hard per-message size ceiling of the underlying channel (256 KiB).
pub const MAX_MESSAGE_SIZE: usize = 256 * 1024;
