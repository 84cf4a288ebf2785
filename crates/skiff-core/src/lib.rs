//! # SKIFF Core
//!
//! Core protocol implementation for SKIFF, the subnet-local peer-to-peer
//! file ferry.
//!
//! This crate provides:
//! - Binary wire codec for the transfer protocol (bit-exact, little-endian)
//! - Per-chunk CRC-32 integrity checking
//! - An adaptive-concurrency send engine with backoff and selective retry
//! - A reassembling receive engine with end-of-transfer gap recovery
//! - The `Peer` facade composing the channel session with both engines
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                           Peer                                   │
//! │   (facade: relays events, routes frames to the engines)         │
//! ├───────────────────────────┬─────────────────────────────────────┤
//! │        SendEngine         │          ReceiveEngine              │
//! │  (chunking, concurrent    │  (out-of-order reassembly, gap      │
//! │   dispatch, retry)        │   detection, retransmit requests)   │
//! ├───────────────────────────┴─────────────────────────────────────┤
//! │                       Wire frames                                │
//! │   (tagged binary messages over the duplex channel)              │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The channel itself (negotiation, candidates, open/close lifecycle) lives
//! in `skiff-channel`; this crate only assumes an ordered, partially
//! reliable duplex message transport with a hard per-message size cap.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod crc32;
pub mod error;
pub mod event;
pub mod frame;
pub mod peer;
mod receive;
mod send;
pub mod source;
pub mod transfer;

pub use config::TransferConfig;
pub use error::{FrameError, TransferError};
pub use event::PeerEvent;
pub use frame::Message;
pub use peer::{FileSender, Peer};
pub use source::{ChunkSource, FileSource, MemorySource};
pub use transfer::{Transfer, TransferId};

/// Fixed frame header size in bytes: 2-byte type tag + 16-byte transfer id.
pub const FRAME_HEADER_SIZE: usize = 18;

/// Largest value representable in a 6-byte wire field (2^48 - 1).
///
/// Chunk indices, chunk lengths, and chunk counts travel as 48-bit unsigned
/// integers; this is a protocol constraint, not an implementation detail.
pub const MAX_U48: u64 = (1 << 48) - 1;
