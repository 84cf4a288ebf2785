//! Transfer identity and metadata.

use std::fmt;

/// Unique 128-bit transfer identifier.
///
/// Travels on the wire as its raw 16 bytes (never as text).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransferId([u8; 16]);

impl TransferId {
    /// Generate a random transfer id.
    #[must_use]
    pub fn generate() -> Self {
        let mut id = [0u8; 16];
        getrandom::getrandom(&mut id).expect("CSPRNG failure");
        Self(id)
    }

    /// Construct from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Raw wire representation.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransferId({})", hex::encode(self.0))
    }
}

/// Metadata for one file moving in one direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    /// Transfer identifier
    pub id: TransferId,
    /// File name
    pub name: String,
    /// MIME type
    pub mime: String,
    /// Total byte size
    pub size: u64,
    /// Chunk size used to slice the file
    pub chunk_size: u64,
    /// Number of chunks (`size.div_ceil(chunk_size)`)
    pub total_chunks: u64,
}

impl Transfer {
    /// Create transfer metadata, deriving the chunk count.
    #[must_use]
    pub fn new(
        id: TransferId,
        name: impl Into<String>,
        mime: impl Into<String>,
        size: u64,
        chunk_size: u64,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            mime: mime.into(),
            size,
            chunk_size,
            total_chunks: size.div_ceil(chunk_size),
        }
    }

    /// Byte offset and length of chunk `index`. The final chunk may be short.
    #[must_use]
    pub fn chunk_span(&self, index: u64) -> (u64, usize) {
        let offset = index * self.chunk_size;
        let len = self.chunk_size.min(self.size.saturating_sub(offset));
        (offset, len as usize)
    }
}
