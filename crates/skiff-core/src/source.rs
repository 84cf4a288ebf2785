//! Chunk sources: where outgoing file bytes come from.
//!
//! The send engine reads each chunk lazily, immediately before it goes on
//! the wire, so a large file is never held in memory whole and a
//! retransmission pass can re-read any chunk by offset.

use std::io::SeekFrom;
use std::path::Path;

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::Mutex;

/// Random-access byte supplier for an outgoing transfer.
#[async_trait]
pub trait ChunkSource: Send + Sync {
    /// Total length in bytes.
    fn len(&self) -> u64;

    /// Whether the source is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read exactly `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error; reads past the end are the
    /// caller's bug and surface as [`std::io::ErrorKind::UnexpectedEof`].
    async fn read_chunk(&self, offset: u64, len: usize) -> std::io::Result<Vec<u8>>;
}

/// In-memory source, useful for small payloads and tests.
#[derive(Debug, Clone)]
pub struct MemorySource {
    bytes: Vec<u8>,
}

impl MemorySource {
    /// Wraps the given bytes.
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }
}

#[async_trait]
impl ChunkSource for MemorySource {
    fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    async fn read_chunk(&self, offset: u64, len: usize) -> std::io::Result<Vec<u8>> {
        let start = usize::try_from(offset).map_err(|_| {
            std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "offset past end of source")
        })?;
        let end = start.checked_add(len).filter(|&e| e <= self.bytes.len());
        match end {
            Some(end) => Ok(self.bytes[start..end].to_vec()),
            None => Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "read past end of source",
            )),
        }
    }
}

/// File-backed source. Reads share one handle behind a mutex; chunk reads
/// are short seek-and-read critical sections.
#[derive(Debug)]
pub struct FileSource {
    file: Mutex<File>,
    len: u64,
}

impl FileSource {
    /// Opens the file at `path` and records its current length.
    ///
    /// # Errors
    ///
    /// Returns the error from opening or stat-ing the file.
    pub async fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file = File::open(path).await?;
        let len = file.metadata().await?.len();
        Ok(Self {
            file: Mutex::new(file),
            len,
        })
    }
}

#[async_trait]
impl ChunkSource for FileSource {
    fn len(&self) -> u64 {
        self.len
    }

    async fn read_chunk(&self, offset: u64, len: usize) -> std::io::Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        let mut file = self.file.lock().await;
        file.seek(SeekFrom::Start(offset)).await?;
        file.read_exact(&mut buf).await?;
        Ok(buf)
    }
}
