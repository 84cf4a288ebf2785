//! Wire codec for the SKIFF transfer protocol.
//!
//! Every frame begins with a 2-byte little-endian type tag followed by the
//! 16 raw bytes of the transfer id. All multi-byte fields are little-endian.
//! Chunk indices, chunk lengths, and chunk counts travel as 48-bit unsigned
//! integers split 16-bit-high/32-bit-low; the valid range 0..2^48-1 is a
//! protocol constraint.
//!
//! Frame layouts:
//!
//! ```text
//! file-start   tag=0x0002 | id | size u64 | chunk_size u48 | total u48
//!                         | name_len u16 | name | mime_len u16 | mime
//! file-end     tag=0x0003 | id
//! chunk-data   tag=0x0001 | id | index u48 | len u48 | payload
//!              tag=0x0006 | id | index u48 | len u48 | crc32 u32 | payload
//! retransmit   tag=0x0005 | id | count u16 | count x index u48
//! ```

use crate::error::FrameError;
use crate::transfer::TransferId;
use crate::{FRAME_HEADER_SIZE, MAX_U48};

/// Type tag: chunk payload without checksum
pub const TAG_CHUNK_DATA: u16 = 0x0001;
/// Type tag: transfer announcement
pub const TAG_FILE_START: u16 = 0x0002;
/// Type tag: end-of-transfer marker
pub const TAG_FILE_END: u16 = 0x0003;
/// Type tag: gap-recovery request
pub const TAG_RETRANSMIT: u16 = 0x0005;
/// Type tag: chunk payload with CRC-32 checksum
pub const TAG_CHUNK_CHECKSUM: u16 = 0x0006;

/// Largest name/mime field the 2-byte length prefix can describe
const MAX_FIELD_LEN: usize = u16::MAX as usize;

/// Size of the chunk frame header, excluding the optional checksum
const CHUNK_BASE_HEADER: usize = FRAME_HEADER_SIZE + 6 + 6;

/// Byte overhead of a chunk frame before the payload.
#[must_use]
pub const fn chunk_overhead(with_checksum: bool) -> usize {
    if with_checksum {
        CHUNK_BASE_HEADER + 4
    } else {
        CHUNK_BASE_HEADER
    }
}

/// One protocol message, matched exhaustively at decode and dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Announces a transfer and its chunking parameters
    FileStart {
        /// Transfer id
        id: TransferId,
        /// File name (up to 65535 bytes of UTF-8)
        name: String,
        /// MIME type (up to 65535 bytes)
        mime: String,
        /// Total byte size
        size: u64,
        /// Chunk size in bytes
        chunk_size: u64,
        /// Total chunk count
        total_chunks: u64,
    },
    /// Marks the end of a transfer (also re-sent after a retransmission pass)
    FileEnd {
        /// Transfer id
        id: TransferId,
    },
    /// Carries one chunk; the checksum is present iff checksum mode selected
    /// the distinct type tag
    ChunkData {
        /// Transfer id
        id: TransferId,
        /// Chunk index
        index: u64,
        /// CRC-32 over the payload, when checksum mode is enabled
        checksum: Option<u32>,
        /// Raw chunk bytes
        payload: Vec<u8>,
    },
    /// Asks the sender to resend the listed chunk indices
    RetransmitRequest {
        /// Transfer id
        id: TransferId,
        /// Missing chunk indices, ascending
        missing: Vec<u64>,
    },
}

impl Message {
    /// Transfer id carried by any message kind.
    #[must_use]
    pub fn id(&self) -> TransferId {
        match self {
            Self::FileStart { id, .. }
            | Self::FileEnd { id }
            | Self::ChunkData { id, .. }
            | Self::RetransmitRequest { id, .. } => *id,
        }
    }

    /// Encode to the exact binary layout.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::FieldTooLong`] if a name, mime type, or missing
    /// list exceeds its 2-byte length prefix, or
    /// [`FrameError::ValueOutOfRange`] for values past the 48-bit wire limit.
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        match self {
            Self::FileStart {
                id,
                name,
                mime,
                size,
                chunk_size,
                total_chunks,
            } => {
                let name = name.as_bytes();
                let mime = mime.as_bytes();
                if name.len() > MAX_FIELD_LEN {
                    return Err(FrameError::FieldTooLong {
                        field: "name",
                        len: name.len(),
                    });
                }
                if mime.len() > MAX_FIELD_LEN {
                    return Err(FrameError::FieldTooLong {
                        field: "mime type",
                        len: mime.len(),
                    });
                }
                check_u48("chunk size", *chunk_size)?;
                check_u48("total chunks", *total_chunks)?;

                let mut buf =
                    Vec::with_capacity(FRAME_HEADER_SIZE + 24 + name.len() + 4 + mime.len());
                put_header(&mut buf, TAG_FILE_START, id);
                buf.extend_from_slice(&size.to_le_bytes());
                put_u48(&mut buf, *chunk_size);
                put_u48(&mut buf, *total_chunks);
                buf.extend_from_slice(&(name.len() as u16).to_le_bytes());
                buf.extend_from_slice(name);
                buf.extend_from_slice(&(mime.len() as u16).to_le_bytes());
                buf.extend_from_slice(mime);
                Ok(buf)
            }

            Self::FileEnd { id } => {
                let mut buf = Vec::with_capacity(FRAME_HEADER_SIZE);
                put_header(&mut buf, TAG_FILE_END, id);
                Ok(buf)
            }

            Self::ChunkData {
                id,
                index,
                checksum,
                payload,
            } => {
                check_u48("chunk index", *index)?;
                check_u48("chunk length", payload.len() as u64)?;

                let tag = if checksum.is_some() {
                    TAG_CHUNK_CHECKSUM
                } else {
                    TAG_CHUNK_DATA
                };
                let mut buf =
                    Vec::with_capacity(chunk_overhead(checksum.is_some()) + payload.len());
                put_header(&mut buf, tag, id);
                put_u48(&mut buf, *index);
                put_u48(&mut buf, payload.len() as u64);
                if let Some(crc) = checksum {
                    buf.extend_from_slice(&crc.to_le_bytes());
                }
                buf.extend_from_slice(payload);
                Ok(buf)
            }

            Self::RetransmitRequest { id, missing } => {
                if missing.len() > MAX_FIELD_LEN {
                    return Err(FrameError::FieldTooLong {
                        field: "missing-chunk list",
                        len: missing.len(),
                    });
                }
                let mut buf = Vec::with_capacity(FRAME_HEADER_SIZE + 2 + missing.len() * 6);
                put_header(&mut buf, TAG_RETRANSMIT, id);
                buf.extend_from_slice(&(missing.len() as u16).to_le_bytes());
                for &index in missing {
                    check_u48("missing chunk index", index)?;
                    put_u48(&mut buf, index);
                }
                Ok(buf)
            }
        }
    }

    /// Decode from raw bytes, validating exact or minimum lengths per kind.
    ///
    /// # Errors
    ///
    /// Rejects truncated input ([`FrameError::Truncated`]), frames whose
    /// length contradicts their kind ([`FrameError::LengthMismatch`]), and
    /// unrecognized type tags ([`FrameError::UnknownType`]). Never guesses.
    pub fn decode(data: &[u8]) -> Result<Self, FrameError> {
        if data.len() < FRAME_HEADER_SIZE {
            return Err(FrameError::Truncated {
                expected: FRAME_HEADER_SIZE,
                actual: data.len(),
            });
        }

        let tag = u16::from_le_bytes([data[0], data[1]]);
        let mut id = [0u8; 16];
        id.copy_from_slice(&data[2..18]);
        let id = TransferId::from_bytes(id);

        match tag {
            TAG_FILE_START => {
                // Fixed fields plus the two length prefixes
                if data.len() < 42 {
                    return Err(FrameError::Truncated {
                        expected: 42,
                        actual: data.len(),
                    });
                }
                let size = get_u64(&data[18..26]);
                let chunk_size = get_u48(&data[26..32]);
                let total_chunks = get_u48(&data[32..38]);

                let name_len = u16::from_le_bytes([data[38], data[39]]) as usize;
                if data.len() < 42 + name_len {
                    return Err(FrameError::Truncated {
                        expected: 42 + name_len,
                        actual: data.len(),
                    });
                }
                let name = String::from_utf8_lossy(&data[40..40 + name_len]).into_owned();

                let mime_offset = 40 + name_len;
                let mime_len =
                    u16::from_le_bytes([data[mime_offset], data[mime_offset + 1]]) as usize;
                if data.len() < mime_offset + 2 + mime_len {
                    return Err(FrameError::Truncated {
                        expected: mime_offset + 2 + mime_len,
                        actual: data.len(),
                    });
                }
                let mime = String::from_utf8_lossy(
                    &data[mime_offset + 2..mime_offset + 2 + mime_len],
                )
                .into_owned();

                Ok(Self::FileStart {
                    id,
                    name,
                    mime,
                    size,
                    chunk_size,
                    total_chunks,
                })
            }

            TAG_FILE_END => {
                if data.len() != FRAME_HEADER_SIZE {
                    return Err(FrameError::LengthMismatch {
                        expected: FRAME_HEADER_SIZE,
                        actual: data.len(),
                    });
                }
                Ok(Self::FileEnd { id })
            }

            TAG_CHUNK_DATA | TAG_CHUNK_CHECKSUM => {
                let with_checksum = tag == TAG_CHUNK_CHECKSUM;
                let header = chunk_overhead(with_checksum);
                if data.len() < header {
                    return Err(FrameError::Truncated {
                        expected: header,
                        actual: data.len(),
                    });
                }
                let index = get_u48(&data[18..24]);
                let len = get_u48(&data[24..30]) as usize;
                let checksum = with_checksum.then(|| get_u32(&data[30..34]));

                if data.len() < header + len {
                    return Err(FrameError::Truncated {
                        expected: header + len,
                        actual: data.len(),
                    });
                }
                let payload = data[header..header + len].to_vec();

                Ok(Self::ChunkData {
                    id,
                    index,
                    checksum,
                    payload,
                })
            }

            TAG_RETRANSMIT => {
                if data.len() < 20 {
                    return Err(FrameError::Truncated {
                        expected: 20,
                        actual: data.len(),
                    });
                }
                let count = u16::from_le_bytes([data[18], data[19]]) as usize;
                let expected = 20 + count * 6;
                if data.len() != expected {
                    return Err(FrameError::LengthMismatch {
                        expected,
                        actual: data.len(),
                    });
                }
                let missing = (0..count)
                    .map(|i| get_u48(&data[20 + i * 6..26 + i * 6]))
                    .collect();
                Ok(Self::RetransmitRequest { id, missing })
            }

            unknown => Err(FrameError::UnknownType(unknown)),
        }
    }
}

fn put_header(buf: &mut Vec<u8>, tag: u16, id: &TransferId) {
    buf.extend_from_slice(&tag.to_le_bytes());
    buf.extend_from_slice(id.as_bytes());
}

/// Append a 48-bit value split 16-bit-high/32-bit-low, each little-endian.
fn put_u48(buf: &mut Vec<u8>, value: u64) {
    debug_assert!(value <= MAX_U48);
    let high = ((value >> 32) & 0xFFFF) as u16;
    let low = (value & 0xFFFF_FFFF) as u32;
    buf.extend_from_slice(&high.to_le_bytes());
    buf.extend_from_slice(&low.to_le_bytes());
}

fn get_u32(bytes: &[u8]) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[..4]);
    u32::from_le_bytes(raw)
}

fn get_u64(bytes: &[u8]) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(raw)
}

/// Read a 48-bit value from exactly 6 bytes.
fn get_u48(bytes: &[u8]) -> u64 {
    let high = u16::from_le_bytes([bytes[0], bytes[1]]);
    let low = u32::from_le_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]);
    (u64::from(high) << 32) | u64::from(low)
}

fn check_u48(field: &'static str, value: u64) -> Result<(), FrameError> {
    if value > MAX_U48 {
        return Err(FrameError::ValueOutOfRange { field, value });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id() -> TransferId {
        TransferId::from_bytes(*b"0123456789abcdef")
    }

    #[test]
    fn file_start_roundtrip() {
        let original = Message::FileStart {
            id: id(),
            name: "report.pdf".into(),
            mime: "application/pdf".into(),
            size: 1_234_567,
            chunk_size: 261_120,
            total_chunks: 5,
        };
        let encoded = original.encode().unwrap();
        assert_eq!(Message::decode(&encoded).unwrap(), original);
    }

    #[test]
    fn file_start_with_empty_fields_roundtrip() {
        let original = Message::FileStart {
            id: id(),
            name: String::new(),
            mime: String::new(),
            size: 0,
            chunk_size: 4,
            total_chunks: 0,
        };
        let encoded = original.encode().unwrap();
        assert_eq!(encoded.len(), 42);
        assert_eq!(Message::decode(&encoded).unwrap(), original);
    }

    #[test]
    fn file_start_max_length_name_roundtrips() {
        let original = Message::FileStart {
            id: id(),
            name: "n".repeat(65535),
            mime: "m".repeat(65535),
            size: 10,
            chunk_size: 4,
            total_chunks: 3,
        };
        let encoded = original.encode().unwrap();
        assert_eq!(Message::decode(&encoded).unwrap(), original);
    }

    #[test]
    fn file_start_oversized_name_fails_at_encode() {
        let message = Message::FileStart {
            id: id(),
            name: "n".repeat(65536),
            mime: "text/plain".into(),
            size: 10,
            chunk_size: 4,
            total_chunks: 3,
        };
        assert_eq!(
            message.encode(),
            Err(FrameError::FieldTooLong {
                field: "name",
                len: 65536
            })
        );
    }

    #[test]
    fn file_end_is_exactly_header_sized() {
        let encoded = Message::FileEnd { id: id() }.encode().unwrap();
        assert_eq!(encoded.len(), 18);
        assert_eq!(&encoded[0..2], &[0x03, 0x00]);
        assert_eq!(&encoded[2..18], id().as_bytes());

        let mut padded = encoded.clone();
        padded.push(0);
        assert_eq!(
            Message::decode(&padded),
            Err(FrameError::LengthMismatch {
                expected: 18,
                actual: 19
            })
        );
    }

    #[test]
    fn chunk_data_roundtrip_without_checksum() {
        let original = Message::ChunkData {
            id: id(),
            index: 5,
            checksum: None,
            payload: vec![0xAB; 1024],
        };
        let encoded = original.encode().unwrap();
        assert_eq!(&encoded[0..2], &[0x01, 0x00]);
        // index 5 at offset 18: high16 = 0, low32 = 5, each little-endian
        assert_eq!(&encoded[18..24], &[0, 0, 5, 0, 0, 0]);
        assert_eq!(Message::decode(&encoded).unwrap(), original);
    }

    #[test]
    fn chunk_data_roundtrip_with_checksum() {
        let payload = b"chunk payload".to_vec();
        let original = Message::ChunkData {
            id: id(),
            index: 0,
            checksum: Some(crate::crc32::checksum(&payload)),
            payload,
        };
        let encoded = original.encode().unwrap();
        assert_eq!(&encoded[0..2], &[0x06, 0x00]);
        assert_eq!(Message::decode(&encoded).unwrap(), original);
    }

    #[test]
    fn chunk_index_at_48_bit_limit_roundtrips() {
        let original = Message::ChunkData {
            id: id(),
            index: MAX_U48,
            checksum: None,
            payload: vec![1],
        };
        let encoded = original.encode().unwrap();
        assert_eq!(&encoded[18..24], &[0xFF; 6]);
        assert_eq!(Message::decode(&encoded).unwrap(), original);
    }

    #[test]
    fn chunk_index_past_48_bits_fails_at_encode() {
        let message = Message::ChunkData {
            id: id(),
            index: MAX_U48 + 1,
            checksum: None,
            payload: vec![1],
        };
        assert!(matches!(
            message.encode(),
            Err(FrameError::ValueOutOfRange { field: "chunk index", .. })
        ));
    }

    #[test]
    fn chunk_with_truncated_payload_is_rejected() {
        let encoded = Message::ChunkData {
            id: id(),
            index: 0,
            checksum: None,
            payload: vec![7; 100],
        }
        .encode()
        .unwrap();
        assert!(matches!(
            Message::decode(&encoded[..encoded.len() - 1]),
            Err(FrameError::Truncated { .. })
        ));
    }

    #[test]
    fn retransmit_roundtrip() {
        let original = Message::RetransmitRequest {
            id: id(),
            missing: vec![1, 7, 300, MAX_U48],
        };
        let encoded = original.encode().unwrap();
        assert_eq!(encoded.len(), 20 + 4 * 6);
        assert_eq!(Message::decode(&encoded).unwrap(), original);
    }

    #[test]
    fn retransmit_with_empty_list_roundtrips() {
        let original = Message::RetransmitRequest {
            id: id(),
            missing: vec![],
        };
        let encoded = original.encode().unwrap();
        assert_eq!(encoded.len(), 20);
        assert_eq!(Message::decode(&encoded).unwrap(), original);
    }

    #[test]
    fn retransmit_length_must_match_count() {
        let mut encoded = Message::RetransmitRequest {
            id: id(),
            missing: vec![1, 2],
        }
        .encode()
        .unwrap();
        encoded.truncate(encoded.len() - 6);
        assert_eq!(
            Message::decode(&encoded),
            Err(FrameError::LengthMismatch {
                expected: 32,
                actual: 26
            })
        );
    }

    #[test]
    fn undersized_and_unknown_frames_are_rejected() {
        assert!(matches!(
            Message::decode(&[0x01, 0x00, 0x00]),
            Err(FrameError::Truncated { expected: 18, .. })
        ));

        let mut unknown = Message::FileEnd { id: id() }.encode().unwrap();
        unknown[0] = 0x42;
        assert_eq!(Message::decode(&unknown), Err(FrameError::UnknownType(0x0042)));
    }

    #[test]
    fn golden_file_start_layout() {
        let encoded = Message::FileStart {
            id: id(),
            name: "ab".into(),
            mime: "t/x".into(),
            size: 0x0001_0000_0002,
            chunk_size: 0x0001_0000_0003,
            total_chunks: 2,
        }
        .encode()
        .unwrap();

        assert_eq!(&encoded[0..2], &[0x02, 0x00]);
        assert_eq!(&encoded[2..18], id().as_bytes());
        // u64 size, little-endian
        assert_eq!(&encoded[18..26], &[0x02, 0, 0, 0, 0x01, 0x00, 0, 0]);
        // u48 chunk size: high16=0x0001 LE, low32=0x00000003 LE
        assert_eq!(&encoded[26..32], &[0x01, 0x00, 0x03, 0, 0, 0]);
        assert_eq!(&encoded[32..38], &[0x00, 0x00, 0x02, 0, 0, 0]);
        assert_eq!(&encoded[38..40], &[2, 0]);
        assert_eq!(&encoded[40..42], b"ab");
        assert_eq!(&encoded[42..44], &[3, 0]);
        assert_eq!(&encoded[44..47], b"t/x");
        assert_eq!(encoded.len(), 47);
    }
}
