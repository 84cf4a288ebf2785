//! Property-based tests for the wire codec and chunk geometry.

use proptest::prelude::*;
use skiff_core::crc32;
use skiff_core::{MAX_U48, Message, Transfer, TransferId};

fn transfer_id() -> impl Strategy<Value = TransferId> {
    any::<[u8; 16]>().prop_map(TransferId::from_bytes)
}

fn file_start() -> impl Strategy<Value = Message> {
    (
        transfer_id(),
        "[a-zA-Z0-9._ -]{0,60}",
        "[a-z]{0,10}/[a-z0-9.+-]{0,20}",
        any::<u64>(),
        1..=MAX_U48,
        0..=MAX_U48,
    )
        .prop_map(|(id, name, mime, size, chunk_size, total_chunks)| Message::FileStart {
            id,
            name,
            mime,
            size,
            chunk_size,
            total_chunks,
        })
}

fn chunk_data() -> impl Strategy<Value = Message> {
    (
        transfer_id(),
        0..=MAX_U48,
        proptest::option::of(any::<u32>()),
        proptest::collection::vec(any::<u8>(), 0..512),
    )
        .prop_map(|(id, index, checksum, payload)| Message::ChunkData {
            id,
            index,
            checksum,
            payload,
        })
}

fn retransmit() -> impl Strategy<Value = Message> {
    (
        transfer_id(),
        proptest::collection::vec(0..=MAX_U48, 0..64),
    )
        .prop_map(|(id, missing)| Message::RetransmitRequest { id, missing })
}

fn any_message() -> impl Strategy<Value = Message> {
    prop_oneof![
        file_start(),
        chunk_data(),
        retransmit(),
        transfer_id().prop_map(|id| Message::FileEnd { id }),
    ]
}

proptest! {
    /// Every valid message survives an encode/decode cycle unchanged.
    #[test]
    fn codec_roundtrip(message in any_message()) {
        let encoded = message.encode().unwrap();
        prop_assert_eq!(Message::decode(&encoded).unwrap(), message);
    }

    /// Decoding never panics, whatever bytes arrive.
    #[test]
    fn decode_tolerates_arbitrary_bytes(bytes in proptest::collection::vec(any::<u8>(), 0..200)) {
        let _ = Message::decode(&bytes);
    }

    /// No strict prefix of a valid frame decodes successfully; truncation is
    /// always detected, never misread as a shorter message.
    #[test]
    fn truncated_frames_never_decode(message in any_message(), cut in 0usize..64) {
        let encoded = message.encode().unwrap();
        prop_assume!(!encoded.is_empty());
        let keep = cut % encoded.len();
        prop_assert!(Message::decode(&encoded[..keep]).is_err());
    }

    /// Chunk spans tile the file exactly: contiguous, in order, summing to
    /// the full size, with only the final chunk allowed to be short.
    #[test]
    fn chunk_spans_partition_the_file(size in 0u64..100_000, chunk_size in 1u64..5_000) {
        let transfer = Transfer::new(
            TransferId::generate(),
            "partition.bin",
            "application/octet-stream",
            size,
            chunk_size,
        );

        let mut expected_offset = 0u64;
        for index in 0..transfer.total_chunks {
            let (offset, len) = transfer.chunk_span(index);
            prop_assert_eq!(offset, expected_offset);
            if index + 1 < transfer.total_chunks {
                prop_assert_eq!(len as u64, chunk_size);
            } else {
                prop_assert!(len as u64 <= chunk_size);
                prop_assert!(len > 0);
            }
            expected_offset += len as u64;
        }
        prop_assert_eq!(expected_offset, size);
    }

    /// A single corrupted byte always changes the checksum.
    #[test]
    fn crc_detects_single_byte_corruption(
        payload in proptest::collection::vec(any::<u8>(), 1..256),
        position in 0usize..256,
        flip in 1u8..=255,
    ) {
        let mut corrupted = payload.clone();
        let position = position % corrupted.len();
        corrupted[position] ^= flip;
        prop_assert_ne!(crc32::checksum(&payload), crc32::checksum(&corrupted));
    }
}
