//! Property tests for message framing.
//!
//! Decoding must reproduce what was encoded, reject any single-bit
//! corruption, and survive arbitrary input without panicking.

use proptest::prelude::*;
use tandem_networking::{decode, encode, FrameError};
use tandem_shared::{MAX_CONTENT_SIZE, SIZE_WITHOUT_CONTENT};

proptest! {
    /// Property: Arbitrary bytes don't crash the decoder
    #[test]
    fn arbitrary_bytes_dont_crash(
        random_bytes in prop::collection::vec(any::<u8>(), 0..2048),
    ) {
        let _result = decode(&random_bytes);
    }

    /// Property: Type and payload survive framing
    #[test]
    fn framing_roundtrips(
        message_type in any::<u32>(),
        payload in prop::collection::vec(any::<u8>(), 0..1024),
    ) {
        let bytes = encode(message_type, &payload).unwrap();
        prop_assert_eq!(bytes.len(), SIZE_WITHOUT_CONTENT + payload.len());

        let decoded = decode(&bytes).unwrap();
        prop_assert_eq!(decoded.message_type(), message_type);
        prop_assert_eq!(decoded.content(), payload.as_slice());
    }

    /// Property: A flipped bit in index, type or content is a hash mismatch
    #[test]
    fn flipped_bit_is_detected(
        payload in prop::collection::vec(any::<u8>(), 1..256),
        position in any::<prop::sample::Index>(),
        bit in 0u8..8,
    ) {
        let mut bytes = encode(7u32, &payload).unwrap();
        // Index and type header fields, then the content.
        let candidates: Vec<usize> = (8..16).chain(SIZE_WITHOUT_CONTENT..bytes.len()).collect();
        let at = candidates[position.index(candidates.len())];
        bytes[at] ^= 1 << bit;

        prop_assert!(
            matches!(decode(&bytes), Err(FrameError::HashMismatch { .. })),
            "flip at byte {} went unnoticed",
            at
        );
    }

    /// Property: A flipped bit in the magic is reported as such
    #[test]
    fn flipped_magic_is_invalid(
        payload in prop::collection::vec(any::<u8>(), 0..64),
        at in 0usize..4,
        bit in 0u8..8,
    ) {
        let mut bytes = encode(7u32, &payload).unwrap();
        bytes[at] ^= 1 << bit;
        let is_invalid_magic = matches!(decode(&bytes), Err(FrameError::InvalidMagic { .. }));
        prop_assert!(is_invalid_magic);
    }

    /// Property: A corrupted length never decodes
    #[test]
    fn flipped_length_is_rejected(
        payload in prop::collection::vec(any::<u8>(), 0..64),
        at in 16usize..20,
        bit in 0u8..8,
    ) {
        let mut bytes = encode(7u32, &payload).unwrap();
        bytes[at] ^= 1 << bit;
        prop_assert!(decode(&bytes).is_err());
    }
}

#[test]
fn test_largest_payload_fits_exactly() {
    let payload = vec![0xA5; MAX_CONTENT_SIZE];
    let bytes = encode(1u32, &payload).unwrap();
    assert_eq!(decode(&bytes).unwrap().content().len(), MAX_CONTENT_SIZE);
    assert!(matches!(
        encode(1u32, &vec![0; MAX_CONTENT_SIZE + 1]),
        Err(FrameError::ContentTooLarge { .. })
    ));
}
