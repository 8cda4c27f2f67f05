//! Additive 8-bit checksum shared by every TMCL datagram.
//!
//! The checksum is the sum of all bytes modulo 256.  It is computed the same
//! way when building an outgoing request (the result is appended as the last
//! byte) and when validating an incoming reply (the checksum of the first
//! eight bytes must equal the ninth).
//!
//! # Why so weak? (for beginners)
//!
//! An additive checksum catches every single-bit error but misses, for
//! example, two bytes swapped with each other.  TMCL modules compute exactly
//! this value in firmware, so the host has no freedom to pick a stronger
//! algorithm.

/// Returns the sum of `bytes` modulo 256.
///
/// # Examples
///
/// ```rust
/// use tmcl_core::protocol::checksum;
///
/// assert_eq!(checksum(&[0x01, 0x01, 0x00, 0x00, 0x00, 0x00, 0xC8, 0x00]), 0xCA);
/// assert_eq!(checksum(&[0xFF, 0x02]), 0x01);
/// assert_eq!(checksum(&[]), 0);
/// ```
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// Returns `true` when the last byte of `frame` is the checksum of the rest.
///
/// An empty frame has no checksum byte and is never valid.
pub fn verify(frame: &[u8]) -> bool {
    match frame.split_last() {
        Some((&last, body)) => checksum(body) == last,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_checksum_of_empty_slice_is_zero() {
        assert_eq!(checksum(&[]), 0);
    }

    #[test]
    fn test_checksum_wraps_modulo_256() {
        // Arrange – 0x80 + 0x80 + 0x05 = 0x105
        let bytes = [0x80, 0x80, 0x05];

        // Act
        let sum = checksum(&bytes);

        // Assert
        assert_eq!(sum, 0x05);
    }

    #[test]
    fn test_verify_accepts_frame_with_matching_trailer() {
        let frame = [0x02, 0x01, 0x01, 0x00, 0x00, 0x00, 0xC8, 0x00, 0xCC];
        assert!(verify(&frame));
    }

    #[test]
    fn test_verify_rejects_frame_with_wrong_trailer() {
        let frame = [0x02, 0x01, 0x01, 0x00, 0x00, 0x00, 0xC8, 0x00, 0xCD];
        assert!(!verify(&frame));
    }

    #[test]
    fn test_verify_rejects_empty_frame() {
        assert!(!verify(&[]));
    }

    proptest! {
        #[test]
        fn prop_checksum_equals_sum_mod_256(bytes in proptest::collection::vec(any::<u8>(), 0..64)) {
            let expected = (bytes.iter().map(|&b| u32::from(b)).sum::<u32>() % 256) as u8;
            prop_assert_eq!(checksum(&bytes), expected);
            prop_assert_eq!(checksum(&bytes), checksum(&bytes));
        }

        #[test]
        fn prop_appended_checksum_always_verifies(bytes in proptest::collection::vec(any::<u8>(), 0..64)) {
            let mut frame = bytes.clone();
            frame.push(checksum(&bytes));
            prop_assert!(verify(&frame));
        }
    }
}
