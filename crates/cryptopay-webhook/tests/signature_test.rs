//! Property-based tests for webhook signature verification.

#![allow(clippy::unwrap_used)]

use cryptopay_webhook::{compute_signature, verify};
use proptest::prelude::*;

proptest! {
    /// The signature computed for a body always verifies.
    #[test]
    fn own_signature_verifies(secret in "[ -~]{1,64}", body in prop::collection::vec(any::<u8>(), 0..512)) {
        let signature = compute_signature(&secret, &body).unwrap();
        prop_assert!(verify(&secret, &body, Some(&signature)));
    }

    /// Flipping any single bit of the body breaks verification.
    #[test]
    fn body_bit_flip_fails(
        secret in "[ -~]{1,64}",
        body in prop::collection::vec(any::<u8>(), 1..512),
        index in any::<prop::sample::Index>(),
        bit in 0u8..8,
    ) {
        let signature = compute_signature(&secret, &body).unwrap();
        let mut tampered = body.clone();
        let position = index.index(tampered.len());
        tampered[position] ^= 1 << bit;

        prop_assert!(!verify(&secret, &tampered, Some(&signature)));
    }

    /// Flipping any single bit of the decoded MAC breaks verification.
    #[test]
    fn signature_bit_flip_fails(
        body in prop::collection::vec(any::<u8>(), 0..512),
        index in any::<prop::sample::Index>(),
        bit in 0u8..8,
    ) {
        let signature = compute_signature("test-token", &body).unwrap();
        let mut mac = hex::decode(&signature).unwrap();
        let position = index.index(mac.len());
        mac[position] ^= 1 << bit;

        prop_assert!(!verify("test-token", &body, Some(&hex::encode(mac))));
    }

    /// Arbitrary header values never panic and never verify.
    #[test]
    fn arbitrary_signatures_rejected(provided in ".{0,128}", body in prop::collection::vec(any::<u8>(), 0..64)) {
        let expected = compute_signature("test-token", &body).unwrap();
        prop_assume!(!provided.eq_ignore_ascii_case(&expected));

        prop_assert!(!verify("test-token", &body, Some(&provided)));
    }
}
