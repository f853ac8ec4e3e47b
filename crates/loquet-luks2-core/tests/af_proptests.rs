#![allow(clippy::unwrap_used, clippy::arithmetic_side_effects)]

//! Property-based tests for anti-forensic split/merge.

use loquet_luks2_core::{af, hash};
use proptest::prelude::*;

proptest! {
    /// Splitting and merging is the identity for any key, stripe count,
    /// and registry hash.
    #[test]
    fn split_merge_roundtrip(
        key in proptest::collection::vec(any::<u8>(), 1..128),
        stripes in 1usize..32,
        hash_name in prop_oneof![
            Just("sha1"), Just("sha256"), Just("sha384"), Just("sha512")
        ],
    ) {
        let alg = hash::lookup(hash_name).expect("registry hash should resolve");
        let striped = af::split(alg, &key, stripes).expect("split should succeed");
        prop_assert_eq!(striped.len(), stripes * key.len());

        let merged = af::merge(alg, &striped, key.len(), stripes)
            .expect("merge should succeed");
        prop_assert_eq!(merged.expose(), &key[..]);
    }

    /// Corrupting any single stripe byte changes the merged key
    /// (with more than one stripe, every stripe matters).
    #[test]
    fn corrupted_stripe_changes_key(
        key in proptest::collection::vec(any::<u8>(), 8..64),
        stripes in 2usize..16,
        corrupt_at in any::<proptest::sample::Index>(),
    ) {
        let alg = hash::lookup("sha256").expect("sha256");
        let mut striped = af::split(alg, &key, stripes).expect("split should succeed");

        let index = corrupt_at.index(striped.len());
        striped[index] ^= 0x01;

        let merged = af::merge(alg, &striped, key.len(), stripes)
            .expect("merge should succeed");
        prop_assert_ne!(merged.expose(), &key[..]);
    }

    /// Merge never accepts material whose length disagrees with the
    /// declared geometry.
    #[test]
    fn merge_rejects_wrong_length(
        key_size in 1usize..64,
        stripes in 1usize..16,
        extra in 1usize..32,
    ) {
        let alg = hash::lookup("sha256").expect("sha256");
        let src = vec![0u8; stripes * key_size + extra];
        prop_assert!(af::merge(alg, &src, key_size, stripes).is_err());
    }
}
