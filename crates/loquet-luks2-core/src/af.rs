//! Anti-forensic stripe handling (LUKS1 AF, reused by LUKS2 keyslots).
//!
//! This module provides:
//! - [`merge`] — recompact a key from `stripes * key_size` bytes of
//!   striped material (the unlock direction)
//! - [`split`] — expand a key into striped material (used when building
//!   keyslot areas, and by the round-trip tests)
//!
//! The stripe chain XORs each stripe into an accumulator and runs a
//! hash-based diffuser between stripes; only the final stripe is XORed
//! without diffusion. Destroying any single stripe on worn storage makes
//! the key unrecoverable, which is the point.

use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroizing;

use crate::error::Luks2Error;
use crate::hash::HashAlg;
use crate::memory::SecretBytes;

/// Reverse the anti-forensic split: fold `stripes` stripes of `key_size`
/// bytes back into the original key.
///
/// `src` must be exactly `stripes * key_size` bytes.
///
/// # Errors
///
/// Returns [`Luks2Error::Metadata`] if `stripes` or `key_size` is zero,
/// if `stripes * key_size` overflows, or if `src` has the wrong length.
pub fn merge(
    hash: &HashAlg,
    src: &[u8],
    key_size: usize,
    stripes: usize,
) -> Result<SecretBytes, Luks2Error> {
    let total = checked_area(key_size, stripes)?;
    if src.len() != total {
        return Err(Luks2Error::Metadata(format!(
            "striped material is {} bytes (expected {total})",
            src.len()
        )));
    }

    let last = stripes.saturating_sub(1);
    let mut acc = Zeroizing::new(vec![0u8; key_size]);
    for (index, stripe) in src.chunks_exact(key_size).enumerate() {
        xor_into(&mut acc, stripe);
        if index < last {
            diffuse(hash, &mut acc)?;
        }
    }

    Ok(SecretBytes::new(&acc))
}

/// Expand `key` into `stripes * key.len()` bytes of striped material that
/// [`merge`] collapses back to `key`.
///
/// All stripes but the last are random; the last is chosen so the merge
/// chain lands on `key`.
///
/// # Errors
///
/// Returns [`Luks2Error::Metadata`] if `stripes` or the key length is zero
/// or if the area size overflows.
pub fn split(hash: &HashAlg, key: &[u8], stripes: usize) -> Result<Vec<u8>, Luks2Error> {
    let key_size = key.len();
    let total = checked_area(key_size, stripes)?;

    let mut out = vec![0u8; total];
    let last = stripes.saturating_sub(1);
    let mut acc = Zeroizing::new(vec![0u8; key_size]);

    for (index, stripe) in out.chunks_exact_mut(key_size).enumerate() {
        if index < last {
            OsRng.fill_bytes(stripe);
            xor_into(&mut acc, stripe);
            diffuse(hash, &mut acc)?;
        } else {
            for (dst, (&a, &k)) in stripe.iter_mut().zip(acc.iter().zip(key)) {
                *dst = a ^ k;
            }
        }
    }

    Ok(out)
}

/// Validate stripe geometry and return `stripes * key_size`.
fn checked_area(key_size: usize, stripes: usize) -> Result<usize, Luks2Error> {
    if stripes == 0 {
        return Err(Luks2Error::Metadata("stripe count is zero".into()));
    }
    if key_size == 0 {
        return Err(Luks2Error::Metadata("key size is zero".into()));
    }
    stripes.checked_mul(key_size).ok_or_else(|| {
        Luks2Error::Metadata(format!(
            "anti-forensic area size overflows: {stripes} stripes of {key_size} bytes"
        ))
    })
}

/// One diffusion round: each `digest_len` chunk of `block` is replaced by
/// `hash(be32(chunk_index) || chunk)` truncated to the chunk length.
fn diffuse(hash: &HashAlg, block: &mut [u8]) -> Result<(), Luks2Error> {
    for (index, chunk) in block.chunks_mut(hash.digest_len()).enumerate() {
        let counter = u32::try_from(index)
            .map_err(|_| Luks2Error::Metadata("diffusion block index overflows".into()))?;
        let digest = hash.digest(&[&counter.to_be_bytes(), chunk]);
        let len = chunk.len();
        chunk.copy_from_slice(&digest[..len]);
    }
    Ok(())
}

/// XOR `src` into `acc` byte-wise.
fn xor_into(acc: &mut [u8], src: &[u8]) {
    for (a, b) in acc.iter_mut().zip(src) {
        *a ^= b;
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash;

    #[test]
    fn single_stripe_is_identity() {
        let alg = hash::lookup("sha256").expect("sha256");
        let key = [0x5Au8; 32];
        let merged = merge(alg, &key, 32, 1).expect("merge should succeed");
        assert_eq!(merged.expose(), &key);
    }

    #[test]
    fn split_then_merge_recovers_key() {
        let alg = hash::lookup("sha256").expect("sha256");
        let key: Vec<u8> = (0u8..64).collect();

        let striped = split(alg, &key, 4).expect("split should succeed");
        assert_eq!(striped.len(), 4 * 64);

        let merged = merge(alg, &striped, 64, 4).expect("merge should succeed");
        assert_eq!(merged.expose(), &key[..]);
    }

    #[test]
    fn split_is_randomized_but_stable_under_merge() {
        let alg = hash::lookup("sha1").expect("sha1");
        let key = [0xC3u8; 32];

        let a = split(alg, &key, 8).expect("split should succeed");
        let b = split(alg, &key, 8).expect("split should succeed");
        assert_ne!(a, b, "stripes should be random");

        assert_eq!(merge(alg, &a, 32, 8).expect("merge a").expose(), &key);
        assert_eq!(merge(alg, &b, 32, 8).expect("merge b").expose(), &key);
    }

    // Two all-zero stripes make the merge result equal one diffusion round
    // over a zero block, pinning down the be32 counter convention.
    #[test]
    fn diffusion_uses_be32_chunk_counters() {
        let alg = hash::lookup("sha256").expect("sha256");

        let src = [0u8; 64];
        let merged = merge(alg, &src, 32, 2).expect("merge should succeed");
        let expected = alg.digest(&[&0u32.to_be_bytes(), &[0u8; 32]]);
        assert_eq!(merged.expose(), &expected[..]);

        // A 64-byte key spans two sha256 chunks, counters 0 and 1.
        let src_wide = [0u8; 128];
        let merged_wide = merge(alg, &src_wide, 64, 2).expect("merge should succeed");
        let mut expected_wide = alg.digest(&[&0u32.to_be_bytes(), &[0u8; 32]]);
        expected_wide.extend(alg.digest(&[&1u32.to_be_bytes(), &[0u8; 32]]));
        assert_eq!(merged_wide.expose(), &expected_wide[..]);
    }

    #[test]
    fn merge_rejects_zero_stripes() {
        let alg = hash::lookup("sha256").expect("sha256");
        let err = merge(alg, &[], 32, 0).expect_err("zero stripes should fail");
        assert!(matches!(err, Luks2Error::Metadata(_)));
    }

    #[test]
    fn merge_rejects_zero_key_size() {
        let alg = hash::lookup("sha256").expect("sha256");
        let err = merge(alg, &[], 0, 4).expect_err("zero key size should fail");
        assert!(matches!(err, Luks2Error::Metadata(_)));
    }

    #[test]
    fn merge_rejects_wrong_source_length() {
        let alg = hash::lookup("sha256").expect("sha256");
        let err = merge(alg, &[0u8; 100], 32, 4).expect_err("length mismatch should fail");
        assert!(
            matches!(err, Luks2Error::Metadata(ref msg) if msg.contains("128")),
            "error should name the expected length, got: {err}"
        );
    }

    #[test]
    fn merge_rejects_area_size_overflow() {
        let alg = hash::lookup("sha256").expect("sha256");
        let err = merge(alg, &[], usize::MAX, 2).expect_err("overflow should fail");
        assert!(
            matches!(err, Luks2Error::Metadata(ref msg) if msg.contains("overflows")),
            "expected overflow error, got: {err}"
        );
    }

    #[test]
    fn split_rejects_empty_key() {
        let alg = hash::lookup("sha256").expect("sha256");
        let err = split(alg, &[], 4).expect_err("empty key should fail");
        assert!(matches!(err, Luks2Error::Metadata(_)));
    }
}
