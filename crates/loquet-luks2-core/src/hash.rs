//! Named hash registry — digest and PBKDF2 primitives for the unlock path.
//!
//! LUKS2 metadata names hashes as strings (`af.hash`, `kdf.hash`,
//! `digest.hash`). This module resolves those names to a [`HashAlg`] that
//! bundles the digest used by anti-forensic diffusion with the matching
//! PBKDF2 algorithm. Verification goes through `ring`'s constant-time
//! `pbkdf2::verify`.

use std::num::NonZeroU32;

use ring::{digest, pbkdf2};

use crate::error::Luks2Error;

/// A named hash with its digest and PBKDF2 algorithms.
pub struct HashAlg {
    name: &'static str,
    digest_len: usize,
    digest: &'static digest::Algorithm,
    pbkdf2: &'static pbkdf2::Algorithm,
}

impl std::fmt::Debug for HashAlg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HashAlg")
            .field("name", &self.name)
            .field("digest_len", &self.digest_len)
            .finish()
    }
}

/// Hashes a LUKS2 header can name. SHA-1 appears only in legacy headers
/// but remains part of the format.
static HASHES: [HashAlg; 4] = [
    HashAlg {
        name: "sha1",
        digest_len: 20,
        digest: &digest::SHA1_FOR_LEGACY_USE_ONLY,
        pbkdf2: &pbkdf2::PBKDF2_HMAC_SHA1,
    },
    HashAlg {
        name: "sha256",
        digest_len: 32,
        digest: &digest::SHA256,
        pbkdf2: &pbkdf2::PBKDF2_HMAC_SHA256,
    },
    HashAlg {
        name: "sha384",
        digest_len: 48,
        digest: &digest::SHA384,
        pbkdf2: &pbkdf2::PBKDF2_HMAC_SHA384,
    },
    HashAlg {
        name: "sha512",
        digest_len: 64,
        digest: &digest::SHA512,
        pbkdf2: &pbkdf2::PBKDF2_HMAC_SHA512,
    },
];

/// Resolve a hash by its metadata name (case-insensitive).
///
/// # Errors
///
/// Returns [`Luks2Error::NotFound`] for names outside the registry.
pub fn lookup(name: &str) -> Result<&'static HashAlg, Luks2Error> {
    HASHES
        .iter()
        .find(|alg| alg.name.eq_ignore_ascii_case(name))
        .ok_or_else(|| Luks2Error::NotFound(format!("hash '{name}'")))
}

impl HashAlg {
    /// Canonical (lowercase) name of this hash.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Digest output length in bytes.
    #[must_use]
    pub const fn digest_len(&self) -> usize {
        self.digest_len
    }

    /// Hash the concatenation of `parts` in one pass.
    #[must_use]
    pub fn digest(&self, parts: &[&[u8]]) -> Vec<u8> {
        let mut ctx = digest::Context::new(self.digest);
        for part in parts {
            ctx.update(part);
        }
        ctx.finish().as_ref().to_vec()
    }

    /// Derive `out.len()` bytes with PBKDF2-HMAC over this hash.
    ///
    /// # Errors
    ///
    /// Returns [`Luks2Error::Metadata`] if `iterations` is zero.
    pub fn pbkdf2_derive(
        &self,
        password: &[u8],
        salt: &[u8],
        iterations: u32,
        out: &mut [u8],
    ) -> Result<(), Luks2Error> {
        let iterations = NonZeroU32::new(iterations)
            .ok_or_else(|| Luks2Error::Metadata("PBKDF2 iteration count is zero".into()))?;
        pbkdf2::derive(*self.pbkdf2, iterations, salt, password, out);
        Ok(())
    }

    /// Verify `expected` against PBKDF2 of `password` in constant time.
    ///
    /// # Errors
    ///
    /// Returns [`Luks2Error::Metadata`] if `iterations` is zero and
    /// [`Luks2Error::DigestMismatch`] if the derivation does not match.
    pub fn pbkdf2_verify(
        &self,
        password: &[u8],
        salt: &[u8],
        iterations: u32,
        expected: &[u8],
    ) -> Result<(), Luks2Error> {
        let iterations = NonZeroU32::new(iterations)
            .ok_or_else(|| Luks2Error::Metadata("PBKDF2 iteration count is zero".into()))?;
        pbkdf2::verify(*self.pbkdf2, iterations, salt, password, expected)
            .map_err(|_| Luks2Error::DigestMismatch)
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
