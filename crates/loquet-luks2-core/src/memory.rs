//! Zeroizing byte buffer for key material.
//!
//! This module provides [`SecretBytes`], the container for everything that
//! must not outlive its use: passphrases, derived area keys, and recovered
//! master keys. The buffer is zeroized on drop and masks its contents in
//! `Debug` output.

use std::fmt;

use zeroize::{Zeroize, Zeroizing};

/// Byte buffer that zeroizes its contents on drop.
///
/// `Debug` output is masked (`SecretBytes(***)`) so key material cannot
/// leak through log formatting or panic messages.
pub struct SecretBytes {
    inner: Zeroizing<Vec<u8>>,
}

impl SecretBytes {
    /// Create a `SecretBytes` by copying `data`.
    ///
    /// The caller should zeroize the source after calling this.
    #[must_use]
    pub fn new(data: &[u8]) -> Self {
        Self {
            inner: Zeroizing::new(data.to_vec()),
        }
    }

    /// Take ownership of an existing buffer without copying.
    #[must_use]
    pub fn from_vec(data: Vec<u8>) -> Self {
        Self {
            inner: Zeroizing::new(data),
        }
    }

    /// Borrow the secret contents.
    #[must_use]
    pub fn expose(&self) -> &[u8] {
        &self.inner
    }

    /// Length of the secret in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// `true` if the secret is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl From<Vec<u8>> for SecretBytes {
    fn from(data: Vec<u8>) -> Self {
        Self::from_vec(data)
    }
}

impl Clone for SecretBytes {
    fn clone(&self) -> Self {
        Self::new(&self.inner)
    }
}

impl Drop for SecretBytes {
    fn drop(&mut self) {
        self.inner.zeroize();
    }
}

impl fmt::Debug for SecretBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretBytes(***)")
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_copies_data() {
        let secret = SecretBytes::new(b"master key material");
        assert_eq!(secret.expose(), b"master key material");
        assert_eq!(secret.len(), 19);
        assert!(!secret.is_empty());
    }

    #[test]
    fn from_vec_takes_ownership() {
        let secret = SecretBytes::from_vec(vec![0xAA; 64]);
        assert_eq!(secret.expose(), &[0xAA; 64]);
    }

    #[test]
    fn debug_output_is_masked() {
        let secret = SecretBytes::new(b"do not print me");
        assert_eq!(format!("{secret:?}"), "SecretBytes(***)");
    }

    #[test]
    fn empty_secret() {
        let secret = SecretBytes::new(&[]);
        assert!(secret.is_empty());
        assert_eq!(secret.len(), 0);
    }

    #[test]
    fn clone_preserves_contents() {
        let secret = SecretBytes::new(b"stripe");
        let copy = secret.clone();
        assert_eq!(copy.expose(), secret.expose());
    }
}
