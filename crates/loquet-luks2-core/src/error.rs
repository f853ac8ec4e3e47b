//! Error types for `loquet-luks2-core`.

use thiserror::Error;

/// Errors produced while reading, decoding, or verifying LUKS2 headers.
#[derive(Debug, Error)]
pub enum Luks2Error {
    /// The fixed binary header is not a LUKS2 header (bad magic, wrong
    /// version, or an impossible header size).
    #[error("bad signature: {0}")]
    BadSignature(String),

    /// The JSON metadata violates the LUKS2 schema (missing field, wrong
    /// type string, bad base64, out-of-range index).
    #[error("invalid metadata: {0}")]
    Metadata(String),

    /// A cross-reference could not be resolved (no digest for a keyslot,
    /// no segment for a digest) or a named hash is unknown.
    #[error("not found: {0}")]
    NotFound(String),

    /// The keyslot uses an Argon2 KDF, which this unlocker refuses.
    #[error("Argon2 not supported")]
    Argon2Unsupported,

    /// A candidate master key failed digest verification.
    #[error("digest mismatch")]
    DigestMismatch,

    /// I/O error while reading a header copy or the JSON area.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
