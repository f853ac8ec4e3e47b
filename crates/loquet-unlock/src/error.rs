//! Unlock error types for `loquet-unlock`.

use loquet_luks2_core::Luks2Error;
use thiserror::Error;

/// Errors produced while driving a device unlock.
#[derive(Debug, Error)]
pub enum UnlockError {
    /// Header or metadata failure (delegated from the format core).
    #[error(transparent)]
    Format(#[from] Luks2Error),

    /// The cipher spec cannot be programmed (unknown cipher or mode,
    /// wrong key length, misaligned buffer).
    #[error("cipher error: {0}")]
    Cipher(String),

    /// The passphrase could not be obtained (reader failure, over-long
    /// input).
    #[error("passphrase error: {0}")]
    Passphrase(String),

    /// Every usable keyslot was tried and none opened.
    #[error("invalid passphrase")]
    InvalidPassphrase,

    /// I/O error from the source device or detached header.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
