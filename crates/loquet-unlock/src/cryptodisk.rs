//! Downstream decrypting block-device descriptor.
//!
//! This module provides [`Cryptodisk`], the descriptor the unlock driver
//! programs once a master key is recovered: `set_cipher` then `set_key`,
//! after which [`Cryptodisk::decrypt`] turns payload sectors into
//! plaintext. The forward direction ([`Cryptodisk::encrypt`]) exists for
//! building keyslot areas and round-trip tests.
//!
//! Supported ciphers: `aes` in `xts-plain64` or `xts-plain` mode, with
//! 32- or 64-byte XTS key material (AES-128 / AES-256 halves). The
//! keyslot-area and payload ciphers LUKS2 produces by default are both
//! covered; anything else is a cipher error.

use aes::cipher::KeyInit;
use aes::{Aes128, Aes256};
use xts_mode::{get_tweak_default, Xts128};

use crate::error::UnlockError;

/// IV generation mode for sector tweaks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum IvMode {
    /// 32-bit sector number, little-endian, zero-extended.
    Plain,
    /// 64-bit sector number, little-endian.
    Plain64,
}

/// A programmed XTS cipher, keyed by key-material length.
enum XtsCipher {
    /// 32 bytes of key material: AES-128 data/tweak halves.
    Aes128(Box<Xts128<Aes128>>),
    /// 64 bytes of key material: AES-256 data/tweak halves.
    Aes256(Box<Xts128<Aes256>>),
}

/// The downstream decrypting device descriptor.
///
/// Geometry fields are filled in by the unlock driver; the cipher state
/// is programmed with [`Cryptodisk::set_cipher`] followed by
/// [`Cryptodisk::set_key`].
#[derive(Default)]
pub struct Cryptodisk {
    /// UUID of the unlocked volume.
    pub uuid: String,
    /// Name of the backend that configured this descriptor.
    pub modname: &'static str,
    /// Payload start, in payload sectors.
    pub offset_sectors: u64,
    /// Base-2 logarithm of the payload sector size.
    pub log_sector_size: u8,
    /// Payload length, in payload sectors.
    pub total_sectors: u64,
    iv: Option<IvMode>,
    cipher: Option<XtsCipher>,
}

impl Cryptodisk {
    /// Fresh descriptor with no cipher programmed.
    #[must_use]
    pub fn new() -> Self {
        Self {
            uuid: String::new(),
            modname: "",
            offset_sectors: 0,
            log_sector_size: 0,
            total_sectors: 0,
            iv: None,
            cipher: None,
        }
    }

    /// Program the cipher and mode, e.g. `("aes", "xts-plain64")`.
    ///
    /// Clears any previously programmed key.
    ///
    /// # Errors
    ///
    /// Returns [`UnlockError::Cipher`] for anything but `aes` with an
    /// `xts-plain64` or `xts-plain` mode.
    pub fn set_cipher(&mut self, name: &str, mode: &str) -> Result<(), UnlockError> {
        if name != "aes" {
            return Err(UnlockError::Cipher(format!("unsupported cipher '{name}'")));
        }

        let (mode_name, iv_name) = mode
            .split_once('-')
            .ok_or_else(|| UnlockError::Cipher(format!("malformed cipher mode '{mode}'")))?;
        if mode_name != "xts" {
            return Err(UnlockError::Cipher(format!(
                "unsupported cipher mode '{mode_name}'"
            )));
        }

        let iv = match iv_name {
            "plain64" => IvMode::Plain64,
            "plain" => IvMode::Plain,
            other => {
                return Err(UnlockError::Cipher(format!("unsupported IV mode '{other}'")));
            }
        };

        self.iv = Some(iv);
        self.cipher = None;
        Ok(())
    }

    /// Program the key. [`Cryptodisk::set_cipher`] must have been called.
    ///
    /// XTS splits the material into data and tweak halves: 32 bytes give
    /// AES-128, 64 bytes AES-256.
    ///
    /// # Errors
    ///
    /// Returns [`UnlockError::Cipher`] if no cipher is programmed or the
    /// key length fits neither AES variant.
    pub fn set_key(&mut self, key: &[u8]) -> Result<(), UnlockError> {
        if self.iv.is_none() {
            return Err(UnlockError::Cipher(
                "set_cipher must precede set_key".into(),
            ));
        }

        let cipher = match key.len() {
            32 => XtsCipher::Aes128(Box::new(Xts128::new(
                aes_from_slice::<Aes128>(&key[..16])?,
                aes_from_slice::<Aes128>(&key[16..])?,
            ))),
            64 => XtsCipher::Aes256(Box::new(Xts128::new(
                aes_from_slice::<Aes256>(&key[..32])?,
                aes_from_slice::<Aes256>(&key[32..])?,
            ))),
            other => {
                return Err(UnlockError::Cipher(format!(
                    "unsupported XTS key length {other} bytes"
                )));
            }
        };

        self.cipher = Some(cipher);
        Ok(())
    }

    /// Decrypt `buf` in place as whole sectors starting at `start_sector`.
    ///
    /// # Errors
    ///
    /// Returns [`UnlockError::Cipher`] if no key is programmed or `buf`
    /// is not a whole number of sectors.
    pub fn decrypt(
        &self,
        buf: &mut [u8],
        start_sector: u64,
        log_sector_size: u8,
    ) -> Result<(), UnlockError> {
        self.process(buf, start_sector, log_sector_size, Direction::Decrypt)
    }

    /// Encrypt `buf` in place as whole sectors starting at `start_sector`.
    ///
    /// # Errors
    ///
    /// Returns [`UnlockError::Cipher`] if no key is programmed or `buf`
    /// is not a whole number of sectors.
    pub fn encrypt(
        &self,
        buf: &mut [u8],
        start_sector: u64,
        log_sector_size: u8,
    ) -> Result<(), UnlockError> {
        self.process(buf, start_sector, log_sector_size, Direction::Encrypt)
    }

    fn process(
        &self,
        buf: &mut [u8],
        start_sector: u64,
        log_sector_size: u8,
        direction: Direction,
    ) -> Result<(), UnlockError> {
        let iv = self
            .iv
            .ok_or_else(|| UnlockError::Cipher("no cipher programmed".into()))?;
        let cipher = self
            .cipher
            .as_ref()
            .ok_or_else(|| UnlockError::Cipher("no key programmed".into()))?;

        let sector_size = 1usize
            .checked_shl(u32::from(log_sector_size))
            .ok_or_else(|| {
                UnlockError::Cipher(format!("sector size log {log_sector_size} out of range"))
            })?;
        let misaligned = buf
            .len()
            .checked_rem(sector_size)
            .map_or(true, |rem| rem != 0);
        if buf.is_empty() || misaligned {
            return Err(UnlockError::Cipher(format!(
                "buffer of {} bytes is not a whole number of {sector_size}-byte sectors",
                buf.len()
            )));
        }

        let first = u128::from(start_sector);
        let tweak = move |sector: u128| sector_tweak(iv, sector);
        match (cipher, direction) {
            (XtsCipher::Aes128(xts), Direction::Decrypt) => {
                xts.decrypt_area(buf, sector_size, first, tweak);
            }
            (XtsCipher::Aes128(xts), Direction::Encrypt) => {
                xts.encrypt_area(buf, sector_size, first, tweak);
            }
            (XtsCipher::Aes256(xts), Direction::Decrypt) => {
                xts.decrypt_area(buf, sector_size, first, tweak);
            }
            (XtsCipher::Aes256(xts), Direction::Encrypt) => {
                xts.encrypt_area(buf, sector_size, first, tweak);
            }
        }
        Ok(())
    }
}

#[derive(Clone, Copy)]
enum Direction {
    Decrypt,
    Encrypt,
}

/// Build an AES block cipher from a key slice of the right length.
fn aes_from_slice<C: KeyInit>(key: &[u8]) -> Result<C, UnlockError> {
    C::new_from_slice(key)
        .map_err(|_| UnlockError::Cipher(format!("invalid AES key length {}", key.len())))
}

/// Sector-number tweak for the programmed IV mode.
fn sector_tweak(iv: IvMode, sector: u128) -> [u8; 16] {
    match iv {
        IvMode::Plain64 => get_tweak_default(sector),
        IvMode::Plain => {
            // Low 32 bits of the sector number, little-endian, zero-extended.
            let bytes = sector.to_le_bytes();
            let mut tweak = [0u8; 16];
            tweak[..4].copy_from_slice(&bytes[..4]);
            tweak
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
