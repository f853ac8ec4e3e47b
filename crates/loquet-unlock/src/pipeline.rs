//! Per-keyslot crypto pipeline: passphrase in, candidate master key out.
//!
//! The chain is KDF → area-key decryption → anti-forensic merge:
//! the passphrase is stretched into the area key, the keyslot area is
//! read and XTS-decrypted over 512-byte sectors, and the striped material
//! collapses into the candidate key. Verification against the digest is
//! the caller's step.
//!
//! Argon2 slots are refused here, not at parse time: their metadata is
//! valid, this unlocker just will not run that KDF.

use loquet_luks2_core::{af, decode_base64, hash, Kdf, Keyslot, Luks2Error, SecretBytes};
use zeroize::Zeroizing;

use crate::cryptodisk::Cryptodisk;
use crate::device::Disk;
use crate::error::UnlockError;

/// Keyslot areas are ciphered over 512-byte sectors (log2).
const AREA_LOG_SECTOR_SIZE: u8 = 9;

/// Recover the candidate master key a keyslot wraps.
///
/// `disk` is wherever the keyslot area lives: the source device, or the
/// detached header file when one is in use.
///
/// # Errors
///
/// - [`UnlockError::Format`] with [`Luks2Error::Argon2Unsupported`] for
///   Argon2 slots.
/// - [`UnlockError::Format`] for bad salt base64, unknown hashes, or
///   inconsistent area geometry.
/// - [`UnlockError::Cipher`] if the area cipher cannot be programmed.
/// - [`UnlockError::Io`] if the area read fails.
pub fn decrypt_key(
    disk: &mut dyn Disk,
    keyslot: &Keyslot,
    passphrase: &[u8],
) -> Result<SecretBytes, UnlockError> {
    // Stretch the passphrase into the area key.
    let area_key = derive_area_key(keyslot, passphrase)?;

    // Program a scratch descriptor with the area cipher.
    let (cipher_name, cipher_mode) =
        keyslot.area.encryption.split_once('-').ok_or_else(|| {
            UnlockError::Cipher(format!(
                "malformed area cipher spec '{}'",
                keyslot.area.encryption
            ))
        })?;
    let mut scratch = Cryptodisk::new();
    scratch.set_cipher(cipher_name, cipher_mode)?;
    scratch.set_key(&area_key)?;

    // Read and decrypt the keyslot area in place.
    let area_size = usize::try_from(keyslot.area.size)
        .map_err(|_| Luks2Error::Metadata("keyslot area size out of range".into()))?;
    let mut split_key = Zeroizing::new(vec![0u8; area_size]);
    disk.read_at(keyslot.area.offset, &mut split_key)?;
    scratch.decrypt(&mut split_key, 0, AREA_LOG_SECTOR_SIZE)?;

    // Collapse the stripes into the candidate key.
    let af_alg = hash::lookup(&keyslot.af.hash)?;
    let striped_len = keyslot
        .af
        .stripes
        .checked_mul(keyslot.key_size)
        .ok_or_else(|| Luks2Error::Metadata("striped material size overflows".into()))?;
    if split_key.len() < striped_len {
        return Err(Luks2Error::Metadata(format!(
            "keyslot area holds {} bytes but the stripes need {striped_len}",
            split_key.len()
        ))
        .into());
    }

    let master = af::merge(
        af_alg,
        &split_key[..striped_len],
        keyslot.key_size,
        keyslot.af.stripes,
    )?;
    Ok(master)
}

/// Derive the area key from the passphrase, refusing Argon2 slots.
fn derive_area_key(
    keyslot: &Keyslot,
    passphrase: &[u8],
) -> Result<Zeroizing<Vec<u8>>, UnlockError> {
    match &keyslot.kdf {
        Kdf::Argon2(_) => Err(Luks2Error::Argon2Unsupported.into()),
        Kdf::Pbkdf2(params) => {
            let salt = decode_base64(&params.salt, "keyslot salt")?;
            let alg = hash::lookup(&params.hash)?;
            let mut area_key = Zeroizing::new(vec![0u8; keyslot.area.key_size]);
            alg.pbkdf2_derive(passphrase, &salt, params.iterations, &mut area_key)?;
            Ok(area_key)
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use data_encoding::BASE64;
    use loquet_luks2_core::{AfParams, Area, Argon2Params, Argon2Variant, Pbkdf2Params};
    use std::io::Cursor;

    use crate::device::FileDisk;

    const MASTER_KEY: [u8; 64] = [0x42; 64];
    const PASSPHRASE: &[u8] = b"test passphrase";
    const SALT: &[u8; 16] = b"0123456789abcdef";
    const STRIPES: usize = 4;
    const AREA_OFFSET: u64 = 4096;
    const AREA_SIZE: u64 = 512;
    const ITERATIONS: u32 = 1000;

    fn pbkdf2_keyslot() -> Keyslot {
        Keyslot {
            key_size: 64,
            priority: 1,
            area: Area {
                offset: AREA_OFFSET,
                size: AREA_SIZE,
                encryption: "aes-xts-plain64".into(),
                key_size: 64,
            },
            af: AfParams {
                stripes: STRIPES,
                hash: "sha256".into(),
            },
            kdf: Kdf::Pbkdf2(Pbkdf2Params {
                hash: "sha256".into(),
                iterations: ITERATIONS,
                salt: BASE64.encode(SALT),
            }),
        }
    }

    /// Build a device image whose keyslot area wraps `MASTER_KEY` under
    /// `PASSPHRASE`.
    fn build_area_image(keyslot: &Keyslot) -> Vec<u8> {
        let alg = hash::lookup("sha256").expect("sha256");

        let striped = af::split(alg, &MASTER_KEY, STRIPES).expect("split should succeed");
        let mut area = vec![0u8; AREA_SIZE as usize];
        area[..striped.len()].copy_from_slice(&striped);

        let mut area_key = vec![0u8; keyslot.area.key_size];
        alg.pbkdf2_derive(PASSPHRASE, SALT, ITERATIONS, &mut area_key)
            .expect("derive should succeed");

        let mut scratch = Cryptodisk::new();
        scratch.set_cipher("aes", "xts-plain64").expect("set_cipher");
        scratch.set_key(&area_key).expect("set_key");
        scratch
            .encrypt(&mut area, 0, AREA_LOG_SECTOR_SIZE)
            .expect("encrypt should succeed");

        let mut image = vec![0u8; (AREA_OFFSET + AREA_SIZE) as usize];
        image[AREA_OFFSET as usize..].copy_from_slice(&area);
        image
    }

    #[test]
    fn recovers_master_key_with_correct_passphrase() {
        let keyslot = pbkdf2_keyslot();
        let image = build_area_image(&keyslot);
        let mut disk = FileDisk::new(Cursor::new(image), "ram0");

        let candidate =
            decrypt_key(&mut disk, &keyslot, PASSPHRASE).expect("decrypt should succeed");
        assert_eq!(candidate.expose(), &MASTER_KEY);
    }

    #[test]
    fn wrong_passphrase_yields_garbage_not_error() {
        // A wrong passphrase decrypts the area to noise; the mismatch is
        // only caught by digest verification downstream.
        let keyslot = pbkdf2_keyslot();
        let image = build_area_image(&keyslot);
        let mut disk = FileDisk::new(Cursor::new(image), "ram0");

        let candidate =
            decrypt_key(&mut disk, &keyslot, b"wrong").expect("decrypt should succeed");
        assert_ne!(candidate.expose(), &MASTER_KEY);
    }

    #[test]
    fn argon2_slot_is_refused() {
        let mut keyslot = pbkdf2_keyslot();
        keyslot.kdf = Kdf::Argon2(Argon2Params {
            variant: Argon2Variant::Argon2id,
            time: 4,
            memory: 1_048_576,
            cpus: 4,
            salt: BASE64.encode(SALT),
        });
        let image = build_area_image(&pbkdf2_keyslot());
        let mut disk = FileDisk::new(Cursor::new(image), "ram0");

        let err = decrypt_key(&mut disk, &keyslot, PASSPHRASE)
            .expect_err("argon2 slot should be refused");
        assert!(matches!(
            err,
            UnlockError::Format(Luks2Error::Argon2Unsupported)
        ));
        assert_eq!(err.to_string(), "Argon2 not supported");
    }

    #[test]
    fn bad_salt_base64_fails() {
        let mut keyslot = pbkdf2_keyslot();
        keyslot.kdf = Kdf::Pbkdf2(Pbkdf2Params {
            hash: "sha256".into(),
            iterations: ITERATIONS,
            salt: "*** not base64 ***".into(),
        });
        let image = build_area_image(&pbkdf2_keyslot());
        let mut disk = FileDisk::new(Cursor::new(image), "ram0");

        let err = decrypt_key(&mut disk, &keyslot, PASSPHRASE)
            .expect_err("bad salt should fail");
        assert!(matches!(err, UnlockError::Format(Luks2Error::Metadata(_))));
    }

    #[test]
    fn unknown_kdf_hash_fails() {
        let mut keyslot = pbkdf2_keyslot();
        keyslot.kdf = Kdf::Pbkdf2(Pbkdf2Params {
            hash: "md5".into(),
            iterations: ITERATIONS,
            salt: BASE64.encode(SALT),
        });
        let image = build_area_image(&pbkdf2_keyslot());
        let mut disk = FileDisk::new(Cursor::new(image), "ram0");

        let err = decrypt_key(&mut disk, &keyslot, PASSPHRASE)
            .expect_err("unknown hash should fail");
        assert!(matches!(err, UnlockError::Format(Luks2Error::NotFound(_))));
    }

    #[test]
    fn area_too_small_for_stripes_fails() {
        let mut keyslot = pbkdf2_keyslot();
        keyslot.af.stripes = 4000; // needs 256000 bytes, area holds 512
        let image = build_area_image(&pbkdf2_keyslot());
        let mut disk = FileDisk::new(Cursor::new(image), "ram0");

        let err = decrypt_key(&mut disk, &keyslot, PASSPHRASE)
            .expect_err("undersized area should fail");
        assert!(matches!(err, UnlockError::Format(Luks2Error::Metadata(_))));
    }

    #[test]
    fn unreadable_area_fails_with_io() {
        let keyslot = pbkdf2_keyslot();
        // Image too small to contain the keyslot area.
        let mut disk = FileDisk::new(Cursor::new(vec![0u8; 64]), "ram0");

        let err = decrypt_key(&mut disk, &keyslot, PASSPHRASE)
            .expect_err("short device should fail");
        assert!(matches!(err, UnlockError::Io(_)));
    }

    #[test]
    fn malformed_area_cipher_spec_fails() {
        let mut keyslot = pbkdf2_keyslot();
        keyslot.area.encryption = "aes".into(); // no mode part
        let image = build_area_image(&pbkdf2_keyslot());
        let mut disk = FileDisk::new(Cursor::new(image), "ram0");

        let err = decrypt_key(&mut disk, &keyslot, PASSPHRASE)
            .expect_err("malformed cipher spec should fail");
        assert!(matches!(err, UnlockError::Cipher(_)));
    }
}
