//! Unlock driver — scan, keyslot enumeration, descriptor programming.
//!
//! This module provides:
//! - [`scan`] — silent probe: is this a LUKS2 device (optionally with a
//!   given UUID)?
//! - [`recover_key`] — the full unlock: read the header and metadata,
//!   resolve a passphrase, try every usable keyslot, verify the recovered
//!   key, and program the downstream descriptor
//!
//! The keyslot loop is deliberately tolerant: any parse, resolution,
//! derivation, or verification failure moves on to the next slot, so a
//! header carrying keyslot kinds this unlocker cannot use (an Argon2 slot,
//! a future type) never blocks the slots it can. Only when every slot is
//! exhausted does the driver report an invalid passphrase. Per-slot
//! breadcrumbs go to the `luks2` debug target.

use loquet_luks2_core::header::{self, HeaderCopy, Luks2Header, HEADER_SIZE};
use loquet_luks2_core::metadata::{Metadata, Segment, SegmentSize};
use loquet_luks2_core::{resolve, Luks2Error, SecretBytes};
use tracing::{debug, info};

use crate::cryptodisk::Cryptodisk;
use crate::device::Disk;
use crate::error::UnlockError;
use crate::pipeline;

/// Longest accepted passphrase in bytes.
pub const MAX_PASSPHRASE_LEN: usize = 256;

/// Backend name written into the descriptor's `modname`.
pub const MODULE_NAME: &str = "luks2";

/// Source of interactively-entered passphrases.
///
/// The driver formats the prompt (device name, partition, UUID) and calls
/// [`PassphraseReader::read_passphrase`] once per unlock attempt. Key-file
/// unlocks never consult the reader.
pub trait PassphraseReader {
    /// Read a passphrase, without echo, after showing `prompt`.
    ///
    /// # Errors
    ///
    /// Implementations return [`UnlockError::Passphrase`] when no
    /// passphrase can be obtained.
    fn read_passphrase(&mut self, prompt: &str) -> Result<SecretBytes, UnlockError>;
}

/// Probe options for [`scan`].
#[derive(Clone, Copy, Debug, Default)]
pub struct ScanOptions<'a> {
    /// Only match a device with this UUID (case-insensitive).
    pub check_uuid: Option<&'a str>,
    /// Probe for boot-mode unlock, which this backend refuses.
    pub check_boot: bool,
}

/// Probe `disk` for a LUKS2 header.
///
/// This is the quiet path: every failure — not a LUKS2 device, corrupt
/// copies, UUID mismatch — is "no match", never an error. Boot-mode
/// probes always miss because boot-variant unlock is unsupported.
pub fn scan(disk: &mut dyn Disk, options: &ScanOptions) -> Option<Luks2Header> {
    if options.check_boot {
        debug!(target: "luks2", "boot-mode unlock is not supported");
        return None;
    }

    let header = match read_disk_header(disk) {
        Ok(header) => header,
        Err(error) => {
            debug!(target: "luks2", %error, "not a LUKS2 device");
            return None;
        }
    };

    if let Some(expected) = options.check_uuid {
        if !header.matches_uuid(expected) {
            debug!(target: "luks2", expected, found = %header.uuid, "UUID mismatch");
            return None;
        }
    }

    Some(header)
}

// Where header structures live: the detached header if present, else the
// source device itself. A macro (rather than a generic function) because
// unifying the `source` and `detached` borrows behind one lifetime
// parameter forces them to share a borrow region for the whole call,
// which the borrow checker cannot then re-shrink per call site.
macro_rules! header_disk {
    ($source:expr, $detached:expr) => {
        match $detached.as_mut() {
            Some(disk) => &mut **disk as &mut dyn Disk,
            None => &mut *$source as &mut dyn Disk,
        }
    };
}

/// Unlock the volume on `source` and program `descriptor` with the master
/// key and segment geometry. Returns the id of the keyslot that opened.
///
/// When `detached_header` is given, the header, metadata, and keyslot
/// areas are read from it; `source` still provides the payload geometry.
/// A `key_file` is used verbatim as the passphrase (embedded NUL bytes
/// and all); otherwise `passphrase_reader` is consulted once.
///
/// # Errors
///
/// - [`UnlockError::Format`] for an unreadable header or metadata.
/// - [`UnlockError::Passphrase`] if the reader fails or the passphrase
///   exceeds [`MAX_PASSPHRASE_LEN`].
/// - [`UnlockError::InvalidPassphrase`] when every usable keyslot was
///   tried and none opened.
/// - [`UnlockError::Cipher`] if the segment cipher cannot be programmed
///   after a successful unlock.
pub fn recover_key(
    source: &mut dyn Disk,
    mut detached_header: Option<&mut dyn Disk>,
    key_file: Option<&[u8]>,
    passphrase_reader: &mut dyn PassphraseReader,
    descriptor: &mut Cryptodisk,
) -> Result<u64, UnlockError> {
    let header = {
        let disk = header_disk!(source, detached_header);
        read_disk_header(disk)?
    };
    debug!(
        target: "luks2",
        uuid = %header.uuid,
        seqid = header.seqid,
        copy = ?header.copy,
        "selected header"
    );

    let metadata = {
        let disk = header_disk!(source, detached_header);
        read_json_area(disk, &header)?
    };

    let passphrase = match key_file {
        Some(bytes) => SecretBytes::new(bytes),
        None => {
            let prompt = prompt_for(&*source, &header);
            let passphrase = passphrase_reader.read_passphrase(&prompt)?;
            if passphrase.len() > MAX_PASSPHRASE_LEN {
                return Err(UnlockError::Passphrase(format!(
                    "passphrase exceeds {MAX_PASSPHRASE_LEN} bytes"
                )));
            }
            passphrase
        }
    };

    let slot_count = metadata.keyslot_count();
    debug!(target: "luks2", slot_count, "trying keyslots");

    for index in 0..slot_count {
        let bound = match resolve::bind(&metadata, index) {
            Ok(bound) => bound,
            Err(error) => {
                debug!(target: "luks2", index, %error, "skipping unusable keyslot entry");
                continue;
            }
        };

        if bound.keyslot.priority == 0 {
            debug!(target: "luks2", slot = bound.keyslot_id, "skipping ignored keyslot");
            continue;
        }

        let geometry = match segment_geometry(&mut *source, &bound.segment) {
            Ok(geometry) => geometry,
            Err(error) => {
                debug!(
                    target: "luks2",
                    slot = bound.keyslot_id,
                    %error,
                    "skipping keyslot with unusable segment geometry"
                );
                continue;
            }
        };

        let candidate = {
            let disk = header_disk!(source, detached_header);
            match pipeline::decrypt_key(disk, &bound.keyslot, passphrase.expose()) {
                Ok(candidate) => candidate,
                Err(error) => {
                    debug!(
                        target: "luks2",
                        slot = bound.keyslot_id,
                        %error,
                        "keyslot decryption failed"
                    );
                    continue;
                }
            }
        };

        if let Err(error) = bound.digest.verify(candidate.expose()) {
            debug!(
                target: "luks2",
                slot = bound.keyslot_id,
                %error,
                "digest rejected candidate key"
            );
            continue;
        }

        info!(target: "luks2", "slot {} opened", bound.keyslot_id);

        let (cipher_name, cipher_mode) =
            bound.segment.encryption.split_once('-').ok_or_else(|| {
                UnlockError::Cipher(format!(
                    "malformed segment cipher spec '{}'",
                    bound.segment.encryption
                ))
            })?;
        descriptor.set_cipher(cipher_name, cipher_mode)?;
        descriptor.set_key(candidate.expose())?;
        descriptor.uuid = header.uuid.clone();
        descriptor.modname = MODULE_NAME;
        descriptor.offset_sectors = geometry.offset_sectors;
        descriptor.log_sector_size = geometry.log_sector_size;
        descriptor.total_sectors = geometry.total_sectors;

        return Ok(bound.keyslot_id);
    }

    Err(UnlockError::InvalidPassphrase)
}

// ---------------------------------------------------------------------------
// Header and metadata reading
// ---------------------------------------------------------------------------

/// Read both header copies from `disk` and return the authoritative one.
///
/// # Errors
///
/// Returns [`UnlockError::Format`] if either copy fails to decode and
/// [`UnlockError::Io`] if a read fails.
pub fn read_disk_header(disk: &mut dyn Disk) -> Result<Luks2Header, UnlockError> {
    let mut buf = [0u8; HEADER_SIZE];

    disk.read_at(0, &mut buf)?;
    let primary = Luks2Header::parse(&buf, HeaderCopy::Primary)?;

    disk.read_at(primary.hdr_size, &mut buf)?;
    let mut secondary = Luks2Header::parse(&buf, HeaderCopy::Secondary)?;
    secondary.hdr_offset = primary.hdr_size;

    Ok(header::select(primary, secondary))
}

/// Read and parse the JSON area that follows `header`'s fixed part.
///
/// The area is `hdr_size - 4096` bytes and must contain a NUL terminator;
/// only the bytes before the NUL are parsed.
fn read_json_area(disk: &mut dyn Disk, header: &Luks2Header) -> Result<Metadata, UnlockError> {
    let json_len = usize::try_from(header.json_len())
        .map_err(|_| Luks2Error::Metadata("JSON area size out of range".into()))?;
    let json_offset = header
        .hdr_offset
        .checked_add(HEADER_SIZE as u64)
        .ok_or_else(|| Luks2Error::Metadata("JSON area offset overflows".into()))?;

    let mut json = vec![0u8; json_len];
    disk.read_at(json_offset, &mut json)?;

    let nul = json
        .iter()
        .position(|&byte| byte == 0)
        .ok_or_else(|| Luks2Error::Metadata("JSON metadata is not NUL-terminated".into()))?;

    Ok(Metadata::parse(&json[..nul])?)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Format the interactive passphrase prompt.
fn prompt_for(source: &dyn Disk, header: &Luks2Header) -> String {
    let partition = source
        .partition()
        .map(|name| format!(",{name}"))
        .unwrap_or_default();
    format!(
        "Enter passphrase for {}{partition} ({}): ",
        source.name(),
        header.uuid
    )
}

/// Sector geometry the descriptor is programmed with on success.
#[derive(Debug)]
struct SegmentGeometry {
    offset_sectors: u64,
    log_sector_size: u8,
    total_sectors: u64,
}

/// Translate a segment's byte geometry into descriptor sectors.
fn segment_geometry(
    source: &mut dyn Disk,
    segment: &Segment,
) -> Result<SegmentGeometry, UnlockError> {
    let log_sector_size = segment.log_sector_size()?;
    let offset_sectors = segment
        .offset
        .checked_div(segment.sector_size)
        .ok_or_else(|| Luks2Error::Metadata("segment sector size is zero".into()))?;

    let total_sectors = match segment.size {
        SegmentSize::Fixed(bytes) => bytes
            .checked_shr(u32::from(log_sector_size))
            .ok_or_else(|| Luks2Error::Metadata("segment size shift out of range".into()))?,
        SegmentSize::Dynamic => {
            let source_log = source.log_sector_size();
            let device_sectors = source
                .size_bytes()?
                .checked_shr(u32::from(source_log))
                .ok_or_else(|| Luks2Error::Metadata("device sector shift out of range".into()))?;
            let shift = u32::from(log_sector_size)
                .checked_sub(u32::from(source_log))
                .ok_or_else(|| {
                    Luks2Error::Metadata(
                        "segment sector size below the device sector size".into(),
                    )
                })?;
            let segment_sectors = device_sectors.checked_shr(shift).ok_or_else(|| {
                Luks2Error::Metadata("segment sector shift out of range".into())
            })?;
            segment_sectors.checked_sub(offset_sectors).ok_or_else(|| {
                Luks2Error::Metadata("segment offset lies beyond the device end".into())
            })?
        }
    };

    Ok(SegmentGeometry {
        offset_sectors,
        log_sector_size,
        total_sectors,
    })
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
