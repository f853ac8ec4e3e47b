//! LUKS2 fixed binary header — parsing and primary/secondary selection.
//!
//! This module provides:
//! - [`Luks2Header`] — the decoded 4096-byte on-disk header
//! - [`Luks2Header::parse`] — decode one header copy from raw bytes
//! - [`read_header`] — read both copies from a device and pick the
//!   authoritative one
//!
//! # On-Disk Layout
//!
//! Two 4096-byte big-endian header copies: the primary at offset 0 and the
//! secondary at offset `hdr_size`. Each copy is immediately followed by a
//! NUL-terminated JSON metadata blob of `hdr_size - 4096` bytes.
//!
//! ```text
//! magic (6) | version (u16) | hdr_size (u64) | seqid (u64) | label (48)
//! | csum_alg (32) | salt (64) | uuid (40) | subsystem (48)
//! | hdr_offset (u64) | padding (184) | csum (64) | padding (3584)
//! ```
//!
//! The copy with the larger `seqid` wins; on a tie the primary does.

use std::io::{Read, Seek, SeekFrom};

use crate::error::Luks2Error;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Size of one fixed header copy in bytes.
pub const HEADER_SIZE: usize = 4096;

/// Magic bytes of the primary header copy.
pub const MAGIC_PRIMARY: [u8; MAGIC_LEN] = [b'L', b'U', b'K', b'S', 0xBA, 0xBE];

/// Magic bytes of the secondary header copy.
pub const MAGIC_SECONDARY: [u8; MAGIC_LEN] = [b'S', b'K', b'U', b'L', 0xBA, 0xBE];

/// The only supported format version.
pub const FORMAT_VERSION: u16 = 2;

/// Largest header size the LUKS2 format defines (4 MiB). Anything bigger
/// is treated as a corrupt header rather than an allocation request.
pub const MAX_HDR_SIZE: u64 = 4 * 1024 * 1024;

/// Length of the magic field.
const MAGIC_LEN: usize = 6;
/// Length of the label field.
const LABEL_LEN: usize = 48;
/// Length of the checksum-algorithm field.
const CSUM_ALG_LEN: usize = 32;
/// Length of the salt field.
const SALT_LEN: usize = 64;
/// Length of the UUID field.
const UUID_LEN: usize = 40;
/// Length of the subsystem field.
const SUBSYSTEM_LEN: usize = 48;
/// Length of the checksum field.
const CSUM_LEN: usize = 64;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Which of the two on-disk copies a header was decoded from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeaderCopy {
    /// The copy at offset 0 (magic `LUKS\xba\xbe`).
    Primary,
    /// The copy at offset `hdr_size` (magic `SKUL\xba\xbe`).
    Secondary,
}

impl HeaderCopy {
    /// The magic bytes this copy must carry.
    #[must_use]
    pub const fn expected_magic(self) -> [u8; MAGIC_LEN] {
        match self {
            Self::Primary => MAGIC_PRIMARY,
            Self::Secondary => MAGIC_SECONDARY,
        }
    }
}

/// A decoded LUKS2 fixed header copy.
#[derive(Clone, Debug)]
pub struct Luks2Header {
    /// Which on-disk copy this header came from.
    pub copy: HeaderCopy,
    /// Format version (always 2 once parsed).
    pub version: u16,
    /// Total bytes of this header copy, including the JSON area.
    pub hdr_size: u64,
    /// Monotonic freshness counter; the larger copy wins.
    pub seqid: u64,
    /// Volume label, NUL-trimmed.
    pub label: String,
    /// Checksum algorithm name, NUL-trimmed. Carried, not verified.
    pub csum_alg: String,
    /// Checksum salt.
    pub salt: [u8; SALT_LEN],
    /// Volume UUID as text (LUKS2 stores the string form), NUL-trimmed.
    pub uuid: String,
    /// Subsystem label, NUL-trimmed.
    pub subsystem: String,
    /// Disk offset of this header copy.
    pub hdr_offset: u64,
    /// Header checksum. Carried, not verified.
    pub csum: [u8; CSUM_LEN],
}

impl Luks2Header {
    /// Decode one header copy from `buf`.
    ///
    /// Validates the magic for the given copy, the format version, and
    /// that `hdr_size` leaves room for a JSON area without being
    /// implausibly large.
    ///
    /// # Errors
    ///
    /// Returns [`Luks2Error::BadSignature`] if the buffer is too short,
    /// the magic or version does not match, or `hdr_size` is out of range.
    pub fn parse(buf: &[u8], copy: HeaderCopy) -> Result<Self, Luks2Error> {
        if buf.len() < HEADER_SIZE {
            return Err(Luks2Error::BadSignature(format!(
                "header too short: {} bytes (expected {HEADER_SIZE})",
                buf.len()
            )));
        }

        let magic: [u8; MAGIC_LEN] = field(buf, 0);
        if magic != copy.expected_magic() {
            return Err(Luks2Error::BadSignature(format!(
                "magic mismatch for {copy:?} header: {magic:02x?}"
            )));
        }

        let version = u16::from_be_bytes(field::<2>(buf, 6));
        if version != FORMAT_VERSION {
            return Err(Luks2Error::BadSignature(format!(
                "unsupported version {version} (expected {FORMAT_VERSION})"
            )));
        }

        let hdr_size = u64::from_be_bytes(field::<8>(buf, 8));
        if hdr_size <= HEADER_SIZE as u64 || hdr_size > MAX_HDR_SIZE {
            return Err(Luks2Error::BadSignature(format!(
                "implausible hdr_size {hdr_size}"
            )));
        }

        let seqid = u64::from_be_bytes(field::<8>(buf, 16));
        let label = text_field(buf, 24, LABEL_LEN);
        let csum_alg = text_field(buf, 72, CSUM_ALG_LEN);
        let salt: [u8; SALT_LEN] = field(buf, 104);
        let uuid = text_field(buf, 168, UUID_LEN);
        let subsystem = text_field(buf, 208, SUBSYSTEM_LEN);
        let hdr_offset = u64::from_be_bytes(field::<8>(buf, 256));
        let csum: [u8; CSUM_LEN] = field(buf, 448);

        Ok(Self {
            copy,
            version,
            hdr_size,
            seqid,
            label,
            csum_alg,
            salt,
            uuid,
            subsystem,
            hdr_offset,
            csum,
        })
    }

    /// Byte length of the JSON metadata area that follows the fixed header.
    #[must_use]
    pub const fn json_len(&self) -> u64 {
        self.hdr_size.saturating_sub(HEADER_SIZE as u64)
    }

    /// Case-insensitive UUID comparison, for probing by UUID.
    #[must_use]
    pub fn matches_uuid(&self, uuid: &str) -> bool {
        self.uuid.eq_ignore_ascii_case(uuid)
    }
}

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

/// Read the primary and secondary header copies from `reader` and return
/// the authoritative one.
///
/// Both copies must decode; the one with the larger `seqid` is returned,
/// with ties resolved to the primary.
///
/// # Errors
///
/// Returns [`Luks2Error::BadSignature`] if either copy fails to decode and
/// [`Luks2Error::Io`] if a read fails.
pub fn read_header<R: Read + Seek>(reader: &mut R) -> Result<Luks2Header, Luks2Error> {
    let mut buf = [0u8; HEADER_SIZE];

    reader.seek(SeekFrom::Start(0))?;
    reader.read_exact(&mut buf)?;
    let primary = Luks2Header::parse(&buf, HeaderCopy::Primary)?;

    reader.seek(SeekFrom::Start(primary.hdr_size))?;
    reader.read_exact(&mut buf)?;
    let mut secondary = Luks2Header::parse(&buf, HeaderCopy::Secondary)?;
    secondary.hdr_offset = primary.hdr_size;

    Ok(select(primary, secondary))
}

/// Pick the authoritative copy: larger `seqid` wins, ties go to primary.
#[must_use]
pub fn select(primary: Luks2Header, secondary: Luks2Header) -> Luks2Header {
    if secondary.seqid > primary.seqid {
        secondary
    } else {
        primary
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Copy a fixed-size field out of the header buffer.
///
/// Offsets are compile-time constants from the layout table, so the slice
/// is always in range for a 4096-byte buffer.
fn field<const N: usize>(buf: &[u8], offset: usize) -> [u8; N] {
    let mut out = [0u8; N];
    let end = offset.saturating_add(N);
    out.copy_from_slice(&buf[offset..end]);
    out
}

/// Decode a NUL-padded text field, trimming trailing NULs.
fn text_field(buf: &[u8], offset: usize, len: usize) -> String {
    let end = offset.saturating_add(len);
    String::from_utf8_lossy(&buf[offset..end])
        .trim_end_matches('\0')
        .to_string()
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Build a syntactically valid header copy for tests.
    fn build_header(copy: HeaderCopy, hdr_size: u64, seqid: u64, uuid: &str) -> Vec<u8> {
        let mut buf = vec![0u8; HEADER_SIZE];
        buf[..6].copy_from_slice(&copy.expected_magic());
        buf[6..8].copy_from_slice(&FORMAT_VERSION.to_be_bytes());
        buf[8..16].copy_from_slice(&hdr_size.to_be_bytes());
        buf[16..24].copy_from_slice(&seqid.to_be_bytes());
        buf[72..72 + 6].copy_from_slice(b"sha256");
        buf[168..168 + uuid.len()].copy_from_slice(uuid.as_bytes());
        let offset = match copy {
            HeaderCopy::Primary => 0u64,
            HeaderCopy::Secondary => hdr_size,
        };
        buf[256..264].copy_from_slice(&offset.to_be_bytes());
        buf
    }

    /// Assemble a device image holding both header copies.
    fn build_image(hdr_size: u64, primary_seqid: u64, secondary_seqid: u64) -> Vec<u8> {
        let mut image = vec![0u8; (hdr_size as usize) * 2];
        let primary = build_header(
            HeaderCopy::Primary,
            hdr_size,
            primary_seqid,
            "9b5d8a52-1bd8-4355-97cf-d41d3ae62a4d",
        );
        let secondary = build_header(
            HeaderCopy::Secondary,
            hdr_size,
            secondary_seqid,
            "9b5d8a52-1bd8-4355-97cf-d41d3ae62a4d",
        );
        image[..HEADER_SIZE].copy_from_slice(&primary);
        image[hdr_size as usize..hdr_size as usize + HEADER_SIZE].copy_from_slice(&secondary);
        image
    }

    #[test]
    fn parse_decodes_all_fields() {
        let buf = build_header(HeaderCopy::Primary, 16384, 7, "abc-123");
        let header =
            Luks2Header::parse(&buf, HeaderCopy::Primary).expect("parse should succeed");

        assert_eq!(header.version, 2);
        assert_eq!(header.hdr_size, 16384);
        assert_eq!(header.seqid, 7);
        assert_eq!(header.csum_alg, "sha256");
        assert_eq!(header.uuid, "abc-123");
        assert_eq!(header.hdr_offset, 0);
        assert_eq!(header.json_len(), 16384 - 4096);
    }

    #[test]
    fn parse_rejects_wrong_magic() {
        let buf = build_header(HeaderCopy::Secondary, 16384, 1, "u");
        let err = Luks2Header::parse(&buf, HeaderCopy::Primary)
            .expect_err("primary parse of secondary magic should fail");
        assert!(matches!(err, Luks2Error::BadSignature(_)));
    }

    #[test]
    fn parse_rejects_wrong_version() {
        let mut buf = build_header(HeaderCopy::Primary, 16384, 1, "u");
        buf[6..8].copy_from_slice(&1u16.to_be_bytes());
        let err = Luks2Header::parse(&buf, HeaderCopy::Primary)
            .expect_err("version 1 should be rejected");
        assert!(
            matches!(err, Luks2Error::BadSignature(ref msg) if msg.contains("version")),
            "expected version error, got: {err}"
        );
    }

    #[test]
    fn parse_rejects_hdr_size_without_json_room() {
        let buf = build_header(HeaderCopy::Primary, HEADER_SIZE as u64, 1, "u");
        let err = Luks2Header::parse(&buf, HeaderCopy::Primary)
            .expect_err("hdr_size == 4096 leaves no JSON area");
        assert!(matches!(err, Luks2Error::BadSignature(_)));
    }

    #[test]
    fn parse_rejects_oversized_hdr_size() {
        let buf = build_header(HeaderCopy::Primary, MAX_HDR_SIZE + 1, 1, "u");
        let err = Luks2Header::parse(&buf, HeaderCopy::Primary)
            .expect_err("hdr_size above 4 MiB should be rejected");
        assert!(matches!(err, Luks2Error::BadSignature(_)));
    }

    #[test]
    fn parse_rejects_short_buffer() {
        let err = Luks2Header::parse(&[0u8; 512], HeaderCopy::Primary)
            .expect_err("short buffer should be rejected");
        assert!(matches!(err, Luks2Error::BadSignature(_)));
    }

    #[test]
    fn primary_wins_on_larger_seqid() {
        let image = build_image(16384, 10, 9);
        let header = read_header(&mut Cursor::new(image)).expect("read should succeed");
        assert_eq!(header.copy, HeaderCopy::Primary);
        assert_eq!(header.seqid, 10);
        assert_eq!(header.hdr_offset, 0);
    }

    #[test]
    fn secondary_wins_on_larger_seqid() {
        let image = build_image(16384, 9, 10);
        let header = read_header(&mut Cursor::new(image)).expect("read should succeed");
        assert_eq!(header.copy, HeaderCopy::Secondary);
        assert_eq!(header.seqid, 10);
        assert_eq!(header.hdr_offset, 16384);
    }

    #[test]
    fn tie_resolves_to_primary() {
        let image = build_image(16384, 5, 5);
        let header = read_header(&mut Cursor::new(image)).expect("read should succeed");
        assert_eq!(header.copy, HeaderCopy::Primary);
    }

    #[test]
    fn read_fails_when_secondary_is_corrupt() {
        let mut image = build_image(16384, 3, 2);
        image[16384] = b'X'; // clobber secondary magic
        let err = read_header(&mut Cursor::new(image))
            .expect_err("corrupt secondary should fail the pair read");
        assert!(matches!(err, Luks2Error::BadSignature(_)));
    }

    #[test]
    fn uuid_match_is_case_insensitive() {
        let buf = build_header(HeaderCopy::Primary, 16384, 1, "AbCd-EF01");
        let header =
            Luks2Header::parse(&buf, HeaderCopy::Primary).expect("parse should succeed");
        assert!(header.matches_uuid("abcd-ef01"));
        assert!(header.matches_uuid("ABCD-EF01"));
        assert!(!header.matches_uuid("abcd-ef02"));
    }
}
