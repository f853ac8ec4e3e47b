//! LUKS2 JSON metadata — keyslot, segment, and digest records.
//!
//! This module provides:
//! - [`Metadata`] — the parsed root document (`keyslots` / `segments` /
//!   `digests` maps, indices as decimal-string keys)
//! - [`parse_keyslot`], [`parse_segment`], [`parse_digest`] — strict
//!   per-record parsers
//! - [`Digest::verify`] — constant-time master-key verification
//!
//! Records are parsed individually, not as one typed document: a
//! malformed keyslot must fail only the unlock attempts that touch it
//! (forward compatibility — e.g. an Argon2 slot coexisting with a
//! usable pbkdf2 slot).
//!
//! # Strictness
//!
//! Every record carries a `type` string and is rejected unless it is the
//! supported one: keyslots must be `luks2` with a `raw` area and `luks1`
//! anti-forensics, segments must be `crypt`, digests must be `pbkdf2`.
//! Missing or ill-typed fields are metadata errors. Cross-reference
//! indices above 63 do not fit the 64-bit membership masks and are
//! rejected rather than shifted out of range.

use data_encoding::BASE64;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::Luks2Error;
use crate::hash;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Largest keyslot/segment index representable in a membership bitmask.
pub const MAX_SLOT_INDEX: u64 = 63;

/// Keyslot areas are always ciphered over 512-byte sectors, regardless of
/// the data segment's sector size.
pub const AREA_SECTOR_SIZE: u64 = 512;

/// Upper bound for decoded base64 fields (salts and digests are tens of
/// bytes; anything larger is a damaged header).
const MAX_B64_FIELD: usize = 4096;

// ---------------------------------------------------------------------------
// Root document
// ---------------------------------------------------------------------------

/// Parsed LUKS2 metadata root.
///
/// The three sections are kept as raw JSON maps; records are decoded on
/// demand so one bad record cannot poison the whole document. Iteration
/// follows the map's key order.
#[derive(Debug, Deserialize)]
pub struct Metadata {
    keyslots: Map<String, Value>,
    segments: Map<String, Value>,
    digests: Map<String, Value>,
}

impl Metadata {
    /// Parse the JSON metadata blob (the bytes before the NUL terminator).
    ///
    /// # Errors
    ///
    /// Returns [`Luks2Error::Metadata`] if the text is not valid JSON or
    /// lacks any of the `keyslots` / `segments` / `digests` sections.
    pub fn parse(json: &[u8]) -> Result<Self, Luks2Error> {
        serde_json::from_slice(json)
            .map_err(|e| Luks2Error::Metadata(format!("invalid JSON metadata: {e}")))
    }

    /// Number of keyslot entries (usable or not).
    #[must_use]
    pub fn keyslot_count(&self) -> usize {
        self.keyslots.len()
    }

    /// The raw keyslot map, in iteration order.
    #[must_use]
    pub const fn keyslots(&self) -> &Map<String, Value> {
        &self.keyslots
    }

    /// The raw segment map, in iteration order.
    #[must_use]
    pub const fn segments(&self) -> &Map<String, Value> {
        &self.segments
    }

    /// The raw digest map, in iteration order.
    #[must_use]
    pub const fn digests(&self) -> &Map<String, Value> {
        &self.digests
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// A credential envelope: where the striped key lives, how it is
/// ciphered, and how the passphrase is stretched.
#[derive(Debug, Clone)]
pub struct Keyslot {
    /// Bytes of master key this slot wraps.
    pub key_size: usize,
    /// Try order hint: 0 means "ignore this slot", anything else "try".
    pub priority: u64,
    /// The on-disk keyslot area holding the striped, encrypted key.
    pub area: Area,
    /// Anti-forensic parameters.
    pub af: AfParams,
    /// Passphrase-stretching function.
    pub kdf: Kdf,
}

/// On-disk location and cipher of a keyslot area.
#[derive(Debug, Clone)]
pub struct Area {
    /// Absolute byte offset of the area on the underlying device.
    pub offset: u64,
    /// Area length in bytes; always a multiple of 512.
    pub size: u64,
    /// `CIPHER-MODE-IV` string, e.g. `aes-xts-plain64`.
    pub encryption: String,
    /// Length of the area key derived from the passphrase.
    pub key_size: usize,
}

/// Anti-forensic split parameters.
#[derive(Debug, Clone)]
pub struct AfParams {
    /// Number of stripes the key is expanded into.
    pub stripes: usize,
    /// Hash driving the diffusion rounds.
    pub hash: String,
}

/// Passphrase-stretching function, as a closed sum.
///
/// Argon2 slots parse (their parameters are carried for diagnostics) but
/// are refused when a key derivation is actually attempted.
#[derive(Debug, Clone)]
pub enum Kdf {
    /// `argon2i` or `argon2id`.
    Argon2(Argon2Params),
    /// `pbkdf2`.
    Pbkdf2(Pbkdf2Params),
}

/// Which Argon2 flavor a slot names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Argon2Variant {
    /// `argon2i`.
    Argon2i,
    /// `argon2id`.
    Argon2id,
}

/// Argon2 cost parameters (parsed, never executed).
#[derive(Debug, Clone)]
pub struct Argon2Params {
    /// The named variant.
    pub variant: Argon2Variant,
    /// Time cost (iterations).
    pub time: u64,
    /// Memory cost in KiB.
    pub memory: u64,
    /// Lane count.
    pub cpus: u64,
    /// Base64 salt.
    pub salt: String,
}

/// PBKDF2 parameters.
#[derive(Debug, Clone)]
pub struct Pbkdf2Params {
    /// Hash name, resolved through [`crate::hash::lookup`].
    pub hash: String,
    /// Iteration count.
    pub iterations: u32,
    /// Base64 salt.
    pub salt: String,
}

/// A contiguous payload region a single master key decrypts.
#[derive(Debug, Clone)]
pub struct Segment {
    /// Byte offset of the payload on the data device.
    pub offset: u64,
    /// Payload length.
    pub size: SegmentSize,
    /// `CIPHER-MODE-IV` string for the payload.
    pub encryption: String,
    /// Payload sector size; a power of two, at least 512.
    pub sector_size: u64,
}

/// Segment length: the rest of the device, or an explicit byte count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentSize {
    /// `"dynamic"` — the segment extends to the end of the device.
    Dynamic,
    /// Explicit byte count.
    Fixed(u64),
}

impl Segment {
    /// Base-2 logarithm of the sector size.
    ///
    /// # Errors
    ///
    /// Returns [`Luks2Error::Metadata`] unless the sector size is a power
    /// of two no smaller than 512.
    pub fn log_sector_size(&self) -> Result<u8, Luks2Error> {
        if !self.sector_size.is_power_of_two() || self.sector_size < AREA_SECTOR_SIZE {
            return Err(Luks2Error::Metadata(format!(
                "invalid segment sector size {}",
                self.sector_size
            )));
        }
        u8::try_from(self.sector_size.trailing_zeros())
            .map_err(|_| Luks2Error::Metadata("sector size log out of range".into()))
    }
}

/// A verification tag binding a set of keyslots to a set of segments.
#[derive(Debug, Clone)]
pub struct Digest {
    /// Membership mask: bit *i* set means keyslot *i* is covered.
    pub keyslots: u64,
    /// Membership mask: bit *j* set means segment *j* is covered.
    pub segments: u64,
    /// Base64 PBKDF2 salt.
    pub salt: String,
    /// Base64 expected digest.
    pub digest: String,
    /// Hash name.
    pub hash: String,
    /// PBKDF2 iteration count.
    pub iterations: u32,
}

impl Digest {
    /// Whether keyslot `id` is covered by this digest.
    #[must_use]
    pub fn includes_keyslot(&self, id: u64) -> bool {
        bit_set(self.keyslots, id)
    }

    /// Whether segment `id` is covered by this digest.
    #[must_use]
    pub fn includes_segment(&self, id: u64) -> bool {
        bit_set(self.segments, id)
    }

    /// Check a candidate master key against this digest.
    ///
    /// Recomputes PBKDF2 over the candidate with the stored salt and
    /// iteration count and compares in constant time.
    ///
    /// # Errors
    ///
    /// [`Luks2Error::Metadata`] for undecodable base64,
    /// [`Luks2Error::NotFound`] for an unknown hash, and
    /// [`Luks2Error::DigestMismatch`] when the candidate is wrong.
    pub fn verify(&self, candidate: &[u8]) -> Result<(), Luks2Error> {
        let salt = decode_base64(&self.salt, "digest salt")?;
        let expected = decode_base64(&self.digest, "digest")?;
        let alg = hash::lookup(&self.hash)?;
        alg.pbkdf2_verify(candidate, &salt, self.iterations, &expected)
    }
}

// ---------------------------------------------------------------------------
// Wire structs
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct RawKeyslot {
    #[serde(rename = "type")]
    slot_type: String,
    key_size: u64,
    priority: Option<u64>,
    area: RawArea,
    kdf: RawKdf,
    af: RawAf,
}

#[derive(Deserialize)]
struct RawArea {
    #[serde(rename = "type")]
    area_type: String,
    #[serde(deserialize_with = "de_u64")]
    offset: u64,
    #[serde(deserialize_with = "de_u64")]
    size: u64,
    encryption: String,
    key_size: u64,
}

#[derive(Deserialize)]
struct RawAf {
    #[serde(rename = "type")]
    af_type: String,
    stripes: u64,
    hash: String,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum RawKdf {
    #[serde(rename = "argon2i")]
    Argon2i(RawArgon2),
    #[serde(rename = "argon2id")]
    Argon2id(RawArgon2),
    #[serde(rename = "pbkdf2")]
    Pbkdf2(RawPbkdf2),
}

#[derive(Deserialize)]
struct RawArgon2 {
    time: u64,
    memory: u64,
    cpus: u64,
    salt: String,
}

#[derive(Deserialize)]
struct RawPbkdf2 {
    hash: String,
    #[serde(deserialize_with = "de_u64")]
    iterations: u64,
    salt: String,
}

#[derive(Deserialize)]
struct RawSegment {
    #[serde(rename = "type")]
    segment_type: String,
    #[serde(deserialize_with = "de_u64")]
    offset: u64,
    size: String,
    encryption: String,
    #[serde(deserialize_with = "de_u64")]
    sector_size: u64,
}

#[derive(Deserialize)]
struct RawDigest {
    #[serde(rename = "type")]
    digest_type: String,
    keyslots: Vec<String>,
    segments: Vec<String>,
    salt: String,
    digest: String,
    hash: String,
    #[serde(deserialize_with = "de_u64")]
    iterations: u64,
}

/// Accept a JSON number or a decimal string — cryptsetup writes 64-bit
/// quantities as strings to stay within JavaScript's safe-integer range.
fn de_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;
    match Value::deserialize(deserializer)? {
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| D::Error::custom("expected an unsigned integer")),
        Value::String(s) => s
            .parse::<u64>()
            .map_err(|_| D::Error::custom(format!("expected a decimal string, got '{s}'"))),
        other => Err(D::Error::custom(format!(
            "expected a number or decimal string, got {other}"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Record parsers
// ---------------------------------------------------------------------------

/// Parse one keyslot record.
///
/// # Errors
///
/// Returns [`Luks2Error::Metadata`] for missing/ill-typed fields, an
/// unsupported keyslot/area/AF/KDF type, a keyslot area whose size is not
/// sector-aligned, or a zero stripe count.
pub fn parse_keyslot(value: &Value) -> Result<Keyslot, Luks2Error> {
    let raw: RawKeyslot = serde_json::from_value(value.clone())
        .map_err(|e| Luks2Error::Metadata(format!("keyslot: {e}")))?;

    if raw.slot_type != "luks2" {
        return Err(Luks2Error::Metadata(format!(
            "unsupported keyslot type '{}'",
            raw.slot_type
        )));
    }
    if raw.area.area_type != "raw" {
        return Err(Luks2Error::Metadata(format!(
            "unsupported keyslot area type '{}'",
            raw.area.area_type
        )));
    }
    if raw.af.af_type != "luks1" {
        return Err(Luks2Error::Metadata(format!(
            "unsupported anti-forensic type '{}'",
            raw.af.af_type
        )));
    }
    if raw.area.size % AREA_SECTOR_SIZE != 0 {
        return Err(Luks2Error::Metadata(format!(
            "keyslot area size {} is not a multiple of {AREA_SECTOR_SIZE}",
            raw.area.size
        )));
    }
    if raw.af.stripes == 0 {
        return Err(Luks2Error::Metadata("anti-forensic stripe count is zero".into()));
    }

    let kdf = match raw.kdf {
        RawKdf::Argon2i(p) => Kdf::Argon2(argon2_params(Argon2Variant::Argon2i, p)),
        RawKdf::Argon2id(p) => Kdf::Argon2(argon2_params(Argon2Variant::Argon2id, p)),
        RawKdf::Pbkdf2(p) => Kdf::Pbkdf2(Pbkdf2Params {
            hash: p.hash,
            iterations: u32::try_from(p.iterations).map_err(|_| {
                Luks2Error::Metadata(format!("PBKDF2 iteration count {} out of range", p.iterations))
            })?,
            salt: p.salt,
        }),
    };

    Ok(Keyslot {
        key_size: usize::try_from(raw.key_size)
            .map_err(|_| Luks2Error::Metadata("keyslot key_size out of range".into()))?,
        priority: raw.priority.unwrap_or(1),
        area: Area {
            offset: raw.area.offset,
            size: raw.area.size,
            encryption: raw.area.encryption,
            key_size: usize::try_from(raw.area.key_size)
                .map_err(|_| Luks2Error::Metadata("area key_size out of range".into()))?,
        },
        af: AfParams {
            stripes: usize::try_from(raw.af.stripes)
                .map_err(|_| Luks2Error::Metadata("stripe count out of range".into()))?,
            hash: raw.af.hash,
        },
        kdf,
    })
}

fn argon2_params(variant: Argon2Variant, raw: RawArgon2) -> Argon2Params {
    Argon2Params {
        variant,
        time: raw.time,
        memory: raw.memory,
        cpus: raw.cpus,
        salt: raw.salt,
    }
}

/// Parse one segment record.
///
/// # Errors
///
/// Returns [`Luks2Error::Metadata`] for missing/ill-typed fields, a
/// non-`crypt` type, or a size that is neither `"dynamic"` nor decimal.
pub fn parse_segment(value: &Value) -> Result<Segment, Luks2Error> {
    let raw: RawSegment = serde_json::from_value(value.clone())
        .map_err(|e| Luks2Error::Metadata(format!("segment: {e}")))?;

    if raw.segment_type != "crypt" {
        return Err(Luks2Error::Metadata(format!(
            "unsupported segment type '{}'",
            raw.segment_type
        )));
    }

    let size = if raw.size == "dynamic" {
        SegmentSize::Dynamic
    } else {
        SegmentSize::Fixed(raw.size.parse::<u64>().map_err(|_| {
            Luks2Error::Metadata(format!("segment size '{}' is not decimal", raw.size))
        })?)
    };

    Ok(Segment {
        offset: raw.offset,
        size,
        encryption: raw.encryption,
        sector_size: raw.sector_size,
    })
}

/// Parse one digest record.
///
/// # Errors
///
/// Returns [`Luks2Error::Metadata`] for missing/ill-typed fields, a
/// non-`pbkdf2` type, a cross-reference index above 63, or an empty
/// keyslot/segment reference set.
pub fn parse_digest(value: &Value) -> Result<Digest, Luks2Error> {
    let raw: RawDigest = serde_json::from_value(value.clone())
        .map_err(|e| Luks2Error::Metadata(format!("digest: {e}")))?;

    if raw.digest_type != "pbkdf2" {
        return Err(Luks2Error::Metadata(format!(
            "unsupported digest type '{}'",
            raw.digest_type
        )));
    }

    Ok(Digest {
        keyslots: fold_bitmask(&raw.keyslots, "keyslot")?,
        segments: fold_bitmask(&raw.segments, "segment")?,
        salt: raw.salt,
        digest: raw.digest,
        hash: raw.hash,
        iterations: u32::try_from(raw.iterations).map_err(|_| {
            Luks2Error::Metadata(format!("digest iteration count {} out of range", raw.iterations))
        })?,
    })
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Fold decimal-string indices into a 64-bit membership mask.
///
/// The index domain is 0..=63; the shift is checked so a damaged header
/// cannot push a reference out of the mask.
fn fold_bitmask(indices: &[String], what: &str) -> Result<u64, Luks2Error> {
    let mut mask = 0u64;
    for text in indices {
        let index: u64 = text.parse().map_err(|_| {
            Luks2Error::Metadata(format!("non-decimal {what} index '{text}'"))
        })?;
        if index > MAX_SLOT_INDEX {
            return Err(Luks2Error::Metadata(format!(
                "{what} index {index} exceeds bitmask range (max {MAX_SLOT_INDEX})"
            )));
        }
        let shift = u32::try_from(index)
            .map_err(|_| Luks2Error::Metadata(format!("{what} index {index} out of range")))?;
        let bit = 1u64.checked_shl(shift).ok_or_else(|| {
            Luks2Error::Metadata(format!("{what} index {index} out of range"))
        })?;
        mask |= bit;
    }
    if mask == 0 {
        return Err(Luks2Error::Metadata(format!(
            "digest references no {what}s"
        )));
    }
    Ok(mask)
}

/// `true` if bit `index` is set in `mask`.
fn bit_set(mask: u64, index: u64) -> bool {
    u32::try_from(index)
        .ok()
        .and_then(|shift| mask.checked_shr(shift))
        .is_some_and(|shifted| shifted & 1 == 1)
}

/// Decode a base64 metadata field with a bounded output size.
///
/// # Errors
///
/// Returns [`Luks2Error::Metadata`] for invalid base64 or an
/// implausibly large decoded value.
pub fn decode_base64(text: &str, what: &str) -> Result<Vec<u8>, Luks2Error> {
    let decoded = BASE64
        .decode(text.as_bytes())
        .map_err(|e| Luks2Error::Metadata(format!("invalid base64 in {what}: {e}")))?;
    if decoded.len() > MAX_B64_FIELD {
        return Err(Luks2Error::Metadata(format!(
            "{what} decodes to {} bytes (limit {MAX_B64_FIELD})",
            decoded.len()
        )));
    }
    Ok(decoded)
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
