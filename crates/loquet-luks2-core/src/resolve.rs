//! Cross-referencing keyslots, digests, and segments.
//!
//! A keyslot alone says nothing about what its wrapped key decrypts. The
//! binding goes through a digest: the first digest whose `keyslots` mask
//! covers the slot pairs it with the first segment its `segments` mask
//! covers. First match in map iteration order wins.

use crate::error::Luks2Error;
use crate::metadata::{
    parse_digest, parse_keyslot, parse_segment, Digest, Keyslot, Metadata, Segment,
    MAX_SLOT_INDEX,
};

/// A fully-resolved unlock candidate: the keyslot, the digest that can
/// verify its wrapped key, and the segment that key decrypts.
#[derive(Debug)]
pub struct BoundKeyslot {
    /// The keyslot's index in the metadata.
    pub keyslot_id: u64,
    /// The parsed keyslot record.
    pub keyslot: Keyslot,
    /// The digest covering this keyslot.
    pub digest: Digest,
    /// The bound segment's index in the metadata.
    pub segment_id: u64,
    /// The parsed segment record.
    pub segment: Segment,
}

/// Resolve the `index`-th keyslot entry into a [`BoundKeyslot`].
///
/// `index` is a position in the keyslot map's iteration order, not the
/// keyslot's own id (the map key provides that).
///
/// # Errors
///
/// - [`Luks2Error::NotFound`] if there is no `index`-th keyslot, no digest
///   covers it, or the digest covers no present segment.
/// - [`Luks2Error::Metadata`] if the keyslot, a digest along the way, or
///   the bound segment fails to parse, or an index is out of mask range.
pub fn bind(metadata: &Metadata, index: usize) -> Result<BoundKeyslot, Luks2Error> {
    let (id_text, value) = metadata
        .keyslots()
        .iter()
        .nth(index)
        .ok_or_else(|| Luks2Error::NotFound(format!("keyslot entry #{index}")))?;

    let keyslot_id: u64 = id_text
        .parse()
        .map_err(|_| Luks2Error::Metadata(format!("non-decimal keyslot index '{id_text}'")))?;
    if keyslot_id > MAX_SLOT_INDEX {
        return Err(Luks2Error::Metadata(format!(
            "keyslot index {keyslot_id} exceeds bitmask range (max {MAX_SLOT_INDEX})"
        )));
    }

    let keyslot = parse_keyslot(value)?;

    let digest = find_digest(metadata, keyslot_id)?;
    let (segment_id, segment) = find_segment(metadata, &digest)?;

    Ok(BoundKeyslot {
        keyslot_id,
        keyslot,
        digest,
        segment_id,
        segment,
    })
}

/// First digest (in map order) whose keyslot mask covers `keyslot_id`.
fn find_digest(metadata: &Metadata, keyslot_id: u64) -> Result<Digest, Luks2Error> {
    for value in metadata.digests().values() {
        let digest = parse_digest(value)?;
        if digest.includes_keyslot(keyslot_id) {
            return Ok(digest);
        }
    }
    Err(Luks2Error::NotFound(format!(
        "no digest covers keyslot {keyslot_id}"
    )))
}

/// First segment (in map order) whose index the digest's segment mask covers.
fn find_segment(metadata: &Metadata, digest: &Digest) -> Result<(u64, Segment), Luks2Error> {
    for (id_text, value) in metadata.segments() {
        let segment_id: u64 = id_text.parse().map_err(|_| {
            Luks2Error::Metadata(format!("non-decimal segment index '{id_text}'"))
        })?;
        if digest.includes_segment(segment_id) {
            return Ok((segment_id, parse_segment(value)?));
        }
    }
    Err(Luks2Error::NotFound(
        "no segment matches the digest".into(),
    ))
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
