//! `loquet-luks2-core` — LUKS2 on-disk format and key-recovery core.
//!
//! This crate is the audit target: no device I/O beyond `Read + Seek`, no
//! async, no terminal. It decodes the fixed binary header, the JSON
//! metadata graph (keyslots / segments / digests), reverses anti-forensic
//! key splitting, and verifies recovered master keys. The orchestration
//! that drives real devices lives in `loquet-unlock`.

#![cfg_attr(test, allow(clippy::unwrap_used, clippy::arithmetic_side_effects))]

pub mod error;
pub mod memory;

pub mod header;

pub mod hash;

pub mod metadata;
pub mod resolve;

pub mod af;

pub use af::{merge, split};
pub use error::Luks2Error;
pub use header::{
    read_header, HeaderCopy, Luks2Header, FORMAT_VERSION, HEADER_SIZE, MAGIC_PRIMARY,
    MAGIC_SECONDARY,
};
pub use memory::SecretBytes;
pub use metadata::{
    decode_base64, parse_digest, parse_keyslot, parse_segment, AfParams, Area, Argon2Params,
    Argon2Variant, Digest, Kdf, Keyslot, Metadata, Pbkdf2Params, Segment, SegmentSize,
    AREA_SECTOR_SIZE, MAX_SLOT_INDEX,
};
pub use resolve::{bind, BoundKeyslot};
