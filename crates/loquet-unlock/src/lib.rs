//! `loquet-unlock` — LUKS2 unlock driver for LOQUET.
//!
//! Drives real devices through `loquet-luks2-core`: the [`device::Disk`]
//! seam for reads, the [`cryptodisk::Cryptodisk`] descriptor for sector
//! crypto, the per-keyslot pipeline, and the [`unlock::recover_key`]
//! driver with its silent [`unlock::scan`] probe.

#![cfg_attr(test, allow(clippy::unwrap_used, clippy::arithmetic_side_effects))]

pub mod error;

pub mod device;

pub mod cryptodisk;

pub mod pipeline;
pub mod unlock;

pub use cryptodisk::Cryptodisk;
pub use device::{Disk, FileDisk};
pub use error::UnlockError;
pub use pipeline::decrypt_key;
pub use unlock::{
    read_disk_header, recover_key, scan, PassphraseReader, ScanOptions, MAX_PASSPHRASE_LEN,
    MODULE_NAME,
};
