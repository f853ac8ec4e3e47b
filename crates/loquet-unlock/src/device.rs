//! Block-device seam for the unlock driver.
//!
//! The driver only ever issues absolute-offset reads and asks for the
//! device size; [`Disk`] is that narrow surface. [`FileDisk`] adapts
//! anything `Read + Seek` — a block-device node, a detached header file,
//! or an in-memory image in tests.

use std::io::{self, Read, Seek, SeekFrom};

/// A readable block device (or detached header file).
pub trait Disk {
    /// Fill `buf` from the absolute byte `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if the seek or read fails, including short reads.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()>;

    /// Total device size in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size_bytes(&mut self) -> io::Result<u64>;

    /// Base-2 logarithm of the device's native sector size.
    fn log_sector_size(&self) -> u8 {
        9
    }

    /// Device name, used in the passphrase prompt.
    fn name(&self) -> &str {
        ""
    }

    /// Partition name, if the device is a partition.
    fn partition(&self) -> Option<&str> {
        None
    }
}

/// [`Disk`] over any `Read + Seek` source.
#[derive(Debug)]
pub struct FileDisk<R> {
    inner: R,
    name: String,
    partition: Option<String>,
    log_sector_size: u8,
}

impl<R: Read + Seek> FileDisk<R> {
    /// Wrap `inner` as a disk with 512-byte sectors.
    pub fn new(inner: R, name: impl Into<String>) -> Self {
        Self {
            inner,
            name: name.into(),
            partition: None,
            log_sector_size: 9,
        }
    }

    /// Set the partition name reported to the passphrase prompt.
    #[must_use]
    pub fn with_partition(mut self, partition: impl Into<String>) -> Self {
        self.partition = Some(partition.into());
        self
    }

    /// Override the native sector size (as its base-2 logarithm).
    #[must_use]
    pub const fn with_log_sector_size(mut self, log_sector_size: u8) -> Self {
        self.log_sector_size = log_sector_size;
        self
    }
}

impl<R: Read + Seek> Disk for FileDisk<R> {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        self.inner.seek(SeekFrom::Start(offset))?;
        self.inner.read_exact(buf)
    }

    fn size_bytes(&mut self) -> io::Result<u64> {
        self.inner.seek(SeekFrom::End(0))
    }

    fn log_sector_size(&self) -> u8 {
        self.log_sector_size
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn partition(&self) -> Option<&str> {
        self.partition.as_deref()
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn read_at_reads_absolute_offsets() {
        let data: Vec<u8> = (0u8..=255).collect();
        let mut disk = FileDisk::new(Cursor::new(data), "ram0");

        let mut buf = [0u8; 4];
        disk.read_at(10, &mut buf).expect("read should succeed");
        assert_eq!(buf, [10, 11, 12, 13]);

        // Reads are stateless with respect to each other.
        disk.read_at(0, &mut buf).expect("read should succeed");
        assert_eq!(buf, [0, 1, 2, 3]);
    }

    #[test]
    fn read_past_end_fails() {
        let mut disk = FileDisk::new(Cursor::new(vec![0u8; 16]), "ram0");
        let mut buf = [0u8; 8];
        assert!(disk.read_at(12, &mut buf).is_err());
    }

    #[test]
    fn size_reports_total_bytes() {
        let mut disk = FileDisk::new(Cursor::new(vec![0u8; 12345]), "ram0");
        assert_eq!(disk.size_bytes().expect("size should succeed"), 12345);
    }

    #[test]
    fn identity_defaults() {
        let disk = FileDisk::new(Cursor::new(Vec::new()), "hd0");
        assert_eq!(disk.name(), "hd0");
        assert_eq!(disk.partition(), None);
        assert_eq!(disk.log_sector_size(), 9);

        let disk = disk.with_partition("gpt2").with_log_sector_size(12);
        assert_eq!(disk.partition(), Some("gpt2"));
        assert_eq!(disk.log_sector_size(), 12);
    }
}
