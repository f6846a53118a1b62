//! `simpleboot-fat` --- read-only FAT32 over an abstract sector device.
//!
//! The boot disk is reached through the [`BlockDevice`] trait, implemented
//! by the firmware layer on the target and by an in-memory disk image in
//! host tests. On top of it this crate finds the boot partition (GPT
//! preferred, MBR fallback), validates the BPB, resolves paths with
//! long-filename reconstruction, and streams file contents through the
//! cluster chain with a 1024-entry FAT cache.
//!
//! The volume is strictly read-only, and at most one file is open at a
//! time: [`FatVolume::open`] borrows the volume mutably, so the next open
//! cannot happen until the previous [`File`] is dropped.
//!
//! # Usage
//!
//! ```ignore
//! let partition = partition::find_boot_partition(&mut device, drive)?;
//! let mut volume = FatVolume::mount(device, &partition)?;
//! let mut file = volume.open("boot/vmlinuz")?;
//! let loaded = file.read(0, &mut buffer)?;
//! ```

#![no_std]
#![warn(missing_docs)]

pub mod partition;
pub mod volume;

pub use partition::{BootPartition, PartitionTable, find_boot_partition};
pub use volume::{FatVolume, File};

/// Sector size every supported device uses.
pub const SECTOR_SIZE: usize = 512;

/// Errors surfaced by partition discovery and filesystem access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatError {
    /// The device failed to deliver a sector.
    Io,
    /// No boot partition, or the BPB does not describe a FAT32 volume.
    NoValidFilesystem,
    /// A path component does not exist.
    NotFound,
    /// The cluster chain or directory data contradicts itself.
    Corrupt,
    /// The progress callback requested an abort (a key was pressed).
    Cancelled,
}

/// Abstract 512-byte-sector reader bound to the boot disk.
///
/// Reads are always sector-aligned and must return exactly the bytes
/// persisted at that LBA.
pub trait BlockDevice {
    /// Reads the sector at `lba` into `buf`.
    ///
    /// # Errors
    ///
    /// Returns [`FatError::Io`] if the device times out or reports failure.
    fn read_sector(&mut self, lba: u64, buf: &mut [u8; SECTOR_SIZE]) -> Result<(), FatError>;
}

#[cfg(test)]
extern crate alloc;

#[cfg(test)]
pub(crate) mod testimg;
