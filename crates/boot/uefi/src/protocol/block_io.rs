//! UEFI Block I/O Protocol.

use crate::EfiStatus;

/// The Block I/O Protocol: sector-granular access to a disk or partition.
#[repr(C)]
pub struct BlockIoProtocol {
    /// Protocol revision.
    pub revision: u64,
    /// Media information for this device.
    pub media: *mut BlockIoMedia,
    /// Resets the device hardware.
    pub reset: unsafe extern "efiapi" fn(
        this: *mut BlockIoProtocol,
        extended_verification: bool,
    ) -> EfiStatus,
    /// Reads whole blocks from the device.
    pub read_blocks: unsafe extern "efiapi" fn(
        this: *mut BlockIoProtocol,
        media_id: u32,
        lba: u64,
        buffer_size: usize,
        buffer: *mut u8,
    ) -> EfiStatus,
    /// Writes whole blocks to the device.
    pub write_blocks: unsafe extern "efiapi" fn(
        this: *mut BlockIoProtocol,
        media_id: u32,
        lba: u64,
        buffer_size: usize,
        buffer: *const u8,
    ) -> EfiStatus,
    /// Flushes cached writes.
    pub flush_blocks: unsafe extern "efiapi" fn(this: *mut BlockIoProtocol) -> EfiStatus,
}

/// Media characteristics of a block device.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct BlockIoMedia {
    /// The current media ID.
    pub media_id: u32,
    /// `true` if the media is removable.
    pub removable_media: bool,
    /// `true` if media is present in the device.
    pub media_present: bool,
    /// `true` if this handle abstracts a partition rather than a disk.
    pub logical_partition: bool,
    /// `true` if the media is read-only.
    pub read_only: bool,
    /// `true` if writes are cached.
    pub write_caching: bool,
    /// Block size in bytes.
    pub block_size: u32,
    /// Buffer alignment requirement for transfers.
    pub io_align: u32,
    /// Last addressable LBA.
    pub last_block: u64,
    /// First LBA aligned to a physical block (revision 2+).
    pub lowest_aligned_lba: u64,
    /// Logical blocks per physical block (revision 2+).
    pub logical_blocks_per_physical_block: u32,
    /// Optimal transfer granularity (revision 3+).
    pub optimal_transfer_length_granularity: u32,
}

// BlockIoMedia has no pointers; its layout is architecture-independent.
const _: () = {
    assert!(core::mem::size_of::<BlockIoMedia>() == 48);
    assert!(core::mem::offset_of!(BlockIoMedia, block_size) == 12);
    assert!(core::mem::offset_of!(BlockIoMedia, last_block) == 24);
};

#[cfg(target_pointer_width = "64")]
const _: () = assert!(core::mem::size_of::<BlockIoProtocol>() == 48);
