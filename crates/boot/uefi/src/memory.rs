//! UEFI memory map types.

use crate::{EfiPhysicalAddress, EfiVirtualAddress};

/// Allocation strategy for `AllocatePages`.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EfiAllocateType {
    /// Any available range of pages.
    AllocateAnyPages = 0,
    /// Any range of pages at or below the given address.
    AllocateMaxAddress = 1,
    /// Pages at exactly the given address.
    AllocateAddress = 2,
}

/// UEFI memory types.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EfiMemoryType {
    /// Not usable.
    ReservedMemoryType = 0,
    /// Loaded UEFI application code.
    LoaderCode = 1,
    /// Loaded UEFI application data; what this loader allocates.
    LoaderData = 2,
    /// Boot services driver code.
    BootServicesCode = 3,
    /// Boot services driver data.
    BootServicesData = 4,
    /// Runtime services code.
    RuntimeServicesCode = 5,
    /// Runtime services data.
    RuntimeServicesData = 6,
    /// Free memory.
    ConventionalMemory = 7,
    /// Memory with detected errors.
    UnusableMemory = 8,
    /// ACPI tables, reclaimable after parsing.
    AcpiReclaimMemory = 9,
    /// ACPI firmware reserved memory.
    AcpiMemoryNvs = 10,
    /// Memory-mapped I/O.
    MemoryMappedIo = 11,
    /// Memory-mapped I/O port space.
    MemoryMappedIoPortSpace = 12,
    /// Processor firmware reserved memory.
    PalCode = 13,
    /// Byte-addressable persistent memory.
    PersistentMemory = 14,
}

/// One entry of the UEFI memory map.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct EfiMemoryDescriptor {
    /// The [`EfiMemoryType`] as a raw value (may exceed the known set).
    pub memory_type: u32,
    /// First byte of the region (4 KiB aligned).
    pub physical_start: EfiPhysicalAddress,
    /// Virtual address of the region once mapped for runtime.
    pub virtual_start: EfiVirtualAddress,
    /// Region size in 4 KiB pages.
    pub number_of_pages: u64,
    /// Attribute bits.
    pub attribute: u64,
}

/// A raw UEFI memory map snapshot.
///
/// Descriptors are `descriptor_size` bytes apart, which may exceed
/// `size_of::<EfiMemoryDescriptor>()`; iterate with [`MemoryMap::entries`]
/// rather than casting the buffer to a slice of descriptors.
pub struct MemoryMap<'buf> {
    buf: &'buf [u8],
    /// Key identifying this snapshot for `ExitBootServices`.
    pub map_key: usize,
    /// Stride between descriptors in `buf`.
    pub descriptor_size: usize,
    /// Descriptor format version.
    pub descriptor_version: u32,
}

impl<'buf> MemoryMap<'buf> {
    /// Wraps a filled memory-map buffer.
    #[must_use]
    pub fn new(
        buf: &'buf [u8],
        map_key: usize,
        descriptor_size: usize,
        descriptor_version: u32,
    ) -> Self {
        Self {
            buf,
            map_key,
            descriptor_size,
            descriptor_version,
        }
    }

    /// Number of descriptors in the map.
    #[must_use]
    pub fn len(&self) -> usize {
        if self.descriptor_size == 0 {
            0
        } else {
            self.buf.len() / self.descriptor_size
        }
    }

    /// `true` if the map holds no descriptors.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterates over the descriptors (by value: the snapshot buffer has
    /// no alignment guarantee).
    pub fn entries(&self) -> impl Iterator<Item = EfiMemoryDescriptor> + 'buf {
        let stride = self.descriptor_size.max(1);
        self.buf.chunks_exact(stride).map(|chunk| {
            // SAFETY: each chunk starts with a descriptor per the UEFI
            // memory map contract; the read tolerates any alignment.
            unsafe { core::ptr::read_unaligned(chunk.as_ptr().cast::<EfiMemoryDescriptor>()) }
        })
    }
}

bitflags::bitflags! {
    /// Memory descriptor attribute bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EfiMemoryAttribute: u64 {
        /// Supports uncacheable access.
        const UNCACHEABLE = 1 << 0;
        /// Supports write-combining access.
        const WRITE_COMBINE = 1 << 1;
        /// Supports write-through caching.
        const WRITE_THROUGH = 1 << 2;
        /// Supports write-back caching.
        const WRITE_BACK = 1 << 3;
        /// Write-protected.
        const WRITE_PROTECT = 1 << 12;
        /// Needed by runtime services after `ExitBootServices`.
        const RUNTIME = 1 << 63;
    }
}

impl EfiMemoryDescriptor {
    /// The descriptor's attributes as typed flags (unknown bits kept).
    #[must_use]
    pub fn attributes(&self) -> EfiMemoryAttribute {
        EfiMemoryAttribute::from_bits_retain(self.attribute)
    }

    /// Region size in bytes.
    #[must_use]
    pub fn byte_len(&self) -> u64 {
        self.number_of_pages * 4096
    }
}
