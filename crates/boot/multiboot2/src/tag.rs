//! Tag type numbers and payload value types.

/// Terminator.
pub const END: u32 = 0;
/// Kernel command line.
pub const CMDLINE: u32 = 1;
/// Boot loader name.
pub const BOOT_LOADER_NAME: u32 = 2;
/// Boot module.
pub const MODULE: u32 = 3;
/// Memory map.
pub const MMAP: u32 = 6;
/// Framebuffer description.
pub const FRAMEBUFFER: u32 = 8;
/// UEFI 64-bit system table pointer.
pub const EFI64: u32 = 12;
/// SMBIOS entry point.
pub const SMBIOS: u32 = 13;
/// ACPI 1.0 RSDP copy.
pub const ACPI_OLD: u32 = 14;
/// ACPI 2.0+ RSDP copy.
pub const ACPI_NEW: u32 = 15;
/// UEFI 64-bit image handle pointer.
pub const EFI64_IH: u32 = 20;
/// Raw EDID block (loader extension).
pub const EDID: u32 = 256;
/// SMP core counts (loader extension).
pub const SMP: u32 = 257;
/// Partition UUIDs (loader extension).
pub const PARTUUID: u32 = 258;

/// Memory map entry kinds.
pub mod memory_kind {
    /// Usable RAM.
    pub const AVAILABLE: u32 = 1;
    /// Reserved; also used for UEFI regions the kernel must not touch.
    pub const RESERVED: u32 = 2;
    /// ACPI tables, reclaimable once parsed.
    pub const ACPI_RECLAIMABLE: u32 = 3;
    /// ACPI non-volatile storage.
    pub const ACPI_NVS: u32 = 4;
    /// Defective RAM.
    pub const BAD_RAM: u32 = 5;
}

/// One memory map entry (24 bytes on the wire).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MmapEntry {
    /// First byte of the region.
    pub base: u64,
    /// Region length in bytes.
    pub length: u64,
    /// One of [`memory_kind`].
    pub kind: u32,
    /// The original firmware type (UEFI memory type), preserved in the
    /// entry's reserved field.
    pub firmware_type: u32,
}

/// Framebuffer description for the type-8 tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramebufferInfo {
    /// Physical framebuffer base.
    pub address: u64,
    /// Bytes per scanline.
    pub pitch: u32,
    /// Visible width in pixels.
    pub width: u32,
    /// Visible height in pixels.
    pub height: u32,
    /// Bits per pixel.
    pub bpp: u8,
    /// Bit position of the red channel.
    pub red_position: u8,
    /// Bit width of the red channel.
    pub red_size: u8,
    /// Bit position of the green channel.
    pub green_position: u8,
    /// Bit width of the green channel.
    pub green_size: u8,
    /// Bit position of the blue channel.
    pub blue_position: u8,
    /// Bit width of the blue channel.
    pub blue_size: u8,
}

impl FramebufferInfo {
    /// Packs an `0x00RRGGBB` color into the framebuffer's pixel format.
    #[must_use]
    pub fn pack_color(&self, rgb: u32) -> u32 {
        let scale = |value: u32, size: u8| -> u32 {
            if size >= 8 {
                value << (size - 8)
            } else {
                value >> (8 - size)
            }
        };
        let r = scale((rgb >> 16) & 0xFF, self.red_size) << self.red_position;
        let g = scale((rgb >> 8) & 0xFF, self.green_size) << self.green_position;
        let b = scale(rgb & 0xFF, self.blue_size) << self.blue_position;
        r | g | b
    }
}
