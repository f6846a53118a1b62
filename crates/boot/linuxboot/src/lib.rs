//! `simpleboot-linuxboot` --- the Linux/x86 boot protocol, `no_std`.
//!
//! Covers the two artefacts the loader must produce to start a bzImage:
//! the sniffed [`SetupHeader`] (validated from the first kernel page) and
//! the so-called zero page ([`ZeroPage`]), a 4 KiB `boot_params` block the
//! kernel receives in `rsi`. Both work on plain byte buffers with the
//! protocol's absolute offsets; no struct mirrors the whole 4 KiB layout.
//!
//! Protocol 2.12+ (`0x20C`) is required: everything older lacks the
//! 64-bit `pref_address` this loader depends on.

#![no_std]
#![warn(missing_docs)]

use simpleboot_binparse::{FromBytes, write_at};

/// `boot_flag` at offset 0x1FE.
pub const BOOT_FLAG: u16 = 0xAA55;

/// `"HdrS"` little-endian at offset 0x202.
pub const HDRS_MAGIC: u32 = 0x5372_6448;

/// Minimum supported boot protocol version.
pub const MIN_PROTOCOL: u16 = 0x20C;

/// The zero page is one 4 KiB page.
pub const ZERO_PAGE_SIZE: usize = 4096;

/// At most this many E820 entries fit in the zero page.
pub const E820_MAX_ENTRIES: usize = 128;

/// `hdr.vid_mode` "ask" value.
const VIDEO_MODE_ASK: u16 = 0xFFFD;

/// `orig_video_isVGA` values (linear framebuffer / EFI framebuffer).
const VIDEO_TYPE_VLFB: u8 = 0x23;
const VIDEO_TYPE_EFI: u8 = 0x70;

/// `"EL64"` signature for `efi_loader_signature`.
const EFI_LOADER_SIGNATURE_64: u32 = 0x3436_4C45;

/// Errors produced while sniffing a bzImage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinuxError {
    /// Missing `0xAA55` boot flag or `HdrS` magic.
    BadMagic,
    /// The boot protocol version predates 0x20C.
    ProtocolTooOld,
    /// `pref_address + file size` does not fit in 32 bits.
    AboveFourGib,
    /// The supplied header prefix is too short.
    Truncated,
}

/// One E820 memory range for the zero page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct E820Entry {
    /// First byte of the range.
    pub addr: u64,
    /// Range length in bytes.
    pub size: u64,
    /// E820 type (1 usable, 2 reserved, 3 ACPI, 4 NVS, 5 bad).
    pub kind: u32,
}

/// Linear-framebuffer description for the zero page's screen info.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenInfo {
    /// Physical framebuffer base.
    pub base: u64,
    /// Bytes per scanline.
    pub pitch: u32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Bits per pixel.
    pub bpp: u8,
    /// Channel field positions and widths.
    pub red_position: u8,
    /// Red channel width.
    pub red_size: u8,
    /// Green channel position.
    pub green_position: u8,
    /// Green channel width.
    pub green_size: u8,
    /// Blue channel position.
    pub blue_position: u8,
    /// Blue channel width.
    pub blue_size: u8,
    /// `true` when the framebuffer came from UEFI GOP.
    pub from_efi: bool,
}

/// The validated fields of a bzImage setup header.
#[derive(Debug, Clone, Copy)]
pub struct SetupHeader {
    /// Number of 512-byte setup sectors (0 already normalised to 4).
    pub setup_sects: u8,
    /// Boot protocol version.
    pub version: u16,
    /// Preferred physical load address of the protected-mode kernel.
    pub pref_address: u64,
    /// Bytes of memory the kernel needs while initialising.
    pub init_size: u32,
    /// Length of the setup header as stored in the file, for the copy
    /// into the zero page (`0x202 - 0x1F1` + the byte at `0x201`).
    header_len: usize,
}

impl SetupHeader {
    /// Byte offset of the setup header within the file / zero page.
    pub const OFFSET: usize = 0x1F1;

    /// Returns `true` if `prefix` looks like a Linux/x86 boot header.
    #[must_use]
    pub fn sniff(prefix: &[u8]) -> bool {
        u16::read_at(prefix, 0x1FE) == Some(BOOT_FLAG)
            && u32::read_at(prefix, 0x202) == Some(HDRS_MAGIC)
    }

    /// Validates the header in the first kernel page.
    ///
    /// `file_size` is the total bzImage size, needed for the 32-bit
    /// address ceiling check.
    ///
    /// # Errors
    ///
    /// [`LinuxError::BadMagic`], [`LinuxError::ProtocolTooOld`],
    /// [`LinuxError::AboveFourGib`], or [`LinuxError::Truncated`].
    pub fn parse(prefix: &[u8], file_size: u64) -> Result<Self, LinuxError> {
        if prefix.len() < 0x268 {
            return Err(LinuxError::Truncated);
        }
        if !Self::sniff(prefix) {
            return Err(LinuxError::BadMagic);
        }
        let version = u16::read_at(prefix, 0x206).ok_or(LinuxError::Truncated)?;
        if version < MIN_PROTOCOL {
            return Err(LinuxError::ProtocolTooOld);
        }
        let pref_address = u64::read_at(prefix, 0x258).ok_or(LinuxError::Truncated)?;
        if (pref_address + file_size) >> 32 != 0 {
            return Err(LinuxError::AboveFourGib);
        }
        let init_size = u32::read_at(prefix, 0x260).ok_or(LinuxError::Truncated)?;

        let mut setup_sects = prefix[Self::OFFSET];
        if setup_sects == 0 {
            setup_sects = 4;
        }
        let header_len = 0x202 - Self::OFFSET + usize::from(prefix[0x201]);

        Ok(Self {
            setup_sects,
            version,
            pref_address,
            init_size,
            header_len,
        })
    }

    /// File offset of the protected-mode kernel image.
    #[must_use]
    pub fn payload_offset(&self) -> u32 {
        (u32::from(self.setup_sects) + 1) * 512
    }

    /// The 64-bit entry point: `pref_address + 0x200`.
    #[must_use]
    pub fn entry_point(&self) -> u64 {
        self.pref_address + 0x200
    }
}

/// A zero page under construction.
pub struct ZeroPage<'a> {
    buf: &'a mut [u8],
}

/// Infallible write inside the size-asserted page.
fn put<T: FromBytes>(buf: &mut [u8], offset: usize, value: T) {
    let written = write_at(buf, offset, value);
    debug_assert!(written.is_some());
}

impl<'a> ZeroPage<'a> {
    /// Wraps and clears a 4 KiB buffer.
    ///
    /// # Panics
    ///
    /// Panics if `buf` is shorter than [`ZERO_PAGE_SIZE`]; the loader
    /// always hands over a whole page.
    pub fn new(buf: &'a mut [u8]) -> Self {
        assert!(buf.len() >= ZERO_PAGE_SIZE);
        buf[..ZERO_PAGE_SIZE].fill(0);
        Self { buf }
    }

    /// Wraps an already-populated zero page without clearing it, for
    /// the late fields written after the kernel image is in memory.
    ///
    /// # Panics
    ///
    /// Panics if `buf` is shorter than [`ZERO_PAGE_SIZE`].
    pub fn new_unchecked(buf: &'a mut [u8]) -> Self {
        assert!(buf.len() >= ZERO_PAGE_SIZE);
        Self { buf }
    }

    /// Copies the kernel's setup header in and applies the loader's
    /// fields: `type_of_loader = 0xFF`, `root_dev = 0x100`,
    /// `root_flags = 1`, `vid_mode = ask`.
    ///
    /// The `ext_loader_type` scheme stays unused.
    pub fn install_header(&mut self, header: &SetupHeader, kernel_prefix: &[u8]) {
        let len = header.header_len.min(kernel_prefix.len() - SetupHeader::OFFSET);
        self.buf[SetupHeader::OFFSET..SetupHeader::OFFSET + len]
            .copy_from_slice(&kernel_prefix[SetupHeader::OFFSET..SetupHeader::OFFSET + len]);

        self.buf[SetupHeader::OFFSET] = header.setup_sects;
        put(self.buf, 0x1F2, 1u16); // root_flags
        put(self.buf, 0x1FA, VIDEO_MODE_ASK); // vid_mode
        put(self.buf, 0x1FC, 0x100u16); // root_dev
        self.buf[0x210] = 0xFF; // type_of_loader: undefined
    }

    /// Sets `hdr.cmd_line_ptr`.
    pub fn set_cmdline_ptr(&mut self, ptr: u32) {
        put(self.buf, 0x228, ptr);
    }

    /// Publishes the first module as the initial ramdisk.
    pub fn set_ramdisk(&mut self, image: u32, size: u32) {
        put(self.buf, 0x218, image);
        put(self.buf, 0x21C, size);
    }

    /// Copies up to [`E820_MAX_ENTRIES`] memory ranges and sets the
    /// entry count. Returns how many entries were written.
    pub fn set_e820(&mut self, entries: &[E820Entry]) -> usize {
        let count = entries.len().min(E820_MAX_ENTRIES);
        for (i, entry) in entries[..count].iter().enumerate() {
            let at = 0x2D0 + i * 20;
            put(self.buf, at, entry.addr);
            put(self.buf, at + 8, entry.size);
            put(self.buf, at + 16, entry.kind);
        }
        self.buf[0x1E8] = count as u8;
        count
    }

    /// Sets `acpi_rsdp_addr` (protocol 2.14+ field; harmless earlier).
    pub fn set_acpi_rsdp(&mut self, addr: u64) {
        put(self.buf, 0x070, addr);
    }

    /// Populates the linear-framebuffer screen info.
    pub fn set_screen_info(&mut self, screen: &ScreenInfo) {
        self.buf[0x00F] = if screen.from_efi {
            VIDEO_TYPE_EFI
        } else {
            VIDEO_TYPE_VLFB
        };
        put(self.buf, 0x012, screen.width as u16);
        put(self.buf, 0x014, screen.height as u16);
        put(self.buf, 0x016, u16::from(screen.bpp));
        put(self.buf, 0x018, screen.base as u32);
        write_at(
            self.buf,
            0x01C,
            screen.pitch * screen.height, // lfb_size
        );
        put(self.buf, 0x024, screen.pitch as u16);
        self.buf[0x026] = screen.red_size;
        self.buf[0x027] = screen.red_position;
        self.buf[0x028] = screen.green_size;
        self.buf[0x029] = screen.green_position;
        self.buf[0x02A] = screen.blue_size;
        self.buf[0x02B] = screen.blue_position;
        if screen.base >> 32 != 0 {
            put(self.buf, 0x03A, (screen.base >> 32) as u32); // ext_lfb_base
            // VIDEO_CAPABILITY_64BIT_BASE
            put(self.buf, 0x036, 2u32);
        }
    }

    /// Publishes the UEFI system table and frozen memory map
    /// (`efi_loader_signature = "EL64"`).
    pub fn set_efi_info(
        &mut self,
        system_table: u64,
        memmap: u64,
        memmap_size: u32,
        desc_size: u32,
        desc_version: u32,
    ) {
        put(self.buf, 0x1C0, EFI_LOADER_SIGNATURE_64);
        put(self.buf, 0x1C4, system_table as u32);
        put(self.buf, 0x1C8, desc_size);
        put(self.buf, 0x1CC, desc_version);
        put(self.buf, 0x1D0, memmap as u32);
        put(self.buf, 0x1D4, memmap_size);
        put(self.buf, 0x1D8, (system_table >> 32) as u32);
        put(self.buf, 0x1DC, (memmap >> 32) as u32);
    }
}

#[cfg(test)]
extern crate alloc;

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use alloc::vec::Vec;

    /// Builds a minimal bzImage first page.
    fn build_header(version: u16, setup_sects: u8, pref: u64, init_size: u32) -> Vec<u8> {
        let mut k = vec![0u8; 4096];
        k[0x1F1] = setup_sects;
        k[0x1FE..0x200].copy_from_slice(&BOOT_FLAG.to_le_bytes());
        k[0x201] = 0x7F; // header length byte
        k[0x202..0x206].copy_from_slice(&HDRS_MAGIC.to_le_bytes());
        k[0x206..0x208].copy_from_slice(&version.to_le_bytes());
        k[0x258..0x260].copy_from_slice(&pref.to_le_bytes());
        k[0x260..0x264].copy_from_slice(&init_size.to_le_bytes());
        k
    }

    #[test]
    fn parse_valid_header() {
        let kernel = build_header(0x20D, 16, 0x100_0000, 0x40_0000);
        let header = SetupHeader::parse(&kernel, 0x50_0000).unwrap();
        assert_eq!(header.setup_sects, 16);
        assert_eq!(header.pref_address, 0x100_0000);
        assert_eq!(header.payload_offset(), 17 * 512);
        assert_eq!(header.entry_point(), 0x100_0200);
    }

    #[test]
    fn zero_setup_sects_defaults_to_four() {
        let kernel = build_header(0x20C, 0, 0x100_0000, 0x40_0000);
        let header = SetupHeader::parse(&kernel, 0x10_0000).unwrap();
        assert_eq!(header.setup_sects, 4);
        assert_eq!(header.payload_offset(), 5 * 512);
    }

    #[test]
    fn old_protocol_is_rejected() {
        let kernel = build_header(0x20B, 4, 0x100_0000, 0x40_0000);
        assert!(matches!(
            SetupHeader::parse(&kernel, 0x10_0000),
            Err(LinuxError::ProtocolTooOld)
        ));
    }

    #[test]
    fn images_above_4gib_are_rejected() {
        let kernel = build_header(0x20C, 4, 0xFFF0_0000, 0x40_0000);
        assert!(matches!(
            SetupHeader::parse(&kernel, 0x20_0000),
            Err(LinuxError::AboveFourGib)
        ));
    }

    #[test]
    fn sniff_rejects_other_formats() {
        assert!(!SetupHeader::sniff(b"\x7fELF"));
        let kernel = build_header(0x20C, 4, 0x100_0000, 0);
        assert!(SetupHeader::sniff(&kernel));
    }

    #[test]
    fn zero_page_header_fields() {
        let kernel = build_header(0x20C, 8, 0x100_0000, 0x40_0000);
        let header = SetupHeader::parse(&kernel, 0x10_0000).unwrap();

        let mut page = vec![0xAAu8; ZERO_PAGE_SIZE];
        let mut zp = ZeroPage::new(&mut page);
        zp.install_header(&header, &kernel);
        zp.set_cmdline_ptr(0x9_9000);

        assert_eq!(u16::read_at(&page, 0x1FE), Some(BOOT_FLAG));
        assert_eq!(u32::read_at(&page, 0x202), Some(HDRS_MAGIC));
        assert_eq!(page[0x210], 0xFF); // type_of_loader
        assert_eq!(page[0x227], 0); // ext_loader_type stays unused
        assert_eq!(u16::read_at(&page, 0x1FC), Some(0x100)); // root_dev
        assert_eq!(u16::read_at(&page, 0x1F2), Some(1)); // root_flags
        assert_eq!(u32::read_at(&page, 0x228), Some(0x9_9000));
        // The rest of the page was cleared.
        assert_eq!(page[0x000], 0);
        assert_eq!(page[0xFFF], 0);
    }

    #[test]
    fn e820_population() {
        let mut page = vec![0u8; ZERO_PAGE_SIZE];
        let mut zp = ZeroPage::new(&mut page);
        let written = zp.set_e820(&[
            E820Entry { addr: 0, size: 0x9_F000, kind: 1 },
            E820Entry { addr: 0x10_0000, size: 0x7FF0_0000, kind: 1 },
            E820Entry { addr: 0xFEE0_0000, size: 0x1000, kind: 2 },
        ]);
        assert_eq!(written, 3);
        assert_eq!(page[0x1E8], 3);
        assert_eq!(u64::read_at(&page, 0x2D0 + 20), Some(0x10_0000));
        assert_eq!(u32::read_at(&page, 0x2D0 + 2 * 20 + 16), Some(2));
    }

    #[test]
    fn e820_is_capped_at_128() {
        let mut page = vec![0u8; ZERO_PAGE_SIZE];
        let mut zp = ZeroPage::new(&mut page);
        let many: Vec<E820Entry> = (0..200)
            .map(|i| E820Entry { addr: i * 0x1000, size: 0x1000, kind: 1 })
            .collect();
        assert_eq!(zp.set_e820(&many), 128);
        assert_eq!(page[0x1E8], 128);
    }

    #[test]
    fn screen_info_fields() {
        let mut page = vec![0u8; ZERO_PAGE_SIZE];
        let mut zp = ZeroPage::new(&mut page);
        zp.set_screen_info(&ScreenInfo {
            base: 0x4_2000_0000,
            pitch: 4096,
            width: 1024,
            height: 768,
            bpp: 32,
            red_position: 16,
            red_size: 8,
            green_position: 8,
            green_size: 8,
            blue_position: 0,
            blue_size: 8,
            from_efi: true,
        });
        assert_eq!(page[0x00F], 0x70);
        assert_eq!(u16::read_at(&page, 0x012), Some(1024));
        assert_eq!(u32::read_at(&page, 0x018), Some(0x2000_0000));
        assert_eq!(u32::read_at(&page, 0x03A), Some(4)); // ext_lfb_base
        assert_eq!(u16::read_at(&page, 0x024), Some(4096));
        assert_eq!(page[0x027], 16); // red position
    }

    #[test]
    fn efi_info_fields() {
        let mut page = vec![0u8; ZERO_PAGE_SIZE];
        let mut zp = ZeroPage::new(&mut page);
        zp.set_efi_info(0x7_FBFF_0000, 0x7_FBFE_0000, 0x1200, 48, 1);
        assert_eq!(u32::read_at(&page, 0x1C0), Some(u32::from_le_bytes(*b"EL64")));
        assert_eq!(u32::read_at(&page, 0x1C4), Some(0xFBFF_0000));
        assert_eq!(u32::read_at(&page, 0x1D8), Some(7));
        assert_eq!(u32::read_at(&page, 0x1D4), Some(0x1200));
    }
}
