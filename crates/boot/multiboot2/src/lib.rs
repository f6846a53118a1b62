//! `simpleboot-multiboot2` --- the Multiboot2 information structure.
//!
//! The MBI is a contiguous byte buffer: an 8-byte header (`total_size`,
//! `reserved`) followed by 8-aligned tags, closed by a type-0 terminator.
//! [`TagWriter`] appends tags into a caller-provided buffer and patches
//! the header on [`TagWriter::finish`]; [`TagIter`] walks a finished
//! buffer (kernels and the tests use it).
//!
//! Beyond the standard tag set, three loader-specific types are emitted:
//! EDID (256), SMP (257), and partition UUIDs (258).

#![no_std]
#![warn(missing_docs)]

pub mod tag;

pub use tag::{FramebufferInfo, MmapEntry, memory_kind};

use simpleboot_binparse::FromBytes;

/// The value handed to the kernel in `eax`/`rax`/`x0`.
pub const BOOTLOADER_MAGIC: u32 = 0x36D7_6289;

/// Tag alignment inside the information structure.
pub const TAG_ALIGN: usize = 8;

/// The loader name published in the type-2 tag.
pub const LOADER_NAME: &str = "Simpleboot";

/// The loader name published when the backup configuration is active.
pub const LOADER_NAME_BACKUP: &str = "Simpleboot (backup)";

/// Errors from building or parsing an information structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MbiError {
    /// The buffer cannot hold the next tag.
    BufferFull,
    /// The buffer does not contain a well-formed tag stream.
    Malformed,
}

/// Appends Multiboot2 tags into a borrowed buffer.
///
/// Tags appear in call order; ordering is not semantically significant.
/// Every writer method keeps the stream 8-aligned.
pub struct TagWriter<'a> {
    buf: &'a mut [u8],
    at: usize,
}

impl<'a> TagWriter<'a> {
    /// Starts an information structure at the beginning of `buf`.
    ///
    /// # Errors
    ///
    /// Returns [`MbiError::BufferFull`] if `buf` cannot even hold the
    /// header and terminator.
    pub fn new(buf: &'a mut [u8]) -> Result<Self, MbiError> {
        if buf.len() < 16 {
            return Err(MbiError::BufferFull);
        }
        buf[..8].fill(0);
        Ok(Self { buf, at: 8 })
    }

    /// Bytes used so far (header included).
    #[must_use]
    pub fn len(&self) -> usize {
        self.at
    }

    /// `true` if nothing but the header has been written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.at == 8
    }

    /// Rolls the stream back to a previously observed [`TagWriter::len`].
    ///
    /// Used when a group of tags must be re-emitted (the UEFI memory map
    /// is written, then `ExitBootServices` may fail and invalidate it).
    pub fn rewind(&mut self, len: usize) {
        debug_assert!(len >= 8 && len <= self.at);
        self.at = len.clamp(8, self.at);
    }

    /// Reserves a tag of `payload` bytes, returning the payload slice.
    fn tag(&mut self, kind: u32, payload: usize) -> Result<&mut [u8], MbiError> {
        let size = 8 + payload;
        let advance = (size + TAG_ALIGN - 1) & !(TAG_ALIGN - 1);
        if self.at + advance + 8 > self.buf.len() {
            return Err(MbiError::BufferFull);
        }
        let start = self.at;
        self.buf[start..start + advance].fill(0);
        self.buf[start..start + 4].copy_from_slice(&kind.to_le_bytes());
        self.buf[start + 4..start + 8].copy_from_slice(&(size as u32).to_le_bytes());
        self.at += advance;
        Ok(&mut self.buf[start + 8..start + size])
    }

    /// Type 2: boot loader name, NUL-terminated.
    ///
    /// # Errors
    ///
    /// [`MbiError::BufferFull`].
    pub fn loader_name(&mut self, name: &str) -> Result<(), MbiError> {
        let payload = self.tag(tag::BOOT_LOADER_NAME, name.len() + 1)?;
        payload[..name.len()].copy_from_slice(name.as_bytes());
        Ok(())
    }

    /// Type 1: kernel command line, NUL-terminated.
    ///
    /// Returns the byte offset of the string inside the buffer; the
    /// loader re-points its own command-line reference there so later
    /// consumers see the NUL-terminated copy.
    ///
    /// # Errors
    ///
    /// [`MbiError::BufferFull`].
    pub fn cmdline(&mut self, cmdline: &str) -> Result<usize, MbiError> {
        let string_at = self.at + 8;
        let payload = self.tag(tag::CMDLINE, cmdline.len() + 1)?;
        payload[..cmdline.len()].copy_from_slice(cmdline.as_bytes());
        Ok(string_at)
    }

    /// Type 3: one boot module.
    ///
    /// # Errors
    ///
    /// [`MbiError::BufferFull`].
    pub fn module(&mut self, start: u32, end: u32, cmdline: &str) -> Result<(), MbiError> {
        let payload = self.tag(tag::MODULE, 8 + cmdline.len() + 1)?;
        payload[..4].copy_from_slice(&start.to_le_bytes());
        payload[4..8].copy_from_slice(&end.to_le_bytes());
        payload[8..8 + cmdline.len()].copy_from_slice(cmdline.as_bytes());
        Ok(())
    }

    /// Type 6: memory map (`entry_size` 24, `entry_version` 0).
    ///
    /// `entries` must already be sorted ascending by base address.
    ///
    /// # Errors
    ///
    /// [`MbiError::BufferFull`].
    pub fn mmap(&mut self, entries: &[MmapEntry]) -> Result<(), MbiError> {
        let payload = self.tag(tag::MMAP, 8 + entries.len() * 24)?;
        payload[..4].copy_from_slice(&24u32.to_le_bytes());
        payload[4..8].copy_from_slice(&0u32.to_le_bytes());
        for (i, entry) in entries.iter().enumerate() {
            let at = 8 + i * 24;
            payload[at..at + 8].copy_from_slice(&entry.base.to_le_bytes());
            payload[at + 8..at + 16].copy_from_slice(&entry.length.to_le_bytes());
            payload[at + 16..at + 20].copy_from_slice(&entry.kind.to_le_bytes());
            payload[at + 20..at + 24].copy_from_slice(&entry.firmware_type.to_le_bytes());
        }
        Ok(())
    }

    /// Type 8: framebuffer description (`framebuffer_type` 1, direct RGB).
    ///
    /// # Errors
    ///
    /// [`MbiError::BufferFull`].
    pub fn framebuffer(&mut self, info: &FramebufferInfo) -> Result<(), MbiError> {
        let payload = self.tag(tag::FRAMEBUFFER, 32)?;
        payload[..8].copy_from_slice(&info.address.to_le_bytes());
        payload[8..12].copy_from_slice(&info.pitch.to_le_bytes());
        payload[12..16].copy_from_slice(&info.width.to_le_bytes());
        payload[16..20].copy_from_slice(&info.height.to_le_bytes());
        payload[20] = info.bpp;
        payload[21] = 1; // direct RGB
        payload[24] = info.red_position;
        payload[25] = info.red_size;
        payload[26] = info.green_position;
        payload[27] = info.green_size;
        payload[28] = info.blue_position;
        payload[29] = info.blue_size;
        Ok(())
    }

    /// Type 256: raw EDID block.
    ///
    /// # Errors
    ///
    /// [`MbiError::BufferFull`].
    pub fn edid(&mut self, data: &[u8]) -> Result<(), MbiError> {
        let payload = self.tag(tag::EDID, data.len())?;
        payload.copy_from_slice(data);
        Ok(())
    }

    /// Type 14: the first 24 bytes of an ACPI 1.0 RSDP.
    ///
    /// # Errors
    ///
    /// [`MbiError::BufferFull`].
    pub fn acpi_old(&mut self, rsdp: &[u8; 24]) -> Result<(), MbiError> {
        let payload = self.tag(tag::ACPI_OLD, 24)?;
        payload.copy_from_slice(rsdp);
        Ok(())
    }

    /// Type 15: the first 36 bytes of an ACPI 2.0+ RSDP.
    ///
    /// # Errors
    ///
    /// [`MbiError::BufferFull`].
    pub fn acpi_new(&mut self, rsdp: &[u8; 36]) -> Result<(), MbiError> {
        let payload = self.tag(tag::ACPI_NEW, 36)?;
        payload.copy_from_slice(rsdp);
        Ok(())
    }

    /// Type 13: SMBIOS entry point.
    ///
    /// # Errors
    ///
    /// [`MbiError::BufferFull`].
    pub fn smbios(&mut self, major: u8, minor: u8, entry: &[u8]) -> Result<(), MbiError> {
        let payload = self.tag(tag::SMBIOS, 8 + entry.len())?;
        payload[0] = major;
        payload[1] = minor;
        payload[8..].copy_from_slice(entry);
        Ok(())
    }

    /// Type 12: UEFI system table pointer.
    ///
    /// # Errors
    ///
    /// [`MbiError::BufferFull`].
    pub fn efi64(&mut self, system_table: u64) -> Result<(), MbiError> {
        let payload = self.tag(tag::EFI64, 8)?;
        payload.copy_from_slice(&system_table.to_le_bytes());
        Ok(())
    }

    /// Type 20: UEFI image handle pointer.
    ///
    /// # Errors
    ///
    /// [`MbiError::BufferFull`].
    pub fn efi64_ih(&mut self, image_handle: u64) -> Result<(), MbiError> {
        let payload = self.tag(tag::EFI64_IH, 8)?;
        payload.copy_from_slice(&image_handle.to_le_bytes());
        Ok(())
    }

    /// Type 257: core counts for SMP-aware kernels.
    ///
    /// # Errors
    ///
    /// [`MbiError::BufferFull`].
    pub fn smp(&mut self, numcores: u32, running: u32, bspid: u32) -> Result<(), MbiError> {
        let payload = self.tag(tag::SMP, 12)?;
        payload[..4].copy_from_slice(&numcores.to_le_bytes());
        payload[4..8].copy_from_slice(&running.to_le_bytes());
        payload[8..12].copy_from_slice(&bspid.to_le_bytes());
        Ok(())
    }

    /// Type 258: boot (and optionally root) partition UUID.
    ///
    /// # Errors
    ///
    /// [`MbiError::BufferFull`].
    pub fn partuuid(
        &mut self,
        boot: &[u8; 16],
        root: Option<&[u8; 16]>,
    ) -> Result<(), MbiError> {
        match root {
            Some(root) => {
                let payload = self.tag(tag::PARTUUID, 32)?;
                payload[..16].copy_from_slice(boot);
                payload[16..].copy_from_slice(root);
            }
            None => {
                let payload = self.tag(tag::PARTUUID, 16)?;
                payload.copy_from_slice(boot);
            }
        }
        Ok(())
    }

    /// Writes the terminator and patches `total_size`.
    ///
    /// Returns the total byte length of the information structure.
    ///
    /// # Errors
    ///
    /// [`MbiError::BufferFull`].
    pub fn finish(mut self) -> Result<usize, MbiError> {
        self.tag(tag::END, 0)?;
        let total = self.at as u32;
        self.buf[..4].copy_from_slice(&total.to_le_bytes());
        Ok(self.at)
    }
}

/// A `(type, payload)` view of one tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tag<'a> {
    /// Tag type.
    pub kind: u32,
    /// Payload bytes (after the 8-byte tag header).
    pub payload: &'a [u8],
}

/// Iterator over the tags of a finished information structure.
pub struct TagIter<'a> {
    buf: &'a [u8],
    at: usize,
    done: bool,
}

impl<'a> TagIter<'a> {
    /// Parses the MBI header and returns a tag iterator.
    ///
    /// # Errors
    ///
    /// Returns [`MbiError::Malformed`] if `total_size` exceeds the
    /// buffer or is shorter than the header.
    pub fn new(buf: &'a [u8]) -> Result<Self, MbiError> {
        let total = u32::read_from(buf).ok_or(MbiError::Malformed)? as usize;
        if total < 16 || total > buf.len() {
            return Err(MbiError::Malformed);
        }
        Ok(Self {
            buf: &buf[..total],
            at: 8,
            done: false,
        })
    }
}

impl<'a> Iterator for TagIter<'a> {
    type Item = Tag<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let kind = u32::read_at(self.buf, self.at)?;
        let size = u32::read_at(self.buf, self.at + 4)? as usize;
        if size < 8 || self.at + size > self.buf.len() {
            self.done = true;
            return None;
        }
        let payload = &self.buf[self.at + 8..self.at + size];
        self.at += (size + TAG_ALIGN - 1) & !(TAG_ALIGN - 1);
        if kind == tag::END {
            self.done = true;
        }
        Some(Tag { kind, payload })
    }
}

#[cfg(test)]
extern crate alloc;

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use alloc::vec::Vec;

    fn sample_fb() -> FramebufferInfo {
        FramebufferInfo {
            address: 0xFD00_0000,
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
        }
    }

    #[test]
    fn structure_invariants_hold() {
        let mut buf = vec![0u8; 4096];
        let mut writer = TagWriter::new(&mut buf).unwrap();
        writer.loader_name(LOADER_NAME).unwrap();
        writer.cmdline("root=/dev/sda1 quiet").unwrap();
        writer.module(0x10_0000, 0x10_8000, "initrd.gz").unwrap();
        writer
            .mmap(&[
                MmapEntry {
                    base: 0,
                    length: 0x9_F000,
                    kind: memory_kind::AVAILABLE,
                    firmware_type: 0,
                },
                MmapEntry {
                    base: 0x10_0000,
                    length: 0x3FF0_0000,
                    kind: memory_kind::AVAILABLE,
                    firmware_type: 0,
                },
            ])
            .unwrap();
        writer.framebuffer(&sample_fb()).unwrap();
        writer.smp(4, 4, 0).unwrap();
        writer.partuuid(&[0x11; 16], None).unwrap();
        let total = writer.finish().unwrap();

        // total_size equals the offset of the terminator tag + 8.
        assert_eq!(u32::from_le_bytes(buf[..4].try_into().unwrap()) as usize, total);
        assert_eq!(total % 8, 0);

        let tags: Vec<Tag> = TagIter::new(&buf).unwrap().collect();
        // Every tag 8-aligned; exactly one terminator, last.
        let mut at = 8usize;
        for tag in &tags {
            assert_eq!(at % 8, 0);
            at += (8 + tag.payload.len() + 7) & !7;
        }
        assert_eq!(tags.iter().filter(|t| t.kind == tag::END).count(), 1);
        assert_eq!(tags.last().unwrap().kind, tag::END);
        assert_eq!(tags.last().unwrap().payload.len(), 0);
    }

    #[test]
    fn loader_name_tag_sizes() {
        let mut buf = vec![0u8; 256];
        let mut writer = TagWriter::new(&mut buf).unwrap();
        writer.loader_name(LOADER_NAME).unwrap();
        writer.loader_name(LOADER_NAME_BACKUP).unwrap();
        writer.finish().unwrap();

        let sizes: Vec<u32> = TagIter::new(&buf)
            .unwrap()
            .filter(|t| t.kind == tag::BOOT_LOADER_NAME)
            .map(|t| 8 + t.payload.len() as u32)
            .collect();
        assert_eq!(sizes, &[19, 28]);
    }

    #[test]
    fn cmdline_offset_points_at_the_copy() {
        let mut buf = vec![0u8; 256];
        let mut writer = TagWriter::new(&mut buf).unwrap();
        let at = writer.cmdline("console=ttyS0").unwrap();
        writer.finish().unwrap();
        assert_eq!(&buf[at..at + 14], b"console=ttyS0\0");
    }

    #[test]
    fn mmap_entries_round_trip() {
        let entries = [
            MmapEntry {
                base: 0x1000,
                length: 0x2000,
                kind: memory_kind::AVAILABLE,
                firmware_type: 7,
            },
            MmapEntry {
                base: 0xE000_0000,
                length: 0x1000_0000,
                kind: memory_kind::RESERVED,
                firmware_type: 11,
            },
        ];
        let mut buf = vec![0u8; 512];
        let mut writer = TagWriter::new(&mut buf).unwrap();
        writer.mmap(&entries).unwrap();
        writer.finish().unwrap();

        let mmap = TagIter::new(&buf)
            .unwrap()
            .find(|t| t.kind == tag::MMAP)
            .unwrap();
        assert_eq!(&mmap.payload[..4], &24u32.to_le_bytes());
        assert_eq!(&mmap.payload[4..8], &0u32.to_le_bytes());
        assert_eq!(mmap.payload.len(), 8 + 2 * 24);
        let second = &mmap.payload[8 + 24..8 + 48];
        assert_eq!(&second[..8], &0xE000_0000u64.to_le_bytes());
        assert_eq!(&second[16..20], &memory_kind::RESERVED.to_le_bytes());
        assert_eq!(&second[20..24], &11u32.to_le_bytes());
    }

    #[test]
    fn framebuffer_tag_layout() {
        let mut buf = vec![0u8; 256];
        let mut writer = TagWriter::new(&mut buf).unwrap();
        writer.framebuffer(&sample_fb()).unwrap();
        writer.finish().unwrap();

        let fb = TagIter::new(&buf)
            .unwrap()
            .find(|t| t.kind == tag::FRAMEBUFFER)
            .unwrap();
        assert_eq!(fb.payload.len(), 32);
        assert_eq!(&fb.payload[..8], &0xFD00_0000u64.to_le_bytes());
        assert_eq!(fb.payload[20], 32); // bpp
        assert_eq!(fb.payload[21], 1); // direct RGB
        assert_eq!(fb.payload[24], 16); // red position
        assert_eq!(fb.payload[29], 8); // blue size
    }

    #[test]
    fn partuuid_sizes() {
        let mut buf = vec![0u8; 256];
        let mut writer = TagWriter::new(&mut buf).unwrap();
        writer.partuuid(&[0xAB; 16], None).unwrap();
        writer.partuuid(&[0xCD; 16], Some(&[0xEF; 16])).unwrap();
        writer.finish().unwrap();

        let uuids: Vec<Tag> = TagIter::new(&buf)
            .unwrap()
            .filter(|t| t.kind == tag::PARTUUID)
            .collect();
        assert_eq!(uuids[0].payload.len(), 16);
        assert_eq!(uuids[1].payload.len(), 32);
        assert_eq!(uuids[1].payload[16], 0xEF);
    }

    #[test]
    fn writer_reports_exhaustion() {
        let mut buf = vec![0u8; 40];
        let mut writer = TagWriter::new(&mut buf).unwrap();
        writer.loader_name(LOADER_NAME).unwrap();
        assert_eq!(writer.cmdline("a long command line that will not fit"), Err(MbiError::BufferFull));
        // The writer can still be finished after a full error.
        assert!(writer.finish().is_ok());
    }

    #[test]
    fn pack_color_follows_field_positions() {
        let fb = sample_fb();
        assert_eq!(fb.pack_color(0x0012_3456), 0x0012_3456);

        let rgb565 = FramebufferInfo {
            bpp: 16,
            red_position: 11,
            red_size: 5,
            green_position: 5,
            green_size: 6,
            blue_position: 0,
            blue_size: 5,
            ..fb
        };
        assert_eq!(rgb565.pack_color(0x00FF_FFFF), 0xFFFF);
        assert_eq!(rgb565.pack_color(0x00FF_0000), 0xF800);
        assert_eq!(rgb565.pack_color(0x0000_FF00), 0x07E0);
    }

    #[test]
    fn iter_rejects_bad_header() {
        assert!(TagIter::new(&[0u8; 4]).is_err());
        let mut buf = vec![0u8; 32];
        buf[..4].copy_from_slice(&64u32.to_le_bytes()); // longer than buffer
        assert!(TagIter::new(&buf).is_err());
    }
}
