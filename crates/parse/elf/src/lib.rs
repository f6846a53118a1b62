//! `simpleboot-elf` --- the ELF subset a kernel loader needs, `no_std`.
//!
//! Parses just enough of an ELF32 or ELF64 executable to load it: the
//! identification bytes, the machine type, the entry point, and the
//! `PT_LOAD` program headers. Section headers, symbols, and relocations
//! are out of scope; a Multiboot2 kernel is loaded exactly as its program
//! headers describe.
//!
//! # Usage
//!
//! ```
//! # use simpleboot_elf::*;
//! # fn load(file: &[u8]) -> Result<(), ElfError> {
//! let image = ElfImage::parse(file)?;
//! for segment in image.load_segments() {
//!     // copy segment.filesz bytes from file[segment.offset..]
//!     // to segment.vaddr, zero up to segment.memsz
//! }
//! # Ok(())
//! # }
//! ```

#![no_std]
#![warn(missing_docs)]

use simpleboot_binparse::FromBytes;

/// The four ELF identification magic bytes.
pub const ELF_MAGIC: &[u8; 4] = b"\x7fELF";

/// `p_type` value of a loadable program header.
pub const PT_LOAD: u32 = 1;

/// Errors produced while parsing an ELF image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfError {
    /// The file does not start with `\x7fELF`.
    BadMagic,
    /// `EI_CLASS` is neither ELFCLASS32 nor ELFCLASS64.
    UnsupportedClass,
    /// The machine type is not one the loader can hand control to.
    UnsupportedMachine,
    /// The file is shorter than its headers claim.
    Truncated,
}

/// Word size of the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfClass {
    /// 32-bit image (ELFCLASS32).
    Elf32,
    /// 64-bit image (ELFCLASS64).
    Elf64,
}

/// Machine types the loader supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfMachine {
    /// EM_386 (3).
    I386,
    /// EM_X86_64 (62).
    X86_64,
    /// EM_AARCH64 (183).
    Aarch64,
}

impl ElfMachine {
    fn from_u16(raw: u16) -> Option<Self> {
        match raw {
            3 => Some(Self::I386),
            62 => Some(Self::X86_64),
            183 => Some(Self::Aarch64),
            _ => None,
        }
    }
}

/// A loadable segment, normalised to 64-bit fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    /// Byte offset of the segment contents within the file.
    pub offset: u64,
    /// Number of content bytes in the file.
    pub filesz: u64,
    /// Virtual load address.
    pub vaddr: u64,
    /// In-memory size; the `memsz - filesz` tail is zero-filled (BSS).
    pub memsz: u64,
    /// Segment flags (`PF_X` = 1, `PF_W` = 2, `PF_R` = 4).
    pub flags: u32,
}

/// A parsed ELF executable header with access to its program headers.
pub struct ElfImage<'a> {
    data: &'a [u8],
    class: ElfClass,
    machine: ElfMachine,
    entry: u64,
    phoff: u64,
    phentsize: u16,
    phnum: u16,
}

impl<'a> ElfImage<'a> {
    /// Returns `true` if `data` starts with the ELF magic.
    #[must_use]
    pub fn sniff(data: &[u8]) -> bool {
        data.len() >= 4 && &data[..4] == ELF_MAGIC
    }

    /// Parses the ELF header of `data`.
    ///
    /// # Errors
    ///
    /// Returns an [`ElfError`] on bad magic, unsupported class or machine,
    /// or a header extending past the end of the file.
    pub fn parse(data: &'a [u8]) -> Result<Self, ElfError> {
        if !Self::sniff(data) {
            return Err(ElfError::BadMagic);
        }
        let class = match data.get(4) {
            Some(1) => ElfClass::Elf32,
            Some(2) => ElfClass::Elf64,
            _ => return Err(ElfError::UnsupportedClass),
        };
        let machine_raw = u16::read_at(data, 18).ok_or(ElfError::Truncated)?;
        let machine = ElfMachine::from_u16(machine_raw).ok_or(ElfError::UnsupportedMachine)?;

        let (entry, phoff, phentsize, phnum) = match class {
            ElfClass::Elf32 => (
                u64::from(u32::read_at(data, 24).ok_or(ElfError::Truncated)?),
                u64::from(u32::read_at(data, 28).ok_or(ElfError::Truncated)?),
                u16::read_at(data, 42).ok_or(ElfError::Truncated)?,
                u16::read_at(data, 44).ok_or(ElfError::Truncated)?,
            ),
            ElfClass::Elf64 => (
                u64::read_at(data, 24).ok_or(ElfError::Truncated)?,
                u64::read_at(data, 32).ok_or(ElfError::Truncated)?,
                u16::read_at(data, 54).ok_or(ElfError::Truncated)?,
                u16::read_at(data, 56).ok_or(ElfError::Truncated)?,
            ),
        };

        let table_end = phoff
            .checked_add(u64::from(phentsize) * u64::from(phnum))
            .ok_or(ElfError::Truncated)?;
        if table_end > data.len() as u64 {
            return Err(ElfError::Truncated);
        }

        Ok(Self {
            data,
            class,
            machine,
            entry,
            phoff,
            phentsize,
            phnum,
        })
    }

    /// Returns the image word size.
    #[must_use]
    pub fn class(&self) -> ElfClass {
        self.class
    }

    /// Returns the machine type.
    #[must_use]
    pub fn machine(&self) -> ElfMachine {
        self.machine
    }

    /// Returns the entry point virtual address.
    #[must_use]
    pub fn entry(&self) -> u64 {
        self.entry
    }

    /// Returns an iterator over the `PT_LOAD` program headers.
    #[must_use]
    pub fn load_segments(&self) -> LoadSegmentIter<'a> {
        LoadSegmentIter {
            data: self.data,
            class: self.class,
            offset: self.phoff as usize,
            entsize: self.phentsize as usize,
            remaining: self.phnum,
        }
    }
}

/// Iterator over the `PT_LOAD` segments of an image.
pub struct LoadSegmentIter<'a> {
    data: &'a [u8],
    class: ElfClass,
    offset: usize,
    entsize: usize,
    remaining: u16,
}

impl Iterator for LoadSegmentIter<'_> {
    type Item = Segment;

    fn next(&mut self) -> Option<Self::Item> {
        while self.remaining > 0 {
            let at = self.offset;
            self.offset += self.entsize;
            self.remaining -= 1;

            let p_type = u32::read_at(self.data, at)?;
            if p_type != PT_LOAD {
                continue;
            }
            let segment = match self.class {
                ElfClass::Elf32 => Segment {
                    offset: u64::from(u32::read_at(self.data, at + 4)?),
                    vaddr: u64::from(u32::read_at(self.data, at + 8)?),
                    filesz: u64::from(u32::read_at(self.data, at + 16)?),
                    memsz: u64::from(u32::read_at(self.data, at + 20)?),
                    flags: u32::read_at(self.data, at + 24)?,
                },
                ElfClass::Elf64 => Segment {
                    flags: u32::read_at(self.data, at + 4)?,
                    offset: u64::read_at(self.data, at + 8)?,
                    vaddr: u64::read_at(self.data, at + 16)?,
                    filesz: u64::read_at(self.data, at + 32)?,
                    memsz: u64::read_at(self.data, at + 40)?,
                },
            };
            return Some(segment);
        }
        None
    }
}

#[cfg(test)]
extern crate alloc;

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use alloc::vec::Vec;

    fn build_elf64(machine: u16, entry: u64, segments: &[(u32, u64, u64, u64, u64)]) -> Vec<u8> {
        let phoff = 64usize;
        let mut elf = vec![0u8; phoff + segments.len() * 56];
        elf[..4].copy_from_slice(ELF_MAGIC);
        elf[4] = 2; // ELFCLASS64
        elf[5] = 1; // little endian
        elf[6] = 1; // EV_CURRENT
        elf[16..18].copy_from_slice(&2u16.to_le_bytes()); // ET_EXEC
        elf[18..20].copy_from_slice(&machine.to_le_bytes());
        elf[24..32].copy_from_slice(&entry.to_le_bytes());
        elf[32..40].copy_from_slice(&(phoff as u64).to_le_bytes());
        elf[54..56].copy_from_slice(&56u16.to_le_bytes());
        elf[56..58].copy_from_slice(&(segments.len() as u16).to_le_bytes());

        for (i, &(p_type, offset, vaddr, filesz, memsz)) in segments.iter().enumerate() {
            let at = phoff + i * 56;
            elf[at..at + 4].copy_from_slice(&p_type.to_le_bytes());
            elf[at + 4..at + 8].copy_from_slice(&5u32.to_le_bytes()); // R+X
            elf[at + 8..at + 16].copy_from_slice(&offset.to_le_bytes());
            elf[at + 16..at + 24].copy_from_slice(&vaddr.to_le_bytes());
            elf[at + 32..at + 40].copy_from_slice(&filesz.to_le_bytes());
            elf[at + 40..at + 48].copy_from_slice(&memsz.to_le_bytes());
        }
        elf
    }

    fn build_elf32(machine: u16, entry: u32, segments: &[(u32, u32, u32, u32, u32)]) -> Vec<u8> {
        let phoff = 52usize;
        let mut elf = vec![0u8; phoff + segments.len() * 32];
        elf[..4].copy_from_slice(ELF_MAGIC);
        elf[4] = 1; // ELFCLASS32
        elf[5] = 1;
        elf[6] = 1;
        elf[18..20].copy_from_slice(&machine.to_le_bytes());
        elf[24..28].copy_from_slice(&entry.to_le_bytes());
        elf[28..32].copy_from_slice(&(phoff as u32).to_le_bytes());
        elf[42..44].copy_from_slice(&32u16.to_le_bytes());
        elf[44..46].copy_from_slice(&(segments.len() as u16).to_le_bytes());

        for (i, &(p_type, offset, vaddr, filesz, memsz)) in segments.iter().enumerate() {
            let at = phoff + i * 32;
            elf[at..at + 4].copy_from_slice(&p_type.to_le_bytes());
            elf[at + 4..at + 8].copy_from_slice(&offset.to_le_bytes());
            elf[at + 8..at + 12].copy_from_slice(&vaddr.to_le_bytes());
            elf[at + 16..at + 20].copy_from_slice(&filesz.to_le_bytes());
            elf[at + 20..at + 24].copy_from_slice(&memsz.to_le_bytes());
            elf[at + 24..at + 28].copy_from_slice(&5u32.to_le_bytes());
        }
        elf
    }

    #[test]
    fn parse_elf64_load_segments() {
        let elf = build_elf64(
            62,
            0x10_0100,
            &[
                (PT_LOAD, 0x1000, 0x10_0000, 0x800, 0x1000),
                (4, 0x2000, 0, 0x10, 0x10), // PT_NOTE, skipped
                (PT_LOAD, 0x3000, 0x20_0000, 0x100, 0x100),
            ],
        );
        let image = ElfImage::parse(&elf).unwrap();
        assert_eq!(image.class(), ElfClass::Elf64);
        assert_eq!(image.machine(), ElfMachine::X86_64);
        assert_eq!(image.entry(), 0x10_0100);

        let segments: Vec<Segment> = image.load_segments().collect();
        assert_eq!(segments.len(), 2);
        assert_eq!(
            segments[0],
            Segment {
                offset: 0x1000,
                vaddr: 0x10_0000,
                filesz: 0x800,
                memsz: 0x1000,
                flags: 5,
            }
        );
        assert_eq!(segments[1].vaddr, 0x20_0000);
    }

    #[test]
    fn parse_elf32() {
        let elf = build_elf32(3, 0x10_0000, &[(PT_LOAD, 0x1000, 0x10_0000, 0x200, 0x200)]);
        let image = ElfImage::parse(&elf).unwrap();
        assert_eq!(image.class(), ElfClass::Elf32);
        assert_eq!(image.machine(), ElfMachine::I386);
        let segments: Vec<Segment> = image.load_segments().collect();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].memsz, 0x200);
    }

    #[test]
    fn rejects_bad_magic() {
        assert!(matches!(ElfImage::parse(b"MZxx"), Err(ElfError::BadMagic)));
    }

    #[test]
    fn rejects_unknown_machine() {
        let elf = build_elf64(40, 0, &[]); // EM_ARM (32-bit)
        assert!(matches!(
            ElfImage::parse(&elf),
            Err(ElfError::UnsupportedMachine)
        ));
    }

    #[test]
    fn rejects_truncated_ph_table() {
        let mut elf = build_elf64(62, 0, &[(PT_LOAD, 0, 0, 0, 0)]);
        elf.truncate(80);
        assert!(matches!(ElfImage::parse(&elf), Err(ElfError::Truncated)));
    }

    #[test]
    fn sniff_detects_elf() {
        assert!(ElfImage::sniff(b"\x7fELF rest"));
        assert!(!ElfImage::sniff(b"MZ"));
        assert!(!ElfImage::sniff(b""));
    }
}
