//! Coreboot payload firmware variant.
//!
//! Coreboot leaves a record table ("LBIO") in low memory describing RAM
//! ranges, the framebuffer the VGA option ROM or native init set up, and
//! the consoles. There are no runtime services: disk access is ATA PIO,
//! keyboard polling is PS/2, timing is the DRAM refresh toggle.

use planck_noalloc::vec::ArrayVec;
use simpleboot_fat::SECTOR_SIZE;
use simpleboot_multiboot2::{FramebufferInfo, MmapEntry, memory_kind};

use crate::arch::x86_64::inb;
use crate::error::BootError;
use crate::fw::{MAX_MEMORY_REGIONS, MemoryMap, SystemTables};

/// Coreboot table record tags.
const CB_TAG_MEMORY: u32 = 0x01;
const CB_TAG_FORWARD: u32 = 0x11;
const CB_TAG_FRAMEBUFFER: u32 = 0x12;
const CB_TAG_SMBIOS: u32 = 0x37;
const CB_TAG_ACPI_RSDP: u32 = 0x43;

/// Coreboot memory range types.
const CB_MEM_RAM: u32 = 1;
const CB_MEM_ACPI: u32 = 3;
const CB_MEM_NVS: u32 = 4;
const CB_MEM_UNUSABLE: u32 = 5;

/// The coreboot firmware context, populated once from the record table.
pub struct CorebootFw {
    memory: ArrayVec<MmapEntry, MAX_MEMORY_REGIONS>,
    framebuffer: Option<FramebufferInfo>,
    rsdp: Option<u64>,
    smbios: Option<u64>,
}

impl CorebootFw {
    /// Locates and parses the coreboot tables.
    ///
    /// Returns `None` if no `LBIO` header is found, in which case the
    /// entry point falls back to the BIOS variant.
    pub fn probe() -> Option<Self> {
        let header = find_header(0x0, 0x1000).or_else(|| find_header(0x9_6000, 0xA_0000))?;
        let mut fw = Self {
            memory: ArrayVec::new(),
            framebuffer: None,
            rsdp: None,
            smbios: None,
        };
        fw.parse(header);
        Some(fw)
    }

    /// Parses one record table, following at most one forward pointer.
    fn parse(&mut self, header: u64) {
        // SAFETY: the header was validated by `find_header`.
        let (table_bytes, entries) = unsafe {
            (
                (header as *const u32).add(3).read_unaligned(),
                (header as *const u32).add(1).read_unaligned() as u64 + header,
            )
        };

        let mut at = entries;
        let end = entries + u64::from(table_bytes);
        while at + 8 <= end {
            // SAFETY: records stay inside the declared table bounds.
            let (tag, size) = unsafe {
                (
                    (at as *const u32).read_unaligned(),
                    (at as *const u32).add(1).read_unaligned() as u64,
                )
            };
            if size < 8 || at + size > end {
                break;
            }
            let payload = at + 8;
            match tag {
                CB_TAG_FORWARD => {
                    // SAFETY: in-bounds record payload.
                    let next = unsafe { (payload as *const u64).read_unaligned() };
                    if find_header(next, next + 1).is_some() {
                        self.parse(next);
                        return;
                    }
                }
                CB_TAG_MEMORY => self.parse_memory(payload, size - 8),
                CB_TAG_FRAMEBUFFER => self.parse_framebuffer(payload),
                CB_TAG_SMBIOS => {
                    // SAFETY: in-bounds record payload.
                    let entry = unsafe { (payload as *const u64).read_unaligned() };
                    if entry != 0 {
                        self.smbios = Some(entry);
                    }
                }
                CB_TAG_ACPI_RSDP => {
                    // SAFETY: in-bounds record payload.
                    self.rsdp = Some(unsafe { (payload as *const u64).read_unaligned() });
                }
                _ => {}
            }
            at += size;
        }
    }

    /// Each range is 20 bytes: address, size (both 64-bit), type.
    fn parse_memory(&mut self, payload: u64, bytes: u64) {
        let count = bytes / 20;
        for index in 0..count {
            let at = payload + index * 20;
            // SAFETY: ranges stay inside the record.
            let (base, length, cb_kind) = unsafe {
                (
                    (at as *const u64).read_unaligned(),
                    ((at + 8) as *const u64).read_unaligned(),
                    ((at + 16) as *const u32).read_unaligned(),
                )
            };
            let kind = match cb_kind {
                CB_MEM_RAM => memory_kind::AVAILABLE,
                CB_MEM_ACPI => memory_kind::ACPI_RECLAIMABLE,
                CB_MEM_NVS => memory_kind::ACPI_NVS,
                CB_MEM_UNUSABLE => memory_kind::BAD_RAM,
                _ => memory_kind::RESERVED,
            };
            if self.memory.len() < MAX_MEMORY_REGIONS {
                self.memory.push(MmapEntry {
                    base,
                    length,
                    kind,
                    firmware_type: cb_kind,
                });
            }
        }
    }

    fn parse_framebuffer(&mut self, payload: u64) {
        // SAFETY: framebuffer record layout per coreboot's lb_framebuffer.
        unsafe {
            let address = (payload as *const u64).read_unaligned();
            let width = ((payload + 8) as *const u32).read_unaligned();
            let height = ((payload + 12) as *const u32).read_unaligned();
            let pitch = ((payload + 16) as *const u32).read_unaligned();
            let at = |offset: u64| ((payload + offset) as *const u8).read();
            if address == 0 || width == 0 {
                return;
            }
            self.framebuffer = Some(FramebufferInfo {
                address,
                pitch,
                width,
                height,
                bpp: at(20),
                red_position: at(21),
                red_size: at(22),
                green_position: at(23),
                green_size: at(24),
                blue_position: at(25),
                blue_size: at(26),
            });
        }
    }

    /// ATA PIO only; coreboot offers no disk services.
    ///
    /// # Errors
    ///
    /// [`BootError::IoError`].
    pub fn sector_read(&mut self, lba: u64, buf: &mut [u8; SECTOR_SIZE]) -> Result<(), BootError> {
        super::bios::ata_read(lba, buf)
    }

    /// Returns the firmware-initialised framebuffer if it fits the
    /// request; coreboot payloads cannot switch modes.
    pub fn framebuffer_acquire(
        &mut self,
        width: u32,
        height: u32,
        _bpp: u32,
    ) -> Option<FramebufferInfo> {
        self.framebuffer
            .filter(|fb| fb.width <= width && fb.height <= height)
            .or(self.framebuffer)
    }

    /// The memory ranges recorded in the coreboot table.
    ///
    /// # Errors
    ///
    /// [`BootError::IoError`] if the table carried no memory record.
    pub fn memory_map(&mut self) -> Result<MemoryMap, BootError> {
        if self.memory.is_empty() {
            return Err(BootError::IoError);
        }
        let mut map = MemoryMap::new();
        for entry in self.memory.as_slice() {
            map.entries.push(*entry);
        }
        Ok(map)
    }

    /// Busy wait against the 15 us DRAM refresh toggle.
    pub fn delay_us(&mut self, microseconds: u64) {
        let toggles = microseconds / 15 + 1;
        let mut last = unsafe { inb(0x61) } & 0x10;
        let mut seen = 0u64;
        while seen < toggles {
            let now = unsafe { inb(0x61) } & 0x10;
            if now != last {
                last = now;
                seen += 1;
            }
            core::hint::spin_loop();
        }
    }

    /// PS/2 output buffer poll.
    pub fn poll_key(&mut self) -> bool {
        unsafe { inb(0x64) & 1 != 0 }
    }

    /// RSDP and SMBIOS from the coreboot table, with the ROM window
    /// scan as a fallback for boards whose tables predate those records.
    pub fn find_system_tables(&mut self) -> SystemTables {
        let mut tables = SystemTables::default();
        tables.rsdp = self.rsdp;
        tables.smbios = self.smbios;
        // SAFETY: identity-mapped ROM window.
        let window = unsafe {
            core::slice::from_raw_parts(0xE_0000 as *const u8, 0x10_0000 - 0xE_0000)
        };
        if tables.rsdp.is_none() {
            tables.rsdp = simpleboot_acpi::rsdp::scan_region(window)
                .map(|offset| 0xE_0000 + offset as u64);
        }
        if tables.smbios.is_none() {
            tables.smbios = scan_smbios(window).map(|offset| 0xE_0000 + offset as u64);
        }
        tables
    }
}

/// Scans a window on 16-byte boundaries for a checksum-valid `_SM_`
/// entry point.
fn scan_smbios(window: &[u8]) -> Option<usize> {
    let mut at = 0;
    while at + 32 <= window.len() {
        if &window[at..at + 4] == b"_SM_" {
            let length = usize::from(window[at + 5]);
            let entry = &window[at..(at + length).min(window.len())];
            let sum = entry.iter().fold(0u8, |s, &b| s.wrapping_add(b));
            if sum == 0 {
                return Some(at);
            }
        }
        at += 16;
    }
    None
}

/// Scans `[start, end)` on 16-byte boundaries for a valid `LBIO` header.
fn find_header(start: u64, end: u64) -> Option<u64> {
    let mut at = start;
    loop {
        // SAFETY: low memory is identity mapped.
        let sig = unsafe { (at as *const [u8; 4]).read() };
        if &sig == b"LBIO" {
            return Some(at);
        }
        at += 16;
        if at >= end {
            return None;
        }
    }
}
