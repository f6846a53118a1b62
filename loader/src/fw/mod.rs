//! The firmware capability layer.
//!
//! Everything the rest of the loader needs from the platform goes
//! through [`Firmware`]: sector reads, console bring-up, framebuffer
//! acquisition, the memory map, page allocation, delays, key polling,
//! and system-table discovery. The variant is chosen once at the entry
//! point; no later code branches on which firmware is running, it just
//! calls the capability.

#[cfg(target_arch = "x86_64")]
pub mod bios;
#[cfg(target_arch = "x86_64")]
pub mod coreboot;
#[cfg(target_arch = "aarch64")]
pub mod rpi;
#[cfg(target_arch = "x86_64")]
pub mod uefi_fw;

use planck_noalloc::vec::ArrayVec;
use simpleboot_core::PhysAddr;
use simpleboot_fat::{BlockDevice, FatError, SECTOR_SIZE};
use simpleboot_multiboot2::{FramebufferInfo, MmapEntry};

use crate::error::BootError;

/// Upper bound on memory-map entries the loader tracks.
pub const MAX_MEMORY_REGIONS: usize = 128;

/// A staged memory map plus the derived top of RAM.
pub struct MemoryMap {
    /// Entries sorted ascending by base.
    pub entries: ArrayVec<MmapEntry, MAX_MEMORY_REGIONS>,
    /// Largest `base + length` over Available entries, rounded down to
    /// 2 MiB.
    pub top_of_ram: u64,
}

impl MemoryMap {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: ArrayVec::new(),
            top_of_ram: 0,
        }
    }

    /// Sorts by base and recomputes the top of RAM.
    pub fn normalise(&mut self) {
        let slice = self.entries.as_mut_slice();
        // Insertion sort: the list is nearly sorted already and tiny.
        for i in 1..slice.len() {
            let mut j = i;
            while j > 0 && slice[j - 1].base > slice[j].base {
                slice.swap(j - 1, j);
                j -= 1;
            }
        }
        let mut top = 0u64;
        for entry in slice.iter() {
            if entry.kind == simpleboot_multiboot2::memory_kind::AVAILABLE {
                top = top.max(entry.base + entry.length);
            }
        }
        self.top_of_ram = top & !(0x20_0000 - 1);
    }

    /// `true` if `[start, start+size)` lies entirely inside one
    /// Available entry.
    #[must_use]
    pub fn range_is_available(&self, start: u64, size: u64) -> bool {
        self.entries.as_slice().iter().any(|entry| {
            entry.kind == simpleboot_multiboot2::memory_kind::AVAILABLE
                && start >= entry.base
                && start + size <= entry.base + entry.length
        })
    }
}

/// Firmware-reported system description tables.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTables {
    /// Physical address of the ACPI RSDP.
    pub rsdp: Option<u64>,
    /// Physical address of the SMBIOS entry point.
    pub smbios: Option<u64>,
    /// Physical address of a flattened device tree.
    pub dtb: Option<u64>,
}

/// Which firmware brought the loader up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirmwareKind {
    /// 64-bit UEFI.
    Uefi,
    /// Legacy BIOS via stage-1.
    Bios,
    /// Coreboot payload.
    Coreboot,
    /// Raspberry Pi bare metal.
    Rpi,
}

/// The process-wide firmware handle, initialised once at entry.
pub enum Firmware {
    /// 64-bit UEFI: system table and image handle.
    #[cfg(target_arch = "x86_64")]
    Uefi(uefi_fw::UefiFw),
    /// Legacy BIOS: boot drive code from stage-1.
    #[cfg(target_arch = "x86_64")]
    Bios(bios::BiosFw),
    /// Coreboot payload: parsed sysinfo tables.
    #[cfg(target_arch = "x86_64")]
    Coreboot(coreboot::CorebootFw),
    /// Raspberry Pi: MMIO and EMMC bases plus the board revision.
    #[cfg(target_arch = "aarch64")]
    Rpi(rpi::RpiFw),
}

impl Firmware {
    /// Which variant is running.
    #[must_use]
    pub fn kind(&self) -> FirmwareKind {
        match self {
            #[cfg(target_arch = "x86_64")]
            Self::Uefi(_) => FirmwareKind::Uefi,
            #[cfg(target_arch = "x86_64")]
            Self::Bios(_) => FirmwareKind::Bios,
            #[cfg(target_arch = "x86_64")]
            Self::Coreboot(_) => FirmwareKind::Coreboot,
            #[cfg(target_arch = "aarch64")]
            Self::Rpi(_) => FirmwareKind::Rpi,
        }
    }

    /// Reads one 512-byte sector of the boot disk.
    ///
    /// # Errors
    ///
    /// [`BootError::IoError`] on device timeout or failure.
    pub fn sector_read(&mut self, lba: u64, buf: &mut [u8; SECTOR_SIZE]) -> Result<(), BootError> {
        match self {
            #[cfg(target_arch = "x86_64")]
            Self::Uefi(fw) => fw.sector_read(lba, buf),
            #[cfg(target_arch = "x86_64")]
            Self::Bios(fw) => fw.sector_read(lba, buf),
            #[cfg(target_arch = "x86_64")]
            Self::Coreboot(fw) => fw.sector_read(lba, buf),
            #[cfg(target_arch = "aarch64")]
            Self::Rpi(fw) => fw.sector_read(lba, buf),
        }
    }

    /// The firmware drive code (used for the MBR pseudo-UUID).
    #[must_use]
    pub fn drive_code(&self) -> u8 {
        match self {
            #[cfg(target_arch = "x86_64")]
            Self::Bios(fw) => fw.boot_drive,
            _ => 0x80,
        }
    }

    /// Finds the largest supported video mode not exceeding the request
    /// and switches to it.
    pub fn framebuffer_acquire(
        &mut self,
        width: u32,
        height: u32,
        bpp: u32,
    ) -> Option<FramebufferInfo> {
        match self {
            #[cfg(target_arch = "x86_64")]
            Self::Uefi(fw) => fw.framebuffer_acquire(width, height, bpp),
            #[cfg(target_arch = "x86_64")]
            Self::Bios(fw) => fw.framebuffer_acquire(width, height, bpp),
            #[cfg(target_arch = "x86_64")]
            Self::Coreboot(fw) => fw.framebuffer_acquire(width, height, bpp),
            #[cfg(target_arch = "aarch64")]
            Self::Rpi(fw) => fw.framebuffer_acquire(width, height, bpp),
        }
    }

    /// Snapshots the physical memory map, sorted by base.
    ///
    /// # Errors
    ///
    /// [`BootError::IoError`] if the firmware refuses to deliver one.
    pub fn memory_map(&mut self) -> Result<MemoryMap, BootError> {
        let mut map = match self {
            #[cfg(target_arch = "x86_64")]
            Self::Uefi(fw) => fw.memory_map()?,
            #[cfg(target_arch = "x86_64")]
            Self::Bios(fw) => fw.memory_map()?,
            #[cfg(target_arch = "x86_64")]
            Self::Coreboot(fw) => fw.memory_map()?,
            #[cfg(target_arch = "aarch64")]
            Self::Rpi(fw) => fw.memory_map()?,
        };
        map.normalise();
        Ok(map)
    }

    /// Returns a zeroed 4 KiB page.
    ///
    /// # Errors
    ///
    /// [`BootError::OutOfMemory`].
    pub fn alloc_page(&mut self) -> Result<PhysAddr, BootError> {
        match self {
            #[cfg(target_arch = "x86_64")]
            Self::Uefi(fw) => fw.alloc_page(),
            _ => crate::mem::bump_alloc_page(),
        }
    }

    /// Blocking busy wait.
    pub fn delay_us(&mut self, microseconds: u64) {
        match self {
            #[cfg(target_arch = "x86_64")]
            Self::Uefi(fw) => fw.delay_us(microseconds),
            #[cfg(target_arch = "x86_64")]
            Self::Bios(fw) => fw.delay_us(microseconds),
            #[cfg(target_arch = "x86_64")]
            Self::Coreboot(fw) => fw.delay_us(microseconds),
            #[cfg(target_arch = "aarch64")]
            Self::Rpi(_) => crate::arch::aarch64::delay_us(microseconds),
        }
    }

    /// Non-blocking: `true` if any key is waiting (backup-mode trigger).
    pub fn poll_key(&mut self) -> bool {
        match self {
            #[cfg(target_arch = "x86_64")]
            Self::Uefi(fw) => fw.poll_key(),
            #[cfg(target_arch = "x86_64")]
            Self::Bios(fw) => fw.poll_key(),
            #[cfg(target_arch = "x86_64")]
            Self::Coreboot(fw) => fw.poll_key(),
            #[cfg(target_arch = "aarch64")]
            Self::Rpi(fw) => fw.poll_key(),
        }
    }

    /// Locates the RSDP, SMBIOS, and DTB the firmware knows about.
    pub fn find_system_tables(&mut self) -> SystemTables {
        match self {
            #[cfg(target_arch = "x86_64")]
            Self::Uefi(fw) => fw.find_system_tables(),
            #[cfg(target_arch = "x86_64")]
            Self::Bios(fw) => fw.find_system_tables(),
            #[cfg(target_arch = "x86_64")]
            Self::Coreboot(fw) => fw.find_system_tables(),
            #[cfg(target_arch = "aarch64")]
            Self::Rpi(fw) => fw.find_system_tables(),
        }
    }

    /// The raw EDID block of the active display, if the firmware has one.
    pub fn edid(&mut self) -> Option<&'static [u8]> {
        match self {
            #[cfg(target_arch = "x86_64")]
            Self::Uefi(fw) => fw.edid(),
            #[cfg(target_arch = "x86_64")]
            Self::Bios(fw) => fw.edid(),
            _ => None,
        }
    }
}

impl BlockDevice for Firmware {
    fn read_sector(&mut self, lba: u64, buf: &mut [u8; SECTOR_SIZE]) -> Result<(), FatError> {
        self.sector_read(lba, buf).map_err(|_| FatError::Io)
    }
}

/// A copyable handle to the process-wide [`Firmware`] context.
///
/// The FAT volume must hold the block device while the loader keeps
/// calling other capabilities (allocation, key polling) between sector
/// reads. A reborrowing raw handle expresses that: every access creates
/// a short-lived exclusive borrow, and call sites never overlap because
/// the loader is single-threaded and none of the capability methods
/// call back into each other.
#[derive(Clone, Copy)]
pub struct FwHandle(*mut Firmware);

impl FwHandle {
    /// Wraps the firmware context.
    ///
    /// # Safety
    ///
    /// `fw` must stay alive and unaliased for the rest of the boot: the
    /// caller must not touch the original binding again.
    pub unsafe fn new(fw: *mut Firmware) -> Self {
        Self(fw)
    }

    #[expect(clippy::mut_from_ref, reason = "reborrowing handle, see type docs")]
    fn get(&self) -> &mut Firmware {
        // SAFETY: see the type-level contract.
        unsafe { &mut *self.0 }
    }

    /// See [`Firmware::kind`].
    #[must_use]
    pub fn kind(self) -> FirmwareKind {
        self.get().kind()
    }

    /// See [`Firmware::drive_code`].
    #[must_use]
    pub fn drive_code(self) -> u8 {
        self.get().drive_code()
    }

    /// See [`Firmware::sector_read`].
    pub fn sector_read(self, lba: u64, buf: &mut [u8; SECTOR_SIZE]) -> Result<(), BootError> {
        self.get().sector_read(lba, buf)
    }

    /// See [`Firmware::framebuffer_acquire`].
    pub fn framebuffer_acquire(
        self,
        width: u32,
        height: u32,
        bpp: u32,
    ) -> Option<FramebufferInfo> {
        self.get().framebuffer_acquire(width, height, bpp)
    }

    /// See [`Firmware::memory_map`].
    pub fn memory_map(self) -> Result<MemoryMap, BootError> {
        self.get().memory_map()
    }

    /// See [`Firmware::alloc_page`].
    pub fn alloc_page(self) -> Result<PhysAddr, BootError> {
        self.get().alloc_page()
    }

    /// Allocates a page-aligned kernel-owned buffer of `bytes`.
    ///
    /// On UEFI this is `AllocatePages` (optionally at a fixed address);
    /// elsewhere it comes from the bump arena (`fixed` is then only
    /// honoured implicitly by the memory-map check the caller did).
    ///
    /// # Errors
    ///
    /// [`BootError::OutOfMemory`].
    pub fn alloc_kernel(self, bytes: u64, fixed: Option<u64>) -> Result<u64, BootError> {
        match self.get() {
            #[cfg(target_arch = "x86_64")]
            Firmware::Uefi(fw) => {
                let pages = (bytes as usize).div_ceil(4096);
                let address = fw.alloc_kernel_pages(pages, fixed)?;
                // SAFETY: freshly allocated for the kernel image.
                unsafe { core::ptr::write_bytes(address as *mut u8, 0, pages * 4096) };
                Ok(address)
            }
            _ => match fixed {
                Some(address) => {
                    // The memory-map check already vetted the range; the
                    // arena never hands out addresses below the cursor,
                    // so just clear the destination.
                    // SAFETY: caller verified the range is Available RAM.
                    unsafe {
                        core::ptr::write_bytes(
                            address as *mut u8,
                            0,
                            ((bytes + 0xFFF) & !0xFFF) as usize,
                        );
                    }
                    Ok(address)
                }
                None => crate::mem::bump_alloc(bytes),
            },
        }
    }

    /// See [`Firmware::delay_us`].
    pub fn delay_us(self, microseconds: u64) {
        self.get().delay_us(microseconds);
    }

    /// See [`Firmware::poll_key`].
    pub fn poll_key(self) -> bool {
        self.get().poll_key()
    }

    /// See [`Firmware::find_system_tables`].
    pub fn find_system_tables(self) -> SystemTables {
        self.get().find_system_tables()
    }

    /// See [`Firmware::edid`].
    pub fn edid(self) -> Option<&'static [u8]> {
        self.get().edid()
    }

    /// Runs `f` with the UEFI context, if that is the active variant.
    #[cfg(target_arch = "x86_64")]
    pub fn with_uefi<R>(self, f: impl FnOnce(&mut uefi_fw::UefiFw) -> R) -> Option<R> {
        match self.get() {
            Firmware::Uefi(fw) => Some(f(fw)),
            _ => None,
        }
    }
}

impl BlockDevice for FwHandle {
    fn read_sector(&mut self, lba: u64, buf: &mut [u8; SECTOR_SIZE]) -> Result<(), FatError> {
        self.get().sector_read(lba, buf).map_err(|_| FatError::Io)
    }
}
