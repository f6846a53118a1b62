//! UEFI firmware variant.
//!
//! Sector reads go through the whole-disk Block I/O protocol behind the
//! loaded image's device; the framebuffer comes from GOP; pages come
//! from `AllocatePages`. Scratch allocations (config text, compressed
//! module staging, splash data) are tracked and released before
//! `ExitBootServices` so the kernel does not inherit loader garbage in
//! its free memory.

use core::ffi::c_void;
use core::ptr;

use planck_noalloc::vec::ArrayVec;
use simpleboot_core::PhysAddr;
use simpleboot_fat::SECTOR_SIZE;
use simpleboot_multiboot2::{FramebufferInfo, MmapEntry, memory_kind};
use uefi::memory::{EfiAllocateType, EfiMemoryType, MemoryMap as EfiMemoryMap};
use uefi::protocol::block_io::BlockIoProtocol;
use uefi::protocol::gop::{GraphicsOutputProtocol, PixelFormat};
use uefi::table::SystemTable;
use uefi::{EfiGuid, EfiHandle, EfiStatus};

use crate::cell::BootCell;
use crate::error::BootError;
use crate::fw::{MAX_MEMORY_REGIONS, MemoryMap, SystemTables};

/// Scratch buffer for memory-map snapshots (descriptors only).
static MEMMAP_BUF: BootCell<[u8; 0x4800]> = BootCell::new([0; 0x4800]);

/// How many scratch allocations can be outstanding.
const MAX_SCRATCH: usize = 32;

/// The UEFI firmware context.
pub struct UefiFw {
    /// The firmware system table.
    pub system_table: *mut SystemTable,
    /// The loader image handle.
    pub image_handle: EfiHandle,
    block_io: *mut BlockIoProtocol,
    media_id: u32,
    block_size: u32,
    scratch: ArrayVec<(u64, usize), MAX_SCRATCH>,
}

impl UefiFw {
    /// Binds the capability layer to the firmware.
    ///
    /// Disables the watchdog, wires ConOut into the console, and finds
    /// the Block I/O protocol of the whole boot disk (skipping logical
    /// partition handles so GPT headers stay addressable).
    pub fn new(image_handle: EfiHandle, system_table: *mut SystemTable) -> Self {
        // SAFETY: the firmware handed both pointers to the entry point.
        let boot = unsafe { (*system_table).boot_services() };
        unsafe {
            let _ = (boot.set_watchdog_timer)(0, 0, 0, ptr::null());
        }

        crate::console::set_conout(unsafe { (*system_table).console_out });

        let (block_io, media_id, block_size) = find_boot_disk(system_table, image_handle);

        Self {
            system_table,
            image_handle,
            block_io,
            media_id,
            block_size,
            scratch: ArrayVec::new(),
        }
    }

    fn boot_services(&self) -> &'static uefi::table::BootServices {
        // SAFETY: the capability layer is torn down before
        // ExitBootServices returns control to the handover path.
        unsafe { (*self.system_table).boot_services() }
    }

    /// Reads one 512-byte sector.
    ///
    /// # Errors
    ///
    /// [`BootError::IoError`] if no disk was found or the read fails.
    pub fn sector_read(&mut self, lba: u64, buf: &mut [u8; SECTOR_SIZE]) -> Result<(), BootError> {
        if self.block_io.is_null() {
            return Err(BootError::IoError);
        }
        if self.block_size == SECTOR_SIZE as u32 {
            // SAFETY: protocol pointer from the firmware, buffer sized to
            // one block.
            let status = unsafe {
                ((*self.block_io).read_blocks)(
                    self.block_io,
                    self.media_id,
                    lba,
                    SECTOR_SIZE,
                    buf.as_mut_ptr(),
                )
            };
            return status.to_result().map_err(|_| BootError::IoError);
        }

        // 4 KiB-native media: read the containing block and copy out.
        let scale = u64::from(self.block_size / SECTOR_SIZE as u32);
        let mut bounce = [0u8; 4096];
        let native = lba / scale;
        // SAFETY: as above; bounce covers one native block.
        let status = unsafe {
            ((*self.block_io).read_blocks)(
                self.block_io,
                self.media_id,
                native,
                self.block_size as usize,
                bounce.as_mut_ptr(),
            )
        };
        status.to_result().map_err(|_| BootError::IoError)?;
        let offset = ((lba % scale) as usize) * SECTOR_SIZE;
        buf.copy_from_slice(&bounce[offset..offset + SECTOR_SIZE]);
        Ok(())
    }

    /// Picks the largest GOP mode not exceeding the request.
    pub fn framebuffer_acquire(
        &mut self,
        width: u32,
        height: u32,
        _bpp: u32,
    ) -> Option<FramebufferInfo> {
        let boot = self.boot_services();
        // SAFETY: boot services active.
        let gop = unsafe { boot.locate_protocol::<uefi::protocol::Gop>() }.ok()?;

        let mode = unsafe { &*gop.mode };
        let mut best: Option<(u32, u64)> = None; // (mode number, pixels)
        for number in 0..mode.max_mode {
            let mut info_size = 0usize;
            let mut info: *mut uefi::protocol::gop::GraphicsOutputModeInformation =
                ptr::null_mut();
            // SAFETY: querying a mode the protocol advertises.
            let status =
                unsafe { (gop.query_mode)(gop, number, &mut info_size, &mut info) };
            if !status.is_success() || info.is_null() {
                continue;
            }
            let candidate = unsafe { &*info };
            if candidate.pixel_format == PixelFormat::BltOnly {
                continue;
            }
            let (w, h) = (
                candidate.horizontal_resolution,
                candidate.vertical_resolution,
            );
            if w > width || h > height {
                continue;
            }
            let pixels = u64::from(w) * u64::from(h);
            if best.map_or(true, |(_, other)| pixels > other) {
                best = Some((number, pixels));
            }
        }

        let (number, _) = best?;
        let current = unsafe { (*gop.mode).mode };
        if number != current {
            // SAFETY: mode number came from query_mode above.
            unsafe {
                let _ = (gop.set_mode)(gop, number);
            }
        }
        Some(describe_mode(gop))
    }

    /// Snapshots the memory map into loader-neutral entries.
    ///
    /// # Errors
    ///
    /// [`BootError::IoError`] if the firmware refuses the snapshot.
    pub fn memory_map(&mut self) -> Result<MemoryMap, BootError> {
        let boot = self.boot_services();
        MEMMAP_BUF.with(|buf| {
            // SAFETY: boot services active.
            let snapshot =
                unsafe { boot.memory_map(buf) }.map_err(|_| BootError::IoError)?;
            Ok(convert_memory_map(&snapshot))
        })
    }

    /// Allocates one zeroed page.
    ///
    /// # Errors
    ///
    /// [`BootError::OutOfMemory`].
    pub fn alloc_page(&mut self) -> Result<PhysAddr, BootError> {
        let boot = self.boot_services();
        // SAFETY: boot services active.
        let address = unsafe {
            boot.allocate_pages(EfiAllocateType::AllocateAnyPages, 1, 0)
        }
        .map_err(|_| BootError::OutOfMemory)?;
        // SAFETY: the page was just allocated to us.
        unsafe { ptr::write_bytes(address as *mut u8, 0, 4096) };
        Ok(PhysAddr::new(address))
    }

    /// Allocates `pages` pages the kernel will end up owning (tag
    /// buffer, kernel segments, modules, zero page). Not tracked.
    ///
    /// # Errors
    ///
    /// [`BootError::OutOfMemory`].
    pub fn alloc_kernel_pages(
        &mut self,
        pages: usize,
        fixed: Option<u64>,
    ) -> Result<u64, BootError> {
        let boot = self.boot_services();
        // Module and zero-page addresses travel in 32-bit MBI fields, so
        // unplaced allocations are capped below 4 GiB.
        let (alloc_type, hint) = match fixed {
            Some(address) => (EfiAllocateType::AllocateAddress, address),
            None => (EfiAllocateType::AllocateMaxAddress, 0xFFFF_F000),
        };
        // SAFETY: boot services active.
        unsafe { boot.allocate_pages(alloc_type, pages, hint) }
            .map_err(|_| BootError::OutOfMemory)
    }

    /// Allocates loader-private scratch pages, tracked for release
    /// before `ExitBootServices`.
    ///
    /// # Errors
    ///
    /// [`BootError::OutOfMemory`].
    pub fn alloc_scratch(&mut self, pages: usize) -> Result<u64, BootError> {
        let address = self.alloc_kernel_pages(pages, None)?;
        if self.scratch.len() < MAX_SCRATCH {
            self.scratch.push((address, pages));
        }
        Ok(address)
    }

    /// Releases every tracked scratch allocation.
    pub fn free_scratch(&mut self) {
        let boot = self.boot_services();
        for &(address, pages) in self.scratch.as_slice() {
            // SAFETY: the range came from alloc_scratch.
            let _ = unsafe { boot.free_pages(address, pages) };
        }
        self.scratch = ArrayVec::new();
    }

    /// Busy wait via `Stall`.
    pub fn delay_us(&mut self, microseconds: u64) {
        // SAFETY: boot services active.
        unsafe { self.boot_services().stall(microseconds as usize) };
    }

    /// `ConIn.ReadKeyStroke`, non-blocking.
    pub fn poll_key(&mut self) -> bool {
        // SAFETY: pointer from the system table, boot services active.
        unsafe {
            let con_in = (*self.system_table).console_in;
            !con_in.is_null() && (*con_in).poll_key().is_some()
        }
    }

    /// Reads the configuration tables for RSDP, SMBIOS, and DTB.
    pub fn find_system_tables(&mut self) -> SystemTables {
        // SAFETY: table pointer from the firmware.
        let table = unsafe { &*self.system_table };
        let find = |guid: &EfiGuid| -> Option<u64> {
            // SAFETY: as above.
            unsafe { table.find_config_table(guid) }.map(|p| p as u64)
        };
        SystemTables {
            rsdp: find(&EfiGuid::ACPI_20_TABLE).or_else(|| find(&EfiGuid::ACPI_10_TABLE)),
            smbios: find(&EfiGuid::SMBIOS_TABLE).or_else(|| find(&EfiGuid::SMBIOS3_TABLE)),
            dtb: find(&EfiGuid::DTB_TABLE),
        }
    }

    /// The active display's EDID, if any.
    pub fn edid(&mut self) -> Option<&'static [u8]> {
        let boot = self.boot_services();
        // SAFETY: boot services active; the protocol data outlives the
        // loader's use of it.
        unsafe {
            boot.locate_protocol::<uefi::protocol::EdidActive>()
                .ok()
                .and_then(|edid| edid.bytes())
        }
    }

    /// Freezes the memory map and leaves boot services.
    ///
    /// `publish` runs on every attempt with the candidate final map, so
    /// the MBI mmap tag and the zero page's EFI fields describe exactly
    /// the snapshot whose key wins. One retry with a re-fetched key
    /// covers firmware that invalidates the map during the first call.
    ///
    /// # Errors
    ///
    /// [`BootError::IoError`] if the firmware still refuses after the
    /// retry; the machine is in an undefined state then.
    pub fn exit_boot_services(
        &mut self,
        mut publish: impl FnMut(&EfiMemoryMap, u64),
    ) -> Result<(), BootError> {
        self.free_scratch();
        crate::console::clear_conout();

        let boot = self.boot_services();
        let image = self.image_handle;
        MEMMAP_BUF.with(|buf| {
            let map_address = buf.as_ptr() as u64;
            for _attempt in 0..2 {
                // SAFETY: boot services active until the call succeeds.
                let Ok(snapshot) = (unsafe { boot.memory_map(buf) }) else {
                    continue;
                };
                publish(&snapshot, map_address);
                let key = snapshot.map_key;
                // SAFETY: key freshly fetched above.
                let status = unsafe { (boot.exit_boot_services)(image, key) };
                if status.is_success() {
                    return Ok(());
                }
            }
            Err(BootError::IoError)
        })
    }
}

/// Builds the loader-neutral framebuffer description from the current
/// GOP mode.
fn describe_mode(gop: &GraphicsOutputProtocol) -> FramebufferInfo {
    // SAFETY: GOP keeps `mode`/`info` valid while the protocol exists.
    let mode = unsafe { &*gop.mode };
    let info = unsafe { &*mode.info };

    let (positions, sizes) = match info.pixel_format {
        PixelFormat::RedGreenBlueReserved => ([0u8, 8, 16], [8u8, 8, 8]),
        PixelFormat::BlueGreenRedReserved => ([16u8, 8, 0], [8u8, 8, 8]),
        _ => {
            let masks = info.pixel_information;
            (
                [
                    mask_position(masks.red_mask),
                    mask_position(masks.green_mask),
                    mask_position(masks.blue_mask),
                ],
                [
                    mask_size(masks.red_mask),
                    mask_size(masks.green_mask),
                    mask_size(masks.blue_mask),
                ],
            )
        }
    };

    FramebufferInfo {
        address: mode.frame_buffer_base,
        pitch: info.pixels_per_scan_line * 4,
        width: info.horizontal_resolution,
        height: info.vertical_resolution,
        bpp: 32,
        red_position: positions[0],
        red_size: sizes[0],
        green_position: positions[1],
        green_size: sizes[1],
        blue_position: positions[2],
        blue_size: sizes[2],
    }
}

fn mask_position(mask: u32) -> u8 {
    mask.trailing_zeros() as u8
}

fn mask_size(mask: u32) -> u8 {
    mask.count_ones() as u8
}

/// Converts a UEFI snapshot into sorted loader-neutral entries,
/// merging adjacent ranges of the same kind to stay under the entry cap.
fn convert_memory_map(snapshot: &EfiMemoryMap) -> MemoryMap {
    let mut map = MemoryMap::new();
    for descriptor in snapshot.entries() {
        let kind = match descriptor.memory_type {
            1 | 2 | 3 | 4 | 7 => memory_kind::AVAILABLE,
            9 => memory_kind::ACPI_RECLAIMABLE,
            10 => memory_kind::ACPI_NVS,
            8 => memory_kind::BAD_RAM,
            _ => memory_kind::RESERVED,
        };
        let entry = MmapEntry {
            base: descriptor.physical_start,
            length: descriptor.byte_len(),
            kind,
            firmware_type: descriptor.memory_type,
        };

        let entries = map.entries.as_mut_slice();
        if let Some(last) = entries.last_mut()
            && last.kind == entry.kind
            && last.base + last.length == entry.base
        {
            last.length += entry.length;
            continue;
        }
        if map.entries.len() < MAX_MEMORY_REGIONS {
            map.entries.push(entry);
        }
    }
    map
}

/// Finds the whole-disk Block I/O protocol for the boot device.
fn find_boot_disk(
    system_table: *mut SystemTable,
    image_handle: EfiHandle,
) -> (*mut BlockIoProtocol, u32, u32) {
    // SAFETY: firmware pointers, boot services active.
    let boot = unsafe { (*system_table).boot_services() };

    let mut handles: [EfiHandle; 64] = [ptr::null_mut(); 64];
    let mut buffer_size = core::mem::size_of_val(&handles);
    // SAFETY: fixed caller buffer; the firmware fills handles.
    let status = unsafe {
        (boot.locate_handle)(
            uefi::table::LocateSearchType::ByProtocol,
            &EfiGuid::BLOCK_IO_PROTOCOL,
            ptr::null_mut(),
            &mut buffer_size,
            handles.as_mut_ptr(),
        )
    };

    let mut fallback: (*mut BlockIoProtocol, u32, u32) = (ptr::null_mut(), 0, 512);
    if status.is_success() {
        let count = buffer_size / core::mem::size_of::<EfiHandle>();
        for &handle in &handles[..count.min(handles.len())] {
            // SAFETY: handle from the firmware's own list.
            let Ok(block) =
                (unsafe { boot.handle_protocol::<uefi::protocol::BlockIo>(handle) })
            else {
                continue;
            };
            let media = unsafe { &*block.media };
            if !media.media_present {
                continue;
            }
            if !media.logical_partition {
                return (core::ptr::from_mut(block), media.media_id, media.block_size);
            }
            if fallback.0.is_null() {
                fallback = (core::ptr::from_mut(block), media.media_id, media.block_size);
            }
        }
    }

    // Last resort: whatever device the image itself was loaded from.
    if fallback.0.is_null()
        && let Ok(loaded) =
            unsafe { boot.handle_protocol::<uefi::protocol::LoadedImage>(image_handle) }
        && let Ok(block) =
            unsafe { boot.handle_protocol::<uefi::protocol::BlockIo>(loaded.device_handle) }
    {
        let media = unsafe { &*block.media };
        fallback = (core::ptr::from_mut(block), media.media_id, media.block_size);
    }
    fallback
}

/// Maps an [`EfiStatus`] into the loader error space (sector reads).
impl From<EfiStatus> for BootError {
    fn from(_: EfiStatus) -> Self {
        BootError::IoError
    }
}

// The memory type constants above mirror `EfiMemoryType`; keep them in
// sync with the enum.
const _: () = {
    assert!(EfiMemoryType::LoaderCode as u32 == 1);
    assert!(EfiMemoryType::ConventionalMemory as u32 == 7);
    assert!(EfiMemoryType::AcpiReclaimMemory as u32 == 9);
};
