//! Multiboot2 information synthesis and module loading.
//!
//! The tag buffer accretes in boot order: loader name, command line, and
//! the ACPI/SMBIOS tags first (those come from the firmware's
//! configuration tables and never change), then the memory map where it
//! is already final, then one tag per ordinary module as it is loaded,
//! then the framebuffer, EDID, SMP, and partition-UUID tags. On UEFI the
//! memory map and the EFI pointer tags are written last, right before
//! `ExitBootServices`.

use planck_noalloc::vec::ArrayVec;
use simpleboot_bootcfg::{modules, split_path, unescape_path};
use simpleboot_fat::FatVolume;
use simpleboot_inflate::{Compression, gudt_uncompressed_size, gunzip, gzip_uncompressed_size, probe, unzlib};
use simpleboot_multiboot2::{TagWriter, memory_kind};

use crate::error::BootError;
use crate::fw::{FwHandle, MemoryMap, SystemTables};
use crate::splash::ProgressBar;

/// Most modules a config may load.
pub const MAX_MODULES: usize = 32;

/// One loaded, uncompressed module.
#[derive(Debug, Clone, Copy)]
pub struct ModuleEntry {
    /// First byte of the module image.
    pub start: u32,
    /// One past the last byte.
    pub end: u32,
}

/// The outcome of the module pass.
pub struct ModuleList {
    /// Ordinary modules, in config order.
    pub entries: ArrayVec<ModuleEntry, MAX_MODULES>,
    /// The first ordinary module (the Linux initrd).
    pub initrd: Option<ModuleEntry>,
    /// A DSDT/GUDT/DTB replacement blob: `(address, buffer_capacity)`.
    pub dsdt: Option<(u64, u64)>,
}

/// Parses the config for `module` lines and loads each one.
///
/// Compressed images are inflated; blobs that are really system
/// description tables (DTB magic, `DSDT`, `GUDT`) do not receive a
/// module tag and are remembered for the ACPI/DTB patcher instead.
///
/// # Errors
///
/// Propagates I/O, allocation, decompression, and cancellation errors;
/// a missing module file is only a warning.
pub fn load_modules(
    fw: FwHandle,
    volume: &mut FatVolume<FwHandle>,
    config: &str,
    backup: bool,
    writer: &mut TagWriter<'_>,
    progress_fb: Option<&simpleboot_multiboot2::FramebufferInfo>,
) -> Result<ModuleList, BootError> {
    let mut list = ModuleList {
        entries: ArrayVec::new(),
        initrd: None,
        dsdt: None,
    };

    for arg in modules(config, backup) {
        if fw.poll_key() {
            return Err(BootError::UserCancel);
        }
        let (raw_path, _params) = split_path(arg);
        let mut path_buf = [0u8; 256];
        let Some(path) = unescape_path(raw_path, &mut path_buf) else {
            log::warn!("module path too long: {raw_path}");
            continue;
        };

        let mut file = match volume.open(path) {
            Ok(file) => file,
            Err(_) => {
                log::warn!("unable to load '{path}'");
                continue;
            }
        };
        let file_size = file.size();
        if file_size == 0 {
            continue;
        }

        // Sniff the wrapper from the first 16 bytes; gzip keeps the
        // inflated size in its trailer, GUDT in its header.
        let mut prefix = [0u8; 16];
        let prefix_len = file.read(0, &mut prefix)?;
        let compression = if file_size >= 20 {
            probe(&prefix[..prefix_len])
        } else {
            Compression::None
        };
        let uncompressed = match compression {
            Compression::Gzip => {
                let mut trailer = [0u8; 4];
                file.read(file_size - 4, &mut trailer)?;
                Some(gzip_uncompressed_size(trailer))
            }
            Compression::Gudt => Some(gudt_uncompressed_size(&prefix)),
            Compression::None => None,
        };

        // Reserve the published buffer (and staging for the compressed
        // image; on the bump arena the staging area is simply the space
        // after the published buffer, overwritten by the next module).
        let (final_at, final_len, load_at) = match uncompressed {
            Some(unc) => {
                let unc_buf = alloc_module(fw, u64::from(unc))?;
                let staging = match fw.kind() {
                    #[cfg(target_arch = "x86_64")]
                    crate::fw::FirmwareKind::Uefi => fw
                        .with_uefi(|u| u.alloc_scratch((file_size as usize).div_ceil(4096)))
                        .unwrap_or(Err(BootError::OutOfMemory))?,
                    _ => crate::mem::bump_peek(),
                };
                (unc_buf, unc, staging)
            }
            None => {
                let buf = alloc_module(fw, u64::from(file_size))?;
                (buf, file_size, buf)
            }
        };

        log::info!("Loading module '{path}' ({file_size} bytes)...");
        let mut bar = ProgressBar::new(progress_fb, file_size as usize);
        // SAFETY: destination buffers were just reserved above.
        let load_buf =
            unsafe { core::slice::from_raw_parts_mut(load_at as *mut u8, file_size as usize) };
        file.read_with(0, load_buf, &mut |done, _| {
            bar.update(done);
            !fw.poll_key()
        })?;
        bar.clear();
        drop(file);

        if let Some(unc) = uncompressed {
            log::info!("Uncompressing ({unc} bytes)...");
            // SAFETY: the published buffer holds `unc` bytes.
            let out =
                unsafe { core::slice::from_raw_parts_mut(final_at as *mut u8, unc as usize) };
            match compression {
                Compression::Gzip => gunzip(load_buf, out)?,
                _ => unzlib(&load_buf[8..], out)?,
            };
        }

        // SAFETY: final image bytes, fully written above.
        let image =
            unsafe { core::slice::from_raw_parts(final_at as *const u8, final_len as usize) };
        if is_system_table(image) {
            log::info!("{} detected...", table_name(image));
            let capacity = (u64::from(final_len) + 0xFFF) & !0xFFF;
            list.dsdt = Some((final_at, capacity));
            continue;
        }

        let entry = ModuleEntry {
            start: final_at as u32,
            end: (final_at + u64::from(final_len)) as u32,
        };
        writer.module(entry.start, entry.end, arg)?;
        if list.initrd.is_none() {
            list.initrd = Some(entry);
        }
        if list.entries.len() < MAX_MODULES {
            list.entries.push(entry);
        }
    }
    Ok(list)
}

fn alloc_module(fw: FwHandle, bytes: u64) -> Result<u64, BootError> {
    fw.alloc_kernel(bytes, None)
}

/// DTB, DSDT, or GUDT blobs replace the firmware tables instead of
/// becoming modules.
fn is_system_table(image: &[u8]) -> bool {
    if image.len() < 4 {
        return false;
    }
    image[..4] == [0xD0, 0x0D, 0xFE, 0xED]
        || (&image[2..4] == b"DT" && (image[0] == b'D' && image[1] == b'S' || image[0] == b'G' && image[1] == b'U'))
}

fn table_name(image: &[u8]) -> &'static str {
    if image[..4] == [0xD0, 0x0D, 0xFE, 0xED] {
        "DTB"
    } else if image[0] == b'D' {
        "DSDT"
    } else {
        "GUDT"
    }
}

/// Writes the ACPI, SMBIOS, and (nothing for DTB; that goes to the
/// kernel by register) tags from the discovered system tables.
pub fn write_system_tables(writer: &mut TagWriter<'_>, tables: &SystemTables) {
    if let Some(rsdp) = tables.rsdp {
        // Revision decides between the 24-byte 1.0 copy and the 36-byte
        // 2.0 one.
        // SAFETY: the discovery path validated the RSDP at this address.
        let revision = unsafe { ((rsdp + 15) as *const u8).read() };
        if revision < 2 {
            let copy = unsafe { &*(rsdp as *const [u8; 24]) };
            let _ = writer.acpi_old(copy);
        } else {
            let copy = unsafe { &*(rsdp as *const [u8; 36]) };
            let _ = writer.acpi_new(copy);
        }
    }
    if let Some(smbios) = tables.smbios {
        // SAFETY: the anchor was checksum-validated by discovery.
        unsafe {
            let length = usize::from(((smbios + 5) as *const u8).read());
            let entry = core::slice::from_raw_parts(smbios as *const u8, length.max(8));
            let major = ((smbios + 7) as *const u8).read();
            let minor = ((smbios + 8) as *const u8).read();
            let _ = writer.smbios(major, minor, entry);
        }
    }
}

/// Writes the memory-map tag.
///
/// # Errors
///
/// [`BootError::OutOfMemory`] when the tag buffer is full.
pub fn write_memory_map(writer: &mut TagWriter<'_>, memory: &MemoryMap) -> Result<(), BootError> {
    writer.mmap(memory.entries.as_slice())?;
    Ok(())
}

/// Populates the Linux zero page with everything that is not known at
/// kernel-load time: E820 ranges, the framebuffer, the RSDP, and the
/// initrd.
#[cfg(target_arch = "x86_64")]
pub fn finalise_zero_page(
    zero_page: u64,
    memory: &MemoryMap,
    framebuffer: Option<&simpleboot_multiboot2::FramebufferInfo>,
    tables: &SystemTables,
    initrd: Option<ModuleEntry>,
    from_efi: bool,
) {
    use simpleboot_linuxboot::{E820Entry, ScreenInfo, ZERO_PAGE_SIZE};

    // SAFETY: the zero page was allocated by the Linux loader.
    let buf = unsafe { core::slice::from_raw_parts_mut(zero_page as *mut u8, ZERO_PAGE_SIZE) };
    // Re-wrap without clearing: install_header already ran.
    let mut page = simpleboot_linuxboot::ZeroPage::new_unchecked(buf);

    let mut e820: ArrayVec<E820Entry, { crate::fw::MAX_MEMORY_REGIONS }> = ArrayVec::new();
    for entry in memory.entries.as_slice() {
        let kind = match entry.kind {
            memory_kind::AVAILABLE => 1,
            memory_kind::ACPI_RECLAIMABLE => 3,
            memory_kind::ACPI_NVS => 4,
            memory_kind::BAD_RAM => 5,
            _ => 2,
        };
        e820.push(E820Entry {
            addr: entry.base,
            size: entry.length,
            kind,
        });
    }
    page.set_e820(e820.as_slice());

    if let Some(fb) = framebuffer {
        page.set_screen_info(&ScreenInfo {
            base: fb.address,
            pitch: fb.pitch,
            width: fb.width,
            height: fb.height,
            bpp: fb.bpp,
            red_position: fb.red_position,
            red_size: fb.red_size,
            green_position: fb.green_position,
            green_size: fb.green_size,
            blue_position: fb.blue_position,
            blue_size: fb.blue_size,
            from_efi,
        });
    }
    if let Some(rsdp) = tables.rsdp {
        page.set_acpi_rsdp(rsdp);
    }
    if let Some(initrd) = initrd {
        page.set_ramdisk(initrd.start, initrd.end - initrd.start);
    }
}
