//! Simpleboot: a Multiboot2-compatible boot loader.
//!
//! The firmware entry points converge on [`boot`], which runs the boot
//! sequence and restarts it once in backup mode if a key is pressed or
//! the primary attempt fails. A fatal error in backup mode parks the
//! machine.
//!
//! ```text
//! entry -> firmware bring-up -> [config -> splash -> memory map ->
//!     page map -> kernel -> modules -> MBI -> patch -> SMP -> handover]
//! ```

#![no_std]
#![no_main]

mod arch;
mod cell;
mod console;
mod dsdt;
mod error;
mod fw;
mod handover;
mod load;
mod logging;
mod mbi;
mod mem;
mod smp;
mod splash;

use planck_noalloc::vec::ArrayVec;
use simpleboot_bootcfg::BootConfig;
use simpleboot_core::PhysAddr;
use simpleboot_core::handover::TAG_BUFFER_PAGES;
use simpleboot_fat::{FatVolume, find_boot_partition};
use simpleboot_multiboot2::{FramebufferInfo, LOADER_NAME, LOADER_NAME_BACKUP, TagWriter};
#[cfg(target_arch = "x86_64")]
use simpleboot_multiboot2::{MmapEntry, memory_kind};
use simpleboot_paging::{MapFlags, PAGE_SIZE, PageMap};

use cell::BootCell;
use error::BootError;
use fw::{Firmware, FwHandle, MemoryMap};
use load::{KernelMode, LoadedKernel};
use mem::IdentityAccess;
use smp::SmpInfo;

#[cfg(target_arch = "x86_64")]
use simpleboot_paging::X86_64Format as ArchFormat;

#[cfg(target_arch = "aarch64")]
use simpleboot_paging::Aarch64Format as ArchFormat;

/// Default kernel path when no config names one.
const DEFAULT_KERNEL: &str = "kernel";

/// Identity-mapped span: the first 10 GiB as 2 MiB blocks.
const IDENTITY_SPAN: u64 = 10 * 1024 * 1024 * 1024;

/// Default mode request when the config has no `framebuffer` line.
const DEFAULT_FB: (u32, u32, u32) = (1024, 768, 32);

/// Fixed tag buffer on firmware without an allocator.
const FIXED_TAG_BUFFER: u64 = 0x2_0000;

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

#[cfg(target_arch = "x86_64")]
core::arch::global_asm!(
    r#"
.section .text.entry
.global _start
.code64
// Stage-1 (BIOS) or the coreboot wrapper enters here in long mode with
// identity paging. The stub claims the loader stack and clears .bss.
_start:
    cli
    cld
    mov rsp, 0x90000
    lea rdi, [rip + __bss_start]
    lea rcx, [rip + __bss_end]
    sub rcx, rdi
    xor eax, eax
    rep stosb
    call pc_entry
1:  cli
    hlt
    jmp 1b
// The SMP trampoline is copied over this stub later; keep the first
// 256 bytes (SIPI page prefix) clear of anything still needed.
.org 0x100
.text
"#
);

#[cfg(target_arch = "aarch64")]
core::arch::global_asm!(
    r#"
.section .text.entry
.global _start
.global ap_park
// The GPU firmware enters here; on boards that start all cores, the
// secondaries fall into the park loop, which is also where the
// spin-table release points them.
_start:
    mrs x1, mpidr_el1
    and x1, x1, #3
    cbz x1, 4f
ap_park:
    mrs x1, mpidr_el1
    and x1, x1, #3
    // Check in on the alive byte.
    mov x2, 0x558
1:  ldxrb w3, [x2]
    add w3, w3, #1
    stxrb w4, w3, [x2]
    cbnz w4, 1b
    // Spin until the kernel entry is published.
    mov x2, 0x538
2:  ldr x3, [x2]
    cbnz x3, 3f
    wfe
    b 2b
3:  // Install the translation configuration the BSP published.
    mov x4, 0x560
    ldr x5, [x4]
    msr mair_el1, x5
    mov x4, 0x568
    ldr x5, [x4]
    msr tcr_el1, x5
    mov x4, 0x530
    ldr x5, [x4]
    msr ttbr0_el1, x5
    isb
    mov x4, 0x570
    ldr x5, [x4]
    msr sctlr_el1, x5
    isb
    // Stack by core ID, core ID in x0.
    mov x4, 0x80000
    lsl x5, x1, #10
    sub x4, x4, x5
    mov sp, x4
    mov x0, x1
    br x3
4:  // BSP: stack below the image, clear .bss, keep the DTB pointer.
    mov sp, 0x7C000
    mov x19, x0
    adrp x1, __bss_start
    add x1, x1, :lo12:__bss_start
    adrp x2, __bss_end
    add x2, x2, :lo12:__bss_end
5:  cmp x1, x2
    b.hs 6f
    str xzr, [x1], #8
    b 5b
6:  mov x0, x19
    bl rpi_entry
7:  wfe
    b 7b
"#
);

/// BIOS / coreboot entry: probe for coreboot tables, default to BIOS.
#[cfg(target_arch = "x86_64")]
#[unsafe(no_mangle)]
extern "C" fn pc_entry() -> ! {
    logging::init();
    if console::serial::init() {
        console::enable_serial();
    }
    if console::serial::debug_port_present() {
        console::enable_debug_port();
    }

    let firmware = match fw::coreboot::CorebootFw::probe() {
        Some(coreboot) => Firmware::Coreboot(coreboot),
        None => {
            console::set_vga(console::vga::VgaText::new());
            Firmware::Bios(fw::bios::BiosFw::new())
        }
    };
    run(firmware)
}

/// UEFI entry, called through the PE wrapper the image builder emits.
#[cfg(target_arch = "x86_64")]
#[unsafe(no_mangle)]
extern "efiapi" fn efi_main(
    image_handle: uefi::EfiHandle,
    system_table: *mut uefi::table::SystemTable,
) -> uefi::EfiStatus {
    logging::init();
    if console::serial::init() {
        console::enable_serial();
    }
    if console::serial::debug_port_present() {
        console::enable_debug_port();
    }
    run(Firmware::Uefi(fw::uefi_fw::UefiFw::new(
        image_handle,
        system_table,
    )))
}

/// Raspberry Pi entry; `dtb` is what the firmware left in `x0`.
#[cfg(target_arch = "aarch64")]
#[unsafe(no_mangle)]
extern "C" fn rpi_entry(dtb: u64) -> ! {
    logging::init();
    run(Firmware::Rpi(fw::rpi::RpiFw::new(dtb)))
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

/// The firmware context; written once per entry, addressed through
/// [`FwHandle`] afterwards.
static FIRMWARE: BootCell<Option<Firmware>> = BootCell::new(None);

fn run(firmware: Firmware) -> ! {
    let handle = FIRMWARE.with(|slot| {
        *slot = Some(firmware);
        // SAFETY: the slot is written exactly once per boot attempt and
        // only ever reached through this handle afterwards.
        unsafe { FwHandle::new(slot.as_mut().unwrap_or_else(|| unreachable!())) }
    });
    boot(handle)
}

/// Primary attempt, then one backup attempt, then park.
fn boot(fw: FwHandle) -> ! {
    let mut backup = false;
    loop {
        let err = match attempt(fw, backup) {
            Err(err) => err,
            Ok(never) => match never {},
        };
        match err {
            BootError::UserCancel if !backup => {
                log::info!("Aborted, loading backup configuration...");
            }
            other => {
                log::error!("{other}");
                if backup {
                    park();
                }
            }
        }
        backup = true;
        mem::bump_reset();
    }
}

fn park() -> ! {
    arch::current::park()
}

/// One full boot attempt. Returns only on error; success ends in the
/// kernel.
fn attempt(fw: FwHandle, backup: bool) -> Result<core::convert::Infallible, BootError> {
    // Filesystem bring-up.
    let mut probe = fw;
    let partition = find_boot_partition(&mut probe, fw.drive_code())?;
    let mut volume = FatVolume::mount(fw, &partition)?;

    // Configuration (two deliberate passes; this is the first).
    let config_text = read_config(&mut volume, backup);
    let config = match config_text {
        Some(text) => BootConfig::parse_with(text, backup, |directive| {
            log::warn!("unknown directive '{directive}'");
        }),
        None => BootConfig::default(),
    };
    logging::set_verbosity(config.verbose);

    // Video mode, splash, and the framebuffer console.
    let (fb_w, fb_h, fb_bpp) = config.framebuffer.unwrap_or(DEFAULT_FB);
    let framebuffer = fw.framebuffer_acquire(fb_w, fb_h, fb_bpp);
    if let Some(fb) = &framebuffer {
        let background = config.splash_color.unwrap_or(0);
        let logo = config
            .splash_path
            .and_then(|path| read_splash(fw, &mut volume, path));
        splash::render(fb, background, logo);
        console::set_framebuffer(console::fbtext::FbText::new(*fb, background));
    }
    if backup {
        log::info!("Aborted, loading backup configuration...");
    }

    if fw.poll_key() && !backup {
        return Err(BootError::UserCancel);
    }

    // Memory map and the handover address space.
    let memory = fw.memory_map()?;
    let mut access = IdentityAccess(fw);
    let mut page_map = make_page_map(fw, &mut access)?;
    build_identity_map(fw, &mut page_map)?;
    if let Some(fb) = &framebuffer {
        map_framebuffer(&mut page_map, fb)?;
    }
    let page_root = page_map.root().as_u64();

    // The tag buffer, with the fixed parts first.
    let tags = tag_buffer(fw)?;
    // SAFETY: the buffer was just reserved for exactly this purpose.
    let tag_slice = unsafe {
        core::slice::from_raw_parts_mut(tags as *mut u8, TAG_BUFFER_PAGES * PAGE_SIZE as usize)
    };
    let mut writer = TagWriter::new(tag_slice)?;
    writer.loader_name(if backup { LOADER_NAME_BACKUP } else { LOADER_NAME })?;
    if let Some(cmdline) = config.cmdline {
        writer.cmdline(cmdline)?;
    }

    // The ACPI/SMBIOS tags come from the configuration tables and are
    // stable; only the memory map (and the EFI pointer tags) must wait
    // for ExitBootServices on UEFI.
    let tables = fw.find_system_tables();
    mbi::write_system_tables(&mut writer, &tables);
    if fw.kind() != fw::FirmwareKind::Uefi {
        mbi::write_memory_map(&mut writer, &memory)?;
    }

    // The kernel.
    let kernel_path = config.kernel.unwrap_or(DEFAULT_KERNEL);
    let mut path_buf = [0u8; 256];
    let kernel_path = simpleboot_bootcfg::unescape_path(kernel_path, &mut path_buf)
        .ok_or(BootError::FileNotFound)?;
    let kernel = match load::load_kernel(
        fw,
        &mut volume,
        kernel_path,
        config.cmdline,
        &memory,
        &mut page_map,
        framebuffer.as_ref(),
    ) {
        Ok(kernel) => kernel,
        Err(BootError::FileNotFound) => {
            log::error!("kernel not found");
            return fallback_vbr(fw, &partition);
        }
        Err(err) => return Err(err),
    };
    let smp_requested = config.multicore && kernel.mode == KernelMode::Mb64;

    // Modules (the second config pass).
    let modules = match config_text {
        Some(text) => {
            mbi::load_modules(fw, &mut volume, text, backup, &mut writer, framebuffer.as_ref())?
        }
        None => mbi::ModuleList {
            entries: ArrayVec::new(),
            initrd: None,
            dsdt: None,
        },
    };
    drop(volume);

    // Remaining synthesis: framebuffer, EDID, replacement tables.
    if let Some(fb) = &framebuffer {
        writer.framebuffer(fb)?;
        if let Some(edid) = fw.edid() {
            writer.edid(edid)?;
        }
    }
    let override_dtb = dsdt::apply_override(&tables, modules.dsdt, config.cmdline);

    // Publish the handover words, then wake the other cores.
    #[cfg(target_arch = "x86_64")]
    handover::x86_64::publish(page_root, tags);

    let smp = start_smp(fw, smp_requested, &tables);
    if smp_requested {
        writer.smp(smp.numcores, smp.running, smp.bspid)?;
    }
    writer.partuuid(&partition.uuid, None)?;

    finish_and_jump(
        fw,
        kernel,
        writer,
        &memory,
        framebuffer.as_ref(),
        &tables,
        &modules,
        override_dtb,
        page_root,
        tags,
    )
}

/// Creates the handover address space. On firmware without an allocator
/// the root sits at the architectural fixed address.
fn make_page_map<'a>(
    fw: FwHandle,
    access: &'a mut IdentityAccess,
) -> Result<PageMap<'a, ArchFormat, IdentityAccess>, BootError> {
    #[cfg(target_arch = "x86_64")]
    if fw.kind() != fw::FirmwareKind::Uefi {
        const FIXED_ROOT: u64 = 0x1000;
        // SAFETY: the fixed root page is reserved by the memory layout.
        unsafe { core::ptr::write_bytes(FIXED_ROOT as *mut u8, 0, 4096) };
        return Ok(PageMap::with_root(access, PhysAddr::new(FIXED_ROOT)));
    }
    let _ = fw;
    PageMap::create(access).map_err(BootError::from)
}

/// Identity-maps the first 10 GiB with 2 MiB blocks. On aarch64 the
/// peripheral window inside that span gets device attributes.
fn build_identity_map(
    fw: FwHandle,
    page_map: &mut PageMap<'_, ArchFormat, IdentityAccess>,
) -> Result<(), BootError> {
    #[cfg(target_arch = "aarch64")]
    {
        let mmio = FIRMWARE.with(|slot| match slot {
            Some(Firmware::Rpi(rpi)) => rpi.mmio_base,
            None => 0,
        });
        let _ = fw;
        let mut at = 0;
        while at < IDENTITY_SPAN {
            let device = mmio != 0 && at >= mmio && at < mmio + 0x100_0000;
            let flags = if device {
                MapFlags::WRITABLE | MapFlags::DEVICE
            } else {
                MapFlags::WRITABLE
            };
            page_map.map_block(PhysAddr::new(at), simpleboot_core::VirtAddr::new(at), flags)?;
            at += 0x20_0000;
        }
        Ok(())
    }
    #[cfg(target_arch = "x86_64")]
    {
        let _ = fw;
        page_map
            .identity_map(IDENTITY_SPAN, MapFlags::WRITABLE)
            .map_err(BootError::from)
    }
}

/// Maps the framebuffer with device attributes where the identity span
/// does not already cover it.
fn map_framebuffer(
    page_map: &mut PageMap<'_, ArchFormat, IdentityAccess>,
    fb: &FramebufferInfo,
) -> Result<(), BootError> {
    let start = fb.address & !(0x20_0000 - 1);
    let end = (fb.address + u64::from(fb.pitch) * u64::from(fb.height) + 0x1F_FFFF)
        & !(0x20_0000 - 1);
    let mut at = start.max(IDENTITY_SPAN);
    while at < end {
        page_map.map_block(
            PhysAddr::new(at),
            simpleboot_core::VirtAddr::new(at),
            MapFlags::WRITABLE | MapFlags::DEVICE,
        )?;
        at += 0x20_0000;
    }
    Ok(())
}

/// Reserves the MBI tag buffer.
fn tag_buffer(fw: FwHandle) -> Result<u64, BootError> {
    match fw.kind() {
        #[cfg(target_arch = "x86_64")]
        fw::FirmwareKind::Uefi => fw
            .with_uefi(|u| u.alloc_kernel_pages(TAG_BUFFER_PAGES, None))
            .unwrap_or(Err(BootError::OutOfMemory)),
        _ => Ok(FIXED_TAG_BUFFER),
    }
}

/// Wakes the application processors when the kernel can take them.
fn start_smp(fw: FwHandle, requested: bool, tables: &fw::SystemTables) -> SmpInfo {
    if !requested {
        let _ = (fw, tables);
        #[cfg(target_arch = "x86_64")]
        return SmpInfo::bsp_only(arch::x86_64::apic_id());
        #[cfg(target_arch = "aarch64")]
        return SmpInfo::bsp_only(arch::aarch64::core_id() as u32);
    }
    #[cfg(target_arch = "x86_64")]
    {
        smp::x86_64::start_aps(fw, tables.rsdp)
    }
    #[cfg(target_arch = "aarch64")]
    {
        smp::aarch64::start_aps(fw)
    }
}

/// Last stop: the memory-dependent tags (and zero-page fields), boot
/// services teardown on UEFI, and the jump.
#[expect(clippy::too_many_arguments, reason = "the handover closes over everything")]
fn finish_and_jump(
    fw: FwHandle,
    kernel: LoadedKernel,
    mut writer: TagWriter<'_>,
    memory: &MemoryMap,
    framebuffer: Option<&FramebufferInfo>,
    tables: &fw::SystemTables,
    modules: &mbi::ModuleList,
    override_dtb: Option<u64>,
    page_root: u64,
    tags: u64,
) -> Result<core::convert::Infallible, BootError> {
    #[cfg(target_arch = "x86_64")]
    {
        let _ = override_dtb;
        if let (KernelMode::Linux, Some(zero_page)) = (kernel.mode, kernel.zero_page) {
            mbi::finalise_zero_page(
                zero_page,
                memory,
                framebuffer,
                tables,
                modules.initrd,
                fw.kind() == fw::FirmwareKind::Uefi,
            );
        }

        if fw.kind() == fw::FirmwareKind::Uefi {
            exit_boot_services(fw, &mut writer, kernel.zero_page)?;
        }
        writer.finish()?;
        handover::handover(&kernel, page_root, tags)
    }

    #[cfg(target_arch = "aarch64")]
    {
        let _ = memory;
        let dtb = override_dtb
            .or_else(|| {
                tables
                    .dtb
                    .and_then(|dtb| dsdt::prepare_firmware_dtb(dtb, config_cmdline_for_dtb()))
            })
            .or(tables.dtb)
            .unwrap_or(0);
        let _ = (framebuffer, modules);
        writer.finish()?;
        handover::handover(&kernel, page_root, tags, dtb)
    }
}

/// UEFI teardown: final memory map into the tags (and the EFI pointer
/// tags), scratch freed, boot services exited.
#[cfg(target_arch = "x86_64")]
fn exit_boot_services(
    fw: FwHandle,
    writer: &mut TagWriter<'_>,
    zero_page: Option<u64>,
) -> Result<(), BootError> {
    let (system_table, image_handle) = fw
        .with_uefi(|u| (u.system_table as u64, u.image_handle as u64))
        .unwrap_or((0, 0));

    let checkpoint = writer.len();
    fw.with_uefi(|u| {
        u.exit_boot_services(|snapshot, map_address| {
            // Each retry re-emits the memory-dependent tags from the
            // fresh snapshot.
            writer.rewind(checkpoint);
            let mut entries: ArrayVec<MmapEntry, { fw::MAX_MEMORY_REGIONS }> = ArrayVec::new();
            for descriptor in snapshot.entries() {
                let kind = match descriptor.memory_type {
                    1 | 2 | 3 | 4 | 7 => memory_kind::AVAILABLE,
                    9 => memory_kind::ACPI_RECLAIMABLE,
                    10 => memory_kind::ACPI_NVS,
                    8 => memory_kind::BAD_RAM,
                    _ => memory_kind::RESERVED,
                };
                if entries.len() < fw::MAX_MEMORY_REGIONS {
                    entries.push(MmapEntry {
                        base: descriptor.physical_start,
                        length: descriptor.byte_len(),
                        kind,
                        firmware_type: descriptor.memory_type,
                    });
                }
            }
            let _ = writer.mmap(entries.as_slice());
            let _ = writer.efi64(system_table);
            let _ = writer.efi64_ih(image_handle);

            if let Some(zero_page) = zero_page {
                // SAFETY: the Linux loader owns this page.
                let buf = unsafe {
                    core::slice::from_raw_parts_mut(
                        zero_page as *mut u8,
                        simpleboot_linuxboot::ZERO_PAGE_SIZE,
                    )
                };
                let mut page = simpleboot_linuxboot::ZeroPage::new_unchecked(buf);
                page.set_efi_info(
                    system_table,
                    map_address,
                    snapshot.len() as u32 * snapshot.descriptor_size as u32,
                    snapshot.descriptor_size as u32,
                    snapshot.descriptor_version,
                );
            }
        })
    })
    .unwrap_or(Err(BootError::IoError))
}

/// BIOS-only kernel fallback: chain-load the partition's own boot
/// sector when it looks bootable.
fn fallback_vbr(
    fw: FwHandle,
    partition: &simpleboot_fat::BootPartition,
) -> Result<core::convert::Infallible, BootError> {
    #[cfg(target_arch = "x86_64")]
    if fw.kind() == fw::FirmwareKind::Bios {
        let mut vbr = [0u8; 512];
        fw.sector_read(partition.start_lba, &mut vbr)?;
        if vbr[510] == 0x55 && vbr[511] == 0xAA {
            log::info!("chain-loading the volume boot record...");
            // SAFETY: the legacy load address is free again by now.
            unsafe {
                core::ptr::copy_nonoverlapping(vbr.as_ptr(), 0x7C00 as *mut u8, 512);
                handover::x86_64::publish(0, 0);
                handover::x86_64::jump_vbr(fw.drive_code());
            }
        }
    }
    let _ = (fw, partition);
    Err(BootError::FileNotFound)
}

// ---------------------------------------------------------------------------
// Config and splash staging
// ---------------------------------------------------------------------------

/// Upper bound on config size.
const CONFIG_MAX: usize = 16384;

static CONFIG_BUF: BootCell<[u8; CONFIG_MAX]> = BootCell::new([0; CONFIG_MAX]);

/// Remembers the command line across phases on aarch64 (the DTB patch
/// happens long after the config goes out of scope).
static DTB_CMDLINE: BootCell<Option<(usize, usize)>> = BootCell::new(None);

/// Loads `simpleboot.cfg` (or the easyboot menu as a primary-mode
/// fallback) into the config buffer.
fn read_config(volume: &mut FatVolume<FwHandle>, backup: bool) -> Option<&'static str> {
    let mut file = match volume.open("simpleboot.cfg") {
        Ok(file) => file,
        Err(_) if !backup => match volume.open("easyboot/menu.cfg") {
            Ok(file) => file,
            Err(_) => {
                log::warn!("no configuration file, using defaults");
                return None;
            }
        },
        Err(_) => {
            log::warn!("no configuration file, using defaults");
            return None;
        }
    };

    let (ptr, len) = CONFIG_BUF.with(|buf| {
        let len = file.read(0, buf.as_mut_slice()).unwrap_or(0);
        (buf.as_ptr(), len)
    });
    if len == 0 {
        return None;
    }
    // SAFETY: the static buffer is written once per attempt and only
    // read through the returned slice afterwards.
    let bytes = unsafe { core::slice::from_raw_parts(ptr, len) };
    match core::str::from_utf8(bytes) {
        Ok(text) => {
            remember_cmdline(text);
            Some(text)
        }
        Err(_) => {
            log::warn!("configuration is not UTF-8, using defaults");
            None
        }
    }
}

/// Stashes the offset of the command line inside the config buffer for
/// the aarch64 DTB patch.
fn remember_cmdline(text: &str) {
    let base = text.as_ptr() as usize;
    let config = BootConfig::parse(text, false);
    DTB_CMDLINE.with(|slot| {
        *slot = config
            .cmdline
            .map(|cmdline| (cmdline.as_ptr() as usize - base, cmdline.len()));
    });
}

/// The remembered command line, if any.
#[cfg(target_arch = "aarch64")]
fn config_cmdline_for_dtb() -> Option<&'static str> {
    let range = DTB_CMDLINE.with(|slot| *slot)?;
    let ptr = CONFIG_BUF.with(|buf| buf.as_ptr());
    // SAFETY: offsets recorded against the same static buffer.
    let bytes = unsafe { core::slice::from_raw_parts(ptr.add(range.0), range.1) };
    core::str::from_utf8(bytes).ok()
}

/// Stages the bootsplash TGA (loader-private memory).
fn read_splash(
    fw: FwHandle,
    volume: &mut FatVolume<FwHandle>,
    raw_path: &str,
) -> Option<&'static [u8]> {
    let mut path_buf = [0u8; 256];
    let path = simpleboot_bootcfg::unescape_path(raw_path, &mut path_buf)?;
    let mut file = match volume.open(path) {
        Ok(file) => file,
        Err(_) => {
            log::warn!("unable to load '{path}'");
            return None;
        }
    };
    let size = file.size();

    let buffer = match fw.kind() {
        #[cfg(target_arch = "x86_64")]
        fw::FirmwareKind::Uefi => fw
            .with_uefi(|u| u.alloc_scratch((size as usize).div_ceil(4096)))
            .and_then(Result::ok)?,
        _ => mem::bump_alloc(u64::from(size)).ok()?,
    };
    // SAFETY: the buffer was just reserved.
    let slice = unsafe { core::slice::from_raw_parts_mut(buffer as *mut u8, size as usize) };
    file.read(0, slice).ok()?;
    Some(&*slice)
}

// ---------------------------------------------------------------------------
// Panic handling
// ---------------------------------------------------------------------------

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    log::error!("loader panic: {info}");
    park()
}
