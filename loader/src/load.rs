//! Kernel format sniffing and segment loading.
//!
//! Formats are probed in a fixed order: the Linux boot protocol, then
//! Multiboot2 ELF, then Multiboot2 PE. Segments stream straight from
//! the FAT volume into their physical destination; higher-half virtual
//! ranges are backed by freshly allocated pages and mapped 4 KiB at a
//! time into the handover page map.

#[cfg(target_arch = "aarch64")]
use simpleboot_core::handover::STACK_AARCH64;
use simpleboot_core::{PhysAddr, VirtAddr, align_up};
use simpleboot_elf::{ElfClass, ElfImage, ElfMachine};
use simpleboot_fat::{FatVolume, File};
#[cfg(target_arch = "x86_64")]
use simpleboot_linuxboot::{SetupHeader, ZERO_PAGE_SIZE, ZeroPage};
use simpleboot_multiboot2::FramebufferInfo;
use simpleboot_paging::{MapFlags, PageMap};
use simpleboot_pe::{PeImage, PeMachine};

use crate::error::BootError;
use crate::fw::{FwHandle, MemoryMap};
use crate::mem::IdentityAccess;
use crate::splash::ProgressBar;

#[cfg(target_arch = "x86_64")]
use simpleboot_paging::X86_64Format as ArchFormat;

#[cfg(target_arch = "aarch64")]
use simpleboot_paging::Aarch64Format as ArchFormat;

/// Lowest physical address a kernel segment may claim.
///
/// Everything below is the loader's working set: scratch words, the
/// trampoline, the loader image, and the config/tag area.
#[cfg(target_arch = "x86_64")]
const LOW_RESERVED_END: u64 = 0x4_0000;

/// On the Pi the loader itself sits at 0x80000; Linux images that want
/// exactly that address are staged and moved during handover.
#[cfg(target_arch = "aarch64")]
const LOW_RESERVED_END: u64 = 0x10_0000;

/// Where the legacy-BIOS Linux zero page lives.
#[cfg(target_arch = "x86_64")]
const BIOS_ZERO_PAGE: u64 = 0x9_0000;

/// CPU state the kernel expects at its entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelMode {
    /// Multiboot2, protected mode, paging off.
    Mb32,
    /// Multiboot2, long mode (or EL1 on aarch64).
    Mb64,
    /// Multiboot2 PE32 kernel: protected-mode entry like Mb32.
    Pe32,
    /// Linux/x86 64-bit boot protocol.
    Linux,
    /// Linux/aarch64 flat image at 0x80000.
    LinuxAarch64,
}

/// What the loader knows about the kernel after loading it.
pub struct LoadedKernel {
    /// Entry-point contract.
    pub mode: KernelMode,
    /// Entry address.
    pub entry: u64,
    /// The populated zero page (Linux/x86 only).
    pub zero_page: Option<u64>,
    /// Staging buffer for images that must be moved at handover
    /// (`LinuxAarch64`): `(staged_at, byte_len)`.
    pub staged: Option<(u64, u32)>,
}

/// Loads the kernel at `path`, dispatching on the sniffed format.
///
/// SMP stays enabled only for Mb64 kernels; the caller clears its flag
/// based on the returned mode.
///
/// # Errors
///
/// [`BootError::FileNotFound`] when the path is missing,
/// [`BootError::UnsupportedKernel`] on unknown magic, plus the segment
/// loader's memory errors.
pub fn load_kernel(
    fw: FwHandle,
    volume: &mut FatVolume<FwHandle>,
    path: &str,
    cmdline: Option<&str>,
    memory: &MemoryMap,
    page_map: &mut PageMap<'_, ArchFormat, IdentityAccess>,
    progress_fb: Option<&FramebufferInfo>,
) -> Result<LoadedKernel, BootError> {
    let mut file = volume.open(path)?;
    let file_size = file.size();

    let mut header = [0u8; 4096];
    let header_len = file.read(0, &mut header)?;
    let header = &header[..header_len];

    #[cfg(target_arch = "x86_64")]
    if SetupHeader::sniff(header) {
        log::info!("Loading Linux kernel '{path}'...");
        return load_linux(fw, &mut file, header, file_size, cmdline, memory, progress_fb);
    }

    #[cfg(target_arch = "aarch64")]
    if header.len() > 0x3C && &header[..2] == b"MZ" && &header[0x38..0x3B] == b"ARM"
        && header[0x3B] == 64
    {
        log::info!("Loading Linux kernel '{path}'...");
        // Stage the whole image; the handover stub moves it onto the
        // loader at 0x80000.
        let staged = crate::mem::bump_alloc(u64::from(file_size))?;
        read_exact(
            fw,
            &mut file,
            0,
            staged,
            file_size,
            &mut ProgressBar::new(progress_fb, file_size as usize),
        )?;
        let _ = cmdline;
        return Ok(LoadedKernel {
            mode: KernelMode::LinuxAarch64,
            entry: STACK_AARCH64,
            zero_page: None,
            staged: Some((staged, file_size)),
        });
    }

    if ElfImage::sniff(header) {
        let image = ElfImage::parse(header)?;
        if !machine_matches_elf(image.machine()) {
            return Err(BootError::UnsupportedKernel);
        }
        let mode = match image.class() {
            ElfClass::Elf64 => KernelMode::Mb64,
            ElfClass::Elf32 => KernelMode::Mb32,
        };
        log::info!(
            "Loading Multiboot2 ELF{} kernel '{path}'...",
            if mode == KernelMode::Mb64 { 64 } else { 32 }
        );

        let entry = image.entry();
        let mut bar = ProgressBar::new(progress_fb, file_size as usize);
        for segment in image.load_segments() {
            load_segment(
                fw,
                &mut file,
                memory,
                page_map,
                segment.offset as u32,
                segment.filesz as u32,
                segment.vaddr,
                segment.memsz,
                &mut bar,
            )?;
        }
        bar.clear();
        return Ok(LoadedKernel {
            mode,
            entry,
            zero_page: None,
            staged: None,
        });
    }

    if PeImage::sniff(header) {
        let image = PeImage::parse(header)?;
        if !machine_matches_pe(image.machine()) {
            return Err(BootError::UnsupportedKernel);
        }
        let mode = if image.is_pe32_plus() {
            KernelMode::Mb64
        } else {
            KernelMode::Pe32
        };
        log::info!(
            "Loading Multiboot2 PE{} kernel '{path}'...",
            if mode == KernelMode::Mb64 { 64 } else { 32 }
        );

        // The image base is truncated to 32 bits in both modes; the
        // entry-point arithmetic below relies on that.
        let base = u64::from(image.image_base() as u32);
        let entry = base + (image.entry_point() - image.image_base());
        let mut bar = ProgressBar::new(progress_fb, file_size as usize);
        for section in image.sections() {
            // PE32+ sign-extends the 32-bit section address, PE32 does
            // not; the asymmetry is deliberate and load-bearing.
            let vaddr = if image.is_pe32_plus() {
                base.wrapping_add(i64::from(section.virtual_address as i32) as u64)
            } else {
                base + u64::from(section.virtual_address)
            };
            load_segment(
                fw,
                &mut file,
                memory,
                page_map,
                section.raw_offset,
                section.raw_size,
                vaddr,
                u64::from(section.virtual_size),
                &mut bar,
            )?;
        }
        bar.clear();
        return Ok(LoadedKernel {
            mode,
            entry,
            zero_page: None,
            staged: None,
        });
    }

    log::error!("unknown kernel format '{path}'");
    Err(BootError::UnsupportedKernel)
}

fn machine_matches_elf(machine: ElfMachine) -> bool {
    #[cfg(target_arch = "x86_64")]
    {
        matches!(machine, ElfMachine::I386 | ElfMachine::X86_64)
    }
    #[cfg(target_arch = "aarch64")]
    {
        matches!(machine, ElfMachine::Aarch64)
    }
}

fn machine_matches_pe(machine: PeMachine) -> bool {
    #[cfg(target_arch = "x86_64")]
    {
        matches!(machine, PeMachine::I386 | PeMachine::X86_64)
    }
    #[cfg(target_arch = "aarch64")]
    {
        matches!(machine, PeMachine::Aarch64)
    }
}

/// Linux/x86: validate the setup header, build the zero page and the
/// command-line copy, and place the protected-mode image at its
/// preferred address.
#[cfg(target_arch = "x86_64")]
fn load_linux(
    fw: FwHandle,
    file: &mut File<'_, FwHandle>,
    header: &[u8],
    file_size: u32,
    cmdline: Option<&str>,
    memory: &MemoryMap,
    progress_fb: Option<&FramebufferInfo>,
) -> Result<LoadedKernel, BootError> {
    let setup = SetupHeader::parse(header, u64::from(file_size))?;

    // Zero page plus one page for the command line.
    let zero_page_phys = match fw.kind() {
        crate::fw::FirmwareKind::Uefi => {
            fw.with_uefi(|u| u.alloc_kernel_pages(2, None))
                .unwrap_or(Err(BootError::OutOfMemory))?
        }
        _ => BIOS_ZERO_PAGE,
    };

    // SAFETY: two pages we own, identity mapped.
    let zero_page_buf = unsafe {
        core::slice::from_raw_parts_mut(zero_page_phys as *mut u8, 2 * ZERO_PAGE_SIZE)
    };
    let (page, cmdline_buf) = zero_page_buf.split_at_mut(ZERO_PAGE_SIZE);
    let mut zero_page = ZeroPage::new(page);
    zero_page.install_header(&setup, header);

    if let Some(cmdline) = cmdline {
        cmdline_buf.fill(0);
        let len = cmdline.len().min(ZERO_PAGE_SIZE - 1);
        cmdline_buf[..len].copy_from_slice(&cmdline.as_bytes()[..len]);
        zero_page.set_cmdline_ptr((zero_page_phys + ZERO_PAGE_SIZE as u64) as u32);
    }

    // The protected-mode image: init_size bytes at pref_address.
    let offset = setup.payload_offset();
    let filesz = file_size.saturating_sub(offset).min(setup.init_size);
    let target = setup.pref_address;
    let size = align_up(u64::from(setup.init_size), 4096);
    if !memory.range_is_available(target, size) {
        return Err(BootError::MemoryInUse);
    }
    fw.alloc_kernel(size, Some(target))?;
    crate::mem::bump_reserve_through(target + size);
    read_exact(
        fw,
        file,
        offset,
        target,
        filesz,
        &mut ProgressBar::new(progress_fb, filesz as usize),
    )?;

    Ok(LoadedKernel {
        mode: KernelMode::Linux,
        entry: setup.entry_point(),
        zero_page: Some(zero_page_phys),
        staged: None,
    })
}

/// Places one kernel segment, mapping higher-half ranges.
///
/// # Errors
///
/// [`BootError::MemoryInUse`] when the target overlaps the loader or
/// falls outside Available RAM, plus allocation and I/O errors.
#[expect(clippy::too_many_arguments, reason = "mirrors the segment tuple")]
fn load_segment(
    fw: FwHandle,
    file: &mut File<'_, FwHandle>,
    memory: &MemoryMap,
    page_map: &mut PageMap<'_, ArchFormat, IdentityAccess>,
    offset: u32,
    filesz: u32,
    vaddr: u64,
    memsz: u64,
    bar: &mut ProgressBar,
) -> Result<(), BootError> {
    if memsz == 0 {
        return Ok(());
    }
    log::debug!("  segment {offset:#010x}[{filesz:#010x}] -> {vaddr:#010x}[{memsz:#010x}]");

    let size = align_up(memsz + (vaddr & 0xFFF), 4096);
    if vaddr < LOW_RESERVED_END {
        return Err(BootError::MemoryInUse);
    }

    let phys = if vaddr > memory.top_of_ram {
        // A higher-half segment: back it with fresh pages and map them.
        let backing = fw.alloc_kernel(size, None)?;
        page_map.map_range(
            PhysAddr::new(backing),
            VirtAddr::new(vaddr & !0xFFF),
            size,
            MapFlags::WRITABLE,
        )?;
        backing + (vaddr & 0xFFF)
    } else {
        if !memory.range_is_available(vaddr & !0xFFF, size) {
            return Err(BootError::MemoryInUse);
        }
        fw.alloc_kernel(size, Some(vaddr & !0xFFF))?;
        // Modules go after the kernel to avoid any conflict.
        crate::mem::bump_reserve_through((vaddr & !0xFFF) + size);
        vaddr
    };

    read_exact(fw, file, offset, phys, filesz, bar)?;
    // Zero the BSS tail (alloc_kernel cleared fresh pages, but a fixed
    // placement may cover previously used RAM).
    if memsz > u64::from(filesz) {
        // SAFETY: within the range vetted/allocated above.
        unsafe {
            core::ptr::write_bytes(
                (phys + u64::from(filesz)) as *mut u8,
                0,
                (memsz - u64::from(filesz)) as usize,
            );
        }
    }
    Ok(())
}

/// Streams `len` bytes at `offset` into physical memory, feeding the
/// progress bar and aborting on a key press.
fn read_exact(
    fw: FwHandle,
    file: &mut File<'_, FwHandle>,
    offset: u32,
    phys: u64,
    len: u32,
    bar: &mut ProgressBar,
) -> Result<(), BootError> {
    if len == 0 {
        return Ok(());
    }
    // SAFETY: destination vetted by the caller, identity mapped.
    let target = unsafe { core::slice::from_raw_parts_mut(phys as *mut u8, len as usize) };
    let read = file.read_with(offset, target, &mut |done, _total| {
        bar.update(done);
        !fw.poll_key()
    })?;
    if read < len as usize {
        return Err(BootError::IoError);
    }
    Ok(())
}
