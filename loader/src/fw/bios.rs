//! Legacy BIOS firmware variant.
//!
//! Stage-1 hands control over in long mode with identity paging, the
//! boot drive code at `0x4FF`, and the loader image at `0x8000`; BIOS
//! services are still available by dropping back to real mode. Disk
//! reads try ATA PIO first and fall back to `INT 13h` extended reads;
//! the memory map comes from `INT 15h E820`, the framebuffer from VBE.
//!
//! The real-mode round trip is one opaque routine, [`bios_int`]: it
//! leaves long mode, executes a software interrupt with the register
//! file staged in [`REAL_REGS`], and climbs back up. Everything it
//! touches (stack, scratch buffers, the loader image) sits below 1 MiB.

use core::arch::global_asm;

use simpleboot_fat::SECTOR_SIZE;
use simpleboot_multiboot2::{FramebufferInfo, MmapEntry, memory_kind};

use crate::arch::x86_64::{inb, inw, outb};
use crate::error::BootError;
use crate::fw::{MAX_MEMORY_REGIONS, MemoryMap, SystemTables};

/// Where stage-1 stores the BIOS boot drive code.
const BOOT_DRIVE_PTR: *const u8 = 0x4FF as *const u8;

/// Disk address packet for `INT 13h AH=42h`.
const DAP: *mut u8 = 0x500 as *mut u8;

/// Low-memory transfer buffer (E820, VESA, one disk sector).
const LOW_BUFFER: *mut u8 = 0x600 as *mut u8;

/// EDID capture area.
const EDID_BUFFER: *const u8 = 0x580 as *const u8;

/// Register file exchanged with [`bios_int`].
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct BiosRegs {
    /// EAX in/out.
    pub eax: u32,
    /// EBX in/out.
    pub ebx: u32,
    /// ECX in/out.
    pub ecx: u32,
    /// EDX in/out.
    pub edx: u32,
    /// ESI in/out.
    pub esi: u32,
    /// EDI in/out.
    pub edi: u32,
    /// ES segment in/out.
    pub es: u16,
    /// FLAGS out (bit 0: carry).
    pub eflags: u16,
}

unsafe extern "C" {
    /// Executes `int <vector>` in real mode with [`REAL_REGS`].
    ///
    /// Contract: interrupts stay disabled around the switch; CR3, GDTR,
    /// IDTR, and the long-mode segment state are restored on return;
    /// the real-mode stack lives at `0xB00..0x1000`. Only the BSP may
    /// call this, and only before handover.
    fn bios_int(vector: u32);
    /// Real-mode chain-load of the boot sector at `0x7C00`; never
    /// returns. `drive` ends up in `dl`.
    pub(crate) fn chain_vbr(drive: u32) -> !;
    /// The register exchange area, in loader `.data` (below 1 MiB).
    static mut REAL_REGS: BiosRegs;
}

global_asm!(
    r#"
.section .data
.balign 8
.global REAL_REGS
REAL_REGS:
    .space 28

// Real-mode GDT: null, 64-bit code, 32-bit data, 32-bit code,
// 16-bit code, 16-bit data.
.balign 8
thunk_gdt:
    .quad 0
    .quad 0x00AF9A000000FFFF
    .quad 0x00CF92000000FFFF
    .quad 0x00CF9A000000FFFF
    .quad 0x008F9A000000FFFF
    .quad 0x008F92000000FFFF
thunk_gdtr:
    .word . - thunk_gdt - 1
    .quad thunk_gdt
saved_gdtr:
    .space 10
saved_idtr:
    .space 10
saved_rsp:
    .quad 0

// Linked into the low .text.realmode section: the 16-bit stretches rely
// on their own addresses fitting in 16 bits.
.section .text.realmode
.global bios_int
.code64
bios_int:
    // Patch the interrupt vector into the real-mode int instruction.
    mov byte ptr [9f + 1], dil
    push rbx
    push rbp
    push r12
    push r13
    push r14
    push r15
    sgdt [saved_gdtr]
    sidt [saved_idtr]
    mov [saved_rsp], rsp
    lgdt [thunk_gdtr]

    // Drop to 32-bit compatibility mode.
    push 0x18
    lea rax, [rip + 1f]
    push rax
    retfq
.code32
1:  mov ax, 0x10
    mov ds, ax
    mov es, ax
    mov ss, ax
    // Paging off, long mode off.
    mov eax, cr0
    and eax, 0x7FFFFFFF
    mov cr0, eax
    mov ecx, 0xC0000080
    rdmsr
    and eax, ~(1 << 8)
    wrmsr
    // To 16-bit protected mode.
.att_syntax prefix
    ljmpl $0x20, $2f
.intel_syntax noprefix
.code16
2:  mov ax, 0x28
    mov ds, ax
    mov es, ax
    mov ss, ax
    // Protection off, real mode.
    mov eax, cr0
    and eax, ~1
    mov cr0, eax
.att_syntax prefix
    ljmpw $0, $3f
.intel_syntax noprefix
3:  xor ax, ax
    mov ds, ax
    mov ss, ax
    mov sp, 0xFF0
    // Stage the register file.
    mov eax, [REAL_REGS + 0]
    mov ebx, [REAL_REGS + 4]
    mov ecx, [REAL_REGS + 8]
    mov edx, [REAL_REGS + 12]
    mov esi, [REAL_REGS + 16]
    mov edi, [REAL_REGS + 20]
    push word ptr [REAL_REGS + 24]
    pop es
    sti
9:  int 0x00
    cli
    // Capture results.
    mov [REAL_REGS + 0], eax
    mov [REAL_REGS + 4], ebx
    mov [REAL_REGS + 8], ecx
    mov [REAL_REGS + 12], edx
    mov [REAL_REGS + 16], esi
    mov [REAL_REGS + 20], edi
    xor ax, ax
    mov es, ax
    pushf
    pop word ptr [REAL_REGS + 26]
    // Climb back: protected mode first.
    mov eax, cr0
    or eax, 1
    mov cr0, eax
.att_syntax prefix
    ljmpl $0x18, $4f
.intel_syntax noprefix
.code32
4:  mov ax, 0x10
    mov ds, ax
    mov es, ax
    mov ss, ax
    // Long mode on, paging on (CR3 still holds the identity tables).
    mov ecx, 0xC0000080
    rdmsr
    or eax, (1 << 8)
    wrmsr
    mov eax, cr0
    or eax, 0x80000000
    mov cr0, eax
.att_syntax prefix
    ljmpl $0x08, $5f
.intel_syntax noprefix
.code64
5:  lgdt [saved_gdtr]
    lidt [saved_idtr]
    mov rsp, [saved_rsp]
    pop r15
    pop r14
    pop r13
    pop r12
    pop rbp
    pop rbx
    ret

// chain_vbr(dil = drive): drop to real mode and hand the machine to the
// boot sector already copied to 0x7C00. Never returns.
.global chain_vbr
.code64
chain_vbr:
    cli
    mov byte ptr [0x4FF], dil
    lgdt [thunk_gdtr]
    push 0x18
    lea rax, [rip + 1f]
    push rax
    retfq
.code32
1:  mov ax, 0x10
    mov ds, ax
    mov es, ax
    mov ss, ax
    mov eax, cr0
    and eax, 0x7FFFFFFF
    mov cr0, eax
    mov ecx, 0xC0000080
    rdmsr
    and eax, ~(1 << 8)
    wrmsr
.att_syntax prefix
    ljmpl $0x20, $2f
.intel_syntax noprefix
.code16
2:  mov ax, 0x28
    mov ds, ax
    mov es, ax
    mov ss, ax
    mov eax, cr0
    and eax, ~1
    mov cr0, eax
.att_syntax prefix
    ljmpw $0, $3f
.intel_syntax noprefix
3:  xor ax, ax
    mov ds, ax
    mov es, ax
    mov ss, ax
    mov sp, 0x7C00
    mov dl, [0x4FF]
.att_syntax prefix
    ljmpw $0, $0x7C00
.intel_syntax noprefix
.code64
.text
"#
);

/// Runs a BIOS interrupt; returns the output registers.
fn call(vector: u8, input: BiosRegs) -> BiosRegs {
    // SAFETY: single-threaded BSP; REAL_REGS is only touched here and
    // inside the thunk, which does not re-enter.
    unsafe {
        REAL_REGS = input;
        bios_int(u32::from(vector));
        REAL_REGS
    }
}

/// The legacy BIOS firmware context.
pub struct BiosFw {
    /// Firmware drive code stage-1 booted from (0x80 = first disk).
    pub boot_drive: u8,
    /// `true` once ATA PIO probing failed and reads go through INT 13h.
    ata_broken: bool,
    /// Captured EDID block length (0 = none).
    edid_len: usize,
}

impl BiosFw {
    /// Binds the capability layer to the BIOS environment.
    pub fn new() -> Self {
        // SAFETY: stage-1 stored the drive code at the fixed address.
        let boot_drive = unsafe { BOOT_DRIVE_PTR.read() };
        Self {
            boot_drive,
            ata_broken: false,
            edid_len: 0,
        }
    }

    /// Reads one sector, ATA PIO with an INT 13h fallback.
    ///
    /// # Errors
    ///
    /// [`BootError::IoError`] if both paths fail.
    pub fn sector_read(&mut self, lba: u64, buf: &mut [u8; SECTOR_SIZE]) -> Result<(), BootError> {
        if !self.ata_broken {
            match ata_read(lba, buf) {
                Ok(()) => return Ok(()),
                Err(_) => self.ata_broken = true,
            }
        }
        self.int13_read(lba, buf)
    }

    /// `INT 13h AH=42h` extended read of one sector into the low buffer.
    fn int13_read(&mut self, lba: u64, buf: &mut [u8; SECTOR_SIZE]) -> Result<(), BootError> {
        // Disk address packet: size, 0, count, offset, segment, LBA.
        // SAFETY: the packet area is reserved by the fixed memory layout.
        unsafe {
            DAP.write(0x10);
            DAP.add(1).write(0);
            (DAP.add(2) as *mut u16).write(1); // one sector
            (DAP.add(4) as *mut u16).write(LOW_BUFFER as u16); // offset
            (DAP.add(6) as *mut u16).write(0); // segment
            (DAP.add(8) as *mut u64).write(lba);
        }

        let out = call(
            0x13,
            BiosRegs {
                eax: 0x4200,
                edx: u32::from(self.boot_drive),
                esi: DAP as u32,
                ..BiosRegs::default()
            },
        );
        if out.eflags & 1 != 0 {
            return Err(BootError::IoError);
        }
        // SAFETY: the BIOS filled one sector at the fixed buffer.
        unsafe {
            core::ptr::copy_nonoverlapping(LOW_BUFFER, buf.as_mut_ptr(), SECTOR_SIZE);
        }
        Ok(())
    }

    /// Walks the VBE mode list for the largest fit and switches to it.
    pub fn framebuffer_acquire(
        &mut self,
        width: u32,
        height: u32,
        bpp: u32,
    ) -> Option<FramebufferInfo> {
        // VBE controller info ("VBE2" request) into the low buffer.
        // SAFETY: fixed scratch area.
        unsafe {
            core::ptr::copy_nonoverlapping(b"VBE2".as_ptr(), LOW_BUFFER, 4);
        }
        let out = call(
            0x10,
            BiosRegs {
                eax: 0x4F00,
                edi: LOW_BUFFER as u32,
                ..BiosRegs::default()
            },
        );
        if out.eax & 0xFFFF != 0x004F {
            return None;
        }

        // SAFETY: the BIOS filled the VbeInfoBlock.
        let (mode_seg, mode_off) = unsafe {
            let ptr = (LOW_BUFFER.add(14) as *const u32).read_unaligned();
            ((ptr >> 16) as u32, ptr & 0xFFFF)
        };
        let mode_list = ((mode_seg << 4) + mode_off) as *const u16;

        let mut best: Option<(u16, FramebufferInfo)> = None;
        for index in 0..128 {
            // SAFETY: the list is terminated by 0xFFFF per VBE.
            let mode = unsafe { mode_list.add(index).read_unaligned() };
            if mode == 0xFFFF {
                break;
            }
            let Some(info) = self.vbe_mode_info(mode) else {
                continue;
            };
            if info.width > width || info.height > height || u32::from(info.bpp) > bpp {
                continue;
            }
            let pixels = u64::from(info.width) * u64::from(info.height);
            let better = best.as_ref().is_none_or(|(_, other)| {
                pixels > u64::from(other.width) * u64::from(other.height)
            });
            if better {
                best = Some((mode, info));
            }
        }

        let (mode, info) = best?;
        let out = call(
            0x10,
            BiosRegs {
                eax: 0x4F02,
                ebx: u32::from(mode) | 0x4000, // linear framebuffer
                ..BiosRegs::default()
            },
        );
        if out.eax & 0xFFFF != 0x004F {
            return None;
        }

        self.capture_edid();
        Some(info)
    }

    /// `INT 10h AX=4F01` mode query.
    fn vbe_mode_info(&mut self, mode: u16) -> Option<FramebufferInfo> {
        let out = call(
            0x10,
            BiosRegs {
                eax: 0x4F01,
                ecx: u32::from(mode),
                edi: LOW_BUFFER as u32,
                ..BiosRegs::default()
            },
        );
        if out.eax & 0xFFFF != 0x004F {
            return None;
        }

        // SAFETY: the BIOS filled the VBE ModeInfoBlock at the buffer.
        unsafe {
            let at = |offset: usize| LOW_BUFFER.add(offset);
            let attributes = (at(0) as *const u16).read_unaligned();
            // Need: supported, graphics, linear framebuffer.
            if attributes & 0x99 != 0x99 {
                return None;
            }
            let memory_model = at(0x1B).read();
            if memory_model != 6 {
                return None; // direct color only
            }
            Some(FramebufferInfo {
                address: u64::from((at(0x28) as *const u32).read_unaligned()),
                pitch: u32::from((at(0x10) as *const u16).read_unaligned()),
                width: u32::from((at(0x12) as *const u16).read_unaligned()),
                height: u32::from((at(0x14) as *const u16).read_unaligned()),
                bpp: at(0x19).read(),
                red_size: at(0x1F).read(),
                red_position: at(0x20).read(),
                green_size: at(0x21).read(),
                green_position: at(0x22).read(),
                blue_size: at(0x23).read(),
                blue_position: at(0x24).read(),
            })
        }
    }

    /// `INT 10h AX=4F15` EDID read into the fixed capture area.
    fn capture_edid(&mut self) {
        let out = call(
            0x10,
            BiosRegs {
                eax: 0x4F15,
                ebx: 0x0001,
                edi: EDID_BUFFER as u32,
                ..BiosRegs::default()
            },
        );
        if out.eax & 0xFFFF == 0x004F {
            self.edid_len = 128;
        }
    }

    /// The EDID captured during mode selection.
    pub fn edid(&mut self) -> Option<&'static [u8]> {
        if self.edid_len == 0 {
            return None;
        }
        // SAFETY: the capture area was filled by the VBE call and is
        // never reused.
        Some(unsafe { core::slice::from_raw_parts(EDID_BUFFER, self.edid_len) })
    }

    /// `INT 15h EAX=E820` enumeration.
    ///
    /// # Errors
    ///
    /// [`BootError::IoError`] when the first call already fails.
    pub fn memory_map(&mut self) -> Result<MemoryMap, BootError> {
        const SMAP: u32 = 0x534D_4150;
        let mut map = MemoryMap::new();
        let mut continuation = 0u32;

        loop {
            let out = call(
                0x15,
                BiosRegs {
                    eax: 0xE820,
                    ebx: continuation,
                    ecx: 24,
                    edx: SMAP,
                    edi: LOW_BUFFER as u32,
                    ..BiosRegs::default()
                },
            );
            if out.eax != SMAP || out.eflags & 1 != 0 {
                if map.entries.is_empty() {
                    return Err(BootError::IoError);
                }
                break;
            }

            // SAFETY: the BIOS filled a 20/24-byte range descriptor.
            let (base, length, e820_kind) = unsafe {
                (
                    (LOW_BUFFER as *const u64).read_unaligned(),
                    (LOW_BUFFER.add(8) as *const u64).read_unaligned(),
                    (LOW_BUFFER.add(16) as *const u32).read_unaligned(),
                )
            };
            if length != 0 && map.entries.len() < MAX_MEMORY_REGIONS {
                let kind = match e820_kind {
                    1 => memory_kind::AVAILABLE,
                    3 => memory_kind::ACPI_RECLAIMABLE,
                    4 => memory_kind::ACPI_NVS,
                    5 => memory_kind::BAD_RAM,
                    _ => memory_kind::RESERVED,
                };
                map.entries.push(MmapEntry {
                    base,
                    length,
                    kind,
                    firmware_type: e820_kind,
                });
            }

            continuation = out.ebx;
            if continuation == 0 {
                break;
            }
        }
        Ok(map)
    }

    /// Busy wait against the 15 us DRAM refresh toggle on port 0x61.
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

    /// PS/2 output-buffer-full bit: any pending byte counts as a key.
    pub fn poll_key(&mut self) -> bool {
        unsafe { inb(0x64) & 1 != 0 }
    }

    /// Scans `0x9A000..0x100000` for the RSDP and SMBIOS anchors.
    pub fn find_system_tables(&mut self) -> SystemTables {
        let mut tables = SystemTables::default();
        // SAFETY: the window is identity mapped ROM/EBDA space.
        let window =
            unsafe { core::slice::from_raw_parts(0x9_A000 as *const u8, 0x10_0000 - 0x9_A000) };

        if let Some(offset) = simpleboot_acpi::rsdp::scan_region(window) {
            tables.rsdp = Some(0x9_A000 + offset as u64);
        }
        let mut at = 0;
        while at + 32 <= window.len() {
            if &window[at..at + 4] == b"_SM_" {
                let length = usize::from(window[at + 5]);
                let entry = &window[at..(at + length).min(window.len())];
                let sum = entry.iter().fold(0u8, |s, &b| s.wrapping_add(b));
                if sum == 0 {
                    tables.smbios = Some(0x9_A000 + at as u64);
                    break;
                }
            }
            at += 16;
        }
        tables
    }
}

// ---------------------------------------------------------------------------
// ATA PIO
// ---------------------------------------------------------------------------

/// Primary ATA channel I/O base.
const ATA_BASE: u16 = 0x1F0;
/// Device-control register of the primary channel.
const ATA_CONTROL: u16 = 0x3F6;
/// Status poll bound; the path self-limits instead of hanging on dead
/// hardware.
const ATA_SPIN_LIMIT: u32 = 1_000_000;

/// One-sector LBA48 PIO read from the primary master.
pub(crate) fn ata_read(lba: u64, buf: &mut [u8; SECTOR_SIZE]) -> Result<(), BootError> {
    unsafe {
        // Floating bus means no controller at all.
        if inb(ATA_BASE + 7) == 0xFF {
            return Err(BootError::IoError);
        }

        outb(ATA_BASE + 6, 0x40); // master, LBA
        outb(ATA_BASE + 2, 0); // sector count high
        outb(ATA_BASE + 3, (lba >> 24) as u8);
        outb(ATA_BASE + 4, (lba >> 32) as u8);
        outb(ATA_BASE + 5, (lba >> 40) as u8);
        outb(ATA_BASE + 2, 1); // sector count low
        outb(ATA_BASE + 3, lba as u8);
        outb(ATA_BASE + 4, (lba >> 8) as u8);
        outb(ATA_BASE + 5, (lba >> 16) as u8);
        outb(ATA_BASE + 7, 0x24); // READ SECTORS EXT

        let mut spins = 0;
        loop {
            let status = inb(ATA_BASE + 7);
            if status & 0x21 != 0 {
                return Err(BootError::IoError); // ERR or DF
            }
            if status & 0x80 == 0 && status & 0x08 != 0 {
                break; // not busy, data ready
            }
            spins += 1;
            if spins > ATA_SPIN_LIMIT {
                return Err(BootError::IoError);
            }
            core::hint::spin_loop();
        }

        for chunk in buf.chunks_exact_mut(2) {
            let word = inw(ATA_BASE);
            chunk[0] = word as u8;
            chunk[1] = (word >> 8) as u8;
        }
        // Acknowledge by reading the alternate status once.
        let _ = inb(ATA_CONTROL);
    }
    Ok(())
}
