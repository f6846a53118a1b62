//! x86_64 handover paths.
//!
//! The BSP publishes the fixed low-memory words (GDT, IDT, page-table
//! root, tag buffer, kernel entry), raises the semaphor with a fence so
//! spinning APs proceed, and then performs the mode transition the
//! kernel's contract demands. Each transition is one opaque assembly
//! routine with a documented register state; nothing returns.

use core::arch::asm;

use simpleboot_core::handover::{
    AP_ALIVE, GDT_DESCRIPTOR, GDT_TABLE, IDT_DESCRIPTOR, PAGE_TABLE_ROOT, SMP_SEMAPHOR,
    STACK_MB32, STACK_MB64, TAG_BUFFER_PTR,
};
use simpleboot_multiboot2::BOOTLOADER_MAGIC;

use crate::load::{KernelMode, LoadedKernel};

/// The GDT published at [`GDT_TABLE`]: null, 64-bit code, data, 32-bit
/// code, 16-bit code, 16-bit data (same selector layout the AP
/// trampoline and the BIOS thunk use).
const GDT: [u64; 6] = [
    0,
    0x00AF_9A00_0000_FFFF, // 0x08 code64
    0x00CF_9200_0000_FFFF, // 0x10 data
    0x00CF_9A00_0000_FFFF, // 0x18 code32
    0x008F_9A00_0000_FFFF, // 0x20 code16
    0x008F_9200_0000_FFFF, // 0x28 data16
];

/// Writes the shared words every kernel (and every AP) reads.
pub fn publish(page_root: u64, tags: u64) {
    // SAFETY: fixed low-memory contract area, BSP only, before the jump.
    unsafe {
        for (index, entry) in GDT.iter().enumerate() {
            ((GDT_TABLE as usize + index * 8) as *mut u64).write_volatile(*entry);
        }
        // GDT descriptor: limit, then base.
        (GDT_DESCRIPTOR as *mut u16).write_volatile((GDT.len() * 8 - 1) as u16);
        ((GDT_DESCRIPTOR + 2) as *mut u64).write_unaligned(GDT_TABLE);
        // Null IDT descriptor.
        (IDT_DESCRIPTOR as *mut u16).write_volatile(0);
        ((IDT_DESCRIPTOR + 2) as *mut u64).write_unaligned(0);

        (PAGE_TABLE_ROOT as *mut u64).write_volatile(page_root);
        (TAG_BUFFER_PTR as *mut u64).write_volatile(tags);
        (SMP_SEMAPHOR as *mut u64).write_volatile(0);
        (AP_ALIVE as *mut u8).write_volatile(0);
    }
}

/// Raises the semaphor: write, then fence, then the APs may see it.
fn release_aps(entry: u64) {
    // SAFETY: contract word, release ordering via mfence.
    unsafe { (SMP_SEMAPHOR as *mut u64).write_volatile(entry) };
    crate::arch::x86_64::memory_barrier();
}

/// Transfers control; never returns.
pub fn handover(kernel: &LoadedKernel, page_root: u64, tags: u64) -> ! {
    match kernel.mode {
        KernelMode::Mb64 => {
            release_aps(kernel.entry);
            // SAFETY: terminal transition; contract published above.
            unsafe { jump_mb64(kernel.entry, tags, page_root) }
        }
        KernelMode::Mb32 | KernelMode::Pe32 => {
            // SAFETY: terminal transition.
            unsafe { jump_mb32(kernel.entry, tags) }
        }
        KernelMode::Linux => {
            // SAFETY: terminal transition.
            unsafe { jump_linux(kernel.entry, kernel.zero_page.unwrap_or(0), page_root) }
        }
        KernelMode::LinuxAarch64 => unreachable!("aarch64 mode on x86"),
    }
}

/// Long-mode Multiboot2 entry.
///
/// State at the jump: CR3 reloaded, IDT null, stack at `0x90000`,
/// `rax`/`rdi`/`rcx` = magic, `rbx`/`rdx`/`rsi` = tag buffer.
unsafe fn jump_mb64(entry: u64, tags: u64, page_root: u64) -> ! {
    unsafe {
        asm!(
            "cli",
            "lgdt [{gdtr}]",
            "mov cr3, {root}",
            "lidt [{idtr}]",
            "mov rsp, {stack}",
            "mov rbx, {tags}",
            "mov rdx, rbx",
            "mov rsi, rbx",
            "mov eax, {magic}",
            "mov rdi, rax",
            "mov rcx, rax",
            "jmp {entry}",
            gdtr = in(reg) GDT_DESCRIPTOR,
            idtr = in(reg) IDT_DESCRIPTOR,
            root = in(reg) page_root,
            stack = const STACK_MB64,
            tags = in(reg) tags,
            magic = const BOOTLOADER_MAGIC,
            entry = in(reg) entry,
            options(noreturn),
        )
    }
}

/// Protected-mode Multiboot2 entry.
///
/// State at the jump: protected mode, paging off, IDT null, stack at
/// `0x8FFF4`, `eax` = magic, `ebx` = tag buffer.
unsafe fn jump_mb32(entry: u64, tags: u64) -> ! {
    unsafe {
        asm!(
            "cli",
            "lgdt [{gdtr}]",
            "lidt [{idtr}]",
            // Compatibility mode first.
            "push 0x18",
            "lea rax, [rip + 2f]",
            "push rax",
            "retfq",
            ".code32",
            "2:",
            "mov ax, 0x10",
            "mov ds, ax",
            "mov es, ax",
            "mov ss, ax",
            // Paging and long mode off.
            "mov eax, cr0",
            "and eax, 0x7FFFFFFF",
            "mov cr0, eax",
            "mov ecx, 0xC0000080",
            "rdmsr",
            "and eax, ~(1 << 8)",
            "wrmsr",
            "mov esp, {stack}",
            "mov ebx, {tags:e}",
            "mov eax, {magic}",
            "jmp {entry:e}",
            ".code64",
            gdtr = in(reg) GDT_DESCRIPTOR,
            idtr = in(reg) IDT_DESCRIPTOR,
            stack = const STACK_MB32 as u32,
            tags = in(reg) tags,
            magic = const BOOTLOADER_MAGIC,
            entry = in(reg) entry,
            options(noreturn),
        )
    }
}

/// Linux 64-bit boot-protocol entry: `rsi` = zero page.
unsafe fn jump_linux(entry: u64, zero_page: u64, page_root: u64) -> ! {
    unsafe {
        asm!(
            "cli",
            "mov cr3, {root}",
            "lidt [{idtr}]",
            "mov rsp, {stack}",
            "mov rsi, {zero_page}",
            "xor rbp, rbp",
            "jmp {entry}",
            root = in(reg) page_root,
            idtr = in(reg) IDT_DESCRIPTOR,
            stack = const STACK_MB64,
            zero_page = in(reg) zero_page,
            entry = in(reg) entry,
            options(noreturn),
        )
    }
}

/// Legacy chain-load: the VBR is already at `0x7C00`; drop to real mode
/// and far-jump into it with `dl` = drive.
///
/// # Safety
///
/// Terminal: the VBR owns the machine afterwards. The caller must have
/// loaded a plausibly bootable sector (0x55AA checked).
pub unsafe fn jump_vbr(drive: u8) -> ! {
    // SAFETY: forwards the contract to the real-mode routine.
    unsafe { crate::fw::bios::chain_vbr(u32::from(drive)) }
}
