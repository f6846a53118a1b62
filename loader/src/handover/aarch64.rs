//! Aarch64 handover paths.
//!
//! The BSP publishes the translation configuration, releases the parked
//! secondaries through the semaphor (store, `dsb ish`, `sev`), switches
//! its own MMU on, and enters the kernel at EL1. The Linux path has to
//! move the staged image onto the loader's own address, so the last few
//! instructions run from a relocated stub in otherwise unused low
//! memory.

use core::arch::asm;

use simpleboot_core::handover::{
    SMP_SEMAPHOR, STACK_AARCH64, TAG_BUFFER_PTR,
};
use simpleboot_multiboot2::BOOTLOADER_MAGIC;
use simpleboot_paging::aarch64::{MAIR_EL1, TCR_EL1};

use crate::load::{KernelMode, LoadedKernel};
use crate::smp::aarch64::publish_mmu;

/// SCTLR_EL1 with the armv8.0 RES1 bits plus MMU, D-cache, I-cache.
pub const SCTLR_EL1: u64 = 0x30D0_0800 | 1 | (1 << 2) | (1 << 12);

/// Where the Linux copy stub is relocated to (clear of the image).
const COPY_STUB: u64 = 0x3000;

/// Transfers control; never returns.
pub fn handover(kernel: &LoadedKernel, page_root: u64, tags: u64, dtb: u64) -> ! {
    publish_mmu(page_root, MAIR_EL1, TCR_EL1, SCTLR_EL1);
    // SAFETY: fixed contract word.
    unsafe { (TAG_BUFFER_PTR as *mut u64).write_volatile(tags) };

    match kernel.mode {
        KernelMode::Mb64 => {
            // Publish the entry so the parked cores follow, then go.
            // SAFETY: contract word; dsb+sev in the jump path below.
            unsafe { (SMP_SEMAPHOR as *mut u64).write_volatile(kernel.entry) };
            crate::arch::aarch64::memory_barrier();
            // SAFETY: terminal transition.
            unsafe { jump_mb64(kernel.entry, tags, page_root) }
        }
        KernelMode::LinuxAarch64 => {
            let (staged, length) = kernel.staged.unwrap_or((STACK_AARCH64, 0));
            // SAFETY: terminal transition.
            unsafe { jump_linux(dtb, staged, u64::from(length)) }
        }
        _ => unreachable!("x86 mode on aarch64"),
    }
}

/// EL1 Multiboot2 entry with the MMU on.
///
/// State at the jump: `x0` = magic, `x1` = tag buffer, stack at
/// `0x80000` with a zero on top.
unsafe fn jump_mb64(entry: u64, tags: u64, ttbr0: u64) -> ! {
    unsafe {
        asm!(
            "msr daifset, #0xF",
            "msr mair_el1, {mair}",
            "msr tcr_el1, {tcr}",
            "msr ttbr0_el1, {ttbr0}",
            "isb",
            "msr sctlr_el1, {sctlr}",
            "isb",
            "sev",
            "mov sp, {stack}",
            "str xzr, [sp, #-16]!",
            "mov x0, {magic}",
            "mov x1, {tags}",
            "br {entry}",
            mair = in(reg) MAIR_EL1,
            tcr = in(reg) TCR_EL1,
            ttbr0 = in(reg) ttbr0,
            sctlr = in(reg) SCTLR_EL1,
            stack = in(reg) STACK_AARCH64,
            magic = in(reg) u64::from(BOOTLOADER_MAGIC),
            tags = in(reg) tags,
            entry = in(reg) entry,
            options(noreturn),
        )
    }
}

unsafe extern "C" {
    static linux_copy_stub_start: u8;
    static linux_copy_stub_end: u8;
}

// x0 = dtb, x1 = staged source, x2 = byte count. Position independent.
core::arch::global_asm!(
    r#"
.section .rodata
.balign 16
.global linux_copy_stub_start
.global linux_copy_stub_end
linux_copy_stub_start:
    mov x4, 0x80000
    mov x5, x4
1:  cbz x2, 2f
    ldr x6, [x1], #8
    str x6, [x5], #8
    subs x2, x2, #8
    b.gt 1b
2:  dsb sy
    ic iallu
    isb
    mov x1, xzr
    mov x2, xzr
    mov x3, xzr
    br x4
linux_copy_stub_end:
"#
);

/// Linux entry: the image must land at `0x80000`, on top of this very
/// loader, so a tiny copy loop is relocated to [`COPY_STUB`] first.
///
/// State at the final jump: MMU off, `x0` = DTB, `x1..x3` = 0.
unsafe fn jump_linux(dtb: u64, staged: u64, length: u64) -> ! {
    unsafe {
        let start = core::ptr::addr_of!(linux_copy_stub_start);
        let len = core::ptr::addr_of!(linux_copy_stub_end) as usize - start as usize;
        core::ptr::copy(start, COPY_STUB as *mut u8, len);

        asm!(
            "msr daifset, #0xF",
            "dsb sy",
            "isb",
            "mov x0, {dtb}",
            "mov x1, {staged}",
            "mov x2, {length}",
            "br {stub}",
            dtb = in(reg) dtb,
            staged = in(reg) staged,
            length = in(reg) (length + 7) & !7,
            stub = in(reg) COPY_STUB,
            options(noreturn),
        )
    }
}
