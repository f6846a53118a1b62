//! x86 application-processor startup: MADT enumeration, trampoline
//! relocation, INIT/SIPI sequencing.
//!
//! Woken APs run the real-mode trampoline at `0x8000`: they bump the
//! alive byte, spin on the kernel-entry semaphor, then climb into long
//! mode using the page-table root, GDT, and IDT the BSP published in
//! the fixed low-memory words, and finally jump to the kernel with
//! their core ID on their own stack.

use core::arch::global_asm;

use planck_noalloc::vec::ArrayVec;
use simpleboot_core::handover::{
    AP_ALIVE, CYCLES_PER_MSEC, LAPIC_BASE, SIPI_VECTOR, TRAMPOLINE,
};

use crate::arch::x86_64::{apic_id, rdtsc};
use crate::dsdt::IdentityHandler;
use crate::fw::FwHandle;
use crate::smp::SmpInfo;

/// Per-attempt wait for the AP alive flag.
const AP_TIMEOUT_MS: u64 = 250;

/// Local APIC register offsets.
const LAPIC_ESR: u64 = 0x280;
const LAPIC_ICR_LOW: u64 = 0x300;
const LAPIC_ICR_HIGH: u64 = 0x310;

unsafe extern "C" {
    /// First byte of the AP trampoline blob.
    static ap_trampoline_start: u8;
    /// One past the last byte of the blob.
    static ap_trampoline_end: u8;
}

// The trampoline is position-dependent 16-bit code assembled for 0x8000
// (SIPI vector 0x08). It is kept in .rodata and copied over the entry
// stub once the BSP no longer needs it.
global_asm!(
    r#"
.section .rodata
.balign 16
.global ap_trampoline_start
.global ap_trampoline_end
.code16
ap_trampoline_start:
    cli
    cld
    xor ax, ax
    mov ds, ax
    // I am alive.
    lock inc byte ptr [0x558]
    // Wait for the kernel entry to be published.
1:  pause
    cmp dword ptr [0x538], 0
    jnz 2f
    cmp dword ptr [0x53C], 0
    jz 1b
2:  // Protected mode with the shared GDT.
    lgdt [0x510]
    mov eax, cr0
    or eax, 1
    mov cr0, eax
.att_syntax prefix
    ljmpl $0x18, $(0x8000 + (3f - ap_trampoline_start))
.intel_syntax noprefix
.code32
3:  mov ax, 0x10
    mov ds, ax
    mov es, ax
    mov ss, ax
    // PAE + the published page tables.
    mov eax, cr4
    or eax, (1 << 5)
    mov cr4, eax
    mov eax, [0x530]
    mov cr3, eax
    // Long mode.
    mov ecx, 0xC0000080
    rdmsr
    or eax, (1 << 8)
    wrmsr
    mov eax, cr0
    or eax, 0x80000001
    mov cr0, eax
.att_syntax prefix
    ljmpl $0x08, $(0x8000 + (4f - ap_trampoline_start))
.intel_syntax noprefix
.code64
4:  lidt [0x520]
    // Stack by core ID, core ID on top.
    mov eax, 1
    cpuid
    shr ebx, 24
    mov eax, ebx
    shl ebx, 10
    mov rsp, 0x90000
    sub rsp, rbx
    push rax
    // Multiboot2 register contract.
    mov rbx, [0x540]
    mov rdx, rbx
    mov rsi, rbx
    mov rcx, 0x36d76289
    mov rdi, rcx
    mov rax, rcx
    jmp qword ptr [0x538]
ap_trampoline_end:
.text
"#
);

/// Enumerates enabled processors from the MADT.
///
/// Returns the APIC IDs (BSP included) and the LAPIC base.
fn enumerate(rsdp: u64) -> Option<(ArrayVec<u8, 256>, u64)> {
    let tables = simpleboot_acpi::AcpiTables::new(rsdp, IdentityHandler).ok()?;
    let madt = tables.madt().ok()?;

    let mut ids = ArrayVec::new();
    for entry in madt.entries() {
        if let simpleboot_acpi::MadtEntry::LocalApic { apic_id, flags, .. } = entry
            && flags & simpleboot_acpi::MadtEntry::FLAG_ENABLED != 0
            && apic_id != 0xFF
            && ids.len() < 256
        {
            ids.push(apic_id);
        }
    }
    Some((ids, madt.local_apic_address))
}

/// Wakes every enabled AP and leaves it spinning on the semaphor.
///
/// Failures are non-fatal: the kernel boots on whatever responded.
/// Also measures the TSC frequency and publishes cycles-per-millisecond
/// for later IPI pacing.
pub fn start_aps(fw: FwHandle, rsdp: Option<u64>) -> SmpInfo {
    let bspid = apic_id();

    let Some((ids, lapic)) = rsdp.and_then(enumerate) else {
        log::warn!("no MADT, staying on the BSP");
        return SmpInfo::bsp_only(bspid);
    };
    let numcores = ids.len() as u32;

    // Publish the LAPIC base and measure the CPU clock; both are part
    // of the fixed-address contract and the second is also what paces
    // the SIPI timeouts below.
    write_low(LAPIC_BASE, lapic);
    let before = rdtsc();
    fw.delay_us(1000);
    let cycles_per_ms = (rdtsc() - before).max(1);
    write_low(CYCLES_PER_MSEC, cycles_per_ms);

    // Relocate the trampoline over the entry stub at 0x8000.
    // SAFETY: the blob symbols delimit the .rodata trampoline; the
    // destination is the loader's own (no longer needed) entry stub.
    unsafe {
        let start = core::ptr::addr_of!(ap_trampoline_start);
        let len = core::ptr::addr_of!(ap_trampoline_end) as usize - start as usize;
        core::ptr::copy(start, TRAMPOLINE as *mut u8, len);
    }
    crate::arch::x86_64::memory_barrier();

    let mut running = 1u32;
    for &id in ids.as_slice() {
        if u32::from(id) == bspid {
            continue;
        }
        if wake_ap(fw, lapic, id, cycles_per_ms) {
            running += 1;
        } else {
            log::warn!("AP {id} did not come up");
        }
    }

    SmpInfo {
        numcores,
        running,
        bspid,
    }
}

/// INIT, deassert, then up to two SIPIs with alive-flag polls.
fn wake_ap(fw: FwHandle, lapic: u64, id: u8, cycles_per_ms: u64) -> bool {
    let before_alive = read_alive();

    lapic_write(lapic, LAPIC_ESR, 0);
    lapic_write(lapic, LAPIC_ESR, 0);
    lapic_write(lapic, LAPIC_ICR_HIGH, u32::from(id) << 24);
    lapic_write(lapic, LAPIC_ICR_LOW, 0x00C500); // INIT, assert
    fw.delay_us(1_000);
    lapic_write(lapic, LAPIC_ICR_HIGH, u32::from(id) << 24);
    lapic_write(lapic, LAPIC_ICR_LOW, 0x008500); // INIT, deassert
    fw.delay_us(10_000);

    for _attempt in 0..2 {
        lapic_write(lapic, LAPIC_ESR, 0);
        lapic_write(lapic, LAPIC_ICR_HIGH, u32::from(id) << 24);
        lapic_write(lapic, LAPIC_ICR_LOW, 0x004600 | u32::from(SIPI_VECTOR));
        // Poll the alive byte for 250 ms.
        let deadline = rdtsc() + AP_TIMEOUT_MS * cycles_per_ms;
        while rdtsc() < deadline {
            if read_alive() > before_alive {
                return true;
            }
            core::hint::spin_loop();
        }
    }
    read_alive() > before_alive
}

fn read_alive() -> u8 {
    // SAFETY: fixed low-memory contract byte.
    unsafe { (AP_ALIVE as *const u8).read_volatile() }
}

fn write_low(address: u64, value: u64) {
    // SAFETY: fixed low-memory contract words.
    unsafe { (address as *mut u64).write_volatile(value) };
}

fn lapic_write(base: u64, register: u64, value: u32) {
    // SAFETY: the LAPIC window comes from the MADT and is device memory
    // in the identity map.
    unsafe { ((base + register) as *mut u32).write_volatile(value) };
}
