//! The fixed low-memory handover contract.
//!
//! The loader publishes a handful of values at architecture-defined physical
//! addresses below 1 KiB before transferring control. Application processors
//! spin on [`SMP_SEMAPHOR`], and kernels that know about Simpleboot may read
//! any of these words after entry. All of them are written only by the
//! bootstrap processor, barrier-then-signal, and are immutable afterwards.
//!
//! ```text
//! 0x510 - 0x520   GDT descriptor (limit:base)
//! 0x520 - 0x530   IDT descriptor
//! 0x530 - 0x538   page table root
//! 0x538 - 0x540   kernel entry point (also the SMP semaphor, 0 = spin)
//! 0x540 - 0x548   tag buffer address
//! 0x548 - 0x550   CPU clock cycles per millisecond
//! 0x550 - 0x558   local APIC base
//! 0x558 - 0x559   AP alive flag
//! 0x560 - 0x590   GDT table (6 selectors + TSS descriptor)
//! ```

/// Physical address of the 10-byte GDT descriptor.
pub const GDT_DESCRIPTOR: u64 = 0x510;

/// Physical address of the 10-byte IDT descriptor.
pub const IDT_DESCRIPTOR: u64 = 0x520;

/// Physical address of the page-table root word (CR3 / TTBR0 value).
pub const PAGE_TABLE_ROOT: u64 = 0x530;

/// Physical address of the kernel-entry word, doubling as the SMP semaphor.
///
/// Zero means "keep spinning"; any other value is the 64-bit entry point
/// the application processors jump to.
pub const SMP_SEMAPHOR: u64 = 0x538;

/// Physical address of the tag-buffer pointer word.
pub const TAG_BUFFER_PTR: u64 = 0x540;

/// Physical address of the measured CPU clock cycles per millisecond.
pub const CYCLES_PER_MSEC: u64 = 0x548;

/// Physical address of the local APIC base word.
pub const LAPIC_BASE: u64 = 0x550;

/// Physical address of the AP-alive flag byte, incremented by each waking AP.
pub const AP_ALIVE: u64 = 0x558;

/// Physical address of the GDT table itself.
pub const GDT_TABLE: u64 = 0x560;

/// Physical address the SMP trampoline is relocated to.
///
/// Must be page-aligned below 1 MiB; the startup IPI vector `0x08` makes
/// the APs begin execution at `CS = 0x0800`, i.e. here.
pub const TRAMPOLINE: u64 = 0x8000;

/// Startup-IPI vector corresponding to [`TRAMPOLINE`].
pub const SIPI_VECTOR: u8 = 0x08;

/// Size of the tag buffer in 4 KiB pages (30 pages, a little under 123 KiB).
///
/// The buffer holds the MBI header and tags, the parsed configuration text
/// and the boot splash; the x86 kernel stack grows down from its top.
pub const TAG_BUFFER_PAGES: usize = 30;

/// Stack pointer handed to a protected-mode (MB32) kernel.
pub const STACK_MB32: u64 = 0x8_FFF4;

/// Stack pointer handed to a long-mode (MB64) kernel on the BSP.
///
/// Each AP gets `STACK_MB64 - coreid * AP_STACK_SIZE`.
pub const STACK_MB64: u64 = 0x9_0000;

/// Stack top on aarch64 (BSP and Linux); APs get `0x8_0000 - coreid * 1024`.
pub const STACK_AARCH64: u64 = 0x8_0000;

/// Per-core stack stride for application processors.
pub const AP_STACK_SIZE: u64 = 1024;

/// First physical address the BIOS/RPi bump allocator hands out.
pub const ARENA_BASE: u64 = 0x10_0000;
