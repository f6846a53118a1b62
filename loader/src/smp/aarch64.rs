//! Aarch64 application-processor handling.
//!
//! The Raspberry Pi firmware releases all four cores into the image
//! entry point; the entry stub parks the secondaries in a spin loop on
//! the kernel-entry semaphor after bumping the alive byte. All this
//! module has to do is publish the MMU configuration words the parked
//! cores will load and count who showed up.

use simpleboot_core::handover::{AP_ALIVE, PAGE_TABLE_ROOT};

use crate::smp::SmpInfo;

/// Shared word: MAIR_EL1 for the parked cores.
pub const SHARED_MAIR: u64 = 0x560;
/// Shared word: TCR_EL1 for the parked cores.
pub const SHARED_TCR: u64 = 0x568;
/// Shared word: SCTLR_EL1 for the parked cores.
pub const SHARED_SCTLR: u64 = 0x570;

/// Publishes the translation configuration the APs install before they
/// jump to the kernel.
pub fn publish_mmu(ttbr0: u64, mair: u64, tcr: u64, sctlr: u64) {
    // SAFETY: fixed low-memory contract words, BSP only.
    unsafe {
        (PAGE_TABLE_ROOT as *mut u64).write_volatile(ttbr0);
        (SHARED_MAIR as *mut u64).write_volatile(mair);
        (SHARED_TCR as *mut u64).write_volatile(tcr);
        (SHARED_SCTLR as *mut u64).write_volatile(sctlr);
    }
    crate::arch::aarch64::memory_barrier();
}

/// Counts the cores: the BSP plus every secondary that bumped the alive
/// byte on its way into the park loop.
#[must_use]
pub fn core_status() -> SmpInfo {
    // SAFETY: fixed low-memory contract byte.
    let alive = unsafe { (AP_ALIVE as *const u8).read_volatile() };
    let bspid = crate::arch::aarch64::core_id() as u32;
    SmpInfo {
        numcores: u32::from(alive) + 1,
        running: u32::from(alive) + 1,
        bspid,
    }
}

unsafe extern "C" {
    /// The secondary-core park loop in the entry stub.
    fn ap_park();
}

/// Releases the firmware-parked secondaries into the loader's own park
/// loop by writing its address into the spin-table mailboxes.
///
/// Returns once the cores have checked in (or a quarter-second timeout
/// per core has passed; stragglers are non-fatal).
pub fn start_aps(fw: crate::fw::FwHandle) -> SmpInfo {
    /// Spin-table mailboxes of cores 1..3.
    const MAILBOXES: [u64; 3] = [0xE0, 0xE8, 0xF0];

    // Low memory is not guaranteed to be zero; clear the contract
    // words the secondaries are about to read.
    // SAFETY: fixed contract words, BSP only, cores still firmware-parked.
    unsafe {
        (simpleboot_core::handover::SMP_SEMAPHOR as *mut u64).write_volatile(0);
        (AP_ALIVE as *mut u8).write_volatile(0);
    }
    crate::arch::aarch64::memory_barrier();

    let park = ap_park as usize as u64;
    for mailbox in MAILBOXES {
        // SAFETY: the firmware spin table lives at these fixed words.
        unsafe { (mailbox as *mut u64).write_volatile(park) };
    }
    crate::arch::aarch64::memory_barrier();
    // SAFETY: wake the cores out of wfe.
    unsafe { core::arch::asm!("sev", options(nomem, nostack)) };

    for _attempt in 0..2 {
        fw.delay_us(250_000);
        let status = core_status();
        if status.running >= 4 {
            return status;
        }
    }
    let status = core_status();
    if status.running < 4 {
        log::warn!("only {} of 4 cores responded", status.running);
    }
    status
}
