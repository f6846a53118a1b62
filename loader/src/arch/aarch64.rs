//! Aarch64 intrinsics used by the firmware layer and the SMP engine.

use core::arch::asm;

/// Reads the generic timer frequency (CNTFRQ_EL0), ticks per second.
#[inline]
#[must_use]
pub fn counter_frequency() -> u64 {
    let freq: u64;
    unsafe {
        asm!("mrs {}, cntfrq_el0", out(reg) freq, options(nomem, nostack, preserves_flags));
    }
    freq
}

/// Reads the generic timer counter (CNTPCT_EL0).
#[inline]
#[must_use]
pub fn counter() -> u64 {
    let count: u64;
    unsafe {
        asm!(
            "isb",
            "mrs {}, cntpct_el0",
            out(reg) count,
            options(nomem, nostack, preserves_flags)
        );
    }
    count
}

/// Busy-waits `microseconds` against the generic timer.
pub fn delay_us(microseconds: u64) {
    let ticks = counter_frequency() * microseconds / 1_000_000;
    let start = counter();
    while counter().wrapping_sub(start) < ticks {
        core::hint::spin_loop();
    }
}

/// Data synchronisation barrier, inner shareable; orders the semaphor
/// publication before the APs can observe it.
#[inline]
pub fn memory_barrier() {
    unsafe {
        asm!("dsb ish", options(nostack, preserves_flags));
    }
}

/// Reads the core number (MPIDR_EL1 affinity 0).
#[inline]
#[must_use]
pub fn core_id() -> u64 {
    let mpidr: u64;
    unsafe {
        asm!("mrs {}, mpidr_el1", out(reg) mpidr, options(nomem, nostack, preserves_flags));
    }
    mpidr & 0x3
}

/// Waits for events forever (the fatal-error park loop).
pub fn park() -> ! {
    loop {
        unsafe {
            asm!("wfe", options(nomem, nostack));
        }
    }
}
