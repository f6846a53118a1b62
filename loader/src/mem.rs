//! Loader memory management.
//!
//! On BIOS, coreboot, and the Raspberry Pi there is no allocator to call
//! into: a monotonic bump cursor hands out page-aligned memory above
//! 1 MiB and nothing is ever freed; the kernel sees everything below the
//! final cursor as in use. On UEFI, pages come from `AllocatePages`
//! instead (see `fw::uefi_fw`), and scratch allocations are tracked so
//! they can be released before `ExitBootServices`.

use simpleboot_core::PhysAddr;
use simpleboot_core::handover::ARENA_BASE;
use simpleboot_paging::TableAccess;

use crate::cell::BootCell;
use crate::error::BootError;
use crate::fw::FwHandle;

/// The bump cursor.
static BUMP: BootCell<u64> = BootCell::new(ARENA_BASE);

/// Restarts the arena (backup-mode re-entry reloads everything anyway).
pub fn bump_reset() {
    BUMP.with(|cursor| *cursor = ARENA_BASE);
}

/// Current cursor; everything in `[ARENA_BASE, cursor)` is occupied.
#[must_use]
pub fn bump_cursor() -> u64 {
    BUMP.with(|cursor| *cursor)
}

/// Hands out `bytes` of page-aligned memory, zeroed.
///
/// # Errors
///
/// [`BootError::OutOfMemory`] when the cursor would wrap (the caller is
/// responsible for staying below the top of RAM; the memory map check
/// happens at segment-load time).
pub fn bump_alloc(bytes: u64) -> Result<u64, BootError> {
    let size = (bytes + 0xFFF) & !0xFFF;
    BUMP.with(|cursor| {
        let start = *cursor;
        let next = start.checked_add(size).ok_or(BootError::OutOfMemory)?;
        *cursor = next;
        // SAFETY: the arena above 1 MiB is identity mapped and reserved
        // for the loader by the handover contract.
        unsafe { core::ptr::write_bytes(start as *mut u8, 0, size as usize) };
        Ok(start)
    })
}

/// Hands out one zeroed 4 KiB page from the arena.
///
/// # Errors
///
/// [`BootError::OutOfMemory`].
pub fn bump_alloc_page() -> Result<PhysAddr, BootError> {
    bump_alloc(4096).map(PhysAddr::new)
}

/// Page-table access over the loader's identity mapping.
///
/// Table frames come from the firmware's page allocator; physical
/// addresses are dereferenced directly, which is valid because the
/// loader inherits (and maintains) an identity map of low memory.
pub struct IdentityAccess(pub FwHandle);

// SAFETY: frames are zeroed by the firmware allocator; the identity map
// makes the physical address directly dereferenceable.
unsafe impl TableAccess for IdentityAccess {
    fn alloc_table(&mut self) -> Option<PhysAddr> {
        self.0.alloc_page().ok()
    }

    fn table(&mut self, phys: PhysAddr) -> &mut [u64; 512] {
        // SAFETY: see the impl-level comment; tables are 4 KiB aligned.
        unsafe { &mut *(phys.as_u64() as *mut [u64; 512]) }
    }
}

/// Peeks at the cursor without committing: staging area for compressed
/// module images, overwritten by the next allocation on purpose.
#[must_use]
pub fn bump_peek() -> u64 {
    bump_cursor()
}

/// Raises the cursor past a directly-placed kernel segment so modules
/// loaded afterwards cannot collide with it.
pub fn bump_reserve_through(end: u64) {
    let end = (end + 0xFFF) & !0xFFF;
    BUMP.with(|cursor| {
        if *cursor < end {
            *cursor = end;
        }
    });
}
