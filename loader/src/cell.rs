//! Single-core mutable statics.
//!
//! The loader runs single-threaded on the BSP with interrupts disabled;
//! application processors never touch these statics (they only spin on
//! the low-memory semaphor). That makes a plain unsynchronised cell
//! sound, and it avoids dragging spinlocks into code that can never
//! contend.

use core::cell::UnsafeCell;

/// A `Sync` cell for BSP-only state.
pub struct BootCell<T>(UnsafeCell<T>);

// SAFETY: accessed only from the single-threaded BSP; see module docs.
unsafe impl<T> Sync for BootCell<T> {}

impl<T> BootCell<T> {
    /// Creates a cell.
    pub const fn new(value: T) -> Self {
        Self(UnsafeCell::new(value))
    }

    /// Runs `f` with exclusive access to the value.
    ///
    /// Do not call reentrantly; every call site in the loader is a leaf
    /// with respect to other `with` calls on the same cell.
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        // SAFETY: single-threaded BSP, non-reentrant call sites.
        f(unsafe { &mut *self.0.get() })
    }
}
