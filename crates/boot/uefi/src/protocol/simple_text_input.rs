//! UEFI Simple Text Input Protocol.

use crate::{EfiEvent, EfiStatus};

/// A key press: a control scan code or a printable UCS-2 character.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EfiInputKey {
    /// Scan code for control keys (0 for printable characters).
    pub scan_code: u16,
    /// The printable character (0 for control keys).
    pub unicode_char: u16,
}

/// The Simple Text Input Protocol (ConIn).
#[repr(C)]
pub struct SimpleTextInputProtocol {
    /// Resets the input device.
    pub reset: unsafe extern "efiapi" fn(
        this: *mut SimpleTextInputProtocol,
        extended_verification: bool,
    ) -> EfiStatus,
    /// Reads the next keystroke, `NOT_READY` if none is pending.
    pub read_key_stroke: unsafe extern "efiapi" fn(
        this: *mut SimpleTextInputProtocol,
        key: *mut EfiInputKey,
    ) -> EfiStatus,
    /// Event signaled when a key is available.
    pub wait_for_key: EfiEvent,
}

impl SimpleTextInputProtocol {
    /// Non-blocking poll: returns the pending key, if any.
    ///
    /// # Safety
    ///
    /// Boot services must still be active and `self` must come from the
    /// firmware.
    pub unsafe fn poll_key(&mut self) -> Option<EfiInputKey> {
        let mut key = EfiInputKey {
            scan_code: 0,
            unicode_char: 0,
        };
        let status = unsafe { (self.read_key_stroke)(self, &mut key) };
        status.is_success().then_some(key)
    }
}
