//! UEFI Simple Text Output Protocol.

use crate::EfiStatus;

/// The Simple Text Output Protocol (ConOut).
#[repr(C)]
pub struct SimpleTextOutputProtocol {
    /// Resets the output device.
    pub reset: unsafe extern "efiapi" fn(
        this: *mut SimpleTextOutputProtocol,
        extended_verification: bool,
    ) -> EfiStatus,
    /// Writes a NUL-terminated UCS-2 string.
    pub output_string: unsafe extern "efiapi" fn(
        this: *mut SimpleTextOutputProtocol,
        string: *const u16,
    ) -> EfiStatus,
    /// Verifies that a string can be rendered.
    pub test_string: unsafe extern "efiapi" fn(
        this: *mut SimpleTextOutputProtocol,
        string: *const u16,
    ) -> EfiStatus,
    /// Queries a text mode's geometry.
    pub query_mode: unsafe extern "efiapi" fn(
        this: *mut SimpleTextOutputProtocol,
        mode_number: usize,
        columns: *mut usize,
        rows: *mut usize,
    ) -> EfiStatus,
    /// Switches text mode.
    pub set_mode: unsafe extern "efiapi" fn(
        this: *mut SimpleTextOutputProtocol,
        mode_number: usize,
    ) -> EfiStatus,
    /// Sets foreground/background attributes.
    pub set_attribute: unsafe extern "efiapi" fn(
        this: *mut SimpleTextOutputProtocol,
        attribute: usize,
    ) -> EfiStatus,
    /// Clears the screen.
    pub clear_screen:
        unsafe extern "efiapi" fn(this: *mut SimpleTextOutputProtocol) -> EfiStatus,
    /// Moves the cursor.
    pub set_cursor_position: unsafe extern "efiapi" fn(
        this: *mut SimpleTextOutputProtocol,
        column: usize,
        row: usize,
    ) -> EfiStatus,
    /// Shows or hides the cursor.
    pub enable_cursor: unsafe extern "efiapi" fn(
        this: *mut SimpleTextOutputProtocol,
        visible: bool,
    ) -> EfiStatus,
    /// Pointer to the current mode data.
    pub mode: *mut SimpleTextOutputMode,
}

impl SimpleTextOutputProtocol {
    /// Writes a single UCS-2 character.
    ///
    /// # Safety
    ///
    /// Boot services must still be active and `self` must come from the
    /// firmware.
    pub unsafe fn put_char(&mut self, ch: u16) {
        let string = [ch, 0u16];
        unsafe {
            let _ = (self.output_string)(self, string.as_ptr());
        }
    }
}

/// Mode data of a Simple Text Output device.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct SimpleTextOutputMode {
    /// Number of supported modes.
    pub max_mode: i32,
    /// Current mode number.
    pub mode: i32,
    /// Current attribute.
    pub attribute: i32,
    /// Cursor column.
    pub cursor_column: i32,
    /// Cursor row.
    pub cursor_row: i32,
    /// Cursor visibility.
    pub cursor_visible: bool,
}
