//! UEFI EDID protocols.

/// The EDID Active / EDID Discovered protocol interface.
///
/// Both protocols share this layout; Active describes the display in
/// use, Discovered the raw data read from the panel.
#[repr(C)]
pub struct EdidProtocol {
    /// Size of the EDID block in bytes (0 if none).
    pub size_of_edid: u32,
    /// The EDID block (null if none).
    pub edid: *mut u8,
}

impl EdidProtocol {
    /// Returns the EDID block, if the firmware exposes one.
    ///
    /// # Safety
    ///
    /// `self` must come from the firmware and outlive the returned slice.
    #[must_use]
    pub unsafe fn bytes(&self) -> Option<&[u8]> {
        if self.edid.is_null() || self.size_of_edid == 0 {
            return None;
        }
        Some(unsafe { core::slice::from_raw_parts(self.edid, self.size_of_edid as usize) })
    }
}
