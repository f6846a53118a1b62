//! UEFI Graphics Output Protocol (GOP).

use crate::EfiStatus;

/// The Graphics Output Protocol.
#[repr(C)]
pub struct GraphicsOutputProtocol {
    /// Returns information for an available graphics mode.
    pub query_mode: unsafe extern "efiapi" fn(
        this: *mut GraphicsOutputProtocol,
        mode_number: u32,
        size_of_info: *mut usize,
        info: *mut *mut GraphicsOutputModeInformation,
    ) -> EfiStatus,
    /// Sets the video device into a specified mode.
    pub set_mode:
        unsafe extern "efiapi" fn(this: *mut GraphicsOutputProtocol, mode_number: u32) -> EfiStatus,
    /// Performs a block transfer operation.
    pub blt: unsafe extern "efiapi" fn(
        this: *mut GraphicsOutputProtocol,
        blt_buffer: *mut u32,
        blt_operation: u32,
        source_x: usize,
        source_y: usize,
        destination_x: usize,
        destination_y: usize,
        width: usize,
        height: usize,
        delta: usize,
    ) -> EfiStatus,
    /// Pointer to the current mode data.
    pub mode: *mut GraphicsOutputMode,
}

/// Current mode information for the graphics output device.
#[repr(C)]
#[derive(Debug)]
pub struct GraphicsOutputMode {
    /// The number of modes supported by `query_mode` / `set_mode`.
    pub max_mode: u32,
    /// The current mode number.
    pub mode: u32,
    /// Mode information for the current mode.
    pub info: *mut GraphicsOutputModeInformation,
    /// Size of the `info` structure in bytes.
    pub size_of_info: usize,
    /// Base address of the linear framebuffer.
    pub frame_buffer_base: u64,
    /// Size of the framebuffer in bytes.
    pub frame_buffer_size: usize,
}

/// Information about one graphics mode.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct GraphicsOutputModeInformation {
    /// Structure version (zero).
    pub version: u32,
    /// Horizontal resolution in pixels.
    pub horizontal_resolution: u32,
    /// Vertical resolution in pixels.
    pub vertical_resolution: u32,
    /// Physical pixel format.
    pub pixel_format: PixelFormat,
    /// Channel masks, valid only for [`PixelFormat::Bitmask`].
    pub pixel_information: PixelBitmask,
    /// Pixels per scanline (may exceed the horizontal resolution).
    pub pixels_per_scan_line: u32,
}

/// Pixel format of the framebuffer.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// 32-bit pixel: R, G, B, reserved in byte order.
    RedGreenBlueReserved = 0,
    /// 32-bit pixel: B, G, R, reserved in byte order.
    BlueGreenRedReserved = 1,
    /// Layout defined by `pixel_information` masks.
    Bitmask = 2,
    /// No linear framebuffer; BLT only.
    BltOnly = 3,
}

/// Channel masks for [`PixelFormat::Bitmask`].
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct PixelBitmask {
    /// Bits of the red channel.
    pub red_mask: u32,
    /// Bits of the green channel.
    pub green_mask: u32,
    /// Bits of the blue channel.
    pub blue_mask: u32,
    /// Reserved bits.
    pub reserved_mask: u32,
}
