//! UEFI Loaded Image Protocol.

use core::ffi::c_void;

use crate::table::SystemTable;
use crate::{EfiHandle, EfiStatus};

/// The Loaded Image Protocol, installed on every loaded image's handle.
///
/// The loader uses it for one thing: `device_handle` names the device
/// the image was loaded from, which is where the boot disk's Block I/O
/// protocol lives.
#[repr(C)]
pub struct LoadedImageProtocol {
    /// Protocol revision.
    pub revision: u32,
    /// The image's parent image handle.
    pub parent_handle: EfiHandle,
    /// The system table.
    pub system_table: *mut SystemTable,
    /// The device the image was loaded from.
    pub device_handle: EfiHandle,
    /// The image's device path.
    pub file_path: *mut c_void,
    /// Reserved.
    pub reserved: *mut c_void,
    /// Size of the load options.
    pub load_options_size: u32,
    /// Image load options.
    pub load_options: *mut c_void,
    /// Base of the loaded image in memory.
    pub image_base: *mut c_void,
    /// Size of the loaded image.
    pub image_size: u64,
    /// Memory type of the image code.
    pub image_code_type: u32,
    /// Memory type of the image data.
    pub image_data_type: u32,
    /// Unloads the image.
    pub unload: unsafe extern "efiapi" fn(image_handle: EfiHandle) -> EfiStatus,
}
