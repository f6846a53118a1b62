//! UEFI protocol definitions.

pub mod block_io;
pub mod edid;
pub mod gop;
pub mod loaded_image;
pub mod simple_text;
pub mod simple_text_input;

use crate::EfiGuid;

/// Associates a protocol GUID with its raw interface type, so lookups
/// can be written as `boot_services.locate_protocol::<Gop>()`.
pub trait Protocol {
    /// The protocol's GUID.
    const GUID: EfiGuid;
    /// The raw interface structure.
    type Raw;
}

/// Marker for the Graphics Output Protocol.
pub struct Gop;

impl Protocol for Gop {
    const GUID: EfiGuid = EfiGuid::GRAPHICS_OUTPUT_PROTOCOL;
    type Raw = gop::GraphicsOutputProtocol;
}

/// Marker for the Block I/O Protocol.
pub struct BlockIo;

impl Protocol for BlockIo {
    const GUID: EfiGuid = EfiGuid::BLOCK_IO_PROTOCOL;
    type Raw = block_io::BlockIoProtocol;
}

/// Marker for the Loaded Image Protocol.
pub struct LoadedImage;

impl Protocol for LoadedImage {
    const GUID: EfiGuid = EfiGuid::LOADED_IMAGE_PROTOCOL;
    type Raw = loaded_image::LoadedImageProtocol;
}

/// Marker for the EDID Active Protocol.
pub struct EdidActive;

impl Protocol for EdidActive {
    const GUID: EfiGuid = EfiGuid::EDID_ACTIVE_PROTOCOL;
    type Raw = edid::EdidProtocol;
}

/// Marker for the EDID Discovered Protocol.
pub struct EdidDiscovered;

impl Protocol for EdidDiscovered {
    const GUID: EfiGuid = EfiGuid::EDID_DISCOVERED_PROTOCOL;
    type Raw = edid::EdidProtocol;
}
