//! Root System Description Pointer discovery and validation.

use simpleboot_binparse::FromBytes;

use crate::AcpiError;

/// The 8-byte RSDP signature.
pub const RSDP_SIGNATURE: &[u8; 8] = b"RSD PTR ";

/// Length of an ACPI 1.0 RSDP.
pub const RSDP_V1_LEN: usize = 20;

/// Length of an ACPI 2.0+ RSDP.
pub const RSDP_V2_LEN: usize = 36;

/// A validated RSDP, reduced to the fields the loader cares about.
#[derive(Debug, Clone, Copy)]
pub struct RsdpInfo {
    /// Physical address of the RSDP structure itself.
    pub phys: u64,
    /// RSDP revision (0 for ACPI 1.0, 2 for ACPI 2.0+).
    pub revision: u8,
    /// Physical address of the RSDT or XSDT.
    pub root_table: u64,
    /// `true` if `root_table` points to an XSDT, `false` for RSDT.
    pub is_xsdt: bool,
    /// Validated byte length of the structure (20 or 36).
    ///
    /// This is exactly the number of RSDP bytes copied into the MBI
    /// ACPI-old / ACPI-new tag.
    pub length: usize,
}

/// Validates the RSDP at `phys` and extracts the root-table address.
///
/// Prefers the XSDT when the revision is 2+ and the extended checksum
/// holds; otherwise falls back to the 32-bit RSDT pointer.
///
/// # Errors
///
/// Returns [`AcpiError::InvalidRsdp`] if the signature or the (extended)
/// checksum is wrong.
pub fn parse_rsdp(handler: &impl crate::AcpiHandler, phys: u64) -> Result<RsdpInfo, AcpiError> {
    // SAFETY: caller provides the firmware-reported RSDP address.
    let v1 = unsafe { handler.map_physical_region(phys, RSDP_V1_LEN) };

    if &v1[..8] != RSDP_SIGNATURE || crate::sdt::checksum(v1) != 0 {
        return Err(AcpiError::InvalidRsdp);
    }

    let revision = v1[15];
    let rsdt = u64::from(u32::read_at(v1, 16).ok_or(AcpiError::TruncatedData)?);

    if revision >= 2 {
        // SAFETY: a revision 2+ RSDP is 36 bytes.
        let v2 = unsafe { handler.map_physical_region(phys, RSDP_V2_LEN) };
        let xsdt = u64::read_at(v2, 24).ok_or(AcpiError::TruncatedData)?;
        if crate::sdt::checksum(v2) == 0 && xsdt != 0 {
            return Ok(RsdpInfo {
                phys,
                revision,
                root_table: xsdt,
                is_xsdt: true,
                length: RSDP_V2_LEN,
            });
        }
    }

    Ok(RsdpInfo {
        phys,
        revision,
        root_table: rsdt,
        is_xsdt: false,
        length: RSDP_V1_LEN,
    })
}

/// Scans a memory window for an RSDP on 16-byte boundaries.
///
/// Legacy BIOS does not hand the RSDP over; it sits somewhere in the EBDA
/// or in `0xE0000..0xFFFFF`. Returns the byte offset of the first
/// signature whose ACPI 1.0 checksum validates.
#[must_use]
pub fn scan_region(data: &[u8]) -> Option<usize> {
    let mut offset = 0;
    while offset + RSDP_V1_LEN <= data.len() {
        let candidate = &data[offset..];
        if &candidate[..8] == RSDP_SIGNATURE
            && crate::sdt::checksum(&candidate[..RSDP_V1_LEN]) == 0
        {
            return Some(offset);
        }
        offset += 16;
    }
    None
}
