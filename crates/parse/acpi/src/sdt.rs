//! System Description Table (SDT) header and checksum utilities.

use simpleboot_binparse::FromBytes;

/// Standard ACPI System Description Table header.
///
/// This 36-byte header is present at the start of every ACPI table
/// (RSDT, XSDT, MADT, FADT, DSDT, ...).
#[derive(Debug, Clone, Copy)]
#[repr(C, packed)]
pub struct SdtHeader {
    /// 4-byte ASCII signature identifying the table type.
    pub signature: [u8; 4],
    /// Total length of the table, including the header, in bytes.
    pub length: u32,
    /// Revision of the table structure.
    pub revision: u8,
    /// Checksum byte. The entire table, including the header, must sum to zero.
    pub checksum: u8,
    /// OEM-supplied identification string.
    pub oem_id: [u8; 6],
    /// OEM-supplied table identification string.
    pub oem_table_id: [u8; 8],
    /// OEM-supplied revision number.
    pub oem_revision: u32,
    /// Vendor ID of the utility that created the table.
    pub creator_id: u32,
    /// Revision of the utility that created the table.
    pub creator_revision: u32,
}

// SAFETY: packed struct of integers and byte arrays.
unsafe impl FromBytes for SdtHeader {}

impl SdtHeader {
    /// The size of an SDT header in bytes.
    pub const SIZE: usize = 36;

    /// Byte offset of the `length` field within the header.
    pub const LENGTH_OFFSET: usize = 4;

    /// Byte offset of the `checksum` field within the header.
    pub const CHECKSUM_OFFSET: usize = 9;
}

const _: () = assert!(core::mem::size_of::<SdtHeader>() == SdtHeader::SIZE);

/// Mapped ACPI table data with a validated header.
///
/// Returned by [`load_table`] after the map-header, verify-signature,
/// map-full, validate-checksum sequence.
pub struct ValidatedTable {
    /// The validated SDT header.
    pub header: SdtHeader,
    /// The full table data (including header), checksum-validated.
    pub data: &'static [u8],
}

/// Maps and validates an ACPI table at the given physical address.
///
/// # Errors
///
/// Returns [`AcpiError::TruncatedData`](crate::AcpiError::TruncatedData) if
/// the header cannot be read or claims a length shorter than itself,
/// [`AcpiError::InvalidSignature`](crate::AcpiError::InvalidSignature) if
/// the signature doesn't match, or
/// [`AcpiError::InvalidChecksum`](crate::AcpiError::InvalidChecksum) if the
/// table does not sum to zero.
pub fn load_table(
    handler: &impl crate::AcpiHandler,
    phys: u64,
    expected_signature: &[u8; 4],
) -> Result<ValidatedTable, crate::AcpiError> {
    // SAFETY: caller provides a valid table physical address.
    let header_data = unsafe { handler.map_physical_region(phys, SdtHeader::SIZE) };
    let header = SdtHeader::read_from(header_data).ok_or(crate::AcpiError::TruncatedData)?;

    if &header.signature != expected_signature {
        return Err(crate::AcpiError::InvalidSignature);
    }

    let total_len = header.length as usize;
    if total_len < SdtHeader::SIZE {
        return Err(crate::AcpiError::TruncatedData);
    }

    // SAFETY: phys is valid, total_len comes from the validated header.
    let data = unsafe { handler.map_physical_region(phys, total_len) };

    if checksum(data) != 0 {
        return Err(crate::AcpiError::InvalidChecksum);
    }

    Ok(ValidatedTable { header, data })
}

/// Sums all bytes of `data` mod 256.
///
/// ACPI structures are laid out so a valid table sums to zero; the same
/// function also yields the value the patcher must store to make a
/// modified table valid again.
#[must_use]
pub fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |sum, &b| sum.wrapping_add(b))
}
