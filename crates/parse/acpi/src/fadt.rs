//! Fixed ACPI Description Table (FADT) parsing.
//!
//! The loader reads the FADT for one reason: it holds the physical
//! addresses of the DSDT, which the user may ask to replace. Only the
//! DSDT-related fields are parsed.

use simpleboot_binparse::FromBytes;

use crate::{AcpiError, AcpiHandler};

/// FADT table signature.
pub const FADT_SIGNATURE: &[u8; 4] = b"FACP";

/// Parsed FADT --- only the fields the loader needs.
#[derive(Debug, Clone, Copy)]
pub struct Fadt {
    /// Physical address of the DSDT. 32-bit field at offset 40.
    pub dsdt: u32,
    /// 64-bit physical address of the DSDT (ACPI 2.0+).
    ///
    /// Zero if not present or the table predates ACPI 2.0.
    pub x_dsdt: u64,
    /// Total length of the table as declared by the header.
    pub length: u32,
    /// Table structure revision from the SDT header.
    pub revision: u8,
}

impl Fadt {
    /// Byte offset of the 32-bit `dsdt` field within the FADT.
    pub const DSDT_OFFSET: usize = 40;

    /// Byte offset of the 64-bit `x_dsdt` field within the FADT (ACPI 2.0+).
    pub const X_DSDT_OFFSET: usize = 140;

    /// Minimum FADT length that contains the full `x_dsdt` field.
    pub const X_DSDT_MIN_LENGTH: usize = Self::X_DSDT_OFFSET + 8;

    /// Parses a FADT from the given physical address.
    ///
    /// Older FADT revisions may be shorter than [`Fadt::X_DSDT_MIN_LENGTH`];
    /// missing fields come back as zero rather than failing outright.
    ///
    /// # Errors
    ///
    /// Returns [`AcpiError::InvalidSignature`] if the table signature is not
    /// `FACP`, or [`AcpiError::InvalidChecksum`] if the checksum is invalid.
    pub fn parse(handler: &impl AcpiHandler, phys: u64) -> Result<Self, AcpiError> {
        let table = crate::sdt::load_table(handler, phys, FADT_SIGNATURE)?;
        Ok(Self {
            dsdt: u32::read_at(table.data, Self::DSDT_OFFSET).unwrap_or(0),
            x_dsdt: u64::read_at(table.data, Self::X_DSDT_OFFSET).unwrap_or(0),
            length: table.header.length,
            revision: table.header.revision,
        })
    }

    /// Returns the physical address of the DSDT.
    ///
    /// Prefers the 64-bit `x_dsdt` field (ACPI 2.0+) if non-zero, otherwise
    /// falls back to the 32-bit `dsdt` field. Returns `None` if both are
    /// zero.
    #[must_use]
    pub fn dsdt_address(&self) -> Option<u64> {
        if self.x_dsdt != 0 {
            Some(self.x_dsdt)
        } else if self.dsdt != 0 {
            Some(u64::from(self.dsdt))
        } else {
            None
        }
    }
}
