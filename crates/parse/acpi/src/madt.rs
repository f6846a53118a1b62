//! Multiple APIC Description Table (MADT) parsing.
//!
//! The SMP engine walks the MADT to enumerate application processors and
//! to learn the local APIC base address.

use simpleboot_binparse::FromBytes;

use crate::sdt::SdtHeader;
use crate::{AcpiError, AcpiHandler};

/// MADT table signature (`b"APIC"`).
pub const MADT_SIGNATURE: &[u8; 4] = b"APIC";

/// Parsed MADT table.
pub struct Madt {
    /// Physical address of the local APIC.
    pub local_apic_address: u64,
    /// MADT flags (bit 0: dual 8259 PICs installed).
    pub flags: u32,
    /// Byte slice covering the entry data.
    entries_data: &'static [u8],
}

impl Madt {
    /// Size of the fixed MADT fields after the SDT header (address + flags).
    const FIELDS_SIZE: usize = 8;

    /// Parses a MADT from the given physical address.
    ///
    /// If a Local APIC Address Override entry is present, its 64-bit
    /// address replaces the 32-bit one from the table header.
    ///
    /// # Errors
    ///
    /// Returns [`AcpiError::InvalidChecksum`] if the table checksum is
    /// invalid, or [`AcpiError::InvalidSignature`] if the table signature
    /// is not `APIC`.
    pub fn parse(handler: &impl AcpiHandler, phys: u64) -> Result<Self, AcpiError> {
        let table = crate::sdt::load_table(handler, phys, MADT_SIGNATURE)?;

        let local_apic_32 =
            u32::read_at(table.data, SdtHeader::SIZE).ok_or(AcpiError::TruncatedData)?;
        let flags = u32::read_at(table.data, SdtHeader::SIZE + 4)
            .ok_or(AcpiError::TruncatedData)?;

        let entries_offset = SdtHeader::SIZE + Self::FIELDS_SIZE;
        let entries_data = table.data.get(entries_offset..).unwrap_or(&[]);

        let mut local_apic_address = u64::from(local_apic_32);
        for entry in MadtEntry::iter(entries_data) {
            if let MadtEntry::LocalApicAddressOverride { address } = entry {
                local_apic_address = address;
            }
        }

        Ok(Self {
            local_apic_address,
            flags,
            entries_data,
        })
    }

    /// Returns an iterator over the MADT interrupt controller entries.
    #[must_use]
    pub fn entries(&self) -> MadtEntryIter {
        MadtEntry::iter(self.entries_data)
    }
}

/// A single MADT interrupt controller structure entry.
///
/// Only the processor-related entry types are decoded; everything else
/// falls through to [`MadtEntry::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MadtEntry {
    /// Type 0: Processor Local APIC.
    LocalApic {
        /// ACPI processor UID.
        acpi_processor_id: u8,
        /// The processor's local APIC ID.
        apic_id: u8,
        /// Flags (bit 0: enabled, bit 1: online capable).
        flags: u32,
    },
    /// Type 5: 64-bit Local APIC Address Override.
    LocalApicAddressOverride {
        /// The 64-bit physical address of the local APIC.
        address: u64,
    },
    /// Type 9: Processor Local x2APIC.
    LocalX2Apic {
        /// The processor's x2APIC ID.
        x2apic_id: u32,
        /// Flags (bit 0: enabled).
        flags: u32,
        /// ACPI processor UID.
        acpi_processor_id: u32,
    },
    /// An entry type that is not decoded.
    Unknown {
        /// The entry type byte.
        entry_type: u8,
        /// The entry length including the 2-byte header.
        length: u8,
    },
}

impl MadtEntry {
    /// Bit 0 of a processor entry's flags: the processor is enabled.
    pub const FLAG_ENABLED: u32 = 1;

    fn iter(data: &[u8]) -> MadtEntryIter<'_> {
        MadtEntryIter { data, offset: 0 }
    }
}

/// Iterator over [`MadtEntry`] values in the MADT entry area.
pub struct MadtEntryIter<'a> {
    data: &'a [u8],
    offset: usize,
}

impl Iterator for MadtEntryIter<'_> {
    type Item = MadtEntry;

    fn next(&mut self) -> Option<Self::Item> {
        let entry_type = u8::read_at(self.data, self.offset)?;
        let length = u8::read_at(self.data, self.offset + 1)?;
        // A zero length would loop forever; treat it as end of table.
        if length < 2 || self.offset + length as usize > self.data.len() {
            return None;
        }
        let body = &self.data[self.offset..self.offset + length as usize];
        self.offset += length as usize;

        let entry = match entry_type {
            0 if length >= 8 => MadtEntry::LocalApic {
                acpi_processor_id: body[2],
                apic_id: body[3],
                flags: u32::read_at(body, 4)?,
            },
            5 if length >= 12 => MadtEntry::LocalApicAddressOverride {
                address: u64::read_at(body, 4)?,
            },
            9 if length >= 16 => MadtEntry::LocalX2Apic {
                x2apic_id: u32::read_at(body, 4)?,
                flags: u32::read_at(body, 8)?,
                acpi_processor_id: u32::read_at(body, 12)?,
            },
            _ => MadtEntry::Unknown { entry_type, length },
        };
        Some(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lapic(id: u8, apic: u8, flags: u32) -> [u8; 8] {
        let f = flags.to_le_bytes();
        [0, 8, id, apic, f[0], f[1], f[2], f[3]]
    }

    #[test]
    fn iterates_local_apics() {
        let mut data = alloc::vec::Vec::new();
        data.extend_from_slice(&lapic(0, 0, 1));
        data.extend_from_slice(&lapic(1, 1, 1));
        // I/O APIC entry (type 1), skipped as Unknown.
        data.extend_from_slice(&[1, 12, 0, 0, 0, 0, 0xC0, 0xFE, 0, 0, 0, 0]);
        data.extend_from_slice(&lapic(2, 2, 0));

        let entries: alloc::vec::Vec<MadtEntry> = MadtEntry::iter(&data).collect();
        assert_eq!(entries.len(), 4);
        assert_eq!(
            entries[0],
            MadtEntry::LocalApic {
                acpi_processor_id: 0,
                apic_id: 0,
                flags: 1
            }
        );
        assert_eq!(
            entries[2],
            MadtEntry::Unknown {
                entry_type: 1,
                length: 12
            }
        );
        assert_eq!(
            entries[3],
            MadtEntry::LocalApic {
                acpi_processor_id: 2,
                apic_id: 2,
                flags: 0
            }
        );
    }

    #[test]
    fn zero_length_entry_terminates() {
        let mut data = alloc::vec::Vec::new();
        data.extend_from_slice(&lapic(0, 0, 1));
        data.extend_from_slice(&[0, 0, 0, 0]);
        data.extend_from_slice(&lapic(1, 1, 1));
        assert_eq!(MadtEntry::iter(&data).count(), 1);
    }

    #[test]
    fn truncated_entry_terminates() {
        let mut data = alloc::vec::Vec::new();
        data.extend_from_slice(&lapic(0, 0, 1));
        data.extend_from_slice(&[0, 8, 3]); // claims 8 bytes, has 3
        assert_eq!(MadtEntry::iter(&data).count(), 1);
    }

    #[test]
    fn decodes_x2apic_and_override() {
        let mut data = alloc::vec::Vec::new();
        let mut ovr = [0u8; 12];
        ovr[0] = 5;
        ovr[1] = 12;
        ovr[4..12].copy_from_slice(&0xFEE0_0000_0000u64.to_le_bytes());
        data.extend_from_slice(&ovr);
        let mut x2 = [0u8; 16];
        x2[0] = 9;
        x2[1] = 16;
        x2[4..8].copy_from_slice(&256u32.to_le_bytes());
        x2[8..12].copy_from_slice(&1u32.to_le_bytes());
        x2[12..16].copy_from_slice(&7u32.to_le_bytes());
        data.extend_from_slice(&x2);

        let entries: alloc::vec::Vec<MadtEntry> = MadtEntry::iter(&data).collect();
        assert_eq!(
            entries[0],
            MadtEntry::LocalApicAddressOverride {
                address: 0xFEE0_0000_0000
            }
        );
        assert_eq!(
            entries[1],
            MadtEntry::LocalX2Apic {
                x2apic_id: 256,
                flags: 1,
                acpi_processor_id: 7
            }
        );
    }
}
