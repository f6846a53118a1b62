//! `simpleboot-acpi` --- the ACPI slice of a boot loader, `no_std`.
//!
//! Unlike a kernel-side ACPI driver, a boot loader needs exactly three
//! things from ACPI: find the RSDP (or validate one the firmware handed
//! over), walk the RSDT/XSDT to the MADT so application processors can be
//! enumerated, and rewrite the FADT's DSDT pointers when the user supplies
//! a replacement table. This crate does those three things and nothing
//! else.
//!
//! Physical memory is reached through an [`AcpiHandler`], so the same code
//! runs identity-mapped on the target and over plain byte buffers in host
//! tests. Table *mutation* (the DSDT patch) deliberately does not go
//! through the handler: [`patch::patch_dsdt`] takes a `&mut [u8]` covering
//! the FADT, which the caller obtains from its own view of memory.
//!
//! # Usage
//!
//! ```ignore
//! let tables = AcpiTables::new(rsdp_phys, handler)?;
//! for entry in tables.madt()?.entries() {
//!     // collect application processors
//! }
//! ```

#![no_std]
#![warn(missing_docs)]

pub mod fadt;
pub mod madt;
pub mod patch;
pub mod rsdp;
pub mod rsdt;
pub mod sdt;

pub use fadt::Fadt;
pub use madt::{Madt, MadtEntry, MadtEntryIter};
pub use rsdp::RsdpInfo;
pub use sdt::{SdtHeader, ValidatedTable};

/// Errors that can occur during ACPI table parsing or patching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcpiError {
    /// The checksum of a table or the RSDP did not validate (sum != 0).
    InvalidChecksum,
    /// The table signature did not match the expected value.
    InvalidSignature,
    /// The RSDP structure was invalid (bad signature or checksum).
    InvalidRsdp,
    /// A table with the requested signature was not found in the RSDT/XSDT.
    TableNotFound,
    /// A table or structure was too short to contain the expected data.
    TruncatedData,
}

/// Trait for mapping physical memory regions so ACPI tables can be read.
///
/// An implementation must return a byte slice covering at least `size`
/// bytes starting at physical address `phys`. In the loader this is the
/// identity map; in host tests it is an offset into a leaked buffer.
///
/// # Safety
///
/// Implementors must ensure that the returned slice is valid and readable
/// for the requested `size` bytes and remains valid for `'static`.
pub unsafe trait AcpiHandler {
    /// Map a physical memory region and return a byte slice over it.
    ///
    /// # Safety
    ///
    /// The caller guarantees that `phys` is a valid ACPI-related physical
    /// address and `size` does not extend beyond the actual table.
    unsafe fn map_physical_region(&self, phys: u64, size: usize) -> &'static [u8];
}

/// The ACPI table hierarchy, rooted at a validated RSDP.
pub struct AcpiTables<H: AcpiHandler> {
    handler: H,
    rsdp: RsdpInfo,
}

impl<H: AcpiHandler> AcpiTables<H> {
    /// Validates the RSDP at `rsdp_phys` and prepares for table lookups.
    ///
    /// Individual tables are parsed lazily when requested.
    ///
    /// # Errors
    ///
    /// Returns [`AcpiError::InvalidRsdp`] if the signature or checksum of
    /// the RSDP is wrong.
    pub fn new(rsdp_phys: u64, handler: H) -> Result<Self, AcpiError> {
        let rsdp = rsdp::parse_rsdp(&handler, rsdp_phys)?;
        Ok(Self { handler, rsdp })
    }

    /// Returns the validated RSDP description.
    #[must_use]
    pub fn rsdp(&self) -> &RsdpInfo {
        &self.rsdp
    }

    /// Searches the RSDT/XSDT for a table with the given 4-byte signature.
    ///
    /// Returns the physical address of the first matching table. Some
    /// firmware lists the MADT twice; first match wins (see
    /// [`rsdt::find_table`]).
    #[must_use]
    pub fn find_table(&self, signature: &[u8; 4]) -> Option<u64> {
        rsdt::find_table(
            &self.handler,
            self.rsdp.root_table,
            self.rsdp.is_xsdt,
            signature,
        )
    }

    /// Parses and returns the MADT (Multiple APIC Description Table).
    ///
    /// # Errors
    ///
    /// Returns [`AcpiError::TableNotFound`] if no MADT exists, or another
    /// [`AcpiError`] variant if the table is malformed.
    pub fn madt(&self) -> Result<Madt, AcpiError> {
        let phys = self
            .find_table(madt::MADT_SIGNATURE)
            .ok_or(AcpiError::TableNotFound)?;
        Madt::parse(&self.handler, phys)
    }

    /// Parses and returns the FADT (Fixed ACPI Description Table).
    ///
    /// # Errors
    ///
    /// Returns [`AcpiError::TableNotFound`] if no FADT exists, or another
    /// [`AcpiError`] variant if the table is malformed.
    pub fn fadt(&self) -> Result<Fadt, AcpiError> {
        let phys = self
            .find_table(fadt::FADT_SIGNATURE)
            .ok_or(AcpiError::TableNotFound)?;
        Fadt::parse(&self.handler, phys)
    }

    /// Returns the physical address and total length of the FADT.
    ///
    /// This is what the DSDT patcher needs: the caller turns the range
    /// into a `&mut [u8]` through its own memory view and hands it to
    /// [`patch::patch_dsdt`].
    ///
    /// # Errors
    ///
    /// Returns [`AcpiError::TableNotFound`] if no FADT exists.
    pub fn fadt_range(&self) -> Result<(u64, usize), AcpiError> {
        let phys = self
            .find_table(fadt::FADT_SIGNATURE)
            .ok_or(AcpiError::TableNotFound)?;
        let table = sdt::load_table(&self.handler, phys, fadt::FADT_SIGNATURE)?;
        Ok((phys, table.data.len()))
    }

    /// Returns a reference to the underlying [`AcpiHandler`].
    #[must_use]
    pub fn handler(&self) -> &H {
        &self.handler
    }
}

#[cfg(test)]
extern crate alloc;

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use alloc::vec::Vec;

    /// Maps "physical" addresses as offsets into one leaked buffer.
    struct BufHandler(&'static [u8]);

    // SAFETY: the buffer is leaked, so the returned slices live forever.
    unsafe impl AcpiHandler for BufHandler {
        unsafe fn map_physical_region(&self, phys: u64, size: usize) -> &'static [u8] {
            &self.0[phys as usize..phys as usize + size]
        }
    }

    fn fix_checksum(table: &mut [u8]) {
        table[sdt::SdtHeader::CHECKSUM_OFFSET] = 0;
        let sum = sdt::checksum(table);
        table[sdt::SdtHeader::CHECKSUM_OFFSET] = 0u8.wrapping_sub(sum);
    }

    /// Emits an SDT with the given signature and payload at the end of
    /// `image`, returning its "physical" address.
    fn emit_table(image: &mut Vec<u8>, signature: &[u8; 4], payload: &[u8]) -> u64 {
        let phys = image.len() as u64;
        let len = sdt::SdtHeader::SIZE + payload.len();
        let mut table = vec![0u8; len];
        table[..4].copy_from_slice(signature);
        table[4..8].copy_from_slice(&(len as u32).to_le_bytes());
        table[8] = 2;
        table[sdt::SdtHeader::SIZE..].copy_from_slice(payload);
        fix_checksum(&mut table);
        image.extend_from_slice(&table);
        phys
    }

    /// Builds RSDP -> XSDT -> {FADT, MADT} in one buffer. Returns the
    /// handler and the RSDP address.
    fn build_chain(extra_madt_copy: bool) -> (BufHandler, u64) {
        let mut image = vec![0u8; 64]; // keep address 0 unused

        // MADT: lapic base + flags, one enabled AP entry.
        let mut madt_payload = Vec::new();
        madt_payload.extend_from_slice(&0xFEE0_0000u32.to_le_bytes());
        madt_payload.extend_from_slice(&1u32.to_le_bytes());
        madt_payload.extend_from_slice(&[0, 8, 1, 1, 1, 0, 0, 0]);
        let madt = emit_table(&mut image, b"APIC", &madt_payload);

        // Decoy MADT with a different AP, to prove first-match wins.
        let mut decoy_payload = Vec::new();
        decoy_payload.extend_from_slice(&0xFEE0_0000u32.to_le_bytes());
        decoy_payload.extend_from_slice(&1u32.to_le_bytes());
        decoy_payload.extend_from_slice(&[0, 8, 9, 9, 1, 0, 0, 0]);
        let decoy = emit_table(&mut image, b"APIC", &decoy_payload);

        let fadt_payload = vec![0u8; 208]; // 244-byte FADT
        let fadt = emit_table(&mut image, b"FACP", &fadt_payload);

        // XSDT with 64-bit entries.
        let mut xsdt_payload = Vec::new();
        xsdt_payload.extend_from_slice(&fadt.to_le_bytes());
        xsdt_payload.extend_from_slice(&madt.to_le_bytes());
        if extra_madt_copy {
            xsdt_payload.extend_from_slice(&decoy.to_le_bytes());
        }
        let xsdt = emit_table(&mut image, b"XSDT", &xsdt_payload);

        // Revision 2 RSDP pointing at the XSDT.
        let rsdp_phys = image.len() as u64;
        let mut rsdp = vec![0u8; rsdp::RSDP_V2_LEN];
        rsdp[..8].copy_from_slice(rsdp::RSDP_SIGNATURE);
        rsdp[15] = 2;
        rsdp[20..24].copy_from_slice(&(rsdp::RSDP_V2_LEN as u32).to_le_bytes());
        rsdp[24..32].copy_from_slice(&xsdt.to_le_bytes());
        // First-20-bytes checksum, then extended checksum over all 36.
        let sum20 = sdt::checksum(&rsdp[..20]);
        rsdp[8] = 0u8.wrapping_sub(sum20);
        let sum36 = sdt::checksum(&rsdp);
        rsdp[32] = 0u8.wrapping_sub(sum36);
        image.extend_from_slice(&rsdp);

        let leaked: &'static [u8] = alloc::boxed::Box::leak(image.into_boxed_slice());
        (BufHandler(leaked), rsdp_phys)
    }

    #[test]
    fn walks_rsdp_to_madt() {
        let (handler, rsdp_phys) = build_chain(false);
        let tables = AcpiTables::new(rsdp_phys, handler).unwrap();
        assert!(tables.rsdp().is_xsdt);
        assert_eq!(tables.rsdp().length, rsdp::RSDP_V2_LEN);

        let madt = tables.madt().unwrap();
        assert_eq!(madt.local_apic_address, 0xFEE0_0000);
        let aps: Vec<MadtEntry> = madt.entries().collect();
        assert_eq!(
            aps,
            vec![MadtEntry::LocalApic {
                acpi_processor_id: 1,
                apic_id: 1,
                flags: 1
            }]
        );
    }

    #[test]
    fn duplicate_madt_first_match_wins() {
        let (handler, rsdp_phys) = build_chain(true);
        let tables = AcpiTables::new(rsdp_phys, handler).unwrap();
        let madt = tables.madt().unwrap();
        let first = madt.entries().next().unwrap();
        assert_eq!(
            first,
            MadtEntry::LocalApic {
                acpi_processor_id: 1,
                apic_id: 1,
                flags: 1
            }
        );
    }

    #[test]
    fn fadt_range_reports_declared_length() {
        let (handler, rsdp_phys) = build_chain(false);
        let tables = AcpiTables::new(rsdp_phys, handler).unwrap();
        let (_, len) = tables.fadt_range().unwrap();
        assert_eq!(len, 244);
    }

    #[test]
    fn missing_table_is_not_found() {
        let (handler, rsdp_phys) = build_chain(false);
        let tables = AcpiTables::new(rsdp_phys, handler).unwrap();
        assert!(tables.find_table(b"HPET").is_none());
    }

    #[test]
    fn corrupt_rsdp_is_rejected() {
        let (handler, rsdp_phys) = build_chain(false);
        // Off-by-one address: the signature won't line up.
        assert!(matches!(
            AcpiTables::new(rsdp_phys + 1, handler),
            Err(AcpiError::InvalidRsdp)
        ));
    }

    #[test]
    fn scan_region_finds_rsdp_on_paragraph_boundary() {
        let (handler, rsdp_phys) = build_chain(false);
        // The chain builder places tables at unaligned offsets, so re-embed
        // a copy at a 16-byte boundary within a scan window.
        let raw = unsafe { handler.map_physical_region(rsdp_phys, rsdp::RSDP_V2_LEN) };
        let mut window = vec![0u8; 4096];
        window[512..512 + raw.len()].copy_from_slice(raw);
        assert_eq!(rsdp::scan_region(&window), Some(512));
        assert_eq!(rsdp::scan_region(&window[..500]), None);
    }
}
