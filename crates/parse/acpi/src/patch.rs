//! FADT patching: point the firmware tables at a replacement DSDT.
//!
//! When the configuration supplies a DSDT/GUDT module, the kernel must find
//! it through the standard ACPI chain. That means rewriting the FADT's
//! `dsdt` (and, on tables long enough to have one, `x_dsdt`) pointers and
//! restoring the sum-to-zero checksum.
//!
//! The functions here work on a plain `&mut [u8]` covering the whole FADT;
//! resolving the table's physical range to a mutable slice is the caller's
//! business (see [`crate::AcpiTables::fadt_range`]).

use simpleboot_binparse::{FromBytes, write_at};

use crate::AcpiError;
use crate::fadt::{FADT_SIGNATURE, Fadt};
use crate::sdt::{SdtHeader, checksum};

/// Rewrites the FADT's DSDT pointers to `new_dsdt` and fixes the checksum.
///
/// The 32-bit `dsdt` field always receives the truncated low half; the
/// 64-bit `x_dsdt` field is written only when the table is long enough to
/// contain it. On success the whole slice sums to zero again.
///
/// # Errors
///
/// Returns [`AcpiError::InvalidSignature`] if `fadt` does not start with
/// `FACP`, or [`AcpiError::TruncatedData`] if the slice is shorter than
/// the length its header declares (or too short for the 32-bit pointer).
pub fn patch_dsdt(fadt: &mut [u8], new_dsdt: u64) -> Result<(), AcpiError> {
    let header = SdtHeader::read_from(fadt).ok_or(AcpiError::TruncatedData)?;
    if &header.signature != FADT_SIGNATURE {
        return Err(AcpiError::InvalidSignature);
    }
    let declared = header.length as usize;
    if declared > fadt.len() || declared < Fadt::DSDT_OFFSET + 4 {
        return Err(AcpiError::TruncatedData);
    }
    let fadt = &mut fadt[..declared];

    write_at(fadt, Fadt::DSDT_OFFSET, new_dsdt as u32).ok_or(AcpiError::TruncatedData)?;
    if declared >= Fadt::X_DSDT_MIN_LENGTH {
        write_at(fadt, Fadt::X_DSDT_OFFSET, new_dsdt).ok_or(AcpiError::TruncatedData)?;
    }

    // Zero the checksum byte, then set it so the table sums to zero.
    fadt[SdtHeader::CHECKSUM_OFFSET] = 0;
    fadt[SdtHeader::CHECKSUM_OFFSET] = 0u8.wrapping_sub(checksum(fadt));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use alloc::vec::Vec;

    /// Builds a checksum-valid FADT of `len` bytes with dsdt pointers set
    /// to `0x1111_2222` / `0x3333_4444_5555_6666`.
    fn build_fadt(len: usize) -> Vec<u8> {
        let mut t = vec![0u8; len];
        t[..4].copy_from_slice(b"FACP");
        t[4..8].copy_from_slice(&(len as u32).to_le_bytes());
        t[8] = 6; // revision
        write_at(&mut t, Fadt::DSDT_OFFSET, 0x1111_2222u32).unwrap();
        if len >= Fadt::X_DSDT_MIN_LENGTH {
            write_at(&mut t, Fadt::X_DSDT_OFFSET, 0x3333_4444_5555_6666u64).unwrap();
        }
        let sum = checksum(&t);
        t[SdtHeader::CHECKSUM_OFFSET] = 0u8.wrapping_sub(sum);
        assert_eq!(checksum(&t), 0);
        t
    }

    #[test]
    fn patch_rewrites_both_pointers() {
        let mut fadt = build_fadt(244);
        patch_dsdt(&mut fadt, 0x8_9ABC_DEF0).unwrap();
        assert_eq!(u32::read_at(&fadt, Fadt::DSDT_OFFSET), Some(0x9ABC_DEF0));
        assert_eq!(u64::read_at(&fadt, Fadt::X_DSDT_OFFSET), Some(0x8_9ABC_DEF0));
        assert_eq!(checksum(&fadt), 0);
    }

    #[test]
    fn patch_short_fadt_skips_x_dsdt() {
        let mut fadt = build_fadt(116);
        patch_dsdt(&mut fadt, 0xDEAD_0000).unwrap();
        assert_eq!(u32::read_at(&fadt, Fadt::DSDT_OFFSET), Some(0xDEAD_0000));
        assert_eq!(checksum(&fadt), 0);
    }

    #[test]
    fn patch_only_touches_declared_length() {
        let mut fadt = build_fadt(244);
        fadt.extend_from_slice(&[0xAA; 16]);
        patch_dsdt(&mut fadt, 0x1000).unwrap();
        assert!(fadt[244..].iter().all(|&b| b == 0xAA));
        assert_eq!(checksum(&fadt[..244]), 0);
    }

    #[test]
    fn patch_rejects_wrong_signature() {
        let mut fadt = build_fadt(244);
        fadt[..4].copy_from_slice(b"APIC");
        assert_eq!(
            patch_dsdt(&mut fadt, 0x1000),
            Err(AcpiError::InvalidSignature)
        );
    }

    #[test]
    fn patch_rejects_truncated_slice() {
        let mut fadt = build_fadt(244);
        assert_eq!(
            patch_dsdt(&mut fadt[..100], 0x1000),
            Err(AcpiError::TruncatedData)
        );
    }
}
