//! RSDT / XSDT table enumeration.

use simpleboot_binparse::FromBytes;

use crate::AcpiHandler;
use crate::sdt::SdtHeader;

/// Size in bytes of a single table-pointer entry in the RSDT (32-bit).
const RSDT_ENTRY_SIZE: usize = 4;

/// Size in bytes of a single table-pointer entry in the XSDT (64-bit).
const XSDT_ENTRY_SIZE: usize = 8;

/// Iterator over table entry physical addresses in an RSDT or XSDT.
pub struct RsdtIter<'a> {
    data: &'a [u8],
    offset: usize,
    entry_size: usize,
}

impl Iterator for RsdtIter<'_> {
    type Item = u64;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset + self.entry_size > self.data.len() {
            return None;
        }
        let addr = if self.entry_size == XSDT_ENTRY_SIZE {
            u64::read_at(self.data, self.offset)?
        } else {
            u64::from(u32::read_at(self.data, self.offset)?)
        };
        self.offset += self.entry_size;
        Some(addr)
    }
}

/// Returns an iterator over the entry addresses of the RSDT/XSDT at `root`.
///
/// Entries that fail to validate individually are still yielded; callers
/// validate the tables they actually load.
#[must_use]
pub fn entries(handler: &impl AcpiHandler, root: u64, is_xsdt: bool) -> RsdtIter<'static> {
    let signature: &[u8; 4] = if is_xsdt { b"XSDT" } else { b"RSDT" };
    match crate::sdt::load_table(handler, root, signature) {
        Ok(table) => RsdtIter {
            data: &table.data[SdtHeader::SIZE..],
            offset: 0,
            entry_size: if is_xsdt { XSDT_ENTRY_SIZE } else { RSDT_ENTRY_SIZE },
        },
        Err(_) => RsdtIter {
            data: &[],
            offset: 0,
            entry_size: RSDT_ENTRY_SIZE,
        },
    }
}

/// Searches the RSDT/XSDT for a table with the given signature.
///
/// Returns the physical address of the **first** matching entry. Some
/// buggy firmware lists the MADT twice; first match wins. Revisit if a
/// target machine turns out to populate the two copies differently.
#[must_use]
pub fn find_table(
    handler: &impl AcpiHandler,
    root: u64,
    is_xsdt: bool,
    signature: &[u8; 4],
) -> Option<u64> {
    for entry in entries(handler, root, is_xsdt) {
        if entry == 0 {
            continue;
        }
        // SAFETY: entry comes from a checksum-validated RSDT/XSDT.
        let header_data = unsafe { handler.map_physical_region(entry, SdtHeader::SIZE) };
        let Some(header) = SdtHeader::read_from(header_data) else {
            continue;
        };
        if &header.signature == signature {
            return Some(entry);
        }
    }
    None
}
