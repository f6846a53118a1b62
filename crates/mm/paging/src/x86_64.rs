//! x86_64 long-mode page-table entry encoding.

use crate::{MapFlags, TableFormat};

/// Present.
const P: u64 = 1 << 0;
/// Writable.
const RW: u64 = 1 << 1;
/// Page-level write-through.
const PWT: u64 = 1 << 3;
/// Page-level cache disable.
const PCD: u64 = 1 << 4;
/// Page size (2 MiB block when set in a PD entry).
const PS: u64 = 1 << 7;

/// Physical address field of an entry.
const ADDR_MASK: u64 = 0x000F_FFFF_FFFF_F000;

/// 4-level x86_64 long-mode format: PML4, PDPT, PD, PT.
pub struct X86_64Format;

impl X86_64Format {
    fn attr(flags: MapFlags) -> u64 {
        let mut attr = P;
        if flags.contains(MapFlags::WRITABLE) {
            attr |= RW;
        }
        if flags.contains(MapFlags::DEVICE) {
            attr |= PCD | PWT;
        }
        attr
    }
}

impl TableFormat for X86_64Format {
    const SHIFTS: &'static [u32] = &[39, 30, 21, 12];

    fn table_entry(phys: u64) -> u64 {
        phys | P | RW
    }

    fn leaf_4k(phys: u64, flags: MapFlags) -> u64 {
        phys | Self::attr(flags)
    }

    fn block_2m(phys: u64, flags: MapFlags) -> u64 {
        phys | Self::attr(flags) | PS
    }

    fn split_leaf(block_entry: u64, phys: u64) -> u64 {
        (block_entry & !(ADDR_MASK | PS)) | phys
    }

    fn is_present(entry: u64) -> bool {
        entry & P != 0
    }

    fn is_block(entry: u64) -> bool {
        entry & PS != 0
    }

    fn entry_addr(entry: u64) -> u64 {
        entry & ADDR_MASK
    }
}
