//! Aarch64 4 KiB-granule translation-table entry encoding and the MMU
//! configuration values that go with it.
//!
//! The loader runs with 39-bit virtual addresses (`T0SZ = T1SZ = 25`),
//! giving three table levels per half. Memory attributes come from three
//! MAIR slots: normal write-back, device-nGnRE, and non-cacheable.

use crate::{MapFlags, TableFormat};

/// Descriptor valid bit.
const VALID: u64 = 1 << 0;
/// Bit 1: set = table/page descriptor, clear = block descriptor.
const TYPE_TABLE: u64 = 1 << 1;
/// Access flag; without it the first access faults.
const AF: u64 = 1 << 10;
/// Inner shareable.
const SH_INNER: u64 = 3 << 8;

/// MAIR index of normal write-back write-allocate memory.
pub const ATTR_IDX_NORMAL: u64 = 0;
/// MAIR index of device-nGnRE memory.
pub const ATTR_IDX_DEVICE: u64 = 1;
/// MAIR index of non-cacheable normal memory.
pub const ATTR_IDX_NOCACHE: u64 = 2;

/// MAIR_EL1 value: attr0 normal WBWA, attr1 device-nGnRE, attr2
/// normal non-cacheable.
pub const MAIR_EL1: u64 = 0xFF | (0x04 << 8) | (0x44 << 16);

/// TCR_EL1 value: 39-bit VA in both halves, 4 KiB granules, inner
/// shareable, write-back table walks, 40-bit physical addresses.
pub const TCR_EL1: u64 = 25 // T0SZ
    | (1 << 8)   // IRGN0 write-back
    | (1 << 10)  // ORGN0 write-back
    | (3 << 12)  // SH0 inner
    | (25 << 16) // T1SZ
    | (1 << 24)  // IRGN1
    | (1 << 26)  // ORGN1
    | (3 << 28)  // SH1
    | (2 << 30)  // TG1 4 KiB
    | (2 << 32); // IPS 40-bit

/// Physical address field of a descriptor.
const ADDR_MASK: u64 = 0x0000_FFFF_FFFF_F000;

/// 3-level aarch64 format (39-bit VA): L1, L2, L3.
pub struct Aarch64Format;

impl Aarch64Format {
    fn attr(flags: MapFlags) -> u64 {
        // EL1 translation regime: AP[1] clear = EL1 read-write.
        if flags.contains(MapFlags::DEVICE) {
            VALID | AF | (ATTR_IDX_DEVICE << 2)
        } else {
            VALID | AF | SH_INNER | (ATTR_IDX_NORMAL << 2)
        }
    }
}

impl TableFormat for Aarch64Format {
    const SHIFTS: &'static [u32] = &[30, 21, 12];

    fn table_entry(phys: u64) -> u64 {
        phys | VALID | TYPE_TABLE
    }

    fn leaf_4k(phys: u64, flags: MapFlags) -> u64 {
        // A level-3 page descriptor has the table bit set.
        phys | Self::attr(flags) | TYPE_TABLE
    }

    fn block_2m(phys: u64, flags: MapFlags) -> u64 {
        phys | Self::attr(flags)
    }

    fn split_leaf(block_entry: u64, phys: u64) -> u64 {
        (block_entry & !ADDR_MASK) | phys | TYPE_TABLE
    }

    fn is_present(entry: u64) -> bool {
        entry & VALID != 0
    }

    fn is_block(entry: u64) -> bool {
        entry & (VALID | TYPE_TABLE) == VALID
    }

    fn entry_addr(entry: u64) -> u64 {
        entry & ADDR_MASK
    }
}
