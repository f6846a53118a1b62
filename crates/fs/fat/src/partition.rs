//! Boot partition discovery: GPT preferred, MBR fallback.

use simpleboot_binparse::FromBytes;

use crate::{BlockDevice, FatError, SECTOR_SIZE};

/// EFI System Partition type GUID in on-disk (mixed-endian) byte order.
///
/// `C12A7328-F81F-11D2-BA4B-00A0C93EC93B`.
pub const ESP_TYPE_GUID: [u8; 16] = [
    0x28, 0x73, 0x2A, 0xC1, 0x1F, 0xF8, 0xD2, 0x11, 0xBA, 0x4B, 0x00, 0xA0, 0xC9, 0x3E, 0xC9,
    0x3B,
];

/// MBR partition types accepted as the boot partition.
const MBR_TYPE_FAT32_LBA: u8 = 0x0C;
const MBR_TYPE_ESP: u8 = 0xEF;

/// How many sectors of the GPT entry array are searched.
const GPT_ENTRY_SECTORS: u64 = 8;

/// Which table format produced the boot partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionTable {
    /// GUID Partition Table.
    Gpt,
    /// Legacy Master Boot Record.
    Mbr,
}

/// The located boot partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootPartition {
    /// First LBA of the partition (where the VBR sits).
    pub start_lba: u64,
    /// UniquePartitionGUID for GPT; synthetic `"PART"+drive+index` for MBR.
    pub uuid: [u8; 16],
    /// The table format the partition was found in.
    pub table: PartitionTable,
}

/// Locates the boot partition on `dev`.
///
/// Reads sector 1; if it carries a GPT header, the partition-entry array
/// is scanned (up to [`GPT_ENTRY_SECTORS`] sectors) for the first entry
/// with the ESP type GUID. Otherwise the four primary MBR entries are
/// scanned for the first active FAT32/ESP entry. `drive` is the firmware
/// drive code, used only to synthesise an MBR pseudo-UUID.
///
/// # Errors
///
/// Returns [`FatError::NoValidFilesystem`] if neither table yields a
/// boot partition, or [`FatError::Io`] on a device error.
pub fn find_boot_partition(
    dev: &mut impl BlockDevice,
    drive: u8,
) -> Result<BootPartition, FatError> {
    let mut sector = [0u8; SECTOR_SIZE];
    dev.read_sector(1, &mut sector)?;

    if &sector[..8] == b"EFI PART" {
        return find_gpt_esp(dev, &sector);
    }
    find_mbr_boot(dev, drive)
}

/// Walks the GPT partition entry array for the first ESP.
fn find_gpt_esp(
    dev: &mut impl BlockDevice,
    header: &[u8; SECTOR_SIZE],
) -> Result<BootPartition, FatError> {
    let entry_lba = u64::read_at(header, 72).ok_or(FatError::Corrupt)?;
    let num_entries = u32::read_at(header, 80).ok_or(FatError::Corrupt)?;
    let entry_size = u32::read_at(header, 84).ok_or(FatError::Corrupt)? as usize;
    if entry_size < 128 || entry_size > SECTOR_SIZE {
        return Err(FatError::NoValidFilesystem);
    }

    let mut sector = [0u8; SECTOR_SIZE];
    let mut checked = 0u32;
    for sector_index in 0..GPT_ENTRY_SECTORS {
        dev.read_sector(entry_lba + sector_index, &mut sector)?;
        let mut at = 0;
        while at + entry_size <= SECTOR_SIZE {
            if checked >= num_entries {
                return Err(FatError::NoValidFilesystem);
            }
            checked += 1;
            let entry = &sector[at..at + entry_size];
            at += entry_size;

            if entry[..16] == ESP_TYPE_GUID {
                let start_lba = u64::read_at(entry, 32).ok_or(FatError::Corrupt)?;
                let mut uuid = [0u8; 16];
                uuid.copy_from_slice(&entry[16..32]);
                return Ok(BootPartition {
                    start_lba,
                    uuid,
                    table: PartitionTable::Gpt,
                });
            }
        }
    }
    Err(FatError::NoValidFilesystem)
}

/// Scans the four primary MBR entries for an active FAT32/ESP partition.
fn find_mbr_boot(dev: &mut impl BlockDevice, drive: u8) -> Result<BootPartition, FatError> {
    let mut sector = [0u8; SECTOR_SIZE];
    dev.read_sector(0, &mut sector)?;
    if sector[510] != 0x55 || sector[511] != 0xAA {
        return Err(FatError::NoValidFilesystem);
    }

    for index in 0..4u8 {
        let at = 0x1BE + usize::from(index) * 16;
        let status = sector[at];
        let kind = sector[at + 4];
        if status == 0x80 && (kind == MBR_TYPE_FAT32_LBA || kind == MBR_TYPE_ESP) {
            let start_lba =
                u64::from(u32::read_at(&sector, at + 8).ok_or(FatError::Corrupt)?);
            if start_lba == 0 {
                continue;
            }
            let mut uuid = [0u8; 16];
            uuid[..4].copy_from_slice(b"PART");
            uuid[4] = drive;
            uuid[5] = index;
            return Ok(BootPartition {
                start_lba,
                uuid,
                table: PartitionTable::Mbr,
            });
        }
    }
    Err(FatError::NoValidFilesystem)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testimg::{BrokenDevice, ESP_UNIQUE_GUID, FatBuilder, PART_LBA};

    #[test]
    fn gpt_esp_is_found_by_type_guid() {
        let mut disk = FatBuilder::new(1).file("KERNEL", b"x").build_gpt();
        let partition = find_boot_partition(&mut disk, 0x80).unwrap();
        assert_eq!(partition.table, PartitionTable::Gpt);
        assert_eq!(partition.start_lba, PART_LBA);
        assert_eq!(partition.uuid, ESP_UNIQUE_GUID);
    }

    #[test]
    fn mbr_active_fat32_entry_is_found() {
        let mut disk = FatBuilder::new(1).file("KERNEL", b"x").build_mbr();
        let partition = find_boot_partition(&mut disk, 0x81).unwrap();
        assert_eq!(partition.table, PartitionTable::Mbr);
        assert_eq!(partition.start_lba, PART_LBA);
        assert_eq!(&partition.uuid[..4], b"PART");
        assert_eq!(partition.uuid[4], 0x81);
        assert_eq!(partition.uuid[5], 0);
    }

    #[test]
    fn inactive_mbr_entries_are_skipped() {
        let mut disk = FatBuilder::new(1).file("KERNEL", b"x").build_mbr();
        // Clear the active flag; discovery must now fail.
        disk.0[0x1BE] = 0x00;
        assert_eq!(
            find_boot_partition(&mut disk, 0x80),
            Err(FatError::NoValidFilesystem)
        );
    }

    #[test]
    fn missing_mbr_signature_fails() {
        let mut disk = FatBuilder::new(1).file("KERNEL", b"x").build_mbr();
        disk.0[510] = 0;
        assert_eq!(
            find_boot_partition(&mut disk, 0x80),
            Err(FatError::NoValidFilesystem)
        );
    }

    #[test]
    fn device_errors_propagate() {
        assert_eq!(
            find_boot_partition(&mut BrokenDevice, 0x80),
            Err(FatError::Io)
        );
    }
}
