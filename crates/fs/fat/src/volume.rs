//! FAT32 volume state, directory traversal, and cluster-chain streaming.

use simpleboot_binparse::FromBytes;

use crate::partition::BootPartition;
use crate::{BlockDevice, FatError, SECTOR_SIZE};

/// Entries held in the FAT cache window.
const FAT_CACHE_ENTRIES: usize = 1024;
/// FAT32 entries per sector (512 / 4).
const FAT_ENTRIES_PER_SECTOR: usize = SECTOR_SIZE / 4;
/// Sectors loaded per cache window reload.
const FAT_CACHE_SECTORS: usize = FAT_CACHE_ENTRIES / FAT_ENTRIES_PER_SECTOR;

/// Cluster values at or above this terminate a chain.
const END_OF_CHAIN: u32 = 0x0FFF_FFF8;

/// Directory entry attributes.
const ATTR_VOLUME_LABEL: u8 = 0x08;
const ATTR_DIRECTORY: u8 = 0x10;
const ATTR_LFN: u8 = 0x0F;

/// Long filenames span at most 20 slots of 13 UCS-2 units each.
const MAX_LFN_SLOTS: usize = 20;
const LFN_UNITS_PER_SLOT: usize = 13;
const MAX_LFN_UNITS: usize = MAX_LFN_SLOTS * LFN_UNITS_PER_SLOT;

/// A mounted FAT32 volume.
pub struct FatVolume<D: BlockDevice> {
    dev: D,
    /// Sectors per cluster.
    spc: u32,
    /// First sector of the (first) FAT.
    fat_lba: u64,
    /// First sector of the data region (cluster 2).
    data_lba: u64,
    /// Cluster of the root directory.
    root_cluster: u32,
    /// Cached FAT window.
    fat_cache: [u32; FAT_CACHE_ENTRIES],
    /// First cluster number covered by the cache; `u32::MAX` when empty.
    fat_cache_base: u32,
}

impl<D: BlockDevice> FatVolume<D> {
    /// Mounts the FAT32 volume beginning at `partition.start_lba`.
    ///
    /// Validates the BPB: 512-byte sectors, non-zero sectors-per-cluster,
    /// a zero 16-bit FAT size with a non-zero 32-bit one, and the 0x55AA
    /// signature.
    ///
    /// # Errors
    ///
    /// Returns [`FatError::NoValidFilesystem`] if any check fails, or
    /// [`FatError::Io`] on a device error.
    pub fn mount(mut dev: D, partition: &BootPartition) -> Result<Self, FatError> {
        let mut vbr = [0u8; SECTOR_SIZE];
        dev.read_sector(partition.start_lba, &mut vbr)?;

        let bytes_per_sector = u16::read_at(&vbr, 11).ok_or(FatError::Corrupt)?;
        let spc = u32::from(vbr[13]);
        let reserved = u16::read_at(&vbr, 14).ok_or(FatError::Corrupt)?;
        let num_fats = u32::from(vbr[16]);
        let fat_size_16 = u16::read_at(&vbr, 22).ok_or(FatError::Corrupt)?;
        let fat_size_32 = u32::read_at(&vbr, 36).ok_or(FatError::Corrupt)?;
        let root_cluster = u32::read_at(&vbr, 44).ok_or(FatError::Corrupt)?;

        if vbr[510] != 0x55
            || vbr[511] != 0xAA
            || bytes_per_sector as usize != SECTOR_SIZE
            || spc == 0
            || fat_size_16 != 0
            || fat_size_32 == 0
            || num_fats == 0
            || root_cluster < 2
        {
            return Err(FatError::NoValidFilesystem);
        }

        let fat_lba = partition.start_lba + u64::from(reserved);
        let data_lba = fat_lba + u64::from(num_fats) * u64::from(fat_size_32);

        Ok(Self {
            dev,
            spc,
            fat_lba,
            data_lba,
            root_cluster,
            fat_cache: [0; FAT_CACHE_ENTRIES],
            fat_cache_base: u32::MAX,
        })
    }

    /// Bytes per cluster.
    fn cluster_bytes(&self) -> u32 {
        self.spc * SECTOR_SIZE as u32
    }

    /// First sector of a data cluster.
    fn cluster_lba(&self, cluster: u32) -> u64 {
        self.data_lba + u64::from(cluster - 2) * u64::from(self.spc)
    }

    /// Returns the successor of `cluster`, or `None` at end of chain.
    ///
    /// Lookups inside the current 1024-entry window are free; a miss
    /// reloads eight FAT sectors.
    fn next_cluster(&mut self, cluster: u32) -> Result<Option<u32>, FatError> {
        let base = cluster & !(FAT_CACHE_ENTRIES as u32 - 1);
        if self.fat_cache_base != base {
            let first_sector = self.fat_lba + u64::from(base / FAT_ENTRIES_PER_SECTOR as u32);
            let mut sector = [0u8; SECTOR_SIZE];
            for s in 0..FAT_CACHE_SECTORS {
                self.dev.read_sector(first_sector + s as u64, &mut sector)?;
                for e in 0..FAT_ENTRIES_PER_SECTOR {
                    self.fat_cache[s * FAT_ENTRIES_PER_SECTOR + e] =
                        u32::read_at(&sector, e * 4).unwrap_or(0);
                }
            }
            self.fat_cache_base = base;
        }

        // The upper 4 bits of a FAT32 entry are reserved.
        let entry = self.fat_cache[(cluster - base) as usize] & 0x0FFF_FFFF;
        if entry < 2 || entry >= END_OF_CHAIN {
            Ok(None)
        } else {
            Ok(Some(entry))
        }
    }

    /// Opens a file by `/`-separated path (escapes already resolved).
    ///
    /// Comparison against long filenames and 8.3 names is
    /// case-insensitive over ASCII. The returned [`File`] borrows the
    /// volume mutably, enforcing the one-open-file-at-a-time rule.
    ///
    /// # Errors
    ///
    /// Returns [`FatError::NotFound`] if any component is missing or the
    /// final component is a directory.
    pub fn open(&mut self, path: &str) -> Result<File<'_, D>, FatError> {
        let mut cluster = self.root_cluster;
        let mut components = path.split('/').filter(|c| !c.is_empty()).peekable();

        while let Some(component) = components.next() {
            let entry = self
                .find_in_dir(cluster, component)?
                .ok_or(FatError::NotFound)?;

            if components.peek().is_some() {
                if !entry.is_dir || entry.first_cluster < 2 {
                    return Err(FatError::NotFound);
                }
                cluster = entry.first_cluster;
            } else {
                if entry.is_dir {
                    return Err(FatError::NotFound);
                }
                return Ok(File {
                    volume: self,
                    start_cluster: entry.first_cluster,
                    size: entry.size,
                });
            }
        }
        Err(FatError::NotFound)
    }

    /// Scans the directory chain starting at `dir_cluster` for `name`.
    fn find_in_dir(
        &mut self,
        dir_cluster: u32,
        name: &str,
    ) -> Result<Option<RawEntry>, FatError> {
        let mut lfn = LfnAccumulator::new();
        let mut cluster = Some(dir_cluster);
        let mut sector = [0u8; SECTOR_SIZE];

        while let Some(current) = cluster {
            for s in 0..self.spc {
                self.dev
                    .read_sector(self.cluster_lba(current) + u64::from(s), &mut sector)?;

                for entry in sector.chunks_exact(32) {
                    let first = entry[0];
                    if first == 0 {
                        return Ok(None); // end of directory
                    }
                    if first == 0xE5 {
                        lfn.reset();
                        continue;
                    }
                    let attr = entry[11];
                    if attr == ATTR_LFN {
                        lfn.feed(entry);
                        continue;
                    }
                    if attr & ATTR_VOLUME_LABEL != 0 || first == b'.' {
                        lfn.reset();
                        continue;
                    }

                    let matched = if lfn.is_complete() {
                        lfn.matches(name)
                    } else {
                        short_name_matches(entry, name)
                    };
                    lfn.reset();

                    if matched {
                        let hi = u16::read_at(entry, 20).unwrap_or(0);
                        let lo = u16::read_at(entry, 26).unwrap_or(0);
                        return Ok(Some(RawEntry {
                            first_cluster: (u32::from(hi) << 16) | u32::from(lo),
                            size: u32::read_at(entry, 28).unwrap_or(0),
                            is_dir: attr & ATTR_DIRECTORY != 0,
                        }));
                    }
                }
            }
            cluster = self.next_cluster(current)?;
        }
        Ok(None)
    }
}

/// The fields of a matched directory entry the loader cares about.
struct RawEntry {
    first_cluster: u32,
    size: u32,
    is_dir: bool,
}

/// An open file, borrowing the volume until dropped (= closed).
pub struct File<'v, D: BlockDevice> {
    volume: &'v mut FatVolume<D>,
    start_cluster: u32,
    size: u32,
}

impl<D: BlockDevice> File<'_, D> {
    /// File size in bytes.
    #[must_use]
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Reads up to `buf.len()` bytes starting at `offset`.
    ///
    /// Returns the number of bytes read, clamped to the file size.
    ///
    /// # Errors
    ///
    /// Returns [`FatError::Io`] on device errors and
    /// [`FatError::Corrupt`] if the cluster chain is shorter than the
    /// directory entry's size field claims.
    pub fn read(&mut self, offset: u32, buf: &mut [u8]) -> Result<usize, FatError> {
        self.read_with(offset, buf, &mut |_, _| true)
    }

    /// Like [`File::read`], but reports progress after every sector.
    ///
    /// `progress(done, total)` returning `false` aborts the read with
    /// [`FatError::Cancelled`]; the loader wires the keyboard poll and
    /// the progress bar into this callback.
    pub fn read_with(
        &mut self,
        offset: u32,
        buf: &mut [u8],
        progress: &mut dyn FnMut(usize, usize) -> bool,
    ) -> Result<usize, FatError> {
        if offset >= self.size || buf.is_empty() {
            return Ok(0);
        }
        let len = buf.len().min((self.size - offset) as usize);
        let cluster_bytes = self.volume.cluster_bytes();

        // Hop through the FAT to the cluster containing `offset`.
        let mut cluster = self.start_cluster;
        for _ in 0..offset / cluster_bytes {
            cluster = self
                .volume
                .next_cluster(cluster)?
                .ok_or(FatError::Corrupt)?;
        }
        let mut pos_in_cluster = offset % cluster_bytes;

        let mut bounce = [0u8; SECTOR_SIZE];
        let mut done = 0usize;
        while done < len {
            let sector_in_cluster = pos_in_cluster / SECTOR_SIZE as u32;
            let offset_in_sector = (pos_in_cluster % SECTOR_SIZE as u32) as usize;
            let lba = self.volume.cluster_lba(cluster) + u64::from(sector_in_cluster);
            let take = (SECTOR_SIZE - offset_in_sector).min(len - done);

            if offset_in_sector == 0 && take == SECTOR_SIZE {
                let direct: &mut [u8; SECTOR_SIZE] =
                    (&mut buf[done..done + SECTOR_SIZE]).try_into().unwrap();
                self.volume.dev.read_sector(lba, direct)?;
            } else {
                self.volume.dev.read_sector(lba, &mut bounce)?;
                buf[done..done + take]
                    .copy_from_slice(&bounce[offset_in_sector..offset_in_sector + take]);
            }
            done += take;
            pos_in_cluster += take as u32;

            if !progress(done, len) {
                return Err(FatError::Cancelled);
            }

            if pos_in_cluster == cluster_bytes && done < len {
                cluster = self
                    .volume
                    .next_cluster(cluster)?
                    .ok_or(FatError::Corrupt)?;
                pos_in_cluster = 0;
            }
        }
        Ok(done)
    }
}

/// Reassembles a long filename from its directory slots.
///
/// Slots arrive highest-sequence first (flagged 0x40), counting down to
/// 1, immediately followed by the short entry. Any break in the sequence
/// discards the partial name and falls back to the 8.3 name.
struct LfnAccumulator {
    units: [u16; MAX_LFN_UNITS],
    /// Number of slots in the name being assembled (0 = idle).
    total: u8,
    /// The sequence number expected next (counting down to 0 = done).
    expect: u8,
}

impl LfnAccumulator {
    fn new() -> Self {
        Self {
            units: [0; MAX_LFN_UNITS],
            total: 0,
            expect: 0,
        }
    }

    fn reset(&mut self) {
        self.total = 0;
        self.expect = 0;
    }

    /// Consumes one attr-0x0F directory entry.
    fn feed(&mut self, entry: &[u8]) {
        let seq = entry[0];
        let number = seq & 0x1F;

        if seq & 0x40 != 0 {
            if number == 0 || usize::from(number) > MAX_LFN_SLOTS {
                self.reset();
                return;
            }
            self.units.fill(0);
            self.total = number;
        } else if number == 0 || number != self.expect {
            self.reset();
            return;
        }

        self.store_slot(number, entry);
        self.expect = number - 1;
    }

    /// Copies the 13 UCS-2 units of slot `number` into place.
    fn store_slot(&mut self, number: u8, entry: &[u8]) {
        // Unit byte offsets within an LFN directory entry.
        const OFFSETS: [usize; LFN_UNITS_PER_SLOT] =
            [1, 3, 5, 7, 9, 14, 16, 18, 20, 22, 24, 26, 28];
        let base = (usize::from(number) - 1) * LFN_UNITS_PER_SLOT;
        for (i, &at) in OFFSETS.iter().enumerate() {
            self.units[base + i] = u16::read_at(entry, at).unwrap_or(0);
        }
    }

    /// A name is complete once slot 1 has been stored.
    fn is_complete(&self) -> bool {
        self.total != 0 && self.expect == 0
    }

    /// Case-insensitive (ASCII) comparison against a path component.
    fn matches(&self, name: &str) -> bool {
        let stored = self.units[..usize::from(self.total) * LFN_UNITS_PER_SLOT]
            .iter()
            .copied()
            .take_while(|&u| u != 0 && u != 0xFFFF);
        let wanted = name.encode_utf16();

        let mut stored = stored.map(fold_unit);
        let mut wanted = wanted.map(fold_unit);
        loop {
            match (stored.next(), wanted.next()) {
                (None, None) => return true,
                (Some(a), Some(b)) if a == b => {}
                _ => return false,
            }
        }
    }
}

/// ASCII-only case folding of a UTF-16 unit.
fn fold_unit(unit: u16) -> u16 {
    if (u16::from(b'A')..=u16::from(b'Z')).contains(&unit) {
        unit + 32
    } else {
        unit
    }
}

/// Compares an 8.3 directory entry name against a path component.
fn short_name_matches(entry: &[u8], name: &str) -> bool {
    let base_end = entry[..8].iter().rposition(|&b| b != b' ').map_or(0, |p| p + 1);
    let ext_end = entry[8..11].iter().rposition(|&b| b != b' ').map_or(0, |p| p + 1);
    let base = &entry[..base_end];
    let ext = &entry[8..8 + ext_end];

    let (want_base, want_ext) = match name.rsplit_once('.') {
        Some((b, e)) => (b, e),
        None => (name, ""),
    };

    base.eq_ignore_ascii_case(want_base.as_bytes()) && ext.eq_ignore_ascii_case(want_ext.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::find_boot_partition;
    use crate::testimg::FatBuilder;
    use alloc::vec;
    use alloc::vec::Vec;

    fn mount(builder: FatBuilder) -> FatVolume<crate::testimg::DiskImage> {
        let mut disk = builder.build_mbr();
        let partition = find_boot_partition(&mut disk, 0x80).unwrap();
        FatVolume::mount(disk, &partition).unwrap()
    }

    /// Deterministic pseudo-random content so chain reads are checkable.
    fn pattern(len: usize) -> Vec<u8> {
        let mut state = 0xACE1u32;
        (0..len)
            .map(|_| {
                state = state.wrapping_mul(75).wrapping_add(74) % 65537;
                (state >> 3) as u8
            })
            .collect()
    }

    #[test]
    fn read_back_exact_bytes() {
        let content = pattern(5000); // spans multiple 1-sector clusters
        let mut volume = mount(FatBuilder::new(1).file("KERNEL", &content));
        let mut file = volume.open("KERNEL").unwrap();
        assert_eq!(file.size() as usize, content.len());

        let mut buf = vec![0u8; content.len()];
        assert_eq!(file.read(0, &mut buf), Ok(content.len()));
        assert_eq!(buf, content);
    }

    #[test]
    fn read_at_unaligned_offsets() {
        let content = pattern(4096);
        let mut volume = mount(FatBuilder::new(2).file("DATA.BIN", &content));
        let mut file = volume.open("DATA.BIN").unwrap();

        let mut buf = vec![0u8; 700];
        assert_eq!(file.read(123, &mut buf), Ok(700));
        assert_eq!(&buf[..], &content[123..823]);

        // A read crossing the cluster boundary (cluster = 1024 bytes).
        let mut buf = vec![0u8; 600];
        assert_eq!(file.read(900, &mut buf), Ok(600));
        assert_eq!(&buf[..], &content[900..1500]);
    }

    #[test]
    fn read_clamps_to_file_size() {
        let mut volume = mount(FatBuilder::new(1).file("SMALL", b"tiny"));
        let mut file = volume.open("SMALL").unwrap();
        let mut buf = [0u8; 64];
        assert_eq!(file.read(0, &mut buf), Ok(4));
        assert_eq!(&buf[..4], b"tiny");
        assert_eq!(file.read(10, &mut buf), Ok(0));
    }

    #[test]
    fn long_filenames_match_case_insensitively() {
        let mut volume = mount(
            FatBuilder::new(1)
                .file("A Fairly Long Kernel Name.elf", b"lfn")
                .file("short.txt", b"short"),
        );
        assert!(volume.open("a fairly long kernel name.ELF").is_ok());
        assert!(volume.open("A Fairly Long Kernel Name.elf").is_ok());
        // "short.txt" is lowercase, so it gets an LFN too.
        assert!(volume.open("SHORT.TXT").is_ok());
        assert!(volume.open("shor.txt").is_err());
    }

    #[test]
    fn names_with_spaces() {
        let mut volume = mount(FatBuilder::new(1).file("boot dir/my kernel", b"k"));
        let mut file = volume.open("boot dir/my kernel").unwrap();
        let mut buf = [0u8; 1];
        assert_eq!(file.read(0, &mut buf), Ok(1));
        assert_eq!(&buf, b"k");
    }

    #[test]
    fn nested_directories() {
        let content = pattern(300);
        let mut volume = mount(
            FatBuilder::new(1)
                .file("EFI/BOOT/BOOTX64.EFI", &content)
                .file("easyboot/menu.cfg", b"kernel vmlinuz\n"),
        );
        let mut file = volume.open("EFI/BOOT/BOOTX64.EFI").unwrap();
        let mut buf = vec![0u8; 300];
        file.read(0, &mut buf).unwrap();
        assert_eq!(buf, content);
        drop(file);

        assert!(volume.open("easyboot/menu.cfg").is_ok());
        assert!(volume.open("EFI/BOOT/missing").is_err());
        // Opening a directory as a file is refused.
        assert!(matches!(volume.open("EFI/BOOT"), Err(FatError::NotFound)));
    }

    #[test]
    fn missing_file_is_not_found() {
        let mut volume = mount(FatBuilder::new(1).file("KERNEL", b"x"));
        assert!(matches!(volume.open("nothere"), Err(FatError::NotFound)));
        assert!(matches!(volume.open("no/such/dir"), Err(FatError::NotFound)));
    }

    #[test]
    fn progress_callback_counts_up_and_cancels() {
        let content = pattern(3000);
        let mut volume = mount(FatBuilder::new(1).file("BIG", &content));
        let mut file = volume.open("BIG").unwrap();

        let mut calls = Vec::new();
        let mut buf = vec![0u8; 3000];
        file.read_with(0, &mut buf, &mut |done, total| {
            calls.push((done, total));
            true
        })
        .unwrap();
        assert_eq!(calls.last(), Some(&(3000, 3000)));
        assert!(calls.windows(2).all(|w| w[0].0 < w[1].0));

        // Cancel after the second sector.
        let mut count = 0;
        let result = file.read_with(0, &mut buf, &mut |_, _| {
            count += 1;
            count < 2
        });
        assert_eq!(result, Err(FatError::Cancelled));
    }

    #[test]
    fn fat_cache_window_crossing() {
        // A chain long enough that cluster numbers pass 1024, forcing a
        // cache window reload mid-file.
        let content = pattern(1100 * SECTOR_SIZE);
        let mut volume = mount(FatBuilder::new(1).file("HUGE.IMG", &content));
        let mut file = volume.open("HUGE.IMG").unwrap();

        let mut buf = vec![0u8; content.len()];
        assert_eq!(file.read(0, &mut buf), Ok(content.len()));
        assert_eq!(buf, content);

        // Reading the tail alone seeks across the window boundary.
        let tail = content.len() - 4096;
        let mut buf = vec![0u8; 4096];
        assert_eq!(file.read(tail as u32, &mut buf), Ok(4096));
        assert_eq!(&buf[..], &content[tail..]);
    }

    #[test]
    fn bad_bpb_is_rejected() {
        let mut disk = FatBuilder::new(1).file("KERNEL", b"x").build_mbr();
        let partition = find_boot_partition(&mut disk, 0x80).unwrap();
        let vbr = crate::testimg::PART_LBA as usize * SECTOR_SIZE;

        // Corrupt sectors-per-cluster.
        let mut broken = crate::testimg::DiskImage(disk.0.clone());
        broken.0[vbr + 13] = 0;
        assert!(matches!(
            FatVolume::mount(broken, &partition),
            Err(FatError::NoValidFilesystem)
        ));

        // A non-zero 16-bit FAT size means FAT12/16, not FAT32.
        let mut broken = crate::testimg::DiskImage(disk.0.clone());
        broken.0[vbr + 22] = 12;
        assert!(matches!(
            FatVolume::mount(broken, &partition),
            Err(FatError::NoValidFilesystem)
        ));

        // Missing boot signature.
        let mut broken = crate::testimg::DiskImage(disk.0.clone());
        broken.0[vbr + 510] = 0;
        assert!(matches!(
            FatVolume::mount(broken, &partition),
            Err(FatError::NoValidFilesystem)
        ));
    }

    #[test]
    fn deleted_entries_are_skipped() {
        let mut disk = FatBuilder::new(1)
            .file("OLD", b"old")
            .file("KEEP", b"keep")
            .build_mbr();
        let partition = find_boot_partition(&mut disk, 0x80).unwrap();

        // Mark the first root entry ("OLD") as deleted.
        let vbr = crate::testimg::PART_LBA as usize * SECTOR_SIZE;
        let reserved = 32;
        let fat_sectors = u32::from_le_bytes(
            disk.0[vbr + 36..vbr + 40].try_into().unwrap(),
        ) as usize;
        let root = vbr + (reserved + 2 * fat_sectors) * SECTOR_SIZE;
        assert_eq!(&disk.0[root..root + 3], b"OLD");
        disk.0[root] = 0xE5;

        let mut volume = FatVolume::mount(disk, &partition).unwrap();
        assert!(matches!(volume.open("OLD"), Err(FatError::NotFound)));
        assert!(volume.open("KEEP").is_ok());
    }
}
