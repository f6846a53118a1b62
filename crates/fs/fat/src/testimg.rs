//! Synthetic FAT32 disk images for the filesystem tests.
//!
//! Builds a real FAT32 volume (BPB, two FAT copies, cluster chains,
//! directory tables with LFN slots) wrapped in either an MBR or a GPT
//! disk, entirely in memory.

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use crate::partition::ESP_TYPE_GUID;
use crate::{BlockDevice, FatError, SECTOR_SIZE};

/// Where the FAT32 partition starts on the synthetic disk.
pub const PART_LBA: u64 = 64;

/// Reserved sectors before the first FAT.
const RESERVED: u64 = 32;

/// UniquePartitionGUID the GPT builder assigns to the ESP.
pub const ESP_UNIQUE_GUID: [u8; 16] = [
    0xAA, 0xBB, 0xCC, 0xDD, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B,
    0x0C,
];

/// An in-memory disk.
pub struct DiskImage(pub Vec<u8>);

impl BlockDevice for DiskImage {
    fn read_sector(&mut self, lba: u64, buf: &mut [u8; SECTOR_SIZE]) -> Result<(), FatError> {
        let at = lba as usize * SECTOR_SIZE;
        let sector = self.0.get(at..at + SECTOR_SIZE).ok_or(FatError::Io)?;
        buf.copy_from_slice(sector);
        Ok(())
    }
}

/// A device that fails every read, for error-path tests.
pub struct BrokenDevice;

impl BlockDevice for BrokenDevice {
    fn read_sector(&mut self, _lba: u64, _buf: &mut [u8; SECTOR_SIZE]) -> Result<(), FatError> {
        Err(FatError::Io)
    }
}

#[derive(Default)]
struct DirNode {
    subdirs: Vec<(String, DirNode)>,
    files: Vec<(String, Vec<u8>)>,
}

impl DirNode {
    fn insert(&mut self, path: &str, content: Vec<u8>) {
        match path.split_once('/') {
            Some((dir, rest)) => {
                let node = match self.subdirs.iter_mut().position(|(n, _)| n == dir) {
                    Some(at) => &mut self.subdirs[at].1,
                    None => {
                        self.subdirs.push((String::from(dir), DirNode::default()));
                        &mut self.subdirs.last_mut().unwrap().1
                    }
                };
                node.insert(rest, content);
            }
            None => self.files.push((String::from(path), content)),
        }
    }
}

/// Builds FAT32 volumes and wraps them into partitioned disks.
pub struct FatBuilder {
    spc: u32,
    root: DirNode,
}

impl FatBuilder {
    pub fn new(spc: u32) -> Self {
        Self {
            spc,
            root: DirNode::default(),
        }
    }

    /// Adds a file; intermediate directories are created as needed.
    pub fn file(mut self, path: &str, content: &[u8]) -> Self {
        self.root.insert(path, content.to_vec());
        self
    }

    /// Serialises the volume and wraps it into an MBR-partitioned disk.
    pub fn build_mbr(self) -> DiskImage {
        let volume = self.build_volume();
        let mut disk = vec![0u8; PART_LBA as usize * SECTOR_SIZE + volume.len()];

        // Partition entry 0: active, FAT32 LBA.
        let entry = 0x1BE;
        disk[entry] = 0x80;
        disk[entry + 4] = 0x0C;
        disk[entry + 8..entry + 12].copy_from_slice(&(PART_LBA as u32).to_le_bytes());
        let sectors = (volume.len() / SECTOR_SIZE) as u32;
        disk[entry + 12..entry + 16].copy_from_slice(&sectors.to_le_bytes());
        disk[510] = 0x55;
        disk[511] = 0xAA;

        disk[PART_LBA as usize * SECTOR_SIZE..].copy_from_slice(&volume);
        DiskImage(disk)
    }

    /// Serialises the volume and wraps it into a GPT disk.
    ///
    /// The entry array carries a non-ESP entry first so discovery must
    /// match on the type GUID rather than position.
    pub fn build_gpt(self) -> DiskImage {
        let volume = self.build_volume();
        let mut disk = vec![0u8; PART_LBA as usize * SECTOR_SIZE + volume.len()];

        // Protective MBR.
        disk[0x1BE + 4] = 0xEE;
        disk[510] = 0x55;
        disk[511] = 0xAA;

        // GPT header at LBA 1.
        let hdr = SECTOR_SIZE;
        disk[hdr..hdr + 8].copy_from_slice(b"EFI PART");
        disk[hdr + 72..hdr + 80].copy_from_slice(&2u64.to_le_bytes()); // entry array LBA
        disk[hdr + 80..hdr + 84].copy_from_slice(&8u32.to_le_bytes()); // entries
        disk[hdr + 84..hdr + 88].copy_from_slice(&128u32.to_le_bytes()); // entry size

        // Entry 0: a Linux filesystem partition, to be skipped.
        let e0 = 2 * SECTOR_SIZE;
        disk[e0..e0 + 16].copy_from_slice(&[
            0xAF, 0x3D, 0xC6, 0x0F, 0x83, 0x84, 0x72, 0x47, 0x8E, 0x79, 0x3D, 0x69, 0xD8, 0x47,
            0x7D, 0xE4,
        ]);
        disk[e0 + 32..e0 + 40].copy_from_slice(&4096u64.to_le_bytes());

        // Entry 1: the ESP.
        let e1 = e0 + 128;
        disk[e1..e1 + 16].copy_from_slice(&ESP_TYPE_GUID);
        disk[e1 + 16..e1 + 32].copy_from_slice(&ESP_UNIQUE_GUID);
        disk[e1 + 32..e1 + 40].copy_from_slice(&PART_LBA.to_le_bytes());

        disk[PART_LBA as usize * SECTOR_SIZE..].copy_from_slice(&volume);
        DiskImage(disk)
    }

    /// Serialises the FAT32 volume alone (VBR at byte 0).
    pub fn build_volume(self) -> Vec<u8> {
        let cluster_bytes = self.spc as usize * SECTOR_SIZE;
        let mut clusters: Vec<Vec<u8>> = Vec::new(); // index 0 == cluster 2
        let mut fat: Vec<u32> = vec![0x0FFF_FFF8, 0x0FFF_FFFF];

        // Pass 1: reserve directory tables, root first so it lands on
        // cluster 2.
        let mut dir_clusters: Vec<(*const DirNode, u32)> = Vec::new();
        reserve_dirs(
            &self.root,
            true,
            cluster_bytes,
            &mut clusters,
            &mut fat,
            &mut dir_clusters,
        );

        // Pass 2: file contents.
        let mut file_clusters: Vec<(*const Vec<u8>, u32, u32)> = Vec::new();
        alloc_files(
            &self.root,
            cluster_bytes,
            &mut clusters,
            &mut fat,
            &mut file_clusters,
        );

        // Pass 3: fill the directory tables.
        let mut short_counter = 0u32;
        fill_dirs(
            &self.root,
            0, // parent of root, unused
            cluster_bytes,
            &mut clusters,
            &dir_clusters,
            &file_clusters,
            &mut short_counter,
        );

        serialize_volume(self.spc, &clusters, &fat)
    }
}

fn dir_table_bytes(dir: &DirNode, is_root: bool) -> usize {
    let mut entries = if is_root { 0 } else { 2 }; // "." and ".."
    for (name, _) in &dir.subdirs {
        entries += lfn_slot_count(name) + 1;
    }
    for (name, _) in &dir.files {
        entries += lfn_slot_count(name) + 1;
    }
    (entries + 1) * 32 // plus the end-of-directory marker
}

fn lfn_slot_count(name: &str) -> usize {
    if is_plain_short_name(name) {
        0
    } else {
        name.encode_utf16().count().div_ceil(13)
    }
}

fn is_plain_short_name(name: &str) -> bool {
    let (base, ext) = match name.rsplit_once('.') {
        Some((b, e)) => (b, e),
        None => (name, ""),
    };
    let plain = |s: &str| {
        s.bytes()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit() || b == b'_')
    };
    !base.is_empty() && base.len() <= 8 && ext.len() <= 3 && plain(base) && plain(ext)
}

fn alloc_chain(
    bytes: usize,
    cluster_bytes: usize,
    clusters: &mut Vec<Vec<u8>>,
    fat: &mut Vec<u32>,
) -> u32 {
    let count = bytes.div_ceil(cluster_bytes).max(1);
    let first = fat.len() as u32;
    for i in 0..count {
        clusters.push(vec![0u8; cluster_bytes]);
        if i + 1 == count {
            fat.push(0x0FFF_FFFF);
        } else {
            fat.push(fat.len() as u32 + 1);
        }
    }
    first
}

fn reserve_dirs(
    dir: &DirNode,
    is_root: bool,
    cluster_bytes: usize,
    clusters: &mut Vec<Vec<u8>>,
    fat: &mut Vec<u32>,
    out: &mut Vec<(*const DirNode, u32)>,
) {
    let first = alloc_chain(dir_table_bytes(dir, is_root), cluster_bytes, clusters, fat);
    out.push((core::ptr::from_ref(dir), first));
    for (_, sub) in &dir.subdirs {
        reserve_dirs(sub, false, cluster_bytes, clusters, fat, out);
    }
}

fn alloc_files(
    dir: &DirNode,
    cluster_bytes: usize,
    clusters: &mut Vec<Vec<u8>>,
    fat: &mut Vec<u32>,
    out: &mut Vec<(*const Vec<u8>, u32, u32)>,
) {
    for (_, content) in &dir.files {
        let first = alloc_chain(content.len(), cluster_bytes, clusters, fat);
        // Copy content into the allocated chain.
        for (i, chunk) in content.chunks(cluster_bytes).enumerate() {
            let idx = (first as usize - 2) + i;
            clusters[idx][..chunk.len()].copy_from_slice(chunk);
        }
        out.push((core::ptr::from_ref(content), first, content.len() as u32));
    }
    for (_, sub) in &dir.subdirs {
        alloc_files(sub, cluster_bytes, clusters, fat, out);
    }
}

fn fill_dirs(
    dir: &DirNode,
    parent_cluster: u32,
    cluster_bytes: usize,
    clusters: &mut Vec<Vec<u8>>,
    dir_clusters: &[(*const DirNode, u32)],
    file_clusters: &[(*const Vec<u8>, u32, u32)],
    short_counter: &mut u32,
) {
    let lookup_dir = |node: &DirNode| {
        dir_clusters
            .iter()
            .find(|(p, _)| *p == core::ptr::from_ref(node))
            .map(|(_, c)| *c)
            .unwrap()
    };
    let lookup_file = |content: &Vec<u8>| {
        file_clusters
            .iter()
            .find(|(p, _, _)| *p == core::ptr::from_ref(content))
            .map(|(_, c, s)| (*c, *s))
            .unwrap()
    };

    let own = lookup_dir(dir);
    let is_root = parent_cluster == 0;
    let mut table: Vec<u8> = Vec::new();

    if !is_root {
        table.extend_from_slice(&short_entry(*b".          ", 0x10, own, 0));
        table.extend_from_slice(&short_entry(*b"..         ", 0x10, parent_cluster, 0));
    }
    for (name, sub) in &dir.subdirs {
        emit_entry(&mut table, name, 0x10, lookup_dir(sub), 0, short_counter);
    }
    for (name, content) in &dir.files {
        let (first, size) = lookup_file(content);
        emit_entry(&mut table, name, 0x00, first, size, short_counter);
    }

    // Write the table into the reserved chain.
    for (i, chunk) in table.chunks(cluster_bytes).enumerate() {
        let idx = (own as usize - 2) + i;
        clusters[idx][..chunk.len()].copy_from_slice(chunk);
    }

    for (_, sub) in &dir.subdirs {
        fill_dirs(
            sub,
            own,
            cluster_bytes,
            clusters,
            dir_clusters,
            file_clusters,
            short_counter,
        );
    }
}

fn emit_entry(
    table: &mut Vec<u8>,
    name: &str,
    attr: u8,
    first_cluster: u32,
    size: u32,
    short_counter: &mut u32,
) {
    let short = make_short_name(name, short_counter);
    if !is_plain_short_name(name) {
        let checksum = short_checksum(&short);
        let units: Vec<u16> = name.encode_utf16().collect();
        let slots = units.len().div_ceil(13);
        for slot in (1..=slots).rev() {
            let mut entry = [0u8; 32];
            entry[0] = slot as u8 | if slot == slots { 0x40 } else { 0 };
            entry[11] = 0x0F;
            entry[13] = checksum;
            const OFFSETS: [usize; 13] = [1, 3, 5, 7, 9, 14, 16, 18, 20, 22, 24, 26, 28];
            for (i, &at) in OFFSETS.iter().enumerate() {
                let index = (slot - 1) * 13 + i;
                let unit = match index.cmp(&units.len()) {
                    core::cmp::Ordering::Less => units[index],
                    core::cmp::Ordering::Equal => 0x0000,
                    core::cmp::Ordering::Greater => 0xFFFF,
                };
                entry[at..at + 2].copy_from_slice(&unit.to_le_bytes());
            }
            table.extend_from_slice(&entry);
        }
    }
    table.extend_from_slice(&short_entry(short, attr, first_cluster, size));
}

fn make_short_name(name: &str, counter: &mut u32) -> [u8; 11] {
    let mut short = [b' '; 11];
    if is_plain_short_name(name) {
        let (base, ext) = match name.rsplit_once('.') {
            Some((b, e)) => (b, e),
            None => (name, ""),
        };
        short[..base.len()].copy_from_slice(base.as_bytes());
        short[8..8 + ext.len()].copy_from_slice(ext.as_bytes());
    } else {
        // An uppercase alias that will not collide: "SB~<n>".
        *counter += 1;
        short[..3].copy_from_slice(b"SB~");
        let digits = [
            b'0' + ((*counter / 100) % 10) as u8,
            b'0' + ((*counter / 10) % 10) as u8,
            b'0' + (*counter % 10) as u8,
        ];
        short[3..6].copy_from_slice(&digits);
    }
    short
}

fn short_entry(name: [u8; 11], attr: u8, first_cluster: u32, size: u32) -> [u8; 32] {
    let mut entry = [0u8; 32];
    entry[..11].copy_from_slice(&name);
    entry[11] = attr;
    entry[20..22].copy_from_slice(&((first_cluster >> 16) as u16).to_le_bytes());
    entry[26..28].copy_from_slice(&(first_cluster as u16).to_le_bytes());
    entry[28..32].copy_from_slice(&size.to_le_bytes());
    entry
}

fn short_checksum(name: &[u8; 11]) -> u8 {
    name.iter()
        .fold(0u8, |sum, &b| ((sum & 1) << 7).wrapping_add(sum >> 1).wrapping_add(b))
}

fn serialize_volume(spc: u32, clusters: &[Vec<u8>], fat: &[u32]) -> Vec<u8> {
    let fat_sectors = (fat.len() * 4).div_ceil(SECTOR_SIZE).next_multiple_of(8).max(16) as u64;
    let data_start = RESERVED + 2 * fat_sectors;
    let total_sectors = data_start + (clusters.len() as u64) * u64::from(spc);

    let mut volume = vec![0u8; total_sectors as usize * SECTOR_SIZE];

    // BPB.
    volume[0] = 0xEB; // jmp
    volume[11..13].copy_from_slice(&512u16.to_le_bytes());
    volume[13] = spc as u8;
    volume[14..16].copy_from_slice(&(RESERVED as u16).to_le_bytes());
    volume[16] = 2; // number of FATs
    volume[32..36].copy_from_slice(&(total_sectors as u32).to_le_bytes());
    volume[36..40].copy_from_slice(&(fat_sectors as u32).to_le_bytes());
    volume[44..48].copy_from_slice(&2u32.to_le_bytes()); // root cluster
    volume[510] = 0x55;
    volume[511] = 0xAA;

    // Two identical FAT copies.
    for copy in 0..2u64 {
        let at = (RESERVED + copy * fat_sectors) as usize * SECTOR_SIZE;
        for (i, entry) in fat.iter().enumerate() {
            volume[at + i * 4..at + i * 4 + 4].copy_from_slice(&entry.to_le_bytes());
        }
    }

    // Data region.
    for (i, cluster) in clusters.iter().enumerate() {
        let at = (data_start as usize + i * spc as usize) * SECTOR_SIZE;
        volume[at..at + cluster.len()].copy_from_slice(cluster);
    }
    volume
}
