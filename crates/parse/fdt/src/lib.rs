//! `simpleboot-fdt` --- flattened device tree parsing and patching, `no_std`.
//!
//! The aarch64 boot path hands the kernel a DTB instead of ACPI tables, and
//! the configured command line must end up in `/chosen/bootargs`. This
//! crate provides zero-copy read access to a DTB blob ([`Fdt`]) and the
//! in-place patch that replaces, inserts, or creates the `bootargs`
//! property ([`patch::set_bootargs`]).
//!
//! # Usage
//!
//! ```ignore
//! let fdt = Fdt::parse(dtb_bytes)?;
//! if let Some(chosen) = fdt.find_node("/chosen") {
//!     let args = chosen.property("bootargs");
//! }
//! // ... or rewrite the command line in place:
//! let new_total = patch::set_bootargs(dtb_buffer, "console=ttyAMA0")?;
//! ```

#![no_std]
#![warn(missing_docs)]

pub mod header;
pub mod node;
pub mod patch;
pub mod property;

pub use node::FdtNode;
pub use property::{FdtProperty, StrListIter};

use header::{FDT_MAGIC, FDT_MIN_COMPAT_VERSION, RawFdtHeader};
use simpleboot_binparse::FromBytes;

/// Errors that can occur during FDT parsing or patching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FdtError {
    /// The magic number was not `0xd00dfeed`.
    InvalidMagic,
    /// The `last_comp_version` field is below the minimum we support (16).
    UnsupportedVersion,
    /// The DTB data is shorter than the header or declared block offsets.
    TruncatedData,
    /// A structural invariant was violated (bad token stream, overlapping
    /// or out-of-order blocks).
    InvalidStructure,
    /// The buffer has no room left for the patched blob.
    NoSpace,
}

/// Parsed flattened device tree.
///
/// Borrows the raw DTB `&[u8]` and provides access to nodes and properties.
pub struct Fdt<'a> {
    data: &'a [u8],
    struct_block: &'a [u8],
    strings_block: &'a [u8],
}

impl<'a> Fdt<'a> {
    /// Parses a DTB blob from raw bytes.
    ///
    /// Validates the header magic and version, and bounds-checks all block
    /// offsets against the data length.
    ///
    /// # Errors
    ///
    /// Returns an [`FdtError`] if the blob is malformed.
    pub fn parse(data: &'a [u8]) -> Result<Self, FdtError> {
        let hdr = RawFdtHeader::read_from(data).ok_or(FdtError::TruncatedData)?;

        if hdr.magic.get() != FDT_MAGIC {
            return Err(FdtError::InvalidMagic);
        }
        if hdr.last_comp_version.get() < FDT_MIN_COMPAT_VERSION {
            return Err(FdtError::UnsupportedVersion);
        }

        let total_size = hdr.totalsize.get() as usize;
        if data.len() < total_size {
            return Err(FdtError::TruncatedData);
        }

        let struct_off = hdr.off_dt_struct.get() as usize;
        let struct_len = hdr.size_dt_struct.get() as usize;
        let strings_off = hdr.off_dt_strings.get() as usize;
        let strings_len = hdr.size_dt_strings.get() as usize;

        let struct_end = struct_off
            .checked_add(struct_len)
            .ok_or(FdtError::InvalidStructure)?;
        let strings_end = strings_off
            .checked_add(strings_len)
            .ok_or(FdtError::InvalidStructure)?;
        if struct_end > total_size || strings_end > total_size {
            return Err(FdtError::TruncatedData);
        }

        Ok(Self {
            data,
            struct_block: &data[struct_off..struct_end],
            strings_block: &data[strings_off..strings_end],
        })
    }

    /// Returns the root node of the device tree.
    ///
    /// # Errors
    ///
    /// Returns [`FdtError::InvalidStructure`] if the structure block does
    /// not begin with the root node token.
    pub fn root(&self) -> Result<FdtNode<'a>, FdtError> {
        if node::token_at(self.struct_block, 0) != Some(node::FDT_BEGIN_NODE) {
            return Err(FdtError::InvalidStructure);
        }
        let name = node::cstr_at(self.struct_block, 4).ok_or(FdtError::InvalidStructure)?;
        let content = node::align4(4 + name.len() + 1);
        Ok(FdtNode::new(self.struct_block, self.strings_block, name, content))
    }

    /// Finds a node by its full path (e.g. `"/chosen"`).
    ///
    /// Returns `None` if any component along the path is not found.
    #[must_use]
    pub fn find_node(&self, path: &str) -> Option<FdtNode<'a>> {
        let mut current = self.root().ok()?;
        for component in path.split('/') {
            if component.is_empty() {
                continue;
            }
            current = current.find_child(component)?;
        }
        Some(current)
    }

    /// Returns the total size of the DTB blob in bytes.
    #[must_use]
    pub fn total_size(&self) -> usize {
        self.data.len()
    }
}

#[cfg(test)]
extern crate alloc;

#[cfg(test)]
pub(crate) mod testutil {
    //! DTB builder helpers shared by the parse and patch tests.

    use alloc::vec::Vec;

    pub fn be32(val: u32) -> [u8; 4] {
        val.to_be_bytes()
    }

    /// Pads `v` to a 4-byte boundary.
    pub fn pad4(v: &mut Vec<u8>) {
        while v.len() % 4 != 0 {
            v.push(0);
        }
    }

    /// Appends a `FDT_BEGIN_NODE` token with the given name.
    pub fn emit_begin_node(v: &mut Vec<u8>, name: &str) {
        v.extend_from_slice(&be32(crate::node::FDT_BEGIN_NODE));
        v.extend_from_slice(name.as_bytes());
        v.push(0);
        pad4(v);
    }

    /// Appends an `FDT_END_NODE` token.
    pub fn emit_end_node(v: &mut Vec<u8>) {
        v.extend_from_slice(&be32(crate::node::FDT_END_NODE));
    }

    /// Appends an `FDT_PROP` token.
    pub fn emit_prop(v: &mut Vec<u8>, name_offset: u32, data: &[u8]) {
        v.extend_from_slice(&be32(crate::node::FDT_PROP));
        v.extend_from_slice(&be32(data.len() as u32));
        v.extend_from_slice(&be32(name_offset));
        v.extend_from_slice(data);
        pad4(v);
    }

    /// Appends `FDT_END`.
    pub fn emit_end(v: &mut Vec<u8>) {
        v.extend_from_slice(&be32(crate::node::FDT_END));
    }

    /// Builds a strings block from a list of names.
    /// Returns (strings_block_bytes, offset_for_each_name).
    pub fn build_strings(names: &[&str]) -> (Vec<u8>, Vec<u32>) {
        let mut block = Vec::new();
        let mut offsets = Vec::new();
        for name in names {
            offsets.push(block.len() as u32);
            block.extend_from_slice(name.as_bytes());
            block.push(0);
        }
        (block, offsets)
    }

    /// Builds a complete minimal DTB from struct and strings blocks.
    pub fn build_dtb(struct_block: &[u8], strings_block: &[u8]) -> Vec<u8> {
        let header_size = 40usize;
        let mem_rsv_off = header_size;
        let rsv_size = 16; // terminator entry only
        let struct_off = mem_rsv_off + rsv_size;
        let strings_off = struct_off + struct_block.len();
        let total_size = strings_off + strings_block.len();

        let mut dtb = Vec::with_capacity(total_size);
        dtb.extend_from_slice(&be32(crate::header::FDT_MAGIC));
        dtb.extend_from_slice(&be32(total_size as u32));
        dtb.extend_from_slice(&be32(struct_off as u32));
        dtb.extend_from_slice(&be32(strings_off as u32));
        dtb.extend_from_slice(&be32(mem_rsv_off as u32));
        dtb.extend_from_slice(&be32(17)); // version
        dtb.extend_from_slice(&be32(16)); // last_comp_version
        dtb.extend_from_slice(&be32(0)); // boot_cpuid_phys
        dtb.extend_from_slice(&be32(strings_block.len() as u32));
        dtb.extend_from_slice(&be32(struct_block.len() as u32));

        dtb.extend_from_slice(&[0u8; 16]); // reservation terminator
        dtb.extend_from_slice(struct_block);
        dtb.extend_from_slice(strings_block);

        assert_eq!(dtb.len(), total_size);
        dtb
    }

    /// A DTB with a model property and a /chosen node carrying bootargs:
    ///
    /// ```text
    /// / {
    ///     model = "test-board";
    ///     chosen {
    ///         bootargs = "console=ttyS0";
    ///     };
    ///     memory@0 {
    ///         reg = <0x0 0x80000000>;
    ///     };
    /// };
    /// ```
    pub fn build_dtb_with_chosen() -> Vec<u8> {
        let (strings, offsets) = build_strings(&["model", "bootargs", "reg"]);
        let mut st = Vec::new();
        emit_begin_node(&mut st, "");
        emit_prop(&mut st, offsets[0], b"test-board\0");
        emit_begin_node(&mut st, "chosen");
        emit_prop(&mut st, offsets[1], b"console=ttyS0\0");
        emit_end_node(&mut st);
        emit_begin_node(&mut st, "memory@0");
        let mut reg = Vec::new();
        reg.extend_from_slice(&be32(0));
        reg.extend_from_slice(&be32(0x8000_0000));
        emit_prop(&mut st, offsets[2], &reg);
        emit_end_node(&mut st);
        emit_end_node(&mut st);
        emit_end(&mut st);
        build_dtb(&st, &strings)
    }

    /// The same tree without the /chosen node.
    pub fn build_dtb_without_chosen() -> Vec<u8> {
        let (strings, offsets) = build_strings(&["model"]);
        let mut st = Vec::new();
        emit_begin_node(&mut st, "");
        emit_prop(&mut st, offsets[0], b"test-board\0");
        emit_begin_node(&mut st, "memory@0");
        emit_end_node(&mut st);
        emit_end_node(&mut st);
        emit_end(&mut st);
        build_dtb(&st, &strings)
    }
}

#[cfg(test)]
mod tests {
    use super::testutil::*;
    use super::*;
    use alloc::vec::Vec;

    #[test]
    fn parse_valid_dtb() {
        let dtb = build_dtb_with_chosen();
        let fdt = Fdt::parse(&dtb).unwrap();
        assert_eq!(fdt.total_size(), dtb.len());
        assert_eq!(fdt.root().unwrap().name(), "");
    }

    #[test]
    fn parse_bad_magic() {
        let mut dtb = build_dtb_with_chosen();
        dtb[0] = 0;
        assert!(matches!(Fdt::parse(&dtb), Err(FdtError::InvalidMagic)));
    }

    #[test]
    fn parse_bad_version() {
        let mut dtb = build_dtb_with_chosen();
        dtb[24..28].copy_from_slice(&15u32.to_be_bytes());
        assert!(matches!(Fdt::parse(&dtb), Err(FdtError::UnsupportedVersion)));
    }

    #[test]
    fn parse_truncated() {
        let dtb = build_dtb_with_chosen();
        assert!(matches!(
            Fdt::parse(&dtb[..20]),
            Err(FdtError::TruncatedData)
        ));
    }

    #[test]
    fn children_in_order() {
        let dtb = build_dtb_with_chosen();
        let fdt = Fdt::parse(&dtb).unwrap();
        let names: Vec<&str> = fdt.root().unwrap().children().map(|n| n.name()).collect();
        assert_eq!(names, &["chosen", "memory@0"]);
    }

    #[test]
    fn find_node_by_path() {
        let dtb = build_dtb_with_chosen();
        let fdt = Fdt::parse(&dtb).unwrap();
        assert_eq!(fdt.find_node("/chosen").unwrap().name(), "chosen");
        assert_eq!(fdt.find_node("/").unwrap().name(), "");
        assert!(fdt.find_node("/chosen/nothing").is_none());
        assert!(fdt.find_node("/nonexistent").is_none());
    }

    #[test]
    fn read_bootargs_property() {
        let dtb = build_dtb_with_chosen();
        let fdt = Fdt::parse(&dtb).unwrap();
        let chosen = fdt.find_node("/chosen").unwrap();
        let args = chosen.property("bootargs").unwrap();
        assert_eq!(args.as_str(), Some("console=ttyS0"));
    }

    #[test]
    fn property_value_shapes() {
        let dtb = build_dtb_with_chosen();
        let fdt = Fdt::parse(&dtb).unwrap();
        let memory = fdt.find_node("/memory@0").unwrap();
        let reg = memory.property("reg").unwrap();
        assert_eq!(reg.as_u64(), Some(0x8000_0000));
        assert_eq!(reg.as_u32(), None);
        assert!(memory.property("missing").is_none());
    }

    #[test]
    fn root_model_string() {
        let dtb = build_dtb_with_chosen();
        let fdt = Fdt::parse(&dtb).unwrap();
        let model = fdt.root().unwrap().property("model").unwrap();
        assert_eq!(model.as_str(), Some("test-board"));
    }
}
