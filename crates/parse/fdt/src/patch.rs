//! In-place `/chosen/bootargs` patching.
//!
//! The patched blob stays a single contiguous DTB: changing the length of
//! the `bootargs` value moves the tail of the structure block and the
//! whole strings block, and the header's `totalsize`, `size_dt_struct`,
//! `off_dt_strings`, and `size_dt_strings` fields are rewritten to match.
//! The buffer passed in must therefore have slack beyond the current
//! `totalsize`; the loader hands over the module's page-rounded buffer.

use simpleboot_binparse::{FromBytes, write_at};

use crate::FdtError;
use crate::header::{Be32, FDT_MAGIC, FDT_MIN_COMPAT_VERSION, RawFdtHeader};
use crate::node::{FDT_BEGIN_NODE, FDT_END, FDT_END_NODE, FDT_NOP, FDT_PROP, align4, cstr_at, token_at};

/// Where the interesting tokens sit, as absolute blob offsets.
struct PatchPoints {
    /// Offset of the first content token of `/chosen`, if the node exists.
    chosen_content: Option<usize>,
    /// `(prop_token_offset, value_len)` of `/chosen/bootargs`, if present.
    bootargs: Option<(usize, usize)>,
    /// Offset of the `FDT_END_NODE` token that closes the root node.
    root_end: usize,
}

/// Sets `/chosen/bootargs` to `cmdline`, creating the property and the
/// `chosen` node as needed.
///
/// `blob` must start with a valid DTB; bytes past the current `totalsize`
/// are treated as free slack. Returns the new `totalsize`.
///
/// # Errors
///
/// Returns [`FdtError::NoSpace`] if the patched blob would not fit in
/// `blob`, or another [`FdtError`] if the blob is malformed.
pub fn set_bootargs(blob: &mut [u8], cmdline: &str) -> Result<usize, FdtError> {
    let hdr = RawFdtHeader::read_from(blob).ok_or(FdtError::TruncatedData)?;
    if hdr.magic.get() != FDT_MAGIC {
        return Err(FdtError::InvalidMagic);
    }
    if hdr.last_comp_version.get() < FDT_MIN_COMPAT_VERSION {
        return Err(FdtError::UnsupportedVersion);
    }

    let total = hdr.totalsize.get() as usize;
    let struct_off = hdr.off_dt_struct.get() as usize;
    let struct_size = hdr.size_dt_struct.get() as usize;
    let strings_off = hdr.off_dt_strings.get() as usize;
    let strings_size = hdr.size_dt_strings.get() as usize;

    if total > blob.len() {
        return Err(FdtError::TruncatedData);
    }
    // The patch relies on the conventional block order: header, memory
    // reservations, structure, strings.
    if struct_off < RawFdtHeader::SIZE
        || strings_off < struct_off + struct_size
        || strings_off + strings_size > total
    {
        return Err(FdtError::InvalidStructure);
    }

    let points = scan(blob, struct_off, struct_size, strings_off, strings_size)?;

    let value_len = cmdline.len() + 1;
    let padded_new = align4(value_len);

    match points.bootargs {
        Some((prop_token, old_len)) => {
            let padded_old = align4(old_len);
            let value_at = prop_token + 12;
            let new_total =
                splice(blob, total, value_at, padded_old, padded_new)?;
            write_value(blob, value_at, cmdline, padded_new);
            write_at(blob, prop_token + 4, Be32::new(value_len as u32))
                .ok_or(FdtError::TruncatedData)?;
            let delta = padded_new as i64 - padded_old as i64;
            update_header(blob, new_total, delta, 0);
            Ok(new_total)
        }
        None => {
            // Make sure the "bootargs" name exists in the strings block.
            let (name_off, total, strings_grown) =
                ensure_name(blob, total, strings_off, strings_size)?;

            let (insert_at, insert_len, wrap_in_node) = match points.chosen_content {
                Some(content) => (content, 12 + padded_new, false),
                None => (points.root_end, 4 + 8 + 12 + padded_new + 4, true),
            };

            let new_total = splice(blob, total, insert_at, 0, insert_len)?;
            let mut at = insert_at;
            if wrap_in_node {
                write_at(blob, at, Be32::new(FDT_BEGIN_NODE)).ok_or(FdtError::NoSpace)?;
                blob[at + 4..at + 12].copy_from_slice(b"chosen\0\0");
                at += 12;
            }
            write_at(blob, at, Be32::new(FDT_PROP)).ok_or(FdtError::NoSpace)?;
            write_at(blob, at + 4, Be32::new(value_len as u32)).ok_or(FdtError::NoSpace)?;
            write_at(blob, at + 8, Be32::new(name_off as u32)).ok_or(FdtError::NoSpace)?;
            write_value(blob, at + 12, cmdline, padded_new);
            if wrap_in_node {
                write_at(blob, at + 12 + padded_new, Be32::new(FDT_END_NODE))
                    .ok_or(FdtError::NoSpace)?;
            }
            update_header(blob, new_total, insert_len as i64, strings_grown as i64);
            Ok(new_total)
        }
    }
}

/// Walks the structure block recording the patch-relevant offsets.
fn scan(
    blob: &[u8],
    struct_off: usize,
    struct_size: usize,
    strings_off: usize,
    strings_size: usize,
) -> Result<PatchPoints, FdtError> {
    let struct_end = struct_off + struct_size;
    let strings = &blob[strings_off..strings_off + strings_size];

    let mut offset = struct_off;
    let mut depth = 0usize;
    let mut in_chosen = false;
    let mut chosen_content = None;
    let mut bootargs = None;

    while offset + 4 <= struct_end {
        match token_at(blob, offset).ok_or(FdtError::InvalidStructure)? {
            FDT_BEGIN_NODE => {
                let name = cstr_at(blob, offset + 4).ok_or(FdtError::InvalidStructure)?;
                let content = align4(offset + 4 + name.len() + 1);
                if depth == 1 && name == "chosen" && chosen_content.is_none() {
                    chosen_content = Some(content);
                    in_chosen = true;
                }
                depth += 1;
                offset = content;
            }
            FDT_END_NODE => {
                depth = depth.checked_sub(1).ok_or(FdtError::InvalidStructure)?;
                if in_chosen && depth == 1 {
                    in_chosen = false;
                }
                if depth == 0 {
                    return Ok(PatchPoints {
                        chosen_content,
                        bootargs,
                        root_end: offset,
                    });
                }
                offset += 4;
            }
            FDT_PROP => {
                let len =
                    token_at(blob, offset + 4).ok_or(FdtError::InvalidStructure)? as usize;
                let name_off =
                    token_at(blob, offset + 8).ok_or(FdtError::InvalidStructure)? as usize;
                if in_chosen
                    && depth == 2
                    && bootargs.is_none()
                    && cstr_at(strings, name_off) == Some("bootargs")
                {
                    bootargs = Some((offset, len));
                }
                offset = align4(offset + 12 + len);
            }
            FDT_NOP => offset += 4,
            FDT_END => break,
            _ => return Err(FdtError::InvalidStructure),
        }
    }
    Err(FdtError::InvalidStructure)
}

/// Moves the tail `[at + old_len, total)` to `at + new_len`.
///
/// Returns the new total size, or [`FdtError::NoSpace`] if it would exceed
/// the buffer.
fn splice(
    blob: &mut [u8],
    total: usize,
    at: usize,
    old_len: usize,
    new_len: usize,
) -> Result<usize, FdtError> {
    let tail_src = at + old_len;
    let tail_dst = at + new_len;
    if tail_src > total {
        return Err(FdtError::InvalidStructure);
    }
    let new_total = total - old_len + new_len;
    if new_total > blob.len() {
        return Err(FdtError::NoSpace);
    }
    blob.copy_within(tail_src..total, tail_dst);
    Ok(new_total)
}

/// Writes the NUL-terminated, zero-padded property value.
fn write_value(blob: &mut [u8], at: usize, cmdline: &str, padded: usize) {
    blob[at..at + padded].fill(0);
    blob[at..at + cmdline.len()].copy_from_slice(cmdline.as_bytes());
}

/// Finds `"bootargs"` in the strings block, appending it when missing.
///
/// Returns `(name_offset_within_strings, new_total, bytes_appended)`.
fn ensure_name(
    blob: &mut [u8],
    total: usize,
    strings_off: usize,
    strings_size: usize,
) -> Result<(usize, usize, usize), FdtError> {
    const NAME: &[u8] = b"bootargs\0";
    let strings = &blob[strings_off..strings_off + strings_size];

    // A match must start the entry: at offset 0 or right after a NUL.
    let mut search = 0;
    while search + NAME.len() <= strings.len() {
        if &strings[search..search + NAME.len()] == NAME
            && (search == 0 || strings[search - 1] == 0)
        {
            return Ok((search, total, 0));
        }
        search += 1;
    }

    // Append at the end of the strings block (the last block in the blob).
    let at = strings_off + strings_size;
    let new_total = splice(blob, total, at, 0, NAME.len())?;
    blob[at..at + NAME.len()].copy_from_slice(NAME);
    Ok((strings_size, new_total, NAME.len()))
}

/// Applies the accumulated size deltas to the header fields.
fn update_header(blob: &mut [u8], new_total: usize, struct_delta: i64, strings_delta: i64) {
    let read = |blob: &[u8], off: usize| -> u32 {
        Be32::read_at(blob, off).map_or(0, Be32::get)
    };
    let add = |value: u32, delta: i64| -> u32 { (i64::from(value) + delta) as u32 };

    let struct_size = add(read(blob, RawFdtHeader::SIZE_DT_STRUCT_OFFSET), struct_delta);
    let strings_off = add(read(blob, RawFdtHeader::OFF_DT_STRINGS_OFFSET), struct_delta);
    let strings_size = add(read(blob, RawFdtHeader::SIZE_DT_STRINGS_OFFSET), strings_delta);

    let _ = write_at(blob, RawFdtHeader::TOTALSIZE_OFFSET, Be32::new(new_total as u32));
    let _ = write_at(blob, RawFdtHeader::SIZE_DT_STRUCT_OFFSET, Be32::new(struct_size));
    let _ = write_at(blob, RawFdtHeader::OFF_DT_STRINGS_OFFSET, Be32::new(strings_off));
    let _ = write_at(blob, RawFdtHeader::SIZE_DT_STRINGS_OFFSET, Be32::new(strings_size));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::*;
    use crate::{Fdt, FdtError};
    use alloc::vec::Vec;

    /// Appends slack so the patch has room to grow, then patches.
    fn patch(dtb: &[u8], cmdline: &str) -> (Vec<u8>, usize) {
        let mut buf = dtb.to_vec();
        buf.resize(dtb.len() + 256, 0);
        let new_total = set_bootargs(&mut buf, cmdline).unwrap();
        (buf, new_total)
    }

    fn assert_bootargs(blob: &[u8], expected: &str) {
        let fdt = Fdt::parse(blob).unwrap();
        let chosen = fdt.find_node("/chosen").unwrap();
        let args = chosen.property("bootargs").unwrap();
        assert_eq!(args.as_str(), Some(expected));
        // NUL-terminated and padded to 4 bytes in the raw stream.
        assert_eq!(args.raw().len(), expected.len() + 1);
        assert_eq!(args.raw().last(), Some(&0u8));
    }

    #[test]
    fn replace_with_longer_value() {
        let dtb = build_dtb_with_chosen();
        let (buf, total) = patch(&dtb, "console=ttyAMA0 root=/dev/mmcblk0p2 rw");
        assert!(total > dtb.len());
        assert_bootargs(&buf[..total], "console=ttyAMA0 root=/dev/mmcblk0p2 rw");
    }

    #[test]
    fn replace_with_shorter_value() {
        let dtb = build_dtb_with_chosen();
        let (buf, total) = patch(&dtb, "quiet");
        assert!(total < dtb.len());
        assert_bootargs(&buf[..total], "quiet");
    }

    #[test]
    fn replace_with_same_padded_length() {
        // "console=ttyS0" is 13 bytes + NUL = 14, padded 16; so is a
        // 15-byte replacement.
        let dtb = build_dtb_with_chosen();
        let (buf, total) = patch(&dtb, "console=ttyS1 x");
        assert_eq!(total, dtb.len());
        assert_bootargs(&buf[..total], "console=ttyS1 x");
    }

    #[test]
    fn untouched_siblings_survive_replacement() {
        let dtb = build_dtb_with_chosen();
        let (buf, total) = patch(&dtb, "earlycon keep_bootcon");
        let fdt = Fdt::parse(&buf[..total]).unwrap();
        let model = fdt.root().unwrap().property("model").unwrap();
        assert_eq!(model.as_str(), Some("test-board"));
        let memory = fdt.find_node("/memory@0").unwrap();
        assert_eq!(memory.property("reg").unwrap().as_u64(), Some(0x8000_0000));
    }

    #[test]
    fn insert_into_chosen_without_bootargs() {
        // A /chosen node that has a different property but no bootargs.
        let (strings, offsets) = build_strings(&["stdout-path"]);
        let mut st = Vec::new();
        emit_begin_node(&mut st, "");
        emit_begin_node(&mut st, "chosen");
        emit_prop(&mut st, offsets[0], b"serial0\0");
        emit_end_node(&mut st);
        emit_end_node(&mut st);
        emit_end(&mut st);
        let dtb = build_dtb(&st, &strings);

        let (buf, total) = patch(&dtb, "root=/dev/sda1");
        assert_bootargs(&buf[..total], "root=/dev/sda1");
        let fdt = Fdt::parse(&buf[..total]).unwrap();
        let chosen = fdt.find_node("/chosen").unwrap();
        assert_eq!(
            chosen.property("stdout-path").unwrap().as_str(),
            Some("serial0")
        );
    }

    #[test]
    fn creates_chosen_node_when_missing() {
        let dtb = build_dtb_without_chosen();
        let (buf, total) = patch(&dtb, "init=/bin/sh");
        assert_bootargs(&buf[..total], "init=/bin/sh");
        let fdt = Fdt::parse(&buf[..total]).unwrap();
        // Pre-existing structure is intact.
        assert!(fdt.find_node("/memory@0").is_some());
        assert_eq!(
            fdt.root().unwrap().property("model").unwrap().as_str(),
            Some("test-board")
        );
    }

    #[test]
    fn reuses_existing_bootargs_name_entry() {
        let dtb = build_dtb_with_chosen();
        let before = Fdt::parse(&dtb).unwrap();
        let strings_before = before.strings_block.len();
        drop(before);

        let (buf, total) = patch(&dtb, "much-longer-command-line-than-before");
        let after = Fdt::parse(&buf[..total]).unwrap();
        assert_eq!(after.strings_block.len(), strings_before);
    }

    #[test]
    fn no_space_is_reported() {
        let dtb = build_dtb_with_chosen();
        let mut buf = dtb.clone(); // zero slack
        let long = "x".repeat(128);
        assert_eq!(set_bootargs(&mut buf, &long), Err(FdtError::NoSpace));
    }

    #[test]
    fn rejects_bad_magic() {
        let mut dtb = build_dtb_with_chosen();
        dtb[0] ^= 0xFF;
        assert_eq!(set_bootargs(&mut dtb, "x"), Err(FdtError::InvalidMagic));
    }
}
