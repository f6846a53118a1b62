//! System-description patching: DSDT override and DTB command line.
//!
//! A module recognised as a DSDT/GUDT/DTB blob replaces the firmware's
//! DSDT: on the ACPI path the FADT's `dsdt`/`x_dsdt` pointers are
//! rewritten and its checksum restored; on the device-tree path the
//! blob (or the firmware's own DTB) gets the configured command line as
//! `/chosen/bootargs` and is handed to the kernel.

use simpleboot_acpi::{AcpiHandler, AcpiTables, patch};

use crate::fw::SystemTables;

/// Identity-mapped physical memory access for the ACPI walker.
pub struct IdentityHandler;

// SAFETY: the loader runs identity mapped; firmware tables stay put.
unsafe impl AcpiHandler for IdentityHandler {
    unsafe fn map_physical_region(&self, phys: u64, size: usize) -> &'static [u8] {
        // SAFETY: see the impl comment.
        unsafe { core::slice::from_raw_parts(phys as *const u8, size) }
    }
}

/// `true` if the blob is a flattened device tree.
fn is_dtb(blob: u64) -> bool {
    // SAFETY: at least the magic bytes of the blob are readable.
    unsafe { (blob as *const [u8; 4]).read() == [0xD0, 0x0D, 0xFE, 0xED] }
}

/// Applies a replacement table from the module list.
///
/// Returns the DTB address the handover should pass on, when the blob
/// turned out to be one; ACPI-path failures are logged and non-fatal
/// (the kernel still boots on the firmware tables).
pub fn apply_override(
    tables: &SystemTables,
    replacement: Option<(u64, u64)>,
    cmdline: Option<&str>,
) -> Option<u64> {
    let (blob, capacity) = replacement?;

    let dtb = is_dtb(blob).then(|| patch_dtb_in_place(blob, capacity, cmdline));

    // Whatever the blob's flavour, the ACPI chain (when there is one)
    // gets pointed at it; the kernel then finds it as its DSDT.
    if let Some(rsdp) = tables.rsdp {
        match AcpiTables::new(rsdp, IdentityHandler).and_then(|acpi| acpi.fadt_range()) {
            Ok((fadt_phys, fadt_len)) => {
                // SAFETY: the FADT range came from a checksum-validated
                // walk and firmware tables are writable under the
                // identity map.
                let fadt =
                    unsafe { core::slice::from_raw_parts_mut(fadt_phys as *mut u8, fadt_len) };
                match patch::patch_dsdt(fadt, blob) {
                    Ok(()) => log::info!("FADT patched, DSDT replaced"),
                    Err(err) => log::warn!("DSDT override failed: {err:?}"),
                }
            }
            Err(err) => log::warn!("DSDT override failed: {err:?}"),
        }
    } else if dtb.is_none() {
        log::warn!("DSDT override without ACPI tables");
    }
    dtb
}

/// Writes `cmdline` into a DTB that already has patch slack.
fn patch_dtb_in_place(blob: u64, capacity: u64, cmdline: Option<&str>) -> u64 {
    if let Some(cmdline) = cmdline {
        // SAFETY: the module loader page-rounded the buffer; `capacity`
        // is its full size.
        let buf = unsafe { core::slice::from_raw_parts_mut(blob as *mut u8, capacity as usize) };
        if let Err(err) = simpleboot_fdt::patch::set_bootargs(buf, cmdline) {
            log::warn!("DTB bootargs patch failed: {err:?}");
        }
    }
    blob
}

/// Copies the firmware's DTB into the arena with slack and patches the
/// command line in. Used when no replacement blob was configured.
#[cfg(target_arch = "aarch64")]
pub fn prepare_firmware_dtb(dtb: u64, cmdline: Option<&str>) -> Option<u64> {
    use simpleboot_binparse::FromBytes;

    // SAFETY: header of the firmware-provided blob.
    let header = unsafe { core::slice::from_raw_parts(dtb as *const u8, 8) };
    let total = u32::read_at(header, 4).map(u32::from_be)?;

    let capacity = (u64::from(total) + 4096) & !0xFFF;
    let copy = crate::mem::bump_alloc(capacity).ok()?;
    // SAFETY: source blob is `total` bytes; destination was just
    // reserved with extra slack.
    unsafe {
        core::ptr::copy_nonoverlapping(dtb as *const u8, copy as *mut u8, total as usize);
    }
    Some(patch_dtb_in_place(copy, capacity, cmdline))
}
