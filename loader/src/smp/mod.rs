//! SMP engine: application-processor startup.

#[cfg(target_arch = "aarch64")]
pub mod aarch64;
#[cfg(target_arch = "x86_64")]
pub mod x86_64;

/// Core counts for the SMP tag and the handover.
#[derive(Debug, Clone, Copy)]
pub struct SmpInfo {
    /// Enabled processors according to the firmware tables.
    pub numcores: u32,
    /// Processors actually running (BSP + responding APs).
    pub running: u32,
    /// The bootstrap processor's ID.
    pub bspid: u32,
}

impl SmpInfo {
    /// The single-core fallback.
    #[must_use]
    pub fn bsp_only(bspid: u32) -> Self {
        Self {
            numcores: 1,
            running: 1,
            bspid,
        }
    }
}
