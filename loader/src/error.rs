//! The loader-wide error type.
//!
//! Every fatal condition funnels into [`BootError`]; the controller in
//! `main.rs` decides whether it restarts the sequence in backup mode or
//! parks the machine. Leaf-crate errors convert with `?` through the
//! `From` impls below.

use core::fmt;

/// Why a boot attempt failed (or was interrupted).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootError {
    /// No ESP found, or its BPB is not FAT32.
    NoValidFilesystem,
    /// A requested file does not exist (fatal for the kernel, a warning
    /// for the config).
    FileNotFound,
    /// A sector read failed.
    IoError,
    /// Unknown kernel magic or an unsupported protocol revision.
    UnsupportedKernel,
    /// A kernel segment overlaps reserved memory or another segment.
    MemoryInUse,
    /// A page or buffer allocation failed.
    OutOfMemory,
    /// A module failed to decompress.
    CorruptModule,
    /// A key was pressed; restart with the backup configuration.
    UserCancel,
}

impl fmt::Display for BootError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            Self::NoValidFilesystem => "no valid filesystem",
            Self::FileNotFound => "file not found",
            Self::IoError => "device I/O error",
            Self::UnsupportedKernel => "unsupported kernel format",
            Self::MemoryInUse => "memory already in use",
            Self::OutOfMemory => "out of memory",
            Self::CorruptModule => "unable to decompress module",
            Self::UserCancel => "aborted by keypress",
        };
        f.write_str(message)
    }
}

impl From<simpleboot_fat::FatError> for BootError {
    fn from(err: simpleboot_fat::FatError) -> Self {
        use simpleboot_fat::FatError;
        match err {
            FatError::Io => Self::IoError,
            FatError::NoValidFilesystem | FatError::Corrupt => Self::NoValidFilesystem,
            FatError::NotFound => Self::FileNotFound,
            FatError::Cancelled => Self::UserCancel,
        }
    }
}

impl From<simpleboot_elf::ElfError> for BootError {
    fn from(_: simpleboot_elf::ElfError) -> Self {
        Self::UnsupportedKernel
    }
}

impl From<simpleboot_pe::PeError> for BootError {
    fn from(_: simpleboot_pe::PeError) -> Self {
        Self::UnsupportedKernel
    }
}

impl From<simpleboot_linuxboot::LinuxError> for BootError {
    fn from(_: simpleboot_linuxboot::LinuxError) -> Self {
        Self::UnsupportedKernel
    }
}

impl From<simpleboot_paging::MapError> for BootError {
    fn from(err: simpleboot_paging::MapError) -> Self {
        use simpleboot_paging::MapError;
        match err {
            MapError::NonCanonical => Self::UnsupportedKernel,
            MapError::AlreadyMapped => Self::MemoryInUse,
            MapError::OutOfMemory => Self::OutOfMemory,
        }
    }
}

impl From<simpleboot_multiboot2::MbiError> for BootError {
    fn from(_: simpleboot_multiboot2::MbiError) -> Self {
        Self::OutOfMemory
    }
}

impl From<simpleboot_inflate::InflateError> for BootError {
    fn from(_: simpleboot_inflate::InflateError) -> Self {
        Self::CorruptModule
    }
}
