//! Raw UEFI bindings for the Simpleboot firmware layer.
//!
//! A deliberately small slice of the UEFI specification: the system and
//! boot-services tables, the memory map, and the protocols the loader
//! touches (GOP, Block I/O, text input/output, Loaded Image, EDID). Raw
//! `#[repr(C)]` layouts follow the specification exactly; the handful of
//! safe wrappers live on the owning types.
//!
//! # Calling Convention
//!
//! All function pointers use `extern "efiapi"`, which maps to the MS x64
//! convention on x86-64 and AAPCS on ARM.
//!
//! # `bool` in FFI
//!
//! UEFI's `BOOLEAN` is a `UINT8` restricted to 0 and 1 by compliant
//! firmware, matching Rust's `bool` validity invariant, so `bool` is used
//! directly in signatures.

#![no_std]
#![warn(missing_docs)]

pub mod guid;
pub mod memory;
pub mod protocol;
pub mod status;
pub mod table;

use core::ffi::c_void;

pub use guid::EfiGuid;
pub use status::EfiStatus;

/// An opaque handle to a UEFI object (protocol, image, device, ...).
pub type EfiHandle = *mut c_void;

/// An opaque handle to a UEFI event.
pub type EfiEvent = *mut c_void;

/// A physical memory address.
pub type EfiPhysicalAddress = u64;

/// A virtual memory address.
pub type EfiVirtualAddress = u64;

/// A task priority level.
pub type EfiTpl = usize;
