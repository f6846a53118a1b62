//! Core types shared by every Simpleboot crate.
//!
//! This crate contains the host-testable foundations: physical/virtual
//! address newtypes with alignment arithmetic, and the named constants of
//! the fixed low-memory handover contract that kernels may rely on.

#![no_std]
#![warn(missing_docs)]

pub mod addr;
pub mod handover;

pub use addr::{PhysAddr, VirtAddr, align_down, align_up};
