//! The abyss of kernel that operates hardwares.
//!
//! This crate contains the hardware communications of the Atari ST class
//! machine the kernel runs on: the 68000 status register and interrupt
//! priority level, the saved CPU context record, and the drivers for the
//! chips wired to the floppy path (YM2149 PSG, DMA controller, WD1772 floppy
//! controller) and the MFP 68901 timer.
//!
//! Every device is reached through the [`dev::mmio::Bus`] trait, so the same
//! driver code runs against the real bus on the target and against the
//! simulated machine in `dev::st::sim` on the host.

#![cfg_attr(not(any(test, feature = "sim")), no_std)]
#![cfg_attr(target_arch = "m68k", feature(asm_experimental_arch))]

#[macro_use]
pub mod kprint;
pub mod dev;
pub mod interrupt;
pub mod m68k;

pub use spin_lock;
