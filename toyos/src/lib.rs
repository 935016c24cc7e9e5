//! TOY OS: a small preemptive kernel for the Atari ST.
//!
//! The kernel runs up to [`config::MAX_PROCESSES`] user processes, switches
//! between them round-robin on the MFP timer A tick, and gives them a console,
//! line-buffered keyboard input and single-sector floppy I/O through `TRAP`
//! system calls.
//!
//! All kernel state lives in one [`kernel::Kernel`] object constructed at
//! boot. It is generic over the [`abyss::dev::Machine`] it drives, so every
//! path below the assembly glue also runs against the simulated ST.

#![cfg_attr(not(test), no_std)]
#![deny(missing_docs)]
#![cfg_attr(target_arch = "m68k", feature(asm_experimental_arch))]

#[macro_use(debug, info, warning)]
extern crate abyss;

pub mod config;
pub mod console;
pub mod disk;
pub mod interrupt;
pub mod kernel;
pub mod panicking;
pub mod process;
pub mod syscall;

#[cfg(target_arch = "m68k")]
pub mod boot;

pub use abyss::{debug, info, print, println, spin_lock, warning};
