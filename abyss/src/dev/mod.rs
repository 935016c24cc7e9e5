//! Devices.

#[macro_use]
pub mod mmio;
pub mod st;

use crate::interrupt::StatusRegister;
use mmio::Bus;

/// A machine: its bus and the processor status register.
///
/// Everything that drives hardware takes a `&M where M: Machine`, so the
/// drivers run unchanged against the simulated `st::sim::SimSt` in tests.
pub trait Machine: Bus + StatusRegister {}

impl<T: Bus + StatusRegister + ?Sized> Machine for T {}
