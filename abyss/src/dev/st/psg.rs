//! YM2149 programmable sound generator.
//!
//! Besides sound, the PSG's I/O port A drives the floppy drive select and side
//! select lines. Port A is reached by writing its register number to the
//! select port and then reading or writing the data port; the two bus cycles
//! are not atomic, so every access runs with interrupts masked.
use crate::dev::Machine;
use crate::interrupt::{Ipl, IplGuard};
use num_enum::{IntoPrimitive, TryFromPrimitive};

crate::registers! {
    /// Register select.
    SELECT @ 0xff_8800 => W, u8;
    /// Read the selected register.
    DATA_READ @ 0xff_8800 => R, u8;
    /// Write the selected register.
    DATA_WRITE @ 0xff_8802 => W, u8;
}

/// Register number of I/O port A.
pub const PORT_A: u8 = 14;

bitflags::bitflags! {
    /// I/O port A. The drive select bits are active low.
    pub struct PortA: u8 {
        /// Side select: set selects side 0, clear selects side 1.
        const SIDE_0 = 1 << 0;
        /// Drive A deselected.
        const DRIVE_A_OFF = 1 << 1;
        /// Drive B deselected.
        const DRIVE_B_OFF = 1 << 2;
        /// Printer select in.
        const PRINTER_SELECT = 1 << 3;
        /// DSP reset.
        const DSP_RESET = 1 << 4;
        /// Centronics strobe.
        const STROBE = 1 << 5;
        /// Internal speaker off.
        const SPEAKER_OFF = 1 << 6;
        /// IDE reset.
        const IDE_RESET = 1 << 7;
    }
}

impl PortA {
    /// Bits owned by floppy selection.
    pub const FLOPPY: PortA = PortA::from_bits_truncate(0x07);
}

/// Floppy drive.
#[repr(u16)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
pub enum Drive {
    A = 0,
    B = 1,
}

/// Disk side.
#[repr(u16)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
pub enum Side {
    Zero = 0,
    One = 1,
}

/// Read port A.
pub fn port_a<M: Machine + ?Sized>(m: &M) -> PortA {
    let _guard = IplGuard::new(m, Ipl::L7);
    SELECT.write(m, PORT_A);
    PortA::from_bits_truncate(DATA_READ.read(m))
}

/// Select `drive` and `side`, deselecting the other drive.
///
/// Only the three floppy bits change; the rest of port A is kept as read.
pub fn select<M: Machine + ?Sized>(m: &M, drive: Drive, side: Side) {
    let _guard = IplGuard::new(m, Ipl::L7);
    SELECT.write(m, PORT_A);
    let mut state = PortA::from_bits_truncate(DATA_READ.read(m)) - PortA::FLOPPY;
    state |= match drive {
        Drive::A => PortA::DRIVE_B_OFF,
        Drive::B => PortA::DRIVE_A_OFF,
    };
    if side == Side::Zero {
        state |= PortA::SIDE_0;
    }
    DATA_WRITE.write(m, state.bits());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dev::st::sim::SimSt;

    #[test]
    fn select_touches_floppy_bits_only() {
        let st = SimSt::new();
        st.set_port_a(PortA::SPEAKER_OFF | PortA::DRIVE_A_OFF | PortA::DRIVE_B_OFF);

        select(&st, Drive::A, Side::Zero);
        assert_eq!(
            port_a(&st),
            PortA::SPEAKER_OFF | PortA::DRIVE_B_OFF | PortA::SIDE_0
        );

        select(&st, Drive::B, Side::One);
        assert_eq!(port_a(&st), PortA::SPEAKER_OFF | PortA::DRIVE_A_OFF);
        assert_eq!(st.unguarded_accesses(), 0);
    }

    #[test]
    fn select_restores_ipl() {
        let st = SimSt::new();
        crate::interrupt::set(&st, Ipl::L3);
        select(&st, Drive::A, Side::One);
        assert_eq!(crate::interrupt::StatusRegister::ipl(&st), Ipl::L3);
    }
}
