//! MC68901 multi-function peripheral.
//!
//! The MFP multiplexes sixteen interrupt channels onto 68000 level 6. The
//! kernel runs it with vector base 0x40 in software end-of-interrupt mode: a
//! channel stays in service, blocking channels of lower priority, until its
//! handler clears the in-service bit.
use crate::dev::Machine;
use crate::m68k::vector;

crate::registers! {
    /// General purpose I/O lines.
    GPIP @ 0xff_fa01 => R, u8;
    /// Interrupt enable A.
    IERA @ 0xff_fa07 => RW, u8;
    /// Interrupt enable B.
    IERB @ 0xff_fa09 => RW, u8;
    /// Interrupt pending A.
    IPRA @ 0xff_fa0b => RW, u8;
    /// Interrupt pending B.
    IPRB @ 0xff_fa0d => RW, u8;
    /// Interrupt in service A.
    ISRA @ 0xff_fa0f => RW, u8;
    /// Interrupt in service B.
    ISRB @ 0xff_fa11 => RW, u8;
    /// Interrupt mask A.
    IMRA @ 0xff_fa13 => RW, u8;
    /// Interrupt mask B.
    IMRB @ 0xff_fa15 => RW, u8;
    /// Vector register.
    VR @ 0xff_fa17 => RW, u8;
    /// Timer A control.
    TACR @ 0xff_fa19 => RW, u8;
    /// Timer A data.
    TADR @ 0xff_fa1f => RW, u8;
}

/// Vector base 0x40 with software end-of-interrupt.
pub const VR_SOFTWARE_EOI: u8 = 0x48;
/// Timer A in delay mode with the /200 prescaler.
pub const TACR_DELAY_200: u8 = 0x07;
/// Timer A counts down from 256: 2.4576 MHz / 200 / 256 = 48 ticks a second.
pub const TADR_TICK: u8 = 0x00;

/// Interrupt channels the kernel uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Channel {
    /// Timer A, the preemption tick.
    TimerA,
    /// Keyboard/MIDI ACIA on GPIP 4.
    Ikbd,
    /// FDC/HDC INTRQ on GPIP 5.
    Fdc,
}

/// Register bank of a channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Bank {
    A,
    B,
}

impl Channel {
    /// Bank and bit of the channel in the IER/IPR/ISR/IMR registers.
    pub const fn bit(self) -> (Bank, u8) {
        match self {
            Channel::TimerA => (Bank::A, 0x20),
            Channel::Ikbd => (Bank::B, 0x40),
            Channel::Fdc => (Bank::B, 0x80),
        }
    }

    /// Exception vector the channel is delivered on.
    pub const fn vector(self) -> u8 {
        match self {
            Channel::TimerA => vector::TIMER_A,
            Channel::Ikbd => vector::IKBD,
            Channel::Fdc => vector::FDC,
        }
    }
}

/// Program the vector register and the preemption timer.
pub fn init<M: Machine + ?Sized>(m: &M) {
    VR.write(m, VR_SOFTWARE_EOI);
    TACR.write(m, TACR_DELAY_200);
    TADR.write(m, TADR_TICK);
}

/// Enable and unmask `ch`.
pub fn enable<M: Machine + ?Sized>(m: &M, ch: Channel) {
    match ch.bit() {
        (Bank::A, bit) => {
            IERA.write(m, IERA.read(m) | bit);
            IMRA.write(m, IMRA.read(m) | bit);
        }
        (Bank::B, bit) => {
            IERB.write(m, IERB.read(m) | bit);
            IMRB.write(m, IMRB.read(m) | bit);
        }
    }
}

/// End of interrupt: clear the in-service bit of `ch`.
pub fn acknowledge<M: Machine + ?Sized>(m: &M, ch: Channel) {
    match ch.bit() {
        (Bank::A, bit) => ISRA.write(m, ISRA.read(m) & !bit),
        (Bank::B, bit) => ISRB.write(m, ISRB.read(m) & !bit),
    }
}

/// True if `ch` is in service.
pub fn in_service<M: Machine + ?Sized>(m: &M, ch: Channel) -> bool {
    match ch.bit() {
        (Bank::A, bit) => ISRA.read(m) & bit != 0,
        (Bank::B, bit) => ISRB.read(m) & bit != 0,
    }
}
