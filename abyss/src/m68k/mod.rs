//! Motorola 68000 specific

pub mod context;
#[cfg(target_arch = "m68k")]
pub mod intrinsics;

bitflags::bitflags! {
    /// The 68000 status register.
    ///
    /// The low byte is the condition code register that user code may touch;
    /// the high byte (system byte) is only writable in supervisor mode.
    #[repr(transparent)]
    pub struct Sr: u16 {
        /// Carry
        const C = 1 << 0;
        /// Overflow
        const V = 1 << 1;
        /// Zero
        const Z = 1 << 2;
        /// Negative
        const N = 1 << 3;
        /// Extend
        const X = 1 << 4;
        /// Interrupt priority mask - bit 0
        const I0 = 1 << 8;
        /// Interrupt priority mask - bit 1
        const I1 = 1 << 9;
        /// Interrupt priority mask - bit 2
        const I2 = 1 << 10;
        /// Supervisor state.
        ///
        /// Set while the processor runs kernel code; a trap or interrupt
        /// always sets it, and the saved copy tells whether the interrupted
        /// code was a user process or the kernel itself.
        const S = 1 << 13;
        /// Trace mode.
        const T = 1 << 15;
    }
}

impl Sr {
    /// Mask of the three interrupt priority level bits.
    pub const IPL_MASK: Sr = Sr::from_bits_truncate(0x0700);
    /// Shift of the interrupt priority level field.
    pub const IPL_SHIFT: u16 = 8;

    /// True if the register was saved while the processor was in supervisor
    /// mode.
    #[inline]
    pub fn is_supervisor(&self) -> bool {
        self.contains(Sr::S)
    }
}

/// Exception vector numbers of the 68000 as wired on the Atari ST.
///
/// Vectors 64 and up are delivered by the MFP 68901, whose vector base is
/// programmed to 0x40.
#[allow(dead_code)]
pub mod vector {
    /// Bus error.
    pub const BUS_ERROR: u8 = 2;
    /// Address error.
    pub const ADDRESS_ERROR: u8 = 3;
    /// Illegal instruction.
    pub const ILLEGAL_INSTRUCTION: u8 = 4;
    /// Zero divide.
    pub const ZERO_DIVIDE: u8 = 5;
    /// CHK instruction.
    pub const CHK: u8 = 6;
    /// TRAPV instruction.
    pub const TRAPV: u8 = 7;
    /// Privilege violation.
    pub const PRIVILEGE_VIOLATION: u8 = 8;
    /// Trace.
    pub const TRACE: u8 = 9;
    /// Line 1010 emulator.
    pub const LINE_A: u8 = 10;
    /// Line 1111 emulator.
    pub const LINE_F: u8 = 11;
    /// Spurious interrupt.
    pub const SPURIOUS: u8 = 24;
    /// Level 2 autovector: horizontal blank.
    pub const HBL: u8 = 26;
    /// Level 4 autovector: vertical blank.
    pub const VBL: u8 = 28;
    /// `TRAP #0`; `TRAP #n` is `TRAP_BASE + n`.
    pub const TRAP_BASE: u8 = 32;
    /// First MFP vector.
    pub const MFP_BASE: u8 = 64;
    /// MFP channel 6: keyboard/MIDI ACIA.
    pub const IKBD: u8 = MFP_BASE + 6;
    /// MFP channel 7: floppy/hard disk controller (GPIP 5).
    pub const FDC: u8 = MFP_BASE + 7;
    /// MFP channel 13: timer A.
    pub const TIMER_A: u8 = MFP_BASE + 13;
    /// Number of vectors the kernel installs.
    pub const COUNT: usize = 80;
}
