//! Privileged 68000 instructions.
use super::Sr;
use crate::interrupt::StatusRegister;
use core::arch::asm;

/// The processor itself.
#[derive(Debug)]
pub struct Cpu(());

impl Cpu {
    /// # Safety
    /// Must only be used in supervisor mode.
    pub const unsafe fn new() -> Self {
        Self(())
    }
}

impl StatusRegister for Cpu {
    #[inline(always)]
    fn read_sr(&self) -> Sr {
        let sr: u16;
        unsafe {
            asm!("move.w %sr, {0}", out(reg_data) sr, options(nomem, nostack));
        }
        Sr::from_bits_truncate(sr)
    }

    #[inline(always)]
    fn write_sr(&self, sr: Sr) {
        unsafe {
            asm!("move.w {0}, %sr", in(reg_data) sr.bits(), options(nomem, nostack));
        }
    }
}

/// Open the interrupt mask and halt until an interrupt arrives.
///
/// `stop` loads the status register from its immediate operand, so the mask
/// drops to 0 and the supervisor bit stays set.
#[inline(always)]
pub fn wait_for_interrupt() {
    unsafe {
        asm!("stop #0x2000", options(nomem, nostack));
    }
}

/// Restart the machine through the reset vector.
pub fn restart() -> ! {
    unsafe {
        asm!(
            "move.w #0x2700, %sr",
            "reset",
            "move.l 4.w, %a0",
            "jmp (%a0)",
            options(noreturn)
        )
    }
}
