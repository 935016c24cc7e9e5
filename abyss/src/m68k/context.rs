//! Saved CPU context of a user process.
//!
//! ## WARNING
//! The field order of [`CpuContext`] is load-bearing: the trap entry glue
//! writes it and [`resume`] reads it by byte offset. Any change to the layout
//! must bump [`CONTEXT_LAYOUT_VERSION`] together with both routines.

use super::Sr;

/// Version of the [`CpuContext`] layout below.
pub const CONTEXT_LAYOUT_VERSION: u16 = 1;

/// Byte offset of the program counter.
pub const PC_OFFSET: usize = 0;
/// Byte offset of the status register.
pub const SR_OFFSET: usize = 4;
/// Byte offset of the user stack pointer.
pub const USP_OFFSET: usize = 6;
/// Byte offset of d0-d7 followed by a1-a6, in `movem` order.
pub const REGS_OFFSET: usize = 10;
/// Byte offset of a0, kept apart because the restore routine uses it as the
/// base register until the very last move.
pub const A0_OFFSET: usize = 66;

/// Number of registers stored in the `movem` block.
pub const MOVEM_REGS: usize = 14;

/// Register state of a suspended process (70 bytes).
#[repr(C, packed(2))]
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuContext {
    pc: u32,
    sr: u16,
    usp: u32,
    d0_to_d7_a1_to_a6: [u32; MOVEM_REGS],
    a0: u32,
}

const _: () = assert!(core::mem::size_of::<CpuContext>() == 70);
const _: () = assert!(core::mem::size_of::<CpuContext>() == A0_OFFSET + 4);

impl CpuContext {
    /// Create the context a new process starts from.
    pub fn new_user(entry: u32, usp: u32, sr: Sr) -> Self {
        Self {
            pc: entry,
            sr: sr.bits(),
            usp,
            ..Default::default()
        }
    }

    #[inline]
    pub fn pc(&self) -> u32 {
        self.pc
    }

    #[inline]
    pub fn set_pc(&mut self, pc: u32) {
        self.pc = pc;
    }

    #[inline]
    pub fn sr(&self) -> Sr {
        Sr::from_bits_truncate(self.sr)
    }

    #[inline]
    pub fn set_sr(&mut self, sr: Sr) {
        self.sr = sr.bits();
    }

    #[inline]
    pub fn usp(&self) -> u32 {
        self.usp
    }

    #[inline]
    pub fn set_usp(&mut self, usp: u32) {
        self.usp = usp;
    }

    /// Read data register `dn`.
    ///
    /// # Panics
    /// Panics if `n > 7`.
    pub fn d(&self, n: usize) -> u32 {
        assert!(n < 8);
        let regs = self.d0_to_d7_a1_to_a6;
        regs[n]
    }

    /// Write data register `dn`.
    ///
    /// # Panics
    /// Panics if `n > 7`.
    pub fn set_d(&mut self, n: usize, v: u32) {
        assert!(n < 8);
        let mut regs = self.d0_to_d7_a1_to_a6;
        regs[n] = v;
        self.d0_to_d7_a1_to_a6 = regs;
    }

    /// Read address register `an`. `a7` is the user stack pointer.
    ///
    /// # Panics
    /// Panics if `n > 7`.
    pub fn a(&self, n: usize) -> u32 {
        match n {
            0 => self.a0,
            1..=6 => {
                let regs = self.d0_to_d7_a1_to_a6;
                regs[7 + n]
            }
            7 => self.usp,
            _ => panic!("no address register a{}", n),
        }
    }

    /// Write address register `an`. `a7` is the user stack pointer.
    ///
    /// # Panics
    /// Panics if `n > 7`.
    pub fn set_a(&mut self, n: usize, v: u32) {
        match n {
            0 => self.a0 = v,
            1..=6 => {
                let mut regs = self.d0_to_d7_a1_to_a6;
                regs[7 + n] = v;
                self.d0_to_d7_a1_to_a6 = regs;
            }
            7 => self.usp = v,
            _ => panic!("no address register a{}", n),
        }
    }

    /// Move the program counter back over the `TRAP #n` instruction that
    /// entered the kernel, so that resuming the context executes the system
    /// call again from its beginning.
    #[inline]
    pub fn rewind_trap(&mut self) {
        self.pc = self.pc.wrapping_sub(2);
    }
}

impl core::fmt::Debug for CpuContext {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> Result<(), core::fmt::Error> {
        let r = self.d0_to_d7_a1_to_a6;
        writeln!(
            f,
            "D0: {:08x} | D1: {:08x} | D2: {:08x} | D3: {:08x}\n\
             D4: {:08x} | D5: {:08x} | D6: {:08x} | D7: {:08x}\n\
             A0: {:08x} | A1: {:08x} | A2: {:08x} | A3: {:08x}\n\
             A4: {:08x} | A5: {:08x} | A6: {:08x} | USP: {:08x}\n\
             PC: {:08x} | SR: {:04x} [{:?}]",
            r[0],
            r[1],
            r[2],
            r[3],
            r[4],
            r[5],
            r[6],
            r[7],
            { self.a0 },
            r[8],
            r[9],
            r[10],
            r[11],
            r[12],
            r[13],
            { self.usp },
            { self.pc },
            { self.sr },
            self.sr(),
        )
    }
}

/// Restore `ctx` and return to user mode.
///
/// This is the only routine allowed to depend on the byte layout of
/// [`CpuContext`]. It must be entered in supervisor mode with the interrupt
/// priority level at 7; `rte` installs the saved status register, which
/// lowers the mask atomically with the jump.
///
/// # Safety
/// `ctx` must describe a valid user program state.
#[cfg(target_arch = "m68k")]
pub unsafe fn resume(ctx: &CpuContext) -> ! {
    core::arch::asm!(
        "move.l 6(%a0), %a1",
        "move.l %a1, %usp",
        "move.l 0(%a0), -(%sp)",
        "move.w 4(%a0), -(%sp)",
        "movem.l 10(%a0), %d0-%d7/%a1-%a6",
        "move.l 66(%a0), %a0",
        "rte",
        in("a0") ctx as *const CpuContext,
        options(noreturn)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_offsets() {
        let mut ctx = CpuContext::new_user(0x1234, 0x3f_8000, Sr::I1);
        ctx.set_d(0, 0xd0d0_d0d0);
        ctx.set_a(6, 0xa6a6_a6a6);
        ctx.set_a(0, 0xa0a0_a0a0);
        let bytes: [u8; 70] = unsafe { core::mem::transmute(ctx) };
        let word = |ofs: usize| u32::from_ne_bytes(bytes[ofs..ofs + 4].try_into().unwrap());
        assert_eq!(word(PC_OFFSET), 0x1234);
        assert_eq!(word(USP_OFFSET), 0x3f_8000);
        assert_eq!(word(REGS_OFFSET), 0xd0d0_d0d0);
        assert_eq!(word(REGS_OFFSET + 13 * 4), 0xa6a6_a6a6);
        assert_eq!(word(A0_OFFSET), 0xa0a0_a0a0);
        assert_eq!(
            u16::from_ne_bytes(bytes[SR_OFFSET..SR_OFFSET + 2].try_into().unwrap()),
            0x0200
        );
    }

    #[test]
    fn rewind_trap_reexecutes_instruction() {
        let mut ctx = CpuContext::new_user(0x1000, 0, Sr::empty());
        ctx.set_pc(0x1006);
        ctx.rewind_trap();
        assert_eq!(ctx.pc(), 0x1004);
        assert_eq!(ctx.a(7), ctx.usp());
    }

    #[test]
    fn debug_dump_names_every_register() {
        let mut ctx = CpuContext::new_user(0x1234, 0x3f_8000, Sr::I1);
        ctx.set_a(0, 0xa0a0_a0a0);
        ctx.set_d(7, 0xd7d7_d7d7);
        let dump = format!("{:?}", ctx);
        assert!(dump.contains("A0: a0a0a0a0"));
        assert!(dump.contains("D7: d7d7d7d7"));
        assert!(dump.contains("USP: 003f8000"));
        assert!(dump.contains("PC: 00001234"));
    }
}
