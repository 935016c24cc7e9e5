//! Interrupt priority level.
//!
//! The 68000 has no interrupt enable flag. Instead, the three IPL bits of the
//! status register hold a mask level, and only interrupts whose priority is
//! above it are taken. Level 7 is the non-maskable ceiling: raising the mask
//! to 7 blocks every maskable interrupt source.
use crate::m68k::Sr;
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Interrupt priority mask level.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, TryFromPrimitive, IntoPrimitive)]
pub enum Ipl {
    /// Every interrupt is accepted.
    L0 = 0,
    L1 = 1,
    /// HBL autovector is masked.
    L2 = 2,
    L3 = 3,
    /// VBL autovector is masked.
    L4 = 4,
    L5 = 5,
    /// MFP (timer, keyboard, floppy) is masked.
    L6 = 6,
    /// All maskable interrupts are masked.
    L7 = 7,
}

impl Ipl {
    /// Extract the mask level from a status register value.
    #[inline]
    pub fn of(sr: Sr) -> Self {
        match Ipl::try_from(((sr & Sr::IPL_MASK).bits() >> Sr::IPL_SHIFT) as u8) {
            Ok(ipl) => ipl,
            // Three bits can't exceed seven.
            Err(_) => Ipl::L7,
        }
    }

    /// Replace the mask level in `sr`, keeping every other bit.
    #[inline]
    pub fn apply(self, sr: Sr) -> Sr {
        (sr - Sr::IPL_MASK) | Sr::from_bits_truncate((self as u16) << Sr::IPL_SHIFT)
    }
}

/// Access to the processor status register.
///
/// Writing the system byte is a privileged operation; implementors are only
/// ever called in supervisor mode.
pub trait StatusRegister {
    /// Read the status register.
    fn read_sr(&self) -> Sr;
    /// Write the status register.
    fn write_sr(&self, sr: Sr);

    /// Current interrupt mask level.
    #[inline]
    fn ipl(&self) -> Ipl {
        Ipl::of(self.read_sr())
    }
}

/// Set the interrupt mask to `level` and return the level in effect
/// beforehand.
///
/// Unlike [`raise`], this may lower the mask. Callers use it to restore a
/// level previously returned by [`raise`] or [`set`], never a hardcoded one.
pub fn set<S: StatusRegister + ?Sized>(cpu: &S, level: Ipl) -> Ipl {
    let sr = cpu.read_sr();
    let prev = Ipl::of(sr);
    if prev != level {
        cpu.write_sr(level.apply(sr));
    }
    prev
}

/// Raise the interrupt mask to at least `level` and return the level in
/// effect beforehand.
///
/// The mask is never lowered: raising to 6 while already at 7 keeps 7, so
/// code guarded at a lower level stays correct when an ISR running at a
/// higher level calls it.
pub fn raise<S: StatusRegister + ?Sized>(cpu: &S, level: Ipl) -> Ipl {
    let sr = cpu.read_sr();
    let prev = Ipl::of(sr);
    if level > prev {
        cpu.write_sr(level.apply(sr));
    }
    prev
}

/// An RAII implementation of an interrupt mask. When this structure is
/// dropped (falls out of scope), the mask level is restored to the one in
/// effect on creation of this struct. Therefore, guards must be dropped in
/// reverse of creation order.
///
/// This structure is created by the [`new`].
///
/// [`new`]: IplGuard::new
pub struct IplGuard<'a, S: StatusRegister + ?Sized> {
    cpu: &'a S,
    prev: Ipl,
}

impl<'a, S: StatusRegister + ?Sized> IplGuard<'a, S> {
    /// Raise the mask to `level` until the guard is dropped.
    pub fn new(cpu: &'a S, level: Ipl) -> Self {
        let prev = raise(cpu, level);
        Self { cpu, prev }
    }

    /// Level that will be restored on drop.
    pub fn previous(&self) -> Ipl {
        self.prev
    }
}

impl<S: StatusRegister + ?Sized> Drop for IplGuard<'_, S> {
    fn drop(&mut self) {
        set(self.cpu, self.prev);
    }
}
