//! Memory mapped register interface.
//!
//! Every device register of the ST lives in the 24-bit physical address space
//! and is reached with byte or word bus cycles. Drivers never dereference raw
//! pointers; they go through a [`Bus`], which is the real address space on the
//! target and the simulated machine on the host.
use core::marker::PhantomData;

/// A 68000 bus.
///
/// Only the low 24 bits of an address are decoded.
pub trait Bus {
    /// Read a byte.
    fn read_u8(&self, addr: u32) -> u8;
    /// Write a byte.
    fn write_u8(&self, addr: u32, v: u8);
    /// Read a word. `addr` must be even.
    fn read_u16(&self, addr: u32) -> u16;
    /// Write a word. `addr` must be even.
    fn write_u16(&self, addr: u32, v: u16);
}

/// Register width.
pub trait Word: Copy {
    /// Read a value of this width.
    fn read_from<B: Bus + ?Sized>(bus: &B, addr: u32) -> Self;
    /// Write a value of this width.
    fn write_to<B: Bus + ?Sized>(self, bus: &B, addr: u32);
}

impl Word for u8 {
    #[inline(always)]
    fn read_from<B: Bus + ?Sized>(bus: &B, addr: u32) -> Self {
        bus.read_u8(addr)
    }
    #[inline(always)]
    fn write_to<B: Bus + ?Sized>(self, bus: &B, addr: u32) {
        bus.write_u8(addr, self)
    }
}

impl Word for u16 {
    #[inline(always)]
    fn read_from<B: Bus + ?Sized>(bus: &B, addr: u32) -> Self {
        bus.read_u16(addr)
    }
    #[inline(always)]
    fn write_to<B: Bus + ?Sized>(self, bus: &B, addr: u32) {
        bus.write_u16(addr, self)
    }
}

/// Type for accessing a device register.
///
/// `R` and `W` encode whether the register may be read and written, so that
/// touching a write-only latch with a read does not compile.
#[repr(transparent)]
#[derive(Clone, Copy, Debug)]
pub struct Register<T: Word, const R: bool, const W: bool>(u32, PhantomData<T>);

impl<T: Word, const R: bool, const W: bool> Register<T, R, W> {
    /// Declare a register at `addr`.
    pub const fn new(addr: u32) -> Self {
        Self(addr, PhantomData)
    }

    /// Bus address of the register.
    #[inline]
    pub const fn addr(&self) -> u32 {
        self.0
    }
}

impl<T: Word, const W: bool> Register<T, true, W> {
    /// Read from the register.
    #[inline(always)]
    pub fn read<B: Bus + ?Sized>(&self, bus: &B) -> T {
        T::read_from(bus, self.0)
    }
}

impl<T: Word, const R: bool> Register<T, R, true> {
    /// Write to the register.
    #[inline(always)]
    pub fn write<B: Bus + ?Sized>(&self, bus: &B, v: T) {
        v.write_to(bus, self.0)
    }
}

/// The real address space.
#[derive(Debug)]
pub struct PhysicalBus(());

impl PhysicalBus {
    /// Create the bus.
    ///
    /// # Safety
    /// Only valid on the machine itself, in supervisor mode: the I/O area is
    /// not accessible to user mode.
    pub const unsafe fn new() -> Self {
        Self(())
    }
}

impl Bus for PhysicalBus {
    #[inline(always)]
    fn read_u8(&self, addr: u32) -> u8 {
        unsafe { core::ptr::read_volatile(addr as usize as *const u8) }
    }
    #[inline(always)]
    fn write_u8(&self, addr: u32, v: u8) {
        unsafe { core::ptr::write_volatile(addr as usize as *mut u8, v) }
    }
    #[inline(always)]
    fn read_u16(&self, addr: u32) -> u16 {
        unsafe { core::ptr::read_volatile(addr as usize as *const u16) }
    }
    #[inline(always)]
    fn write_u16(&self, addr: u32, v: u16) {
        unsafe { core::ptr::write_volatile(addr as usize as *mut u16, v) }
    }
}

/// Declare a group of registers.
///
/// ```ignore
/// registers! {
///     /// Status
///     STATUS @ 0xff8606 => R, u16;
///     MODE @ 0xff8606 => W, u16;
/// }
/// ```
#[macro_export]
macro_rules! registers {
    ($(#[$attr:meta])* $N:ident @ $addr:expr => R, $T:ty; $($t:tt)*) => {
        $(#[$attr])*
        pub const $N: $crate::dev::mmio::Register<$T, true, false> =
            $crate::dev::mmio::Register::new($addr);
        $crate::registers!($($t)*);
    };
    ($(#[$attr:meta])* $N:ident @ $addr:expr => W, $T:ty; $($t:tt)*) => {
        $(#[$attr])*
        pub const $N: $crate::dev::mmio::Register<$T, false, true> =
            $crate::dev::mmio::Register::new($addr);
        $crate::registers!($($t)*);
    };
    ($(#[$attr:meta])* $N:ident @ $addr:expr => RW, $T:ty; $($t:tt)*) => {
        $(#[$attr])*
        pub const $N: $crate::dev::mmio::Register<$T, true, true> =
            $crate::dev::mmio::Register::new($addr);
        $crate::registers!($($t)*);
    };
    () => ();
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::RefCell;

    #[derive(Default)]
    struct Log(RefCell<Vec<(u32, u16, bool)>>);

    impl Bus for Log {
        fn read_u8(&self, addr: u32) -> u8 {
            self.0.borrow_mut().push((addr, 0, false));
            0x5a
        }
        fn write_u8(&self, addr: u32, v: u8) {
            self.0.borrow_mut().push((addr, v as u16, true));
        }
        fn read_u16(&self, addr: u32) -> u16 {
            self.0.borrow_mut().push((addr, 0, false));
            0xa5a5
        }
        fn write_u16(&self, addr: u32, v: u16) {
            self.0.borrow_mut().push((addr, v, true));
        }
    }

    registers! {
        /// A byte latch.
        LATCH @ 0xff8609 => W, u8;
        SHARED @ 0xff8604 => RW, u16;
    }

    #[test]
    fn registers_hit_their_address() {
        let bus = Log::default();
        LATCH.write(&bus, 0x12);
        assert_eq!(SHARED.read(&bus), 0xa5a5);
        SHARED.write(&bus, 0x80);
        assert_eq!(
            *bus.0.borrow(),
            [(0xff8609, 0x12, true), (0xff8604, 0, false), (0xff8604, 0x80, true)]
        );
    }
}
