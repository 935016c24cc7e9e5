//! Atari ST peripherals on the floppy path.
//!
//! ```text
//!  68000 ──┬── PSG (YM2149)   port A: drive select, side select
//!          ├── DMA controller ─── WD1772 FDC ─── drive A / drive B
//!          └── MFP (68901)    timer A, IKBD (GPIP4), FDC INTRQ (GPIP5)
//! ```
//!
//! The FDC is not mapped directly. Its registers are reached through the
//! DMA controller's access port, and which register answers depends on the
//! mode word last written to the DMA mode port. See [`dma`] and [`fdc`].

pub mod dma;
pub mod fdc;
pub mod mfp;
pub mod psg;
#[cfg(any(test, feature = "sim"))]
pub mod sim;

/// Size of a sector in bytes.
pub const SECTOR_SIZE: usize = 512;
/// Sectors per track of a double density disk.
pub const SECTORS_PER_TRACK: u8 = 9;
/// Tracks per side.
pub const TRACKS: u8 = 80;
/// Sides per disk.
pub const SIDES: u8 = 2;
/// Number of floppy drives the PSG can select.
pub const MAX_DRIVES: usize = 2;

/// End of the 24-bit physical address space.
pub const ADDRESS_LIMIT: u32 = 1 << 24;
/// Start of the memory mapped I/O area.
pub const IO_BASE: u32 = 0xff_8000;

/// The machine itself: the physical bus and the processor.
#[cfg(target_arch = "m68k")]
pub struct AtariSt {
    bus: crate::dev::mmio::PhysicalBus,
    cpu: crate::m68k::intrinsics::Cpu,
}

#[cfg(target_arch = "m68k")]
impl AtariSt {
    /// # Safety
    /// Must only be created once, in supervisor mode, on the machine.
    pub const unsafe fn new() -> Self {
        Self {
            bus: crate::dev::mmio::PhysicalBus::new(),
            cpu: crate::m68k::intrinsics::Cpu::new(),
        }
    }
}

#[cfg(target_arch = "m68k")]
impl crate::dev::mmio::Bus for AtariSt {
    #[inline(always)]
    fn read_u8(&self, addr: u32) -> u8 {
        self.bus.read_u8(addr)
    }
    #[inline(always)]
    fn write_u8(&self, addr: u32, v: u8) {
        self.bus.write_u8(addr, v)
    }
    #[inline(always)]
    fn read_u16(&self, addr: u32) -> u16 {
        self.bus.read_u16(addr)
    }
    #[inline(always)]
    fn write_u16(&self, addr: u32, v: u16) {
        self.bus.write_u16(addr, v)
    }
}

#[cfg(target_arch = "m68k")]
impl crate::interrupt::StatusRegister for AtariSt {
    #[inline(always)]
    fn read_sr(&self) -> crate::m68k::Sr {
        self.cpu.read_sr()
    }
    #[inline(always)]
    fn write_sr(&self, sr: crate::m68k::Sr) {
        self.cpu.write_sr(sr)
    }
}
