//! DMA controller.
//!
//! The DMA chip sits between the 68000 and the WD1772. It owns a single
//! 16-bit access port whose meaning is chosen by the mode word:
//!
//! | mode    | access port reaches            |
//! |---------|--------------------------------|
//! | `0x080` | FDC status (read) / command    |
//! | `0x082` | FDC track register             |
//! | `0x084` | FDC sector register            |
//! | `0x086` | FDC data register              |
//! | `0x090` | DMA sector count               |
//!
//! OR-ing [`Mode::WRITE`] in selects the memory-to-disk direction. Toggling
//! that bit also resets the DMA's internal FIFO and status.
use crate::dev::Machine;

crate::registers! {
    /// FDC register or sector count, depending on the mode.
    ACCESS @ 0xff_8604 => RW, u16;
    /// Mode (write only).
    MODE @ 0xff_8606 => W, u16;
    /// Status (read only).
    STATUS @ 0xff_8606 => R, u16;
    /// Transfer address, bits 23-16.
    ADDR_HIGH @ 0xff_8609 => RW, u8;
    /// Transfer address, bits 15-8.
    ADDR_MID @ 0xff_860b => RW, u8;
    /// Transfer address, bits 7-0.
    ADDR_LOW @ 0xff_860d => RW, u8;
}

bitflags::bitflags! {
    /// DMA mode word.
    pub struct Mode: u16 {
        /// FDC A0 line.
        const A0 = 1 << 1;
        /// FDC A1 line.
        const A1 = 1 << 2;
        /// Hard disk controller chip select instead of the FDC.
        const HDC = 1 << 3;
        /// The access port reaches the DMA sector count.
        const SECTOR_COUNT = 1 << 4;
        /// DMA off.
        const DMA_OFF = 1 << 6;
        /// Controller chip select.
        const FDC = 1 << 7;
        /// Transfer direction: memory to disk.
        const WRITE = 1 << 8;
    }
}

impl Mode {
    /// FDC command (write) / status (read).
    pub const COMMAND: Mode = Mode::FDC;
    /// FDC track register.
    pub const TRACK: Mode = Mode::from_bits_truncate(Mode::FDC.bits() | Mode::A0.bits());
    /// FDC sector register.
    pub const SECTOR: Mode = Mode::from_bits_truncate(Mode::FDC.bits() | Mode::A1.bits());
    /// FDC data register.
    pub const DATA: Mode =
        Mode::from_bits_truncate(Mode::FDC.bits() | Mode::A0.bits() | Mode::A1.bits());
    /// DMA sector count.
    pub const COUNT: Mode = Mode::from_bits_truncate(Mode::FDC.bits() | Mode::SECTOR_COUNT.bits());
}

bitflags::bitflags! {
    /// DMA status word.
    pub struct Status: u16 {
        /// Set when the last transfer finished without a DMA error.
        const OK = 1 << 0;
        /// Sector count is not zero.
        const SECTOR_COUNT = 1 << 1;
        /// State of the FDC data request line.
        const DRQ = 1 << 2;
    }
}

/// Transfer direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Disk to memory.
    Read,
    /// Memory to disk.
    Write,
}

impl Direction {
    /// Direction bit of the mode word.
    #[inline]
    pub fn mode(self) -> Mode {
        match self {
            Direction::Read => Mode::empty(),
            Direction::Write => Mode::WRITE,
        }
    }

    /// The other direction.
    #[inline]
    pub fn flip(self) -> Self {
        match self {
            Direction::Read => Direction::Write,
            Direction::Write => Direction::Read,
        }
    }
}

/// Select what the access port reaches.
#[inline]
pub fn set_mode<M: Machine + ?Sized>(m: &M, mode: Mode) {
    MODE.write(m, mode.bits());
}

/// Read the DMA status.
#[inline]
pub fn status<M: Machine + ?Sized>(m: &M) -> Status {
    Status::from_bits_truncate(STATUS.read(m))
}

/// Load the three address latches, high byte first.
///
/// The latches form a counter that the DMA increments during the transfer;
/// they must be loaded before the transfer starts.
pub fn load_address<M: Machine + ?Sized>(m: &M, addr: u32) {
    ADDR_HIGH.write(m, (addr >> 16) as u8);
    ADDR_MID.write(m, (addr >> 8) as u8);
    ADDR_LOW.write(m, addr as u8);
}

/// Read the address counter back.
pub fn address<M: Machine + ?Sized>(m: &M) -> u32 {
    (ADDR_HIGH.read(m) as u32) << 16 | (ADDR_MID.read(m) as u32) << 8 | ADDR_LOW.read(m) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dev::st::sim::SimSt;

    #[test]
    fn mode_words() {
        assert_eq!(Mode::COMMAND.bits(), 0x80);
        assert_eq!(Mode::TRACK.bits(), 0x82);
        assert_eq!(Mode::SECTOR.bits(), 0x84);
        assert_eq!(Mode::DATA.bits(), 0x86);
        assert_eq!(Mode::COUNT.bits(), 0x90);
        assert_eq!((Mode::COMMAND | Direction::Write.mode()).bits(), 0x180);
    }

    #[test]
    fn address_latches() {
        let st = SimSt::new();
        load_address(&st, 0x03_fd00);
        assert_eq!(address(&st), 0x03_fd00);
        assert_eq!(ADDR_HIGH.read(&st), 0x03);
        assert_eq!(ADDR_MID.read(&st), 0xfd);
        assert_eq!(ADDR_LOW.read(&st), 0x00);
    }
}
