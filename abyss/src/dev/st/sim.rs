//! A simulated Atari ST.
//!
//! [`SimSt`] implements [`Bus`] and [`StatusRegister`] over plain memory, so
//! the drivers and the kernel run on the host exactly as they run on the
//! machine. It models what the floppy path and the scheduler observe:
//!
//! - RAM from address 0,
//! - PSG port A (drive and side select),
//! - the DMA mode, status, sector count and address latches,
//! - a WD1772 with up to two drives holding double sided disk images,
//!   write protect, unreadable sectors, a configurable busy latency and a
//!   controller that hangs on its next command,
//! - the FDC INTRQ line and the MFP interrupt registers,
//! - the CPU status register.
//!
//! Accesses to the PSG and to the FDC/DMA window made while the IPL is below
//! 7 are counted; see [`SimSt::unguarded_accesses`].
use super::dma::{Mode, Status as DmaStatus};
use super::fdc::{command, CommandType, Status};
use super::mfp::{Bank, Channel};
use super::psg::{Drive, PortA, Side, PORT_A};
use super::{MAX_DRIVES, SECTORS_PER_TRACK, SECTOR_SIZE, SIDES, TRACKS};
use crate::dev::mmio::Bus;
use crate::interrupt::{Ipl, StatusRegister};
use crate::m68k::Sr;
use std::cell::{Cell, RefCell};

/// Size of the simulated RAM.
pub const RAM_SIZE: usize = 0x40_0000;

const PSG: core::ops::RangeInclusive<u32> = 0xff_8800..=0xff_8803;
const FDC_WINDOW: core::ops::RangeInclusive<u32> = 0xff_8604..=0xff_860d;
const MFP: core::ops::RangeInclusive<u32> = 0xff_fa00..=0xff_fa3f;

/// Something the drivers did to the hardware, in order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Event {
    /// Port A written.
    Select { drive: Option<Drive>, side: Side },
    /// FDC command register written.
    Command(u8),
    /// FDC track register written.
    Track(u8),
    /// FDC sector register written.
    Sector(u8),
    /// FDC data register written.
    Data(u8),
    /// Low address latch written; carries the whole address.
    DmaAddress(u32),
    /// DMA sector count written.
    SectorCount(u16),
    /// DMA reset by a direction toggle.
    DmaReset,
}

struct Floppy {
    image: Vec<u8>,
    head: u8,
    write_protect: bool,
    bad: Vec<(Side, u8, u8)>,
}

impl Floppy {
    fn blank() -> Self {
        Self {
            image: vec![
                0;
                TRACKS as usize * SIDES as usize * SECTORS_PER_TRACK as usize * SECTOR_SIZE
            ],
            head: 0,
            write_protect: false,
            bad: Vec::new(),
        }
    }

    fn offset(side: Side, track: u8, sector: u8) -> Option<usize> {
        if track >= TRACKS || sector == 0 || sector > SECTORS_PER_TRACK {
            return None;
        }
        let index = (track as usize * SIDES as usize + side as usize)
            * SECTORS_PER_TRACK as usize
            + (sector - 1) as usize;
        Some(index * SECTOR_SIZE)
    }
}

struct Wd1772 {
    status: Status,
    track: u8,
    sector: u8,
    data: u8,
    // Status polls left until the running command completes.
    busy: u32,
    jammed: bool,
    intrq: bool,
}

struct State {
    ram: Vec<u8>,
    psg_select: u8,
    port_a: u8,
    dma_mode: u16,
    dma_count: u16,
    dma_addr: [u8; 3],
    dma_error: bool,
    fdc: Wd1772,
    drives: [Option<Floppy>; MAX_DRIVES],
    mfp: [u8; 0x40],
    latency: u32,
    jam_next: bool,
    events: Vec<Event>,
}

impl State {
    fn selected(&self) -> (Option<Drive>, Side) {
        let port = PortA::from_bits_truncate(self.port_a);
        let drive = if !port.contains(PortA::DRIVE_A_OFF) {
            Some(Drive::A)
        } else if !port.contains(PortA::DRIVE_B_OFF) {
            Some(Drive::B)
        } else {
            None
        };
        let side = if port.contains(PortA::SIDE_0) {
            Side::Zero
        } else {
            Side::One
        };
        (drive, side)
    }

    fn present(&self) -> Option<(Drive, Side)> {
        match self.selected() {
            (Some(drive), side) if self.drives[drive as usize].is_some() => Some((drive, side)),
            _ => None,
        }
    }

    fn dma_address(&self) -> u32 {
        (self.dma_addr[0] as u32) << 16 | (self.dma_addr[1] as u32) << 8 | self.dma_addr[2] as u32
    }

    fn set_dma_address(&mut self, addr: u32) {
        self.dma_addr = [(addr >> 16) as u8, (addr >> 8) as u8, addr as u8];
    }

    fn raise_intrq(&mut self) {
        self.fdc.intrq = true;
        let (_, bit) = Channel::Fdc.bit();
        if self.mfp[IERB] & bit != 0 {
            self.mfp[IPRB] |= bit;
        }
    }

    fn access_read(&mut self) -> u16 {
        let mode = Mode::from_bits_truncate(self.dma_mode);
        if mode.contains(Mode::SECTOR_COUNT) {
            return self.dma_count;
        }
        match (self.dma_mode >> 1) & 3 {
            0 => {
                self.fdc.intrq = false;
                if self.fdc.busy > 0 && !self.fdc.jammed {
                    self.fdc.busy -= 1;
                    if self.fdc.busy == 0 {
                        self.fdc.status.remove(Status::BUSY);
                        self.raise_intrq();
                    }
                }
                self.fdc.status.bits() as u16
            }
            1 => self.fdc.track as u16,
            2 => self.fdc.sector as u16,
            _ => self.fdc.data as u16,
        }
    }

    fn access_write(&mut self, v: u16) {
        let mode = Mode::from_bits_truncate(self.dma_mode);
        if mode.contains(Mode::SECTOR_COUNT) {
            self.dma_count = v;
            self.events.push(Event::SectorCount(v));
            return;
        }
        let v = v as u8;
        match (self.dma_mode >> 1) & 3 {
            0 => self.command(v),
            1 => {
                self.fdc.track = v;
                self.events.push(Event::Track(v));
            }
            2 => {
                self.fdc.sector = v;
                self.events.push(Event::Sector(v));
            }
            _ => {
                self.fdc.data = v;
                self.events.push(Event::Data(v));
            }
        }
    }

    fn write_mode(&mut self, v: u16) {
        if (self.dma_mode ^ v) & Mode::WRITE.bits() != 0 {
            self.dma_count = 0;
            self.dma_error = false;
            self.events.push(Event::DmaReset);
        }
        self.dma_mode = v;
    }

    fn dma_status(&self) -> DmaStatus {
        let mut status = DmaStatus::empty();
        if !self.dma_error {
            status |= DmaStatus::OK;
        }
        if self.dma_count != 0 {
            status |= DmaStatus::SECTOR_COUNT;
        }
        status
    }

    fn command(&mut self, cmd: u8) {
        self.events.push(Event::Command(cmd));
        self.fdc.intrq = false;
        let kind = CommandType::of(cmd);
        if kind == CommandType::IV {
            self.fdc.busy = 0;
            self.fdc.jammed = false;
            self.fdc.status.remove(Status::BUSY);
            if cmd & command::IMMEDIATE != 0 {
                self.raise_intrq();
            }
            return;
        }
        if self.fdc.status.contains(Status::BUSY) {
            return;
        }
        let status = match kind {
            CommandType::I => self.type_one(cmd),
            CommandType::II => self.type_two(cmd),
            _ => Status::RECORD_NOT_FOUND,
        };
        self.fdc.status = status | Status::MOTOR_ON;
        if self.jam_next {
            self.jam_next = false;
            self.fdc.jammed = true;
            self.fdc.status |= Status::BUSY;
        } else if self.latency > 0 {
            self.fdc.busy = self.latency;
            self.fdc.status |= Status::BUSY;
        } else {
            self.raise_intrq();
        }
    }

    fn type_one(&mut self, cmd: u8) -> Status {
        let Some((drive, _)) = self.present() else {
            return Status::RECORD_NOT_FOUND;
        };
        let (track, data) = (self.fdc.track, self.fdc.data);
        let Some(floppy) = self.drives[drive as usize].as_mut() else {
            return Status::RECORD_NOT_FOUND;
        };
        let mut status = Status::empty();
        match cmd & 0xf0 {
            0x00 => {
                floppy.head = 0;
                self.fdc.track = 0;
            }
            0x10 => {
                let target = floppy.head as i16 + data as i16 - track as i16;
                if target >= TRACKS as i16 {
                    floppy.head = TRACKS - 1;
                    status |= Status::RECORD_NOT_FOUND;
                } else {
                    floppy.head = target.max(0) as u8;
                }
                self.fdc.track = data;
            }
            0x20 | 0x30 | 0x40 | 0x50 => {
                floppy.head = (floppy.head + 1).min(TRACKS - 1);
                if cmd & command::UPDATE != 0 {
                    self.fdc.track = self.fdc.track.wrapping_add(1);
                }
            }
            _ => {
                floppy.head = floppy.head.saturating_sub(1);
                if cmd & command::UPDATE != 0 {
                    self.fdc.track = self.fdc.track.wrapping_sub(1);
                }
            }
        }
        if floppy.head == 0 {
            status |= Status::TRACK0_LOST_DATA;
        }
        if cmd & command::VERIFY != 0 && floppy.head != self.fdc.track {
            status |= Status::RECORD_NOT_FOUND;
        }
        status
    }

    fn type_two(&mut self, cmd: u8) -> Status {
        let write = cmd & 0xe0 == command::WRITE_SECTOR;
        let Some((drive, side)) = self.present() else {
            return Status::RECORD_NOT_FOUND;
        };
        let (track, sector) = (self.fdc.track, self.fdc.sector);
        let dma_write = self.dma_mode & Mode::WRITE.bits() != 0;
        let addr = self.dma_address() as usize;
        let count = self.dma_count;

        let Some(floppy) = self.drives[drive as usize].as_mut() else {
            return Status::RECORD_NOT_FOUND;
        };
        if floppy.head != track {
            return Status::RECORD_NOT_FOUND;
        }
        let Some(ofs) = Floppy::offset(side, floppy.head, sector) else {
            return Status::RECORD_NOT_FOUND;
        };
        if write && floppy.write_protect {
            return Status::WRITE_PROTECT;
        }
        if write != dma_write || count == 0 {
            return Status::TRACK0_LOST_DATA;
        }
        if addr + SECTOR_SIZE > self.ram.len() {
            self.dma_error = true;
            return Status::TRACK0_LOST_DATA;
        }

        let location = (side, floppy.head, sector);
        let mut status = Status::empty();
        if write {
            floppy.image[ofs..ofs + SECTOR_SIZE]
                .copy_from_slice(&self.ram[addr..addr + SECTOR_SIZE]);
            floppy.bad.retain(|b| *b != location);
        } else {
            self.ram[addr..addr + SECTOR_SIZE]
                .copy_from_slice(&floppy.image[ofs..ofs + SECTOR_SIZE]);
            if floppy.bad.contains(&location) {
                status |= Status::CRC_ERROR;
            }
        }
        self.set_dma_address((addr + SECTOR_SIZE) as u32);
        self.dma_count -= 1;
        status
    }
}

const IERA: usize = 0x07;
const IERB: usize = 0x09;
const IPRA: usize = 0x0b;
const IPRB: usize = 0x0d;
const ISRA: usize = 0x0f;
const ISRB: usize = 0x11;
const IMRA: usize = 0x13;
const IMRB: usize = 0x15;

/// The simulated machine.
pub struct SimSt {
    state: RefCell<State>,
    sr: Cell<u16>,
    unguarded: Cell<usize>,
}

impl Default for SimSt {
    fn default() -> Self {
        Self::new()
    }
}

impl SimSt {
    /// A machine with RAM and no drives, in supervisor mode at IPL 0.
    pub fn new() -> Self {
        Self {
            state: RefCell::new(State {
                ram: vec![0; RAM_SIZE],
                psg_select: 0,
                port_a: (PortA::DRIVE_A_OFF | PortA::DRIVE_B_OFF | PortA::SIDE_0).bits(),
                dma_mode: 0,
                dma_count: 0,
                dma_addr: [0; 3],
                dma_error: false,
                fdc: Wd1772 {
                    status: Status::empty(),
                    track: 0,
                    sector: 1,
                    data: 0,
                    busy: 0,
                    jammed: false,
                    intrq: false,
                },
                drives: [None, None],
                mfp: [0; 0x40],
                latency: 0,
                jam_next: false,
                events: Vec::new(),
            }),
            sr: Cell::new(Sr::S.bits()),
            unguarded: Cell::new(0),
        }
    }

    /// Attach `drive` with a blank, formatted disk whose head rests on a
    /// random-looking track, as after power on.
    pub fn with_drive(self, drive: Drive) -> Self {
        let mut floppy = Floppy::blank();
        floppy.head = 3 + drive as u8;
        self.state.borrow_mut().drives[drive as usize] = Some(floppy);
        self
    }

    /// Number of attached drives.
    pub fn drive_count(&self) -> usize {
        self.state.borrow().drives.iter().filter(|d| d.is_some()).count()
    }

    /// Toggle the write protect tab of `drive`.
    pub fn set_write_protect(&self, drive: Drive, protect: bool) {
        if let Some(f) = self.state.borrow_mut().drives[drive as usize].as_mut() {
            f.write_protect = protect;
        }
    }

    /// Make a sector fail its CRC until it is rewritten.
    pub fn corrupt(&self, drive: Drive, side: Side, track: u8, sector: u8) {
        if let Some(f) = self.state.borrow_mut().drives[drive as usize].as_mut() {
            f.bad.push((side, track, sector));
        }
    }

    /// Keep the controller busy for `polls` status reads after each command.
    pub fn set_busy_latency(&self, polls: u32) {
        self.state.borrow_mut().latency = polls;
    }

    /// Hang the controller on its next command until a force interrupt.
    pub fn jam(&self) {
        self.state.borrow_mut().jam_next = true;
    }

    /// Overwrite PSG port A.
    pub fn set_port_a(&self, port: PortA) {
        self.state.borrow_mut().port_a = port.bits();
    }

    /// Physical head position of `drive`.
    ///
    /// # Panics
    /// Panics if the drive is not attached.
    pub fn head(&self, drive: Drive) -> u8 {
        self.state.borrow().drives[drive as usize]
            .as_ref()
            .map(|f| f.head)
            .expect("drive not attached")
    }

    /// Contents of a sector on disk.
    ///
    /// # Panics
    /// Panics if the drive is not attached or the sector does not exist.
    pub fn sector(&self, drive: Drive, side: Side, track: u8, sector: u8) -> Vec<u8> {
        let state = self.state.borrow();
        let f = state.drives[drive as usize].as_ref().expect("drive not attached");
        let ofs = Floppy::offset(side, track, sector).expect("bad geometry");
        f.image[ofs..ofs + SECTOR_SIZE].to_vec()
    }

    /// State of the FDC interrupt request line.
    pub fn intrq(&self) -> bool {
        self.state.borrow().fdc.intrq
    }

    /// Signal an interrupt on `ch`. Returns true if the MFP delivers it to
    /// the CPU, in which case the channel is now in service.
    pub fn interrupt(&self, ch: Channel) -> bool {
        let mut state = self.state.borrow_mut();
        let (ier, ipr, isr, imr) = match ch.bit().0 {
            Bank::A => (IERA, IPRA, ISRA, IMRA),
            Bank::B => (IERB, IPRB, ISRB, IMRB),
        };
        let bit = ch.bit().1;
        if state.mfp[ier] & bit == 0 {
            return false;
        }
        state.mfp[ipr] |= bit;
        if state.mfp[imr] & bit == 0 {
            return false;
        }
        state.mfp[ipr] &= !bit;
        state.mfp[isr] |= bit;
        true
    }

    /// True if `ch` is pending in the MFP.
    pub fn pending(&self, ch: Channel) -> bool {
        let state = self.state.borrow();
        let (bank, bit) = ch.bit();
        let ipr = match bank {
            Bank::A => IPRA,
            Bank::B => IPRB,
        };
        state.mfp[ipr] & bit != 0
    }

    /// Number of PSG and FDC/DMA accesses made below IPL 7.
    pub fn unguarded_accesses(&self) -> usize {
        self.unguarded.get()
    }

    /// Copy `bytes` into RAM at `addr`.
    pub fn load(&self, addr: u32, bytes: &[u8]) {
        let addr = addr as usize;
        self.state.borrow_mut().ram[addr..addr + bytes.len()].copy_from_slice(bytes);
    }

    /// Copy `len` bytes of RAM at `addr` out.
    pub fn ram(&self, addr: u32, len: usize) -> Vec<u8> {
        let addr = addr as usize;
        self.state.borrow().ram[addr..addr + len].to_vec()
    }

    /// Hardware events so far.
    pub fn events(&self) -> Vec<Event> {
        self.state.borrow().events.clone()
    }

    /// Forget recorded events.
    pub fn clear_events(&self) {
        self.state.borrow_mut().events.clear();
    }

    fn note(&self, addr: u32) {
        if (PSG.contains(&addr) || FDC_WINDOW.contains(&addr)) && self.ipl() != Ipl::L7 {
            self.unguarded.set(self.unguarded.get() + 1);
        }
    }
}

impl Bus for SimSt {
    fn read_u8(&self, addr: u32) -> u8 {
        let addr = addr & 0xff_ffff;
        self.note(addr);
        let state = self.state.borrow();
        match addr {
            a if (a as usize) < state.ram.len() => state.ram[a as usize],
            0xff_8800 if state.psg_select == PORT_A => state.port_a,
            0xff_8800 => 0xff,
            0xff_8609 => state.dma_addr[0],
            0xff_860b => state.dma_addr[1],
            0xff_860d => state.dma_addr[2],
            // GPIP 5 is the inverted INTRQ.
            0xff_fa01 => {
                if state.fdc.intrq {
                    0xdf
                } else {
                    0xff
                }
            }
            a if MFP.contains(&a) && a & 1 == 1 => state.mfp[(a - MFP.start()) as usize],
            _ => panic!("bus error: byte read at {:06x}", addr),
        }
    }

    fn write_u8(&self, addr: u32, v: u8) {
        let addr = addr & 0xff_ffff;
        self.note(addr);
        let mut state = self.state.borrow_mut();
        match addr {
            a if (a as usize) < state.ram.len() => state.ram[a as usize] = v,
            0xff_8800 => state.psg_select = v,
            0xff_8802 => {
                if state.psg_select == PORT_A {
                    state.port_a = v;
                    let (drive, side) = state.selected();
                    state.events.push(Event::Select { drive, side });
                }
            }
            0xff_8609 => state.dma_addr[0] = v,
            0xff_860b => state.dma_addr[1] = v,
            0xff_860d => {
                state.dma_addr[2] = v;
                let addr = state.dma_address();
                state.events.push(Event::DmaAddress(addr));
            }
            a if MFP.contains(&a) && a & 1 == 1 => {
                let reg = (a - MFP.start()) as usize;
                match reg {
                    // Pending and in-service bits can only be cleared.
                    IPRA | IPRB | ISRA | ISRB => state.mfp[reg] &= v,
                    _ => state.mfp[reg] = v,
                }
            }
            _ => panic!("bus error: byte write at {:06x}", addr),
        }
    }

    fn read_u16(&self, addr: u32) -> u16 {
        let addr = addr & 0xff_ffff;
        assert!(addr & 1 == 0, "address error: word read at {:06x}", addr);
        self.note(addr);
        let mut state = self.state.borrow_mut();
        match addr {
            a if (a as usize) + 1 < state.ram.len() => {
                u16::from_be_bytes([state.ram[a as usize], state.ram[a as usize + 1]])
            }
            0xff_8604 => state.access_read(),
            0xff_8606 => state.dma_status().bits(),
            _ => panic!("bus error: word read at {:06x}", addr),
        }
    }

    fn write_u16(&self, addr: u32, v: u16) {
        let addr = addr & 0xff_ffff;
        assert!(addr & 1 == 0, "address error: word write at {:06x}", addr);
        self.note(addr);
        let mut state = self.state.borrow_mut();
        match addr {
            a if (a as usize) + 1 < state.ram.len() => {
                state.ram[a as usize..a as usize + 2].copy_from_slice(&v.to_be_bytes())
            }
            0xff_8604 => state.access_write(v),
            0xff_8606 => state.write_mode(v),
            _ => panic!("bus error: word write at {:06x}", addr),
        }
    }
}

impl StatusRegister for SimSt {
    fn read_sr(&self) -> Sr {
        Sr::from_bits_truncate(self.sr.get())
    }

    fn write_sr(&self, sr: Sr) {
        self.sr.set(sr.bits());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dev::st::{dma, fdc::Fdc, mfp, psg};
    use crate::interrupt::IplGuard;

    #[test]
    fn ram_is_big_endian() {
        let st = SimSt::new();
        st.write_u16(0x800, 0x1234);
        assert_eq!(st.read_u8(0x800), 0x12);
        assert_eq!(st.read_u8(0x801), 0x34);
        assert_eq!(st.read_u16(0x0100_0800), 0x1234);
    }

    #[test]
    #[should_panic(expected = "bus error")]
    fn unmapped_io_is_a_bus_error() {
        SimSt::new().read_u8(0xff_9000);
    }

    #[test]
    fn unguarded_accesses_are_counted() {
        let st = SimSt::new();
        dma::set_mode(&st, Mode::COMMAND);
        assert_eq!(st.unguarded_accesses(), 1);
        {
            let _guard = IplGuard::new(&st, Ipl::L7);
            dma::set_mode(&st, Mode::COMMAND);
        }
        assert_eq!(st.unguarded_accesses(), 1);
    }

    #[test]
    fn intrq_reaches_the_mfp() {
        let st = SimSt::new().with_drive(Drive::A);
        mfp::init(&st);
        mfp::enable(&st, Channel::Fdc);
        psg::select(&st, Drive::A, Side::Zero);
        let fdc = Fdc::new(&st, 10);
        fdc.restore().unwrap();
        assert!(st.pending(Channel::Fdc));
        assert!(st.interrupt(Channel::Fdc));
        assert!(!st.pending(Channel::Fdc));
        assert!(mfp::in_service(&st, Channel::Fdc));
    }

    #[test]
    fn gpip5_follows_intrq() {
        let st = SimSt::new().with_drive(Drive::A);
        psg::select(&st, Drive::A, Side::Zero);
        let _guard = IplGuard::new(&st, Ipl::L7);
        dma::set_mode(&st, Mode::COMMAND);
        dma::ACCESS.write(&st, command::RESTORE_CMD as u16);
        assert_eq!(mfp::GPIP.read(&st) & 0x20, 0);
        dma::ACCESS.read(&st);
        assert_eq!(mfp::GPIP.read(&st) & 0x20, 0x20);
    }

    #[test]
    fn events_record_order() {
        let st = SimSt::new().with_drive(Drive::B);
        psg::select(&st, Drive::B, Side::One);
        let _guard = IplGuard::new(&st, Ipl::L7);
        dma::load_address(&st, 0x1200);
        assert_eq!(
            st.events(),
            [
                Event::Select {
                    drive: Some(Drive::B),
                    side: Side::One
                },
                Event::DmaAddress(0x1200)
            ]
        );
    }
}
