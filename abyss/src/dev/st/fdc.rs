//! WD1772 floppy disk controller.
//!
//! The controller is driven through the DMA chip's access port (see
//! [`super::dma`]). Every register access is a pair of bus cycles, first the
//! mode word that routes the port and then the access itself, and an ISR
//! that touches the port between the two would redirect the second cycle.
//! All pairs therefore run under an [`IplGuard`] at level 7.
//!
//! Commands are not suspension points. After issuing one, the driver polls
//! the busy bit for at most `spin_limit` reads and gives up with
//! [`FdcError::Timeout`]; the controller may still finish the command later,
//! which is why [`Fdc::drain`] exists.
use super::dma::{self, Direction, Mode};
use super::psg::{self, Drive, Side};
use super::{ADDRESS_LIMIT, MAX_DRIVES, SECTOR_SIZE};
use crate::dev::Machine;
use crate::interrupt::{Ipl, IplGuard};

/// Command bytes and flags.
pub mod command {
    /// Type I: step out to track 0.
    pub const RESTORE: u8 = 0x00;
    /// Type I: step to the track in the data register.
    pub const SEEK: u8 = 0x10;
    /// Type I: step one track towards the hub.
    pub const STEP_IN: u8 = 0x50;
    /// Type II: read one sector.
    pub const READ_SECTOR: u8 = 0x80;
    /// Type II: write one sector.
    pub const WRITE_SECTOR: u8 = 0xa0;
    /// Type IV: terminate the current command.
    pub const FORCE_INTERRUPT: u8 = 0xd0;

    /// Stepping rate bit 0.
    pub const R0: u8 = 0x01;
    /// Stepping rate bit 1.
    pub const R1: u8 = 0x02;
    /// Verify the track id after stepping.
    pub const VERIFY: u8 = 0x04;
    /// Suppress the motor spin-up sequence.
    pub const SUPPRESS_SPIN_UP: u8 = 0x08;
    /// Update the track register on step.
    pub const UPDATE: u8 = 0x10;

    /// Write a deleted data mark.
    pub const DELETED_MARK: u8 = 0x01;
    /// Write precompensation.
    pub const PRECOMPENSATION: u8 = 0x02;
    /// 30 ms settling delay.
    pub const SETTLE: u8 = 0x04;
    /// Multiple sectors.
    pub const MULTIPLE: u8 = 0x10;

    /// Force interrupt: interrupt immediately.
    pub const IMMEDIATE: u8 = 0x08;

    pub const RESTORE_CMD: u8 = RESTORE | SUPPRESS_SPIN_UP | R1;
    pub const SEEK_CMD: u8 = SEEK | SUPPRESS_SPIN_UP | R1;
    pub const STEP_IN_CMD: u8 = STEP_IN | R1;
    pub const READ_CMD: u8 = READ_SECTOR | SUPPRESS_SPIN_UP;
    pub const WRITE_CMD: u8 = WRITE_SECTOR | SUPPRESS_SPIN_UP | PRECOMPENSATION;
}

/// Command class. It decides what some status bits mean.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandType {
    /// Restore, seek, step.
    I,
    /// Read/write sector.
    II,
    /// Read address, read track, write track.
    III,
    /// Force interrupt.
    IV,
}

impl CommandType {
    /// Classify a command byte.
    pub const fn of(cmd: u8) -> Self {
        match cmd >> 4 {
            0x0..=0x7 => CommandType::I,
            0x8..=0xb => CommandType::II,
            0xd => CommandType::IV,
            _ => CommandType::III,
        }
    }
}

bitflags::bitflags! {
    /// Status register.
    ///
    /// Bits 1, 2 and 5 have two meanings; the one in effect depends on the
    /// [`CommandType`] of the last command.
    pub struct Status: u8 {
        /// Command in progress.
        const BUSY = 1 << 0;
        /// Index pulse (type I) or data request (type II/III).
        const INDEX_DRQ = 1 << 1;
        /// Head on track 0 (type I) or lost data (type II/III).
        const TRACK0_LOST_DATA = 1 << 2;
        /// CRC error.
        const CRC_ERROR = 1 << 3;
        /// Record not found (type II/III), seek error (type I).
        const RECORD_NOT_FOUND = 1 << 4;
        /// Spin-up complete (type I) or record type (type II/III).
        const SPIN_UP_RECORD_TYPE = 1 << 5;
        /// Write protected.
        const WRITE_PROTECT = 1 << 6;
        /// Motor on.
        const MOTOR_ON = 1 << 7;
    }
}

/// What a status byte is checked against.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    Restore,
    Seek,
    Read,
    Write,
}

impl Status {
    /// Map the status after `op` to its error, if any.
    pub fn check(self, op: Operation) -> Result<(), FdcError> {
        let failed = match op {
            Operation::Restore => !self.contains(Status::TRACK0_LOST_DATA),
            Operation::Seek => self.contains(Status::RECORD_NOT_FOUND),
            Operation::Read => self.intersects(
                Status::CRC_ERROR | Status::TRACK0_LOST_DATA | Status::RECORD_NOT_FOUND,
            ),
            Operation::Write => self.intersects(
                Status::WRITE_PROTECT | Status::TRACK0_LOST_DATA | Status::RECORD_NOT_FOUND,
            ),
        };
        if failed {
            Err(match op {
                Operation::Restore => FdcError::Restore,
                Operation::Seek => FdcError::Seek,
                Operation::Read => FdcError::Read,
                Operation::Write => FdcError::Write,
            })
        } else {
            Ok(())
        }
    }
}

/// Outcome of a command as seen by the completion interrupt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Completion {
    LostData,
    CrcError,
    RecordNotFound,
    WriteProtect,
    CommandComplete,
}

impl Completion {
    /// Classify `status` left by a command of type `kind`.
    pub fn classify(status: Status, kind: CommandType) -> Self {
        let transfer = matches!(kind, CommandType::II | CommandType::III);
        if transfer && status.contains(Status::TRACK0_LOST_DATA) {
            Completion::LostData
        } else if status.contains(Status::CRC_ERROR) {
            Completion::CrcError
        } else if status.contains(Status::RECORD_NOT_FOUND) {
            Completion::RecordNotFound
        } else if transfer && status.contains(Status::WRITE_PROTECT) {
            Completion::WriteProtect
        } else {
            Completion::CommandComplete
        }
    }
}

/// Errors of the floppy controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FdcError {
    /// Head not on track 0 after restore: drive absent or jammed.
    Restore,
    /// Seek error, or the track register disagrees with the target.
    Seek,
    /// CRC error, lost data or record not found while reading.
    Read,
    /// Write protect, lost data or record not found while writing.
    Write,
    /// The controller stayed busy for the whole spin limit.
    Timeout,
    /// Odd or out of range DMA address.
    DmaAddress,
    /// Request the driver doesn't implement, such as multi-sector transfers.
    Unsupported,
}

impl core::fmt::Display for FdcError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            FdcError::Restore => "restore failed",
            FdcError::Seek => "seek failed",
            FdcError::Read => "read failed",
            FdcError::Write => "write failed",
            FdcError::Timeout => "controller timed out",
            FdcError::DmaAddress => "bad dma address",
            FdcError::Unsupported => "unsupported request",
        };
        f.write_str(s)
    }
}

/// The floppy controller.
pub struct Fdc<'m, M: Machine + ?Sized> {
    m: &'m M,
    spin_limit: u32,
    // Direction bit carried by every mode word. Flipping it resets the DMA,
    // so it only changes in `start_transfer`.
    direction: Direction,
    selected: Option<Drive>,
    heads: [u8; MAX_DRIVES],
}

impl<'m, M: Machine + ?Sized> Fdc<'m, M> {
    /// Create a driver that polls the busy bit at most `spin_limit` times.
    pub const fn new(m: &'m M, spin_limit: u32) -> Self {
        Self {
            m,
            spin_limit,
            direction: Direction::Read,
            selected: None,
            heads: [0; MAX_DRIVES],
        }
    }

    /// The machine this driver runs on.
    #[inline]
    pub fn machine(&self) -> &'m M {
        self.m
    }

    /// Busy-wait bound.
    #[inline]
    pub fn spin_limit(&self) -> u32 {
        self.spin_limit
    }

    #[inline]
    fn mode(&self, register: Mode) -> Mode {
        register | self.direction.mode()
    }

    fn read_register(&self, register: Mode) -> u8 {
        let _guard = IplGuard::new(self.m, Ipl::L7);
        dma::set_mode(self.m, self.mode(register));
        dma::ACCESS.read(self.m) as u8
    }

    fn write_register(&self, register: Mode, v: u8) {
        let _guard = IplGuard::new(self.m, Ipl::L7);
        dma::set_mode(self.m, self.mode(register));
        dma::ACCESS.write(self.m, v as u16);
    }

    /// Read the status register. This also clears INTRQ.
    #[inline]
    pub fn status(&self) -> Status {
        Status::from_bits_truncate(self.read_register(Mode::COMMAND))
    }

    /// Poll until the controller is idle and return its final status.
    pub fn busy_wait(&self) -> Result<Status, FdcError> {
        for _ in 0..self.spin_limit {
            let status = self.status();
            if !status.contains(Status::BUSY) {
                return Ok(status);
            }
            core::hint::spin_loop();
        }
        warning!("fdc: still busy after {} polls", self.spin_limit);
        Err(FdcError::Timeout)
    }

    /// Select `drive` and `side` through the PSG.
    ///
    /// The track register is shared by both drives. On a drive change, the
    /// outgoing drive's head position is saved and the incoming one's is
    /// loaded, so that seeks keep stepping from the right place.
    pub fn select_drive_side(&mut self, drive: Drive, side: Side) -> Result<(), FdcError> {
        if self.selected != Some(drive) {
            self.busy_wait()?;
            if let Some(prev) = self.selected {
                self.heads[prev as usize] = self.read_register(Mode::TRACK);
            }
            self.write_register(Mode::TRACK, self.heads[drive as usize]);
            self.selected = Some(drive);
        }
        psg::select(self.m, drive, side);
        Ok(())
    }

    /// Issue `cmd` and wait for it to finish.
    pub fn send_command(&self, cmd: u8) -> Result<Status, FdcError> {
        self.busy_wait()?;
        self.write_register(Mode::COMMAND, cmd);
        self.busy_wait()
    }

    /// Load the seek target. The WD1772 seeks to the data register; the track
    /// register holds where the head is.
    pub fn set_track(&self, track: u8) -> Result<(), FdcError> {
        self.busy_wait()?;
        self.write_register(Mode::DATA, track);
        Ok(())
    }

    /// Load the sector register.
    pub fn set_sector(&self, sector: u8) -> Result<(), FdcError> {
        self.busy_wait()?;
        self.write_register(Mode::SECTOR, sector);
        Ok(())
    }

    /// Read the track register.
    ///
    /// The DMA status is read and discarded as part of the access so that a
    /// later status read doesn't observe a stale condition.
    pub fn get_track(&self) -> Result<u8, FdcError> {
        self.busy_wait()?;
        let _guard = IplGuard::new(self.m, Ipl::L7);
        let track = self.read_register(Mode::TRACK);
        let _ = dma::status(self.m);
        Ok(track)
    }

    /// Move the head to track 0.
    pub fn restore(&self) -> Result<(), FdcError> {
        self.send_command(command::RESTORE_CMD)?
            .check(Operation::Restore)
    }

    /// Move the head to `track`.
    ///
    /// Succeeds only if the seek status is clean and the track register
    /// independently reads back `track`.
    pub fn seek(&self, track: u8) -> Result<(), FdcError> {
        self.set_track(track)?;
        self.send_command(command::SEEK_CMD)?
            .check(Operation::Seek)?;
        let reached = self.get_track()?;
        if reached != track {
            warning!("fdc: seek to {} ended on {}", track, reached);
            return Err(FdcError::Seek);
        }
        Ok(())
    }

    /// Point the DMA at `addr`.
    pub fn set_dma_address(&self, addr: u32) -> Result<(), FdcError> {
        if addr & 1 != 0 || addr > ADDRESS_LIMIT - SECTOR_SIZE as u32 {
            return Err(FdcError::DmaAddress);
        }
        let _guard = IplGuard::new(self.m, Ipl::L7);
        dma::load_address(self.m, addr);
        Ok(())
    }

    /// Arm the DMA for `count` sectors in `direction`.
    ///
    /// The direction bit is toggled away and back first, which resets the
    /// DMA. The transfer itself starts with the next type II command.
    pub fn start_transfer(&mut self, direction: Direction, count: u16) -> Result<(), FdcError> {
        if count != 1 {
            return Err(FdcError::Unsupported);
        }
        let _guard = IplGuard::new(self.m, Ipl::L7);
        dma::set_mode(self.m, Mode::COUNT | direction.flip().mode());
        dma::set_mode(self.m, Mode::COUNT | direction.mode());
        dma::ACCESS.write(self.m, count);
        self.direction = direction;
        Ok(())
    }

    /// Read `sector` of the current track into the armed DMA buffer.
    pub fn read_sector(&self, sector: u8) -> Result<(), FdcError> {
        if self.direction != Direction::Read {
            return Err(FdcError::Unsupported);
        }
        self.set_sector(sector)?;
        self.send_command(command::READ_CMD)?
            .check(Operation::Read)
    }

    /// Write `sector` of the current track from the armed DMA buffer.
    pub fn write_sector(&self, sector: u8) -> Result<(), FdcError> {
        if self.direction != Direction::Write {
            return Err(FdcError::Unsupported);
        }
        self.set_sector(sector)?;
        let status = self.send_command(command::WRITE_CMD)?;
        if status.contains(Status::WRITE_PROTECT) {
            warning!("fdc: disk is write protected");
        }
        status.check(Operation::Write)
    }

    /// Discard whatever a previous, abandoned command left behind.
    ///
    /// A still running command is terminated. Both status registers are then
    /// read, which de-asserts INTRQ and clears the DMA status.
    pub fn drain(&self) -> Result<(), FdcError> {
        if self.status().contains(Status::BUSY) {
            debug!("fdc: terminating a stale command");
            self.write_register(Mode::COMMAND, command::FORCE_INTERRUPT);
        }
        self.busy_wait()?;
        self.acknowledge();
        Ok(())
    }

    /// Read the FDC and DMA status, as the completion interrupt must.
    pub fn acknowledge(&self) -> (Status, dma::Status) {
        let _guard = IplGuard::new(self.m, Ipl::L7);
        let status = self.status();
        (status, dma::status(self.m))
    }

    /// Count the attached drives (0 to 2).
    ///
    /// Each drive is selected and stepped in once; a drive that answers
    /// without a seek error is present. Present drives are restored again
    /// afterwards so every head starts on track 0.
    pub fn detect_drives(&mut self) -> Result<usize, FdcError> {
        self.select_drive_side(Drive::A, Side::Zero)?;
        self.restore()?;

        let mut count = 0;
        for drive in [Drive::A, Drive::B] {
            self.select_drive_side(drive, Side::Zero)?;
            let status = self.send_command(command::STEP_IN_CMD)?;
            if !status.contains(Status::RECORD_NOT_FOUND) {
                count += 1;
                self.restore()?;
            }
        }
        self.select_drive_side(Drive::A, Side::Zero)?;
        self.acknowledge();
        Ok(count)
    }
}
