//! Disk operations.
//!
//! A [`DiskRequest`] names one sector. [`Disk::perform`] carries it out with
//! the floppy driver, step by step:
//!
//! ```text
//!   Idle -> Selecting -> Seeking -> Transferring -> Done
//!              |            |             |
//!              +------------+-------------+----> failed (error carries the step)
//! ```
//!
//! Only one request is in flight at a time. There is no queue and no
//! automatic retry; a failed request is reported and the caller decides.
use abyss::dev::st::dma::{self, Direction};
use abyss::dev::st::fdc::{CommandType, Completion, Fdc, FdcError, Status};
use abyss::dev::st::psg::{Drive, Side};
use abyss::dev::st::{SECTORS_PER_TRACK, TRACKS};
use abyss::dev::Machine;
#[cfg(test)]
use abyss::spin_lock::SpinLockGuard;
use abyss::spin_lock::SpinLock;
use core::sync::atomic::{AtomicUsize, Ordering};
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Size of a request record in user memory.
pub const REQUEST_SIZE: usize = 16;

/// Direction of a request.
#[repr(u16)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
pub enum DiskOperation {
    /// Disk to memory.
    Read = 0,
    /// Memory to disk.
    Write = 1,
}

/// One single-sector disk request.
///
/// In user memory it is a 16 byte big-endian record:
///
/// | offset | size | field     |
/// |--------|------|-----------|
/// | 0      | 2    | operation |
/// | 2      | 2    | drive     |
/// | 4      | 2    | side      |
/// | 6      | 2    | track     |
/// | 8      | 2    | sector    |
/// | 10     | 2    | reserved  |
/// | 12     | 4    | buffer    |
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DiskRequest {
    /// Read or write.
    pub operation: DiskOperation,
    /// Drive.
    pub drive: Drive,
    /// Side.
    pub side: Side,
    /// Track, 0 to 79.
    pub track: u8,
    /// Sector, 1 to 9.
    pub sector: u8,
    /// Address of the 512 byte buffer.
    pub buffer: u32,
}

impl DiskRequest {
    /// Decode and validate a request record.
    pub fn decode(raw: &[u8; REQUEST_SIZE]) -> Result<Self, DiskError> {
        let field = |i: usize| u16::from_be_bytes([raw[2 * i], raw[2 * i + 1]]);
        let track = u8::try_from(field(3))
            .ok()
            .filter(|t| *t < TRACKS)
            .ok_or(DiskError::BadRequest)?;
        let sector = u8::try_from(field(4))
            .ok()
            .filter(|s| (1..=SECTORS_PER_TRACK).contains(s))
            .ok_or(DiskError::BadRequest)?;
        Ok(Self {
            operation: DiskOperation::try_from(field(0)).map_err(|_| DiskError::BadRequest)?,
            drive: Drive::try_from(field(1)).map_err(|_| DiskError::BadRequest)?,
            side: Side::try_from(field(2)).map_err(|_| DiskError::BadRequest)?,
            track,
            sector,
            buffer: u32::from_be_bytes([raw[12], raw[13], raw[14], raw[15]]),
        })
    }

    /// Encode the request record.
    pub fn encode(&self) -> [u8; REQUEST_SIZE] {
        let mut raw = [0; REQUEST_SIZE];
        let fields: [u16; 6] = [
            self.operation.into(),
            self.drive.into(),
            self.side.into(),
            self.track as u16,
            self.sector as u16,
            0u16,
        ];
        for (i, v) in fields.iter().enumerate() {
            raw[2 * i..2 * i + 2].copy_from_slice(&v.to_be_bytes());
        }
        raw[12..].copy_from_slice(&self.buffer.to_be_bytes());
        raw
    }
}

/// Last step a request reached.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiskStep {
    /// Nothing done yet.
    Idle,
    /// Draining the controller and selecting the drive and side.
    Selecting,
    /// Moving the head.
    Seeking,
    /// Programming the DMA and moving the sector.
    Transferring,
    /// Finished.
    Done,
}

/// Errors of a disk request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiskError {
    /// Another request is in flight.
    Busy,
    /// Malformed request, bad geometry or a drive that wasn't detected.
    BadRequest,
    /// The controller failed at `step`.
    Failed {
        /// Step that failed.
        step: DiskStep,
        /// What the controller reported.
        cause: FdcError,
    },
}

impl core::fmt::Display for DiskError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            DiskError::Busy => f.write_str("disk busy"),
            DiskError::BadRequest => f.write_str("bad disk request"),
            DiskError::Failed { step, cause } => write!(f, "{} while {:?}", cause, step),
        }
    }
}

bitflags::bitflags! {
    /// Commands the completion interrupt is expected for.
    pub struct Pending: u8 {
        /// Seek.
        const SEEK = 1 << 0;
        /// Sector read.
        const READ = 1 << 1;
        /// Sector write.
        const WRITE = 1 << 2;
    }
}

bitflags::bitflags! {
    /// Accumulated outcome of completion interrupts.
    pub struct Outcome: u16 {
        /// Lost data.
        const LOST_DATA = 1 << 0;
        /// CRC error.
        const CRC_ERROR = 1 << 1;
        /// Record not found.
        const RECORD_NOT_FOUND = 1 << 2;
        /// Write protected.
        const WRITE_PROTECT = 1 << 3;
        /// A command completed cleanly.
        const COMMAND_COMPLETE = 1 << 4;
        /// A pending seek completed cleanly.
        const SEEK_DONE = 1 << 5;
        /// A pending read completed cleanly.
        const READ_DONE = 1 << 6;
        /// A pending write completed cleanly.
        const WRITE_DONE = 1 << 7;
        /// The DMA reported an error.
        const DMA_ERROR = 1 << 8;
    }
}

/// Completion signal between the floppy interrupt and the disk code.
#[derive(Debug)]
pub struct FloppySignal {
    pending: Pending,
    outcome: Outcome,
    complete: bool,
}

impl Default for FloppySignal {
    fn default() -> Self {
        Self::new()
    }
}

impl FloppySignal {
    /// A cleared signal.
    pub const fn new() -> Self {
        Self {
            pending: Pending::empty(),
            outcome: Outcome::empty(),
            complete: false,
        }
    }

    /// Forget everything, including completions of abandoned commands.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Note that the command about to be issued is `what`.
    pub fn expect(&mut self, what: Pending) {
        self.pending = what;
        self.complete = false;
    }

    /// Class of the command the signal waits for. Bit 2 of the status byte
    /// is read according to it.
    pub fn kind(&self) -> CommandType {
        if self.pending.intersects(Pending::READ | Pending::WRITE) {
            CommandType::II
        } else {
            CommandType::I
        }
    }

    /// Post a completion with the DMA status read alongside it. Called by
    /// the floppy interrupt.
    ///
    /// A completion that arrives while no command is pending belongs to an
    /// abandoned request and is discarded.
    pub fn post(&mut self, completion: Completion, dma: dma::Status) {
        if self.pending.is_empty() {
            warning!("floppy: stale completion {:?} discarded", completion);
            return;
        }
        self.outcome |= match completion {
            Completion::LostData => Outcome::LOST_DATA,
            Completion::CrcError => Outcome::CRC_ERROR,
            Completion::RecordNotFound => Outcome::RECORD_NOT_FOUND,
            Completion::WriteProtect => Outcome::WRITE_PROTECT,
            Completion::CommandComplete if !dma.contains(dma::Status::OK) => Outcome::DMA_ERROR,
            Completion::CommandComplete => {
                let mut done = Outcome::COMMAND_COMPLETE;
                done.set(Outcome::SEEK_DONE, self.pending.contains(Pending::SEEK));
                done.set(Outcome::READ_DONE, self.pending.contains(Pending::READ));
                done.set(Outcome::WRITE_DONE, self.pending.contains(Pending::WRITE));
                done
            }
        };
        self.pending = Pending::empty();
        self.complete = true;
    }

    /// True once a completion was posted.
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Outcome so far.
    #[inline]
    pub fn outcome(&self) -> Outcome {
        self.outcome
    }

    /// Consume a posted completion.
    pub fn take(&mut self) -> Option<Outcome> {
        if !self.complete {
            return None;
        }
        let outcome = self.outcome;
        self.reset();
        Some(outcome)
    }
}

pub(crate) struct Inner<'m, M: Machine + ?Sized> {
    fdc: Fdc<'m, M>,
    step: DiskStep,
}

impl<M: Machine + ?Sized> Inner<'_, M> {
    #[inline]
    fn failed(&self, cause: FdcError) -> DiskError {
        DiskError::Failed {
            step: self.step,
            cause,
        }
    }

    fn run(&mut self, req: &DiskRequest, signal: &mut FloppySignal) -> Result<(), DiskError> {
        self.step = DiskStep::Selecting;
        self.fdc.drain().map_err(|e| self.failed(e))?;
        signal.reset();
        self.fdc
            .select_drive_side(req.drive, req.side)
            .map_err(|e| self.failed(e))?;

        self.step = DiskStep::Seeking;
        signal.expect(Pending::SEEK);
        self.fdc.seek(req.track).map_err(|e| self.failed(e))?;

        self.step = DiskStep::Transferring;
        self.fdc
            .set_dma_address(req.buffer)
            .map_err(|e| self.failed(e))?;
        let transfer = match req.operation {
            DiskOperation::Read => {
                self.fdc
                    .start_transfer(Direction::Read, 1)
                    .map_err(|e| self.failed(e))?;
                signal.expect(Pending::READ);
                self.fdc.read_sector(req.sector)
            }
            DiskOperation::Write => {
                self.fdc
                    .start_transfer(Direction::Write, 1)
                    .map_err(|e| self.failed(e))?;
                signal.expect(Pending::WRITE);
                self.fdc.write_sector(req.sector)
            }
        };
        transfer.map_err(|e| self.failed(e))?;

        self.step = DiskStep::Done;
        Ok(())
    }
}

/// The floppy disk subsystem.
pub struct Disk<'m, M: Machine + ?Sized> {
    inner: SpinLock<Inner<'m, M>>,
    drives: AtomicUsize,
}

impl<'m, M: Machine + ?Sized> Disk<'m, M> {
    /// Wrap a floppy driver. No drive is usable before [`Disk::init`].
    pub const fn new(fdc: Fdc<'m, M>) -> Self {
        Self {
            inner: SpinLock::new(Inner {
                fdc,
                step: DiskStep::Idle,
            }),
            drives: AtomicUsize::new(0),
        }
    }

    /// Detect the drives and return how many there are.
    ///
    /// A controller that fails to restore leaves the system without disks
    /// rather than failing the boot.
    pub fn init(&self) -> usize {
        let drives = match self.inner.lock().fdc.detect_drives() {
            Ok(n) => n,
            Err(e) => {
                warning!("disk: drive detection failed: {}", e);
                0
            }
        };
        self.drives.store(drives, Ordering::Relaxed);
        info!("disk: {} floppy drive(s)", drives);
        drives
    }

    /// Number of detected drives.
    #[inline]
    pub fn drives(&self) -> usize {
        self.drives.load(Ordering::Relaxed)
    }

    /// True while a request is in flight.
    #[inline]
    pub fn is_busy(&self) -> bool {
        self.inner.is_locked()
    }

    /// Step the last request reached.
    pub fn last_step(&self) -> Option<DiskStep> {
        self.inner.try_lock().ok().map(|inner| inner.step)
    }

    /// Carry out `req`.
    ///
    /// Fails with [`DiskError::Busy`] if another request is in flight. The
    /// controller is drained and `signal` cleared first, so nothing left by
    /// an earlier, abandoned command is attributed to this request.
    pub fn perform(&self, req: &DiskRequest, signal: &mut FloppySignal) -> Result<(), DiskError> {
        let mut inner = self.inner.try_lock().map_err(|_| DiskError::Busy)?;
        inner.step = DiskStep::Idle;
        if req.drive as usize >= self.drives() {
            return Err(DiskError::BadRequest);
        }
        let result = inner.run(req, signal);
        if let Err(e) = result {
            // The abandoned command may still complete; nothing waits for it.
            signal.reset();
            warning!(
                "disk: {:?} of {:?}:{} track {} sector {}: {}",
                req.operation,
                req.drive,
                req.side as u16,
                req.track,
                req.sector,
                e
            );
        }
        result
    }

    /// Read and discard the controller and DMA status, as the completion
    /// interrupt must. Returns `None` while a request is in flight; its
    /// own polling consumes the status then.
    pub fn acknowledge(&self) -> Option<(Status, dma::Status)> {
        self.inner.try_lock().ok().map(|inner| inner.fdc.acknowledge())
    }

    #[cfg(test)]
    pub(crate) fn hold(&self) -> SpinLockGuard<'_, Inner<'m, M>> {
        self.inner.lock()
    }
}
