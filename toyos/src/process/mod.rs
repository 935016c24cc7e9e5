//! Process table.
//!
//! There is no heap, so processes live in a fixed array of
//! [`MAX_PROCESSES`] descriptors indexed by slot. A slot in
//! [`ProcessState::Invalid`] is free.
//!
//! ```text
//!            create                 dispatch
//!  Invalid ----------> Ready <------------------> Running
//!     ^                  ^    preempt / yield        |
//!     |                  |                           | blocking read
//!     |                  +------- Blocked <----------+
//!     |                   line          |
//!     +---------------------------------+------ terminate (any state)
//! ```
//!
//! Process ids come from a counter and are never reused while the kernel
//! runs, so a stale [`Parent`] link is detected by comparing the pid.
pub mod scheduler;

use crate::config::{Config, MAX_PROCESSES};
use abyss::m68k::context::CpuContext;
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// State of a process slot.
#[repr(u16)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
pub enum ProcessState {
    /// Free slot.
    Invalid = 0,
    /// Waiting for the CPU.
    Ready = 1,
    /// On the CPU.
    Running = 2,
    /// Waiting for a line of input.
    Blocked = 3,
}

impl Default for ProcessState {
    fn default() -> Self {
        ProcessState::Invalid
    }
}

/// Process id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Pid(pub u16);

impl core::fmt::Display for Pid {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Weak link to the creator of a process.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Parent {
    /// Slot the parent occupied.
    pub slot: usize,
    /// Pid the parent had, to tell it from a later occupant of the slot.
    pub pid: Pid,
}

/// A process descriptor.
#[derive(Clone, Copy, Debug, Default)]
pub struct Process {
    /// Registers saved when the process last left the CPU.
    pub context: CpuContext,
    /// Scheduling state.
    pub state: ProcessState,
    /// Process id.
    pub pid: Pid,
    /// The creator, if any.
    pub parent: Option<Parent>,
}

/// Errors of process creation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessError {
    /// Every slot is occupied.
    TableFull,
    /// The program index names no program.
    NoSuchProgram,
}

impl core::fmt::Display for ProcessError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            ProcessError::TableFull => "process table full",
            ProcessError::NoSuchProgram => "no such program",
        })
    }
}

/// The fixed-capacity process table.
pub struct ProcessTable {
    slots: [Process; MAX_PROCESSES],
    next_pid: u16,
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessTable {
    /// An empty table.
    pub fn new() -> Self {
        Self {
            slots: [Process::default(); MAX_PROCESSES],
            next_pid: 1,
        }
    }

    /// Create a process starting at `entry`, created by the process in
    /// slot `creator`. Returns the slot.
    ///
    /// The first free slot is taken. A full table is reported, never
    /// blocked on.
    pub fn create(
        &mut self,
        entry: u32,
        creator: Option<usize>,
        config: &Config,
    ) -> Result<usize, ProcessError> {
        let slot = self
            .slots
            .iter()
            .position(|p| p.state == ProcessState::Invalid)
            .ok_or(ProcessError::TableFull)?;
        let parent = creator
            .and_then(|c| self.get(c).map(|p| (c, p)))
            .filter(|(_, p)| p.state != ProcessState::Invalid)
            .map(|(c, p)| Parent { slot: c, pid: p.pid });
        // Fewer live processes than pids, so this ends.
        while self.next_pid == 0 || self.find(Pid(self.next_pid)).is_some() {
            self.next_pid = self.next_pid.wrapping_add(1);
        }
        let pid = Pid(self.next_pid);
        self.next_pid = self.next_pid.wrapping_add(1);
        self.slots[slot] = Process {
            context: CpuContext::new_user(entry, config.stack_for(slot), config.initial_sr),
            state: ProcessState::Ready,
            pid,
            parent,
        };
        debug!("created process {} in slot {}", pid, slot);
        Ok(slot)
    }

    /// Descriptor in `slot`.
    #[inline]
    pub fn get(&self, slot: usize) -> Option<&Process> {
        self.slots.get(slot)
    }

    /// Mutable descriptor in `slot`.
    #[inline]
    pub fn get_mut(&mut self, slot: usize) -> Option<&mut Process> {
        self.slots.get_mut(slot)
    }

    /// State of `slot`. Out of range slots read as invalid.
    #[inline]
    pub fn state(&self, slot: usize) -> ProcessState {
        self.get(slot).map(|p| p.state).unwrap_or_default()
    }

    /// Change the state of an occupied slot.
    pub fn set_state(&mut self, slot: usize, state: ProcessState) {
        if let Some(p) = self.get_mut(slot) {
            if p.state != ProcessState::Invalid {
                p.state = state;
            }
        }
    }

    /// Free `slot` and return its parent link.
    pub fn terminate(&mut self, slot: usize) -> Option<Parent> {
        let p = self.get_mut(slot)?;
        if p.state == ProcessState::Invalid {
            return None;
        }
        p.state = ProcessState::Invalid;
        p.parent.take()
    }

    /// True if `parent` still names a live process.
    pub fn is_live(&self, parent: Parent) -> bool {
        self.get(parent.slot)
            .map_or(false, |p| p.state != ProcessState::Invalid && p.pid == parent.pid)
    }

    /// Slot of the live process `pid`.
    pub fn find(&self, pid: Pid) -> Option<usize> {
        self.slots
            .iter()
            .position(|p| p.state != ProcessState::Invalid && p.pid == pid)
    }

    /// Number of occupied slots.
    pub fn occupied(&self) -> usize {
        self.count(|s| s != ProcessState::Invalid)
    }

    /// Number of slots whose state satisfies `f`.
    pub fn count(&self, f: impl Fn(ProcessState) -> bool) -> usize {
        self.slots.iter().filter(|p| f(p.state)).count()
    }
}
