//! Round-robin scheduler.
//!
//! The scheduler owns the index of the last dispatched slot and the
//! reschedule request. Handlers never switch processes themselves: they
//! change process states and post a [`Reschedule`], and the exception
//! epilogue saves the interrupted context and calls [`Scheduler::pick_next`].
use super::{ProcessState, ProcessTable};
use crate::config::MAX_PROCESSES;

/// Reschedule request posted by a handler.
///
/// Requests only escalate: `Restart` is kept until the epilogue consumes it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Reschedule {
    /// Return to the interrupted context.
    No,
    /// Save the interrupted context and dispatch.
    Yes,
    /// Like `Yes`, but the interrupted system call is executed again from its
    /// `TRAP` instruction when the process is next dispatched.
    Restart,
}

/// The scheduler.
pub struct Scheduler {
    current: usize,
    resched: Reschedule,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    /// A scheduler whose first scan starts at slot 0.
    pub const fn new() -> Self {
        Self {
            current: MAX_PROCESSES - 1,
            resched: Reschedule::No,
        }
    }

    /// Slot of the last dispatched process.
    #[inline]
    pub fn current(&self) -> usize {
        self.current
    }

    /// Pending request.
    #[inline]
    pub fn pending(&self) -> Reschedule {
        self.resched
    }

    /// Post a request. A weaker request never replaces a stronger one.
    #[inline]
    pub fn request(&mut self, r: Reschedule) {
        self.resched = self.resched.max(r);
    }

    /// Consume the pending request.
    #[inline]
    pub fn take(&mut self) -> Reschedule {
        core::mem::replace(&mut self.resched, Reschedule::No)
    }

    /// Pick the next ready process after the current one, wrapping around,
    /// and mark it running.
    ///
    /// A process still marked running loses the CPU and becomes ready, so at
    /// most one process is running afterwards. Returns `None` if no process
    /// is ready; the caller waits for an interrupt and scans again.
    pub fn pick_next(&mut self, table: &mut ProcessTable) -> Option<usize> {
        if table.state(self.current) == ProcessState::Running {
            table.set_state(self.current, ProcessState::Ready);
        }
        let next = (1..=MAX_PROCESSES)
            .map(|i| (self.current + i) & (MAX_PROCESSES - 1))
            .find(|&slot| table.state(slot) == ProcessState::Ready)?;
        table.set_state(next, ProcessState::Running);
        self.current = next;
        self.resched = Reschedule::No;
        Some(next)
    }
}
