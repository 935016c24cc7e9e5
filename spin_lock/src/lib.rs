//! Uniprocessor spinlock.
//!
//! The kernel runs on a single 68000 core. A lock on a uniprocessor only has
//! to keep a second path of execution (an interrupt handler, or a process
//! preempted while holding the lock) out of the protected data, so the lock
//! state is a single flag. Callers that can race with interrupt handlers must
//! raise the interrupt priority level before taking the lock; otherwise a
//! handler spinning on a lock held by the code it interrupted never returns.
#![cfg_attr(not(test), no_std)]

mod unilock;

pub use unilock::*;
