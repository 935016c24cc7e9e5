//! Exception vector table.
//!
//! The 68000 jumps through a table of 256 long words at address 0. The boot
//! glue points every vector the kernel knows of at a common entry stub that
//! pushes the vector number and the registers, and hands them to
//! [`Kernel::on_vector`](crate::kernel::Kernel::on_vector). What happens next
//! is decided by the [`Handler`] installed for the vector here.
use crate::panicking::FaultOutcome;
use abyss::m68k::context::CpuContext;
use abyss::m68k::vector;

/// Handler of one vector. `K` is the kernel state the handler runs on.
pub enum Handler<K> {
    /// Nothing is installed. Taking the exception is a kernel bug.
    Unhandled,
    /// A processor exception caused by the interrupted code.
    Fault(fn(&mut K, &mut CpuContext) -> FaultOutcome),
    /// A device interrupt. The interrupted context is not touched.
    Irq(fn(&mut K)),
    /// A `TRAP #n` system call. Arguments and results travel in the saved
    /// registers.
    Trap(fn(&mut K, &mut CpuContext)),
}

// Derives would require `K: Clone`.
impl<K> Clone for Handler<K> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K> Copy for Handler<K> {}

impl<K> core::fmt::Debug for Handler<K> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            Handler::Unhandled => "Unhandled",
            Handler::Fault(_) => "Fault",
            Handler::Irq(_) => "Irq",
            Handler::Trap(_) => "Trap",
        })
    }
}

/// Handlers of vectors 0 to [`vector::COUNT`].
pub struct VectorTable<K> {
    handlers: [Handler<K>; vector::COUNT],
}

impl<K> Default for VectorTable<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K> VectorTable<K> {
    /// A table with nothing installed.
    pub fn new() -> Self {
        Self {
            handlers: [Handler::Unhandled; vector::COUNT],
        }
    }

    /// Install `handler` for `vector`.
    ///
    /// # Panics
    /// Panics if `vector` is out of the table.
    pub fn install(&mut self, vector: u8, handler: Handler<K>) {
        self.handlers[vector as usize] = handler;
    }

    /// Install the same fault handler on a range of vectors.
    pub fn install_fault(
        &mut self,
        vectors: impl IntoIterator<Item = u8>,
        handler: fn(&mut K, &mut CpuContext) -> FaultOutcome,
    ) {
        for v in vectors {
            self.install(v, Handler::Fault(handler));
        }
    }

    /// Handler of `vector`. Vectors beyond the table are unhandled.
    #[inline]
    pub fn get(&self, vector: u8) -> Handler<K> {
        self.handlers
            .get(vector as usize)
            .copied()
            .unwrap_or(Handler::Unhandled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counter(u32);

    fn tick(k: &mut Counter) {
        k.0 += 1;
    }

    fn trap(k: &mut Counter, frame: &mut CpuContext) {
        k.0 += 10;
        frame.set_d(0, k.0);
    }

    fn fault(_: &mut Counter, _: &mut CpuContext) -> FaultOutcome {
        FaultOutcome::Terminate
    }

    #[test]
    fn dispatch() {
        let mut table = VectorTable::<Counter>::new();
        table.install(vector::TIMER_A, Handler::Irq(tick));
        table.install(vector::TRAP_BASE + 5, Handler::Trap(trap));
        table.install_fault(vector::ILLEGAL_INSTRUCTION..=vector::PRIVILEGE_VIOLATION, fault);

        let mut k = Counter(0);
        let mut frame = CpuContext::default();
        for v in 0..=u8::MAX {
            match table.get(v) {
                Handler::Irq(f) => f(&mut k),
                Handler::Trap(f) => f(&mut k, &mut frame),
                Handler::Fault(f) => assert_eq!(f(&mut k, &mut frame), FaultOutcome::Terminate),
                Handler::Unhandled => {}
            }
        }
        assert_eq!(k.0, 11);
        assert_eq!(frame.d(0), 10);
        assert!(matches!(table.get(vector::ZERO_DIVIDE), Handler::Fault(_)));
        assert!(matches!(table.get(vector::BUS_ERROR), Handler::Unhandled));
        assert!(matches!(table.get(200), Handler::Unhandled));
    }
}
