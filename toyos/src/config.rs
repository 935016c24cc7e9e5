//! Kernel configuration.
//!
//! Hardware addresses are fixed by the machine and live next to their
//! drivers in `abyss`. What remains here is the process table capacity, a
//! compile-time constant since the table is a plain array, and the knobs that
//! [`Config`] carries into the kernel at boot.
use abyss::m68k::Sr;
use core::ops::Range;

/// Capacity of the process table.
pub const MAX_PROCESSES: usize = 4;

const _: () = assert!(MAX_PROCESSES.is_power_of_two());

/// Top of the supervisor stack. The stack grows down towards the exception
/// vectors, which end at 0x400.
pub const KERNEL_STACK_TOP: u32 = 0x800;

/// Runtime configuration, constructed once at boot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// How many times the floppy driver polls the busy bit before it gives
    /// up on a command.
    pub fdc_spin_limit: u32,
    /// Top of the user stack region. Slot 0's stack starts here.
    pub user_stack_top: u32,
    /// Size of the stack region of each slot.
    pub user_stack_size: u32,
    /// Memory user buffers must lie in.
    pub user_memory: Range<u32>,
    /// Status register a new process starts with.
    pub initial_sr: Sr,
    /// Spin iterations between a kernel panic message and the restart.
    pub panic_restart_delay: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self::ST
    }
}

impl Config {
    /// Defaults for a 4 MiB Atari ST.
    pub const ST: Config = Config {
        fdc_spin_limit: 100_000,
        user_stack_top: 0x3f_8000,
        user_stack_size: 0x100,
        user_memory: 0x800..0x3f_8000,
        // User mode. Only the HBL is masked.
        initial_sr: Sr::I1,
        panic_restart_delay: 100_000,
    };

    /// Initial user stack pointer of `slot`.
    #[inline]
    pub fn stack_for(&self, slot: usize) -> u32 {
        self.user_stack_top - slot as u32 * self.user_stack_size
    }

    /// True if `len` bytes at `addr` lie entirely in user memory.
    pub fn is_user_range(&self, addr: u32, len: u32) -> bool {
        match addr.checked_add(len) {
            Some(end) => {
                addr >= self.user_memory.start && end <= self.user_memory.end
            }
            None => false,
        }
    }
}
