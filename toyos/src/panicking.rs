//! Fault and panic policy.
//!
//! A processor exception raised by a user process takes down that process
//! only. One raised by the kernel itself (the saved status register has the
//! supervisor bit set) leaves the kernel state untrustworthy, so the machine
//! prints a message, waits a moment, and restarts.
use abyss::m68k::context::CpuContext;

/// What to do about a processor exception.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FaultOutcome {
    /// Kill the faulting process and schedule another one.
    Terminate,
    /// Print "kernel panic!" and restart the machine.
    Panic,
}

impl FaultOutcome {
    /// Decide by who was running when the exception hit.
    #[inline]
    pub fn of(frame: &CpuContext) -> Self {
        if frame.sr().is_supervisor() {
            FaultOutcome::Panic
        } else {
            FaultOutcome::Terminate
        }
    }
}

/// Burn `iterations` spins, long enough to read a message on screen.
pub fn delay(iterations: u32) {
    for _ in 0..iterations {
        core::hint::spin_loop();
    }
}

/// Mask every interrupt, wait `iterations` spins, and restart through the
/// reset vector.
#[cfg(target_arch = "m68k")]
pub fn restart_after(iterations: u32) -> ! {
    // Safety: the kernel runs in supervisor mode.
    let cpu = unsafe { abyss::m68k::intrinsics::Cpu::new() };
    abyss::interrupt::set(&cpu, abyss::interrupt::Ipl::L7);
    delay(iterations);
    abyss::m68k::intrinsics::restart()
}

#[allow(dead_code)]
#[inline(never)]
#[cfg(all(target_arch = "m68k", not(test)))]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    abyss::println!("\n\n========== KERNEL PANIC!!! ==========\n{}", info);
    restart_after(crate::config::Config::default().panic_restart_delay)
}

#[cfg(test)]
mod tests {
    use super::*;
    use abyss::m68k::Sr;

    #[test]
    fn supervisor_faults_panic() {
        let user = CpuContext::new_user(0x1000, 0x3f_8000, Sr::empty());
        assert_eq!(FaultOutcome::of(&user), FaultOutcome::Terminate);
        let kernel = CpuContext::new_user(0x1000, 0x3f_8000, Sr::S | Sr::I2 | Sr::I1 | Sr::I0);
        assert_eq!(FaultOutcome::of(&kernel), FaultOutcome::Panic);
    }
}
