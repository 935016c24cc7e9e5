//! Machine entry and exception glue.
//!
//! ```text
//!  reset ──> _start ──> rust_main ──> toyos_dispatch ──> resume(ctx) ──> user
//!                                          ^                              │
//!                       Schedule           │                  exception  │
//!  toyos_common <─────────────────────────────── stub N <─────────────────┘
//!       │ Resume: rte
//!       └──> toyos_vector(N, frame) ──> Kernel::on_vector
//! ```
//!
//! Every vector from 2 up has a two instruction stub that pushes its number
//! and jumps to `toyos_common`. The common entry saves the registers into a
//! [`CpuContext`] on the supervisor stack and hands it to the kernel. If the
//! kernel decides to resume, the (possibly updated) context is restored and
//! the exception returns; otherwise the supervisor stack is reset and the
//! dispatcher picks a process.
//!
//! The program images, the console and the keyboard are provided by the
//! final image through the `programs`, `console` and `keyboard` symbols.
use crate::config::{Config, KERNEL_STACK_TOP};
use crate::console::{Console, Keyboard};
use crate::disk::Disk;
use crate::kernel::{Disposition, Kernel};
use crate::panicking::restart_after;
use abyss::dev::mmio::Bus;
use abyss::dev::st::fdc::Fdc;
use abyss::dev::st::AtariSt;
use abyss::interrupt::{self, Ipl};
use abyss::m68k::context::{resume, CpuContext};
use abyss::m68k::intrinsics::wait_for_interrupt;
use abyss::m68k::vector;
use abyss::spin_lock::SpinLock;

extern "Rust" {
    /// Entry points of the programs processes can be created from.
    fn programs() -> &'static [u32];
    /// The screen.
    fn console() -> &'static dyn Console;
    /// The keyboard, if the image has a driver for it.
    fn keyboard() -> Option<&'static dyn Keyboard>;
}

extern "C" {
    /// Stub addresses by vector number. Entries 0 and 1 are the reset
    /// vectors and are left alone.
    static toyos_stubs: [u32; vector::COUNT];
}

// Safety: created once, and the kernel only ever runs in supervisor mode.
static MACHINE: AtariSt = unsafe { AtariSt::new() };

static DISK: Disk<'static, AtariSt> = Disk::new(Fdc::new(&MACHINE, Config::ST.fdc_spin_limit));

static KERNEL: SpinLock<Option<Kernel<'static, AtariSt>>> = SpinLock::new(None);

core::arch::global_asm!(
    r#"
    .section .text.boot, "ax"
    .global _start
_start:
    move.w #0x2700, %sr
    move.l #{stack}, %sp
    jmp rust_main

    .text
    .global toyos_common
toyos_common:
    move.w #0x2700, %sr
    lea -70(%sp), %sp
    movem.l %d0-%d7/%a1-%a6, 10(%sp)
    move.l %a0, 66(%sp)
    move.l %usp, %a0
    move.l %a0, 6(%sp)
    move.w 72(%sp), 4(%sp)
    move.l 74(%sp), 0(%sp)
    move.l %sp, -(%sp)
    moveq #0, %d0
    move.w 74(%sp), %d0
    move.l %d0, -(%sp)
    jsr toyos_vector
    addq.l #8, %sp
    tst.l %d0
    bne 1f
    move.l 6(%sp), %a0
    move.l %a0, %usp
    move.w 4(%sp), 72(%sp)
    move.l 0(%sp), 74(%sp)
    movem.l 10(%sp), %d0-%d7/%a1-%a6
    move.l 66(%sp), %a0
    lea 72(%sp), %sp
    rte
1:
    move.l #{stack}, %sp
    jmp toyos_dispatch

toyos_stub_2:
    addq.l #8, %sp
    move.w #2, -(%sp)
    bra.w toyos_common
toyos_stub_3:
    addq.l #8, %sp
    move.w #3, -(%sp)
    bra.w toyos_common
    .irp n, 4,5,6,7,8,9,10,11,12,13,14,15,16,17,18,19,20,21,22,23,24,25,26,27,28,29,30,31,32,33,34,35,36,37,38,39,40,41,42,43,44,45,46,47,48,49,50,51,52,53,54,55,56,57,58,59,60,61,62,63,64,65,66,67,68,69,70,71,72,73,74,75,76,77,78,79
toyos_stub_\n:
    move.w #\n, -(%sp)
    bra.w toyos_common
    .endr

    .section .rodata
    .balign 4
    .global toyos_stubs
toyos_stubs:
    .long 0, 0
    .irp n, 2,3,4,5,6,7,8,9,10,11,12,13,14,15,16,17,18,19,20,21,22,23,24,25,26,27,28,29,30,31,32,33,34,35,36,37,38,39,40,41,42,43,44,45,46,47,48,49,50,51,52,53,54,55,56,57,58,59,60,61,62,63,64,65,66,67,68,69,70,71,72,73,74,75,76,77,78,79
    .long toyos_stub_\n
    .endr
    "#,
    stack = const KERNEL_STACK_TOP,
);

/// Point vectors 2 and up at their stubs.
fn install_vectors() {
    // Safety: the table is immutable and defined above.
    let stubs = unsafe { &toyos_stubs };
    for (n, stub) in stubs.iter().enumerate().skip(2) {
        let addr = n as u32 * 4;
        MACHINE.write_u16(addr, (stub >> 16) as u16);
        MACHINE.write_u16(addr + 2, *stub as u16);
    }
}

#[no_mangle]
extern "C" fn rust_main() -> ! {
    // Safety: provided by the final image.
    let (programs, console, keyboard) = unsafe { (programs(), console(), keyboard()) };
    abyss::kprint::set_console(console);
    info!("TOY OS");
    install_vectors();

    let mut kernel = Kernel::new(&MACHINE, console, &DISK, programs, Config::ST);
    if let Some(keyboard) = keyboard {
        kernel = kernel.with_keyboard(keyboard);
    }
    if let Err(e) = kernel.init() {
        panic!("boot failed: {}", e);
    }
    *KERNEL.lock() = Some(kernel);
    toyos_dispatch()
}

/// Called by `toyos_common` with interrupts masked. Returns 0 to resume
/// `frame`, anything else to dispatch.
#[no_mangle]
extern "C" fn toyos_vector(vector: u32, frame: &mut CpuContext) -> u32 {
    let disposition = match KERNEL.try_lock() {
        Ok(mut kernel) => match kernel.as_mut() {
            Some(k) => k.on_vector(vector as u8, frame),
            None => Disposition::Panic,
        },
        // The kernel faulted while holding itself.
        Err(_) => Disposition::Panic,
    };
    match disposition {
        Disposition::Resume => 0,
        Disposition::Schedule => 1,
        Disposition::Panic => {
            abyss::println!("exception {} at {:#x}", vector, frame.pc());
            restart_after(Config::ST.panic_restart_delay)
        }
    }
}

/// Run the next ready process, idling until one is.
#[no_mangle]
extern "C" fn toyos_dispatch() -> ! {
    loop {
        interrupt::set(&MACHINE, Ipl::L7);
        let next = KERNEL.lock().as_mut().and_then(|k| k.schedule());
        match next {
            // Safety: the context was saved by the entry glue or built by
            // the process table.
            Some(ctx) => unsafe { resume(&ctx) },
            None => wait_for_interrupt(),
        }
    }
}
