//! The kernel state object.
//!
//! Everything the kernel knows lives in one [`Kernel`]: the process table,
//! the scheduler, the input queue, the foreground process, the disk and the
//! vector table. It is built once at boot and every exception goes through
//! [`Kernel::on_vector`].
//!
//! On the machine the kernel sits behind a lock that is only taken with the
//! interrupt mask at 7, so handlers run to completion one at a time and
//! never see each other's half-done updates.
use crate::config::Config;
use crate::console::{
    Console, ConsoleWriter, Enqueued, InputQueue, Keyboard, BS, INPUT_CAPACITY,
};
use crate::disk::{Disk, DiskError, DiskRequest, FloppySignal};
use crate::interrupt::{Handler, VectorTable};
use crate::panicking::FaultOutcome;
use crate::process::scheduler::{Reschedule, Scheduler};
use crate::process::{Parent, Pid, ProcessError, ProcessState, ProcessTable};
use crate::syscall;
use abyss::dev::st::fdc::Completion;
use abyss::dev::st::mfp::{self, Channel};
use abyss::dev::Machine;
use abyss::interrupt::{Ipl, IplGuard};
use abyss::m68k::context::CpuContext;
use abyss::m68k::vector;
use core::fmt::Write;

/// What the exception epilogue does after [`Kernel::on_vector`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition {
    /// Return to the interrupted context.
    Resume,
    /// The interrupted context was saved (or its process is gone); dispatch
    /// with [`Kernel::schedule`].
    Schedule,
    /// Restart the machine.
    Panic,
}

/// The kernel.
pub struct Kernel<'a, M: Machine + ?Sized> {
    m: &'a M,
    console: &'a dyn Console,
    keyboard: Option<&'a dyn Keyboard>,
    disk: &'a Disk<'a, M>,
    programs: &'a [u32],
    config: Config,
    table: ProcessTable,
    scheduler: Scheduler,
    input: InputQueue,
    foreground: Option<usize>,
    blocked_reader: Option<usize>,
    root: Option<Parent>,
    floppy: FloppySignal,
    vectors: VectorTable<Kernel<'a, M>>,
}

impl<'a, M: Machine + ?Sized> Kernel<'a, M> {
    /// Build the kernel. `programs` holds the entry points processes can be
    /// created from; the first one becomes the root process.
    pub fn new(
        m: &'a M,
        console: &'a dyn Console,
        disk: &'a Disk<'a, M>,
        programs: &'a [u32],
        config: Config,
    ) -> Self {
        let mut vectors: VectorTable<Self> = VectorTable::new();
        vectors.install_fault(
            [
                vector::BUS_ERROR,
                vector::ADDRESS_ERROR,
                vector::ILLEGAL_INSTRUCTION,
                vector::ZERO_DIVIDE,
                vector::CHK,
                vector::TRAPV,
                vector::PRIVILEGE_VIOLATION,
                vector::LINE_A,
                vector::LINE_F,
            ],
            fault::<M>,
        );
        vectors.install_fault(vector::TRAP_BASE..vector::TRAP_BASE + 16, fault::<M>);
        syscall::install(&mut vectors);
        vectors.install(vector::VBL, Handler::Irq(vbl::<M>));
        vectors.install(Channel::Ikbd.vector(), Handler::Irq(ikbd::<M>));
        vectors.install(Channel::Fdc.vector(), Handler::Irq(floppy::<M>));
        vectors.install(Channel::TimerA.vector(), Handler::Irq(timer::<M>));

        Self {
            m,
            console,
            keyboard: None,
            disk,
            programs,
            config,
            table: ProcessTable::new(),
            scheduler: Scheduler::new(),
            input: InputQueue::new(),
            foreground: None,
            blocked_reader: None,
            root: None,
            floppy: FloppySignal::new(),
            vectors,
        }
    }

    /// Feed keyboard interrupts from `keyboard`.
    pub fn with_keyboard(mut self, keyboard: &'a dyn Keyboard) -> Self {
        self.keyboard = Some(keyboard);
        self
    }

    /// Program the MFP, detect the drives and create the root process, which
    /// starts in the foreground.
    pub fn init(&mut self) -> Result<Pid, ProcessError> {
        info!("initialize interrupts...");
        {
            let _guard = IplGuard::new(self.m, Ipl::L7);
            mfp::init(self.m);
            for ch in [Channel::TimerA, Channel::Ikbd, Channel::Fdc] {
                mfp::enable(self.m, ch);
            }
        }
        info!("initialize disk...");
        self.disk.init();

        let entry = *self.programs.first().ok_or(ProcessError::NoSuchProgram)?;
        let slot = self.table.create(entry, None, &self.config)?;
        let pid = self.pid_of(slot);
        self.root = Some(Parent { slot, pid });
        self.foreground = Some(slot);
        info!("root process {} ready", pid);
        Ok(pid)
    }

    /// The configuration.
    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The process table.
    #[inline]
    pub fn table(&self) -> &ProcessTable {
        &self.table
    }

    /// Slot of the last dispatched process.
    #[inline]
    pub fn current(&self) -> usize {
        self.scheduler.current()
    }

    /// Slot of the process that receives keyboard input.
    #[inline]
    pub fn foreground(&self) -> Option<usize> {
        self.foreground
    }

    /// Slot of the process waiting for a line of input.
    #[inline]
    pub fn blocked_reader(&self) -> Option<usize> {
        self.blocked_reader
    }

    /// The disk.
    #[inline]
    pub fn disk(&self) -> &'a Disk<'a, M> {
        self.disk
    }

    /// Completion signal of the floppy interrupt.
    #[inline]
    pub fn floppy(&self) -> &FloppySignal {
        &self.floppy
    }

    fn pid_of(&self, slot: usize) -> Pid {
        self.table.get(slot).map(|p| p.pid).unwrap_or_default()
    }

    fn say(&self, args: core::fmt::Arguments<'_>) {
        let _ = writeln!(ConsoleWriter(self.console), "{}", args);
    }

    /// Copy user memory at `addr` into `buf`.
    pub fn copy_from_user(&self, addr: u32, buf: &mut [u8]) {
        for (i, b) in buf.iter_mut().enumerate() {
            *b = self.m.read_u8(addr + i as u32);
        }
    }

    /// Copy `buf` to user memory at `addr`.
    pub fn copy_to_user(&self, addr: u32, buf: &[u8]) {
        for (i, b) in buf.iter().enumerate() {
            self.m.write_u8(addr + i as u32, *b);
        }
    }

    /// Handle exception `vector` that interrupted `frame`.
    ///
    /// When the interrupted code was a process and a handler asked for a
    /// reschedule, `frame` is saved into that process first. A restart
    /// request rewinds the saved program counter onto the `TRAP`
    /// instruction. A process that no longer exists is not saved.
    pub fn on_vector(&mut self, vector: u8, frame: &mut CpuContext) -> Disposition {
        match self.vectors.get(vector) {
            Handler::Unhandled => {
                self.say(format_args!("unexpected exception {}", vector));
                self.say(format_args!("kernel panic!"));
                return Disposition::Panic;
            }
            Handler::Fault(f) => {
                if f(self, frame) == FaultOutcome::Panic {
                    return Disposition::Panic;
                }
            }
            Handler::Irq(f) => f(self),
            Handler::Trap(f) => f(self, frame),
        }

        // The idle loop scans again by itself once it is resumed.
        if frame.sr().is_supervisor() {
            return Disposition::Resume;
        }
        match self.scheduler.take() {
            Reschedule::No => Disposition::Resume,
            r => {
                let current = self.scheduler.current();
                if let Some(p) = self
                    .table
                    .get_mut(current)
                    .filter(|p| p.state != ProcessState::Invalid)
                {
                    p.context = *frame;
                    if r == Reschedule::Restart {
                        p.context.rewind_trap();
                    }
                }
                Disposition::Schedule
            }
        }
    }

    /// Pick the next process and return the context to resume it with.
    ///
    /// Returns `None` if no process is ready; the caller waits for an
    /// interrupt and calls again.
    pub fn schedule(&mut self) -> Option<CpuContext> {
        let _guard = IplGuard::new(self.m, Ipl::L7);
        let slot = self.scheduler.pick_next(&mut self.table)?;
        self.table.get(slot).map(|p| p.context)
    }

    /// Terminate the process in `slot`.
    ///
    /// If it was in the foreground, its parent takes over. An orphan hands
    /// the foreground to the root process instead, and if that is gone too,
    /// no process is in the foreground.
    pub fn terminate(&mut self, slot: usize) {
        let pid = self.pid_of(slot);
        let parent = self.table.terminate(slot);
        if self.foreground == Some(slot) {
            self.foreground = parent
                .filter(|p| self.table.is_live(*p))
                .or_else(|| self.root.filter(|r| self.table.is_live(*r)))
                .map(|p| p.slot);
        }
        if self.blocked_reader == Some(slot) {
            self.blocked_reader = None;
        }
        self.scheduler.request(Reschedule::Yes);
        debug!("process {} terminated", pid);
    }

    /// Add a typed character to the input queue and echo it. A completed
    /// line makes the blocked reader ready.
    pub fn enqueue_input(&mut self, ch: u8) {
        let _guard = IplGuard::new(self.m, Ipl::L6);
        match self.input.enqueue(ch) {
            Enqueued::Stored => self.console.emit_char(ch),
            Enqueued::Erased => {
                for c in [BS, b' ', BS] {
                    self.console.emit_char(c);
                }
            }
            Enqueued::Line => {
                self.console.emit_char(b'\r');
                self.console.emit_char(b'\n');
                if let Some(reader) = self.blocked_reader.take() {
                    if self.table.state(reader) == ProcessState::Blocked {
                        self.table.set_state(reader, ProcessState::Ready);
                    }
                }
            }
            Enqueued::Dropped => {}
        }
    }

    /// `exit()`.
    pub fn do_exit(&mut self) {
        self.terminate(self.scheduler.current());
    }

    /// `create_process(program, foreground)`.
    ///
    /// The new process takes the foreground only if asked to and if the
    /// caller holds it.
    pub fn do_create_process(
        &mut self,
        program: usize,
        foreground: bool,
    ) -> Result<Pid, ProcessError> {
        let entry = *self.programs.get(program).ok_or(ProcessError::NoSuchProgram)?;
        let caller = self.scheduler.current();
        let slot = match self.table.create(entry, Some(caller), &self.config) {
            Ok(slot) => slot,
            Err(e) => {
                self.say(format_args!("{}", e));
                return Err(e);
            }
        };
        if foreground && self.foreground == Some(caller) {
            self.foreground = Some(slot);
        }
        Ok(self.pid_of(slot))
    }

    /// `write(buf, len)`. The buffer has been checked.
    pub fn do_write(&mut self, buf: u32, len: u32) -> u32 {
        for addr in buf..buf + len {
            self.console.emit_char(self.m.read_u8(addr));
        }
        len
    }

    /// `read(buf, len)`. The buffer has been checked.
    ///
    /// Copies one complete line, without its carriage return, and returns
    /// its length. Without a complete line the caller blocks and the call is
    /// restarted once a line arrives; nothing is copied before that. Only the
    /// foreground process may read: any other caller is terminated. Returns
    /// `None` if the caller blocked or was terminated.
    pub fn do_read(&mut self, buf: u32, len: u32) -> Option<u32> {
        let _guard = IplGuard::new(self.m, Ipl::L6);
        let caller = self.scheduler.current();
        if self.foreground != Some(caller) {
            self.say(format_args!(
                "read attempted by background process {}",
                self.pid_of(caller)
            ));
            self.terminate(caller);
            return None;
        }
        let mut line = [0; INPUT_CAPACITY];
        let len = (len as usize).min(INPUT_CAPACITY);
        match self.input.read_line(&mut line[..len]) {
            Some(count) => {
                self.copy_to_user(buf, &line[..count]);
                Some(count as u32)
            }
            None => {
                self.table.set_state(caller, ProcessState::Blocked);
                self.blocked_reader = Some(caller);
                self.scheduler.request(Reschedule::Restart);
                None
            }
        }
    }

    /// `get_pid()`.
    pub fn do_get_pid(&self) -> Pid {
        self.pid_of(self.scheduler.current())
    }

    /// `yield()`.
    pub fn do_yield(&mut self) {
        self.table
            .set_state(self.scheduler.current(), ProcessState::Ready);
        self.scheduler.request(Reschedule::Yes);
    }

    /// `disk_operation(request)`. The buffer has been checked.
    ///
    /// While another request is in flight the caller is suspended and the
    /// call restarted when it is next dispatched. The completion posted for
    /// the previous request is consumed first.
    pub fn do_disk_operation(&mut self, req: &DiskRequest) -> Result<(), DiskError> {
        if let Some(outcome) = self.floppy.take() {
            debug!("floppy: previous request completed with {:?}", outcome);
        }
        let result = self.disk.perform(req, &mut self.floppy);
        if result == Err(DiskError::Busy) {
            self.table
                .set_state(self.scheduler.current(), ProcessState::Ready);
            self.scheduler.request(Reschedule::Restart);
        }
        result
    }
}

fn fault<M: Machine + ?Sized>(k: &mut Kernel<'_, M>, frame: &mut CpuContext) -> FaultOutcome {
    let outcome = FaultOutcome::of(frame);
    match outcome {
        FaultOutcome::Panic => {
            k.say(format_args!("kernel panic!"));
            debug!("{:?}", frame);
        }
        FaultOutcome::Terminate => {
            let current = k.scheduler.current();
            k.say(format_args!("fault in process {}", k.pid_of(current)));
            k.terminate(current);
        }
    }
    outcome
}

fn timer<M: Machine + ?Sized>(k: &mut Kernel<'_, M>) {
    let current = k.scheduler.current();
    if k.table.state(current) == ProcessState::Running {
        k.table.set_state(current, ProcessState::Ready);
        k.scheduler.request(Reschedule::Yes);
    }
    mfp::acknowledge(k.m, Channel::TimerA);
}

fn floppy<M: Machine + ?Sized>(k: &mut Kernel<'_, M>) {
    if let Some((status, dma)) = k.disk.acknowledge() {
        let completion = Completion::classify(status, k.floppy.kind());
        k.floppy.post(completion, dma);
    }
    mfp::acknowledge(k.m, Channel::Fdc);
}

fn ikbd<M: Machine + ?Sized>(k: &mut Kernel<'_, M>) {
    if let Some(keyboard) = k.keyboard {
        while let Some(ch) = keyboard.poll() {
            k.enqueue_input(ch);
        }
    }
    mfp::acknowledge(k.m, Channel::Ikbd);
}

fn vbl<M: Machine + ?Sized>(_k: &mut Kernel<'_, M>) {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::CR;
    use crate::disk::{DiskOperation, Outcome};
    use crate::syscall::{Syscall, SyscallError};
    use abyss::dev::st::fdc::{Fdc, Status};
    use abyss::dev::st::psg::{Drive, Side};
    use abyss::dev::st::sim::SimSt;
    use abyss::dev::st::SECTOR_SIZE;
    use abyss::m68k::Sr;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    const PROGRAMS: [u32; 3] = [0x1000, 0x2000, 0x3000];
    const BUF: u32 = 0x8000;

    #[derive(Default)]
    struct Screen(Mutex<Vec<u8>>);

    impl Console for Screen {
        fn emit_char(&self, ch: u8) {
            self.0.lock().unwrap().push(ch);
        }
    }

    impl Screen {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    #[derive(Default)]
    struct Keys(Mutex<VecDeque<u8>>);

    impl Keyboard for Keys {
        fn poll(&self) -> Option<u8> {
            self.0.lock().unwrap().pop_front()
        }
    }

    fn machine() -> SimSt {
        SimSt::new().with_drive(Drive::A)
    }

    fn boot<'a>(
        st: &'a SimSt,
        screen: &'a Screen,
        disk: &'a Disk<'a, SimSt>,
    ) -> Kernel<'a, SimSt> {
        let mut k = Kernel::new(st, screen, disk, &PROGRAMS, Config::default());
        assert_eq!(k.init(), Ok(Pid(1)));
        k
    }

    fn run(k: &mut Kernel<'_, SimSt>) -> CpuContext {
        k.schedule().expect("no process is ready")
    }

    /// Execute `TRAP #call` in the process running with `ctx`.
    fn trap(
        k: &mut Kernel<'_, SimSt>,
        ctx: &mut CpuContext,
        call: Syscall,
        d1: u32,
        d2: u32,
    ) -> Disposition {
        ctx.set_pc(ctx.pc() + 2);
        ctx.set_d(1, d1);
        ctx.set_d(2, d2);
        k.on_vector(call.vector(), ctx)
    }

    fn d0(ctx: &CpuContext) -> i32 {
        ctx.d(0) as i32
    }

    #[test]
    fn boot_starts_the_root_process() {
        let st = machine();
        let screen = Screen::default();
        let disk = Disk::new(Fdc::new(&st, 1000));
        let mut k = boot(&st, &screen, &disk);
        assert_eq!(k.disk().drives(), 1);
        assert_eq!(k.foreground(), Some(0));

        let ctx = run(&mut k);
        assert_eq!(ctx.pc(), PROGRAMS[0]);
        assert_eq!(ctx.usp(), k.config().stack_for(0));
        assert!(!ctx.sr().is_supervisor());
        assert_eq!(k.table().state(0), ProcessState::Running);
        assert_eq!(k.current(), 0);
    }

    #[test]
    fn boot_without_programs_fails() {
        let st = machine();
        let screen = Screen::default();
        let disk = Disk::new(Fdc::new(&st, 1000));
        let mut k = Kernel::new(&st, &screen, &disk, &[], Config::default());
        assert_eq!(k.init(), Err(ProcessError::NoSuchProgram));
    }

    #[test]
    fn create_process_and_get_pid() {
        let st = machine();
        let screen = Screen::default();
        let disk = Disk::new(Fdc::new(&st, 1000));
        let mut k = boot(&st, &screen, &disk);
        let mut ctx = run(&mut k);

        assert_eq!(trap(&mut k, &mut ctx, Syscall::GetPid, 0, 0), Disposition::Resume);
        assert_eq!(d0(&ctx), 1);
        assert_eq!(trap(&mut k, &mut ctx, Syscall::CreateProcess, 1, 0), Disposition::Resume);
        assert_eq!(d0(&ctx), 2);
        assert_eq!(k.foreground(), Some(0));
        assert_eq!(trap(&mut k, &mut ctx, Syscall::CreateProcess, 7, 0), Disposition::Resume);
        assert_eq!(d0(&ctx), SyscallError::NoSuchProgram.code());

        trap(&mut k, &mut ctx, Syscall::CreateProcess, 2, 0);
        trap(&mut k, &mut ctx, Syscall::CreateProcess, 2, 0);
        assert_eq!(k.table().occupied(), 4);
        assert_eq!(trap(&mut k, &mut ctx, Syscall::CreateProcess, 2, 0), Disposition::Resume);
        assert_eq!(d0(&ctx), SyscallError::TableFull.code());
        assert_eq!(k.table().occupied(), 4);
        assert!(screen.text().contains("process table full"));
    }

    #[test]
    fn unknown_syscall_is_an_error() {
        let st = machine();
        let screen = Screen::default();
        let disk = Disk::new(Fdc::new(&st, 1000));
        let mut k = boot(&st, &screen, &disk);
        let mut ctx = run(&mut k);
        ctx.set_pc(ctx.pc() + 2);
        assert_eq!(k.on_vector(vector::TRAP_BASE + 6, &mut ctx), Disposition::Resume);
        assert_eq!(d0(&ctx), SyscallError::UnknownSyscall.code());
        // Traps outside the system call range are faults.
        assert_eq!(k.on_vector(vector::TRAP_BASE + 12, &mut ctx), Disposition::Schedule);
        assert_eq!(k.table().state(0), ProcessState::Invalid);
    }

    #[test]
    fn write_goes_to_the_console() {
        let st = machine();
        let screen = Screen::default();
        let disk = Disk::new(Fdc::new(&st, 1000));
        let mut k = boot(&st, &screen, &disk);
        let mut ctx = run(&mut k);
        st.load(BUF, b"hello");
        trap(&mut k, &mut ctx, Syscall::Write, BUF, 5);
        assert_eq!(d0(&ctx), 5);
        assert!(screen.text().ends_with("hello"));

        trap(&mut k, &mut ctx, Syscall::Write, 0x100, 5);
        assert_eq!(d0(&ctx), SyscallError::BadAddress.code());
        trap(&mut k, &mut ctx, Syscall::Read, 0x3f_7fff, 2);
        assert_eq!(d0(&ctx), SyscallError::BadAddress.code());
    }

    #[test]
    fn yield_round_robin() {
        let st = machine();
        let screen = Screen::default();
        let disk = Disk::new(Fdc::new(&st, 1000));
        let mut k = boot(&st, &screen, &disk);
        let mut ctx = run(&mut k);
        trap(&mut k, &mut ctx, Syscall::CreateProcess, 1, 0);
        trap(&mut k, &mut ctx, Syscall::CreateProcess, 2, 0);

        let mut order = Vec::new();
        for _ in 0..6 {
            assert_eq!(trap(&mut k, &mut ctx, Syscall::Yield, 0, 0), Disposition::Schedule);
            ctx = run(&mut k);
            order.push(k.current());
            assert_eq!(k.table().count(|s| s == ProcessState::Running), 1);
        }
        assert_eq!(order, [1, 2, 0, 1, 2, 0]);
        // Yield returns 0 once the process runs again.
        assert_eq!(d0(&ctx), 0);
    }

    #[test]
    fn blocked_reader_wakes_on_carriage_return() {
        let st = machine();
        let screen = Screen::default();
        let disk = Disk::new(Fdc::new(&st, 1000));
        let mut k = boot(&st, &screen, &disk);
        let mut root = run(&mut k);
        trap(&mut k, &mut root, Syscall::CreateProcess, 1, 0);

        let trap_pc = root.pc();
        k.enqueue_input(b'h');
        assert_eq!(trap(&mut k, &mut root, Syscall::Read, BUF, 64), Disposition::Schedule);
        assert_eq!(k.table().state(0), ProcessState::Blocked);
        assert_eq!(k.blocked_reader(), Some(0));
        // The saved context re-executes the trap, arguments intact.
        let saved = k.table().get(0).unwrap().context;
        assert_eq!(saved.pc(), trap_pc);
        assert_eq!((saved.d(1), saved.d(2)), (BUF, 64));
        // Nothing of the unfinished line was handed over.
        assert_eq!(st.ram(BUF, 2), [0, 0]);

        let mut child = run(&mut k);
        assert_eq!(k.current(), 1);
        k.enqueue_input(b'i');
        assert_eq!(k.table().state(0), ProcessState::Blocked);
        k.enqueue_input(CR);
        assert_eq!(k.table().state(0), ProcessState::Ready);
        assert_eq!(k.table().state(1), ProcessState::Running);
        assert_eq!(k.blocked_reader(), None);
        assert!(screen.text().ends_with("hi\r\n"));

        assert!(st.interrupt(Channel::TimerA));
        assert_eq!(k.on_vector(vector::TIMER_A, &mut child), Disposition::Schedule);
        let mut root = run(&mut k);
        assert_eq!(k.current(), 0);
        assert_eq!(root.pc(), trap_pc);
        assert_eq!(trap(&mut k, &mut root, Syscall::Read, BUF, 64), Disposition::Resume);
        assert_eq!(d0(&root), 2);
        assert_eq!(st.ram(BUF, 2), b"hi");
    }

    #[test]
    fn keyboard_interrupt_feeds_the_queue() {
        let st = machine();
        let screen = Screen::default();
        let keys = Keys::default();
        let disk = Disk::new(Fdc::new(&st, 1000));
        let mut k =
            Kernel::new(&st, &screen, &disk, &PROGRAMS, Config::default()).with_keyboard(&keys);
        k.init().unwrap();
        let mut root = run(&mut k);
        assert_eq!(trap(&mut k, &mut root, Syscall::Read, BUF, 64), Disposition::Schedule);
        assert!(k.schedule().is_none());

        keys.0.lock().unwrap().extend(b"ok\r");
        assert!(st.interrupt(Channel::Ikbd));
        // The idle loop was interrupted.
        let mut idle = CpuContext::new_user(0, 0, Sr::S);
        assert_eq!(k.on_vector(vector::IKBD, &mut idle), Disposition::Resume);
        assert!(!mfp::in_service(&st, Channel::Ikbd));

        let mut root = run(&mut k);
        trap(&mut k, &mut root, Syscall::Read, BUF, 64);
        assert_eq!(d0(&root), 2);
        assert_eq!(st.ram(BUF, 2), b"ok");
    }

    #[test]
    fn background_read_terminates_the_caller() {
        let st = machine();
        let screen = Screen::default();
        let disk = Disk::new(Fdc::new(&st, 1000));
        let mut k = boot(&st, &screen, &disk);
        let mut root = run(&mut k);
        trap(&mut k, &mut root, Syscall::CreateProcess, 1, 0);
        trap(&mut k, &mut root, Syscall::Yield, 0, 0);

        let mut child = run(&mut k);
        assert_eq!(trap(&mut k, &mut child, Syscall::Read, BUF, 8), Disposition::Schedule);
        assert!(screen.text().contains("read attempted by background process 2"));
        assert_eq!(k.table().state(1), ProcessState::Invalid);
        assert_eq!(k.foreground(), Some(0));
        run(&mut k);
        assert_eq!(k.current(), 0);
    }

    #[test]
    fn user_fault_terminates_the_process() {
        let st = machine();
        let screen = Screen::default();
        let disk = Disk::new(Fdc::new(&st, 1000));
        let mut k = boot(&st, &screen, &disk);
        let mut root = run(&mut k);
        assert_eq!(
            k.on_vector(vector::ILLEGAL_INSTRUCTION, &mut root),
            Disposition::Schedule
        );
        assert!(screen.text().contains("fault in process 1"));
        assert_eq!(k.table().state(0), ProcessState::Invalid);
        assert_eq!(k.foreground(), None);
        assert!(k.schedule().is_none());
    }

    #[test]
    fn kernel_fault_panics() {
        let st = machine();
        let screen = Screen::default();
        let disk = Disk::new(Fdc::new(&st, 1000));
        let mut k = boot(&st, &screen, &disk);
        run(&mut k);
        let mut frame = CpuContext::new_user(0x400, 0, Sr::S | Sr::I2 | Sr::I1 | Sr::I0);
        assert_eq!(k.on_vector(vector::BUS_ERROR, &mut frame), Disposition::Panic);
        assert!(screen.text().contains("kernel panic!"));
        assert_eq!(k.table().state(0), ProcessState::Running);

        assert_eq!(k.on_vector(vector::SPURIOUS, &mut frame), Disposition::Panic);
    }

    #[test]
    fn foreground_passes_to_parent_then_root() {
        let st = machine();
        let screen = Screen::default();
        let disk = Disk::new(Fdc::new(&st, 1000));
        let mut k = boot(&st, &screen, &disk);

        let mut root = run(&mut k);
        trap(&mut k, &mut root, Syscall::CreateProcess, 1, 1);
        assert_eq!(k.foreground(), Some(1));
        trap(&mut k, &mut root, Syscall::Yield, 0, 0);

        let mut a = run(&mut k);
        assert_eq!(k.current(), 1);
        trap(&mut k, &mut a, Syscall::CreateProcess, 2, 1);
        assert_eq!(k.foreground(), Some(2));
        trap(&mut k, &mut a, Syscall::Exit, 0, 0);
        assert_eq!(k.foreground(), Some(2));

        // B's parent is gone: the root takes over.
        let mut b = run(&mut k);
        assert_eq!(k.current(), 2);
        trap(&mut k, &mut b, Syscall::Exit, 0, 0);
        assert_eq!(k.foreground(), Some(0));

        let mut root = run(&mut k);
        assert_eq!(k.current(), 0);
        trap(&mut k, &mut root, Syscall::CreateProcess, 1, 1);
        assert_eq!(k.foreground(), Some(1));
        trap(&mut k, &mut root, Syscall::Exit, 0, 0);
        assert_eq!(k.foreground(), Some(1));

        // Parent and root are both gone.
        let mut c = run(&mut k);
        assert_eq!(k.current(), 1);
        trap(&mut k, &mut c, Syscall::Exit, 0, 0);
        assert_eq!(k.foreground(), None);
        assert!(k.schedule().is_none());
    }

    #[test]
    fn background_process_cannot_give_away_the_foreground() {
        let st = machine();
        let screen = Screen::default();
        let disk = Disk::new(Fdc::new(&st, 1000));
        let mut k = boot(&st, &screen, &disk);
        let mut root = run(&mut k);
        trap(&mut k, &mut root, Syscall::CreateProcess, 1, 0);
        trap(&mut k, &mut root, Syscall::Yield, 0, 0);
        let mut child = run(&mut k);
        trap(&mut k, &mut child, Syscall::CreateProcess, 2, 1);
        assert_eq!(k.foreground(), Some(0));
    }

    #[test]
    fn timer_preempts_and_acknowledges() {
        let st = machine();
        let screen = Screen::default();
        let disk = Disk::new(Fdc::new(&st, 1000));
        let mut k = boot(&st, &screen, &disk);
        let mut root = run(&mut k);
        trap(&mut k, &mut root, Syscall::CreateProcess, 1, 0);
        root.set_d(5, 0xdead_beef);

        assert!(st.interrupt(Channel::TimerA));
        assert!(mfp::in_service(&st, Channel::TimerA));
        assert_eq!(k.on_vector(vector::TIMER_A, &mut root), Disposition::Schedule);
        assert!(!mfp::in_service(&st, Channel::TimerA));
        assert_eq!(k.table().state(0), ProcessState::Ready);
        // Preemption saves the context as is.
        assert_eq!(k.table().get(0).unwrap().context, root);

        run(&mut k);
        assert_eq!(k.current(), 1);
        assert_eq!(k.table().count(|s| s == ProcessState::Running), 1);
    }

    #[test]
    fn timer_while_idle_resumes_the_idle_loop() {
        let st = machine();
        let screen = Screen::default();
        let disk = Disk::new(Fdc::new(&st, 1000));
        let mut k = boot(&st, &screen, &disk);
        let mut idle = CpuContext::new_user(0, 0, Sr::S);
        assert!(st.interrupt(Channel::TimerA));
        assert_eq!(k.on_vector(vector::TIMER_A, &mut idle), Disposition::Resume);
        assert!(!mfp::in_service(&st, Channel::TimerA));
        assert_eq!(k.on_vector(vector::VBL, &mut idle), Disposition::Resume);
    }

    fn disk_request(
        k: &Kernel<'_, SimSt>,
        at: u32,
        operation: DiskOperation,
        track: u8,
        buffer: u32,
    ) {
        let req = DiskRequest {
            operation,
            drive: Drive::A,
            side: Side::One,
            track,
            sector: 5,
            buffer,
        };
        k.copy_to_user(at, &req.encode());
    }

    #[test]
    fn disk_operation_round_trip() {
        let st = machine();
        let screen = Screen::default();
        let disk = Disk::new(Fdc::new(&st, 1000));
        let mut k = boot(&st, &screen, &disk);
        let mut root = run(&mut k);
        let pattern: Vec<u8> = (0..SECTOR_SIZE).map(|i| (i * 7) as u8).collect();

        st.load(0xa000, &pattern);
        disk_request(&k, 0x9000, DiskOperation::Write, 42, 0xa000);
        assert_eq!(trap(&mut k, &mut root, Syscall::DiskOperation, 0x9000, 0), Disposition::Resume);
        assert_eq!(d0(&root), 0);
        assert_eq!(st.sector(Drive::A, Side::One, 42, 5), pattern);

        disk_request(&k, 0x9000, DiskOperation::Read, 42, 0xb000);
        trap(&mut k, &mut root, Syscall::DiskOperation, 0x9000, 0);
        assert_eq!(d0(&root), 0);
        assert_eq!(st.ram(0xb000, SECTOR_SIZE), pattern);

        // The completion interrupt arrives once the kernel unmasks it.
        assert!(st.interrupt(Channel::Fdc));
        assert_eq!(k.on_vector(vector::FDC, &mut root), Disposition::Resume);
        assert!(k.floppy().is_complete());
        assert!(k.floppy().outcome().contains(Outcome::READ_DONE));
        assert!(!mfp::in_service(&st, Channel::Fdc));
    }

    #[test]
    fn disk_operation_errors() {
        let st = machine();
        let screen = Screen::default();
        let disk = Disk::new(Fdc::new(&st, 1000));
        let mut k = boot(&st, &screen, &disk);
        let mut root = run(&mut k);

        disk_request(&k, 0x9000, DiskOperation::Read, 80, 0xa000);
        trap(&mut k, &mut root, Syscall::DiskOperation, 0x9000, 0);
        assert_eq!(d0(&root), SyscallError::BadRequest.code());

        disk_request(&k, 0x9000, DiskOperation::Read, 1, 0x100);
        trap(&mut k, &mut root, Syscall::DiskOperation, 0x9000, 0);
        assert_eq!(d0(&root), SyscallError::BadAddress.code());

        trap(&mut k, &mut root, Syscall::DiskOperation, 0x10, 0);
        assert_eq!(d0(&root), SyscallError::BadAddress.code());

        st.set_write_protect(Drive::A, true);
        disk_request(&k, 0x9000, DiskOperation::Write, 1, 0xa000);
        assert_eq!(trap(&mut k, &mut root, Syscall::DiskOperation, 0x9000, 0), Disposition::Resume);
        assert_eq!(d0(&root), SyscallError::DiskFailed.code());
        assert_eq!(k.table().state(0), ProcessState::Running);
    }

    #[test]
    fn late_completion_of_a_failed_request_is_discarded() {
        let st = machine();
        let screen = Screen::default();
        let disk = Disk::new(Fdc::new(&st, 1000));
        let mut k = boot(&st, &screen, &disk);
        let mut root = run(&mut k);

        st.set_busy_latency(1500);
        disk_request(&k, 0x9000, DiskOperation::Read, 9, 0xa000);
        trap(&mut k, &mut root, Syscall::DiskOperation, 0x9000, 0);
        assert_eq!(d0(&root), SyscallError::DiskFailed.code());

        while k.disk().acknowledge().unwrap().0.contains(Status::BUSY) {}
        assert!(st.interrupt(Channel::Fdc));
        assert_eq!(k.on_vector(vector::FDC, &mut root), Disposition::Resume);
        assert!(!k.floppy().is_complete());
        assert_eq!(k.floppy().outcome(), Outcome::empty());

        st.set_busy_latency(0);
        trap(&mut k, &mut root, Syscall::DiskOperation, 0x9000, 0);
        assert_eq!(d0(&root), 0);
    }

    #[test]
    fn busy_disk_restarts_the_call() {
        let st = machine();
        let screen = Screen::default();
        let disk = Disk::new(Fdc::new(&st, 1000));
        let mut k = boot(&st, &screen, &disk);
        let mut root = run(&mut k);
        disk_request(&k, 0x9000, DiskOperation::Read, 17, 0xa000);
        let trap_pc = root.pc();

        let held = disk.hold();
        assert_eq!(
            trap(&mut k, &mut root, Syscall::DiskOperation, 0x9000, 0),
            Disposition::Schedule
        );
        assert_eq!(k.table().state(0), ProcessState::Ready);
        assert_eq!(k.table().get(0).unwrap().context.pc(), trap_pc);
        drop(held);

        let mut root = run(&mut k);
        assert_eq!(root.pc(), trap_pc);
        assert_eq!(trap(&mut k, &mut root, Syscall::DiskOperation, 0x9000, 0), Disposition::Resume);
        assert_eq!(d0(&root), 0);
        assert_eq!(st.head(Drive::A), 17);
    }
}
