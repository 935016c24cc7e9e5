//! System calls.
//!
//! A process calls the kernel with `TRAP #n`, where `n` is the [`Syscall`]
//! number. Arguments are passed in `d1` and `d2`; the result comes back in
//! `d0`, negative on error (see [`SyscallError::code`]).
//!
//! Each call has a `sys_*` trampoline here that checks and unpacks the saved
//! registers, and a `do_*` operation on [`Kernel`] that does the work.
//! A call that has to wait asks for a restart: the process is suspended
//! with its program counter moved back onto the `TRAP`, so the whole call,
//! checks included, runs again when the process is next dispatched.
use crate::disk::{DiskError, DiskRequest, REQUEST_SIZE};
use crate::interrupt::{Handler, VectorTable};
use crate::kernel::Kernel;
use crate::process::ProcessError;
use abyss::dev::st::SECTOR_SIZE;
use abyss::dev::Machine;
use abyss::m68k::context::CpuContext;
use abyss::m68k::vector;
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// System call numbers.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
pub enum Syscall {
    /// `exit()`: terminate the caller.
    Exit = 1,
    /// `create_process(program, foreground) -> pid`.
    CreateProcess = 2,
    /// `write(buf, len) -> len`: print to the console.
    Write = 3,
    /// `read(buf, len) -> count`: read one line of keyboard input.
    Read = 4,
    /// `get_pid() -> pid`.
    GetPid = 5,
    /// `yield()`.
    Yield = 7,
    /// `disk_operation(request) -> 0`.
    DiskOperation = 9,
}

/// Highest `TRAP` number reserved for system calls.
pub const LAST_SYSCALL: u8 = 9;

impl Syscall {
    /// Exception vector of `TRAP #n` for this call.
    #[inline]
    pub const fn vector(self) -> u8 {
        vector::TRAP_BASE + self as u8
    }

    /// The call made through exception `vector`, if any.
    pub fn from_vector(vector: u8) -> Option<Self> {
        vector
            .checked_sub(vector::TRAP_BASE)
            .and_then(|n| Syscall::try_from(n).ok())
    }
}

/// Errors returned by system calls.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyscallError {
    /// The trap number is reserved for system calls but names none.
    UnknownSyscall,
    /// A buffer lies outside user memory.
    BadAddress,
    /// The process table is full.
    TableFull,
    /// No program has the requested index.
    NoSuchProgram,
    /// The disk request is malformed.
    BadRequest,
    /// The controller failed the disk request.
    DiskFailed,
}

impl SyscallError {
    /// Value returned in `d0`.
    pub const fn code(self) -> i32 {
        match self {
            SyscallError::UnknownSyscall => -1,
            SyscallError::BadAddress => -2,
            SyscallError::TableFull => -3,
            SyscallError::NoSuchProgram => -4,
            SyscallError::BadRequest => -5,
            SyscallError::DiskFailed => -6,
        }
    }
}

impl From<ProcessError> for SyscallError {
    fn from(e: ProcessError) -> Self {
        match e {
            ProcessError::TableFull => SyscallError::TableFull,
            ProcessError::NoSuchProgram => SyscallError::NoSuchProgram,
        }
    }
}

impl From<DiskError> for SyscallError {
    fn from(e: DiskError) -> Self {
        match e {
            DiskError::BadRequest => SyscallError::BadRequest,
            DiskError::Busy | DiskError::Failed { .. } => SyscallError::DiskFailed,
        }
    }
}

fn ret(frame: &mut CpuContext, result: Result<u32, SyscallError>) {
    let d0 = match result {
        Ok(v) => v,
        Err(e) => e.code() as u32,
    };
    frame.set_d(0, d0);
}

/// Install the trampolines. Reserved trap numbers without a call answer
/// [`SyscallError::UnknownSyscall`].
pub fn install<'a, M: Machine + ?Sized>(table: &mut VectorTable<Kernel<'a, M>>) {
    // Each arm is a distinct fn item; give them one pointer type.
    macro_rules! trampoline {
        ($f:ident) => {
            $f::<M> as fn(&mut Kernel<'a, M>, &mut CpuContext)
        };
    }

    for n in 1..=LAST_SYSCALL {
        let handler = match Syscall::try_from(n) {
            Ok(Syscall::Exit) => trampoline!(sys_exit),
            Ok(Syscall::CreateProcess) => trampoline!(sys_create_process),
            Ok(Syscall::Write) => trampoline!(sys_write),
            Ok(Syscall::Read) => trampoline!(sys_read),
            Ok(Syscall::GetPid) => trampoline!(sys_get_pid),
            Ok(Syscall::Yield) => trampoline!(sys_yield),
            Ok(Syscall::DiskOperation) => trampoline!(sys_disk_operation),
            Err(_) => trampoline!(sys_unknown),
        };
        table.install(vector::TRAP_BASE + n, Handler::Trap(handler));
    }
}

fn sys_unknown<M: Machine + ?Sized>(_k: &mut Kernel<'_, M>, frame: &mut CpuContext) {
    ret(frame, Err(SyscallError::UnknownSyscall));
}

fn sys_exit<M: Machine + ?Sized>(k: &mut Kernel<'_, M>, _frame: &mut CpuContext) {
    k.do_exit();
}

fn sys_create_process<M: Machine + ?Sized>(k: &mut Kernel<'_, M>, frame: &mut CpuContext) {
    let (program, foreground) = (frame.d(1) as usize, frame.d(2) != 0);
    let result = k
        .do_create_process(program, foreground)
        .map(|pid| pid.0 as u32)
        .map_err(SyscallError::from);
    ret(frame, result);
}

fn sys_write<M: Machine + ?Sized>(k: &mut Kernel<'_, M>, frame: &mut CpuContext) {
    let (buf, len) = (frame.d(1), frame.d(2));
    let result = if k.config().is_user_range(buf, len) {
        Ok(k.do_write(buf, len))
    } else {
        Err(SyscallError::BadAddress)
    };
    ret(frame, result);
}

fn sys_read<M: Machine + ?Sized>(k: &mut Kernel<'_, M>, frame: &mut CpuContext) {
    let (buf, len) = (frame.d(1), frame.d(2));
    if !k.config().is_user_range(buf, len) {
        return ret(frame, Err(SyscallError::BadAddress));
    }
    // Nothing to return if the caller was blocked or killed.
    if let Some(count) = k.do_read(buf, len) {
        ret(frame, Ok(count));
    }
}

fn sys_get_pid<M: Machine + ?Sized>(k: &mut Kernel<'_, M>, frame: &mut CpuContext) {
    let pid = k.do_get_pid();
    ret(frame, Ok(pid.0 as u32));
}

fn sys_yield<M: Machine + ?Sized>(k: &mut Kernel<'_, M>, frame: &mut CpuContext) {
    k.do_yield();
    ret(frame, Ok(0));
}

fn sys_disk_operation<M: Machine + ?Sized>(k: &mut Kernel<'_, M>, frame: &mut CpuContext) {
    let addr = frame.d(1);
    if !k.config().is_user_range(addr, REQUEST_SIZE as u32) {
        return ret(frame, Err(SyscallError::BadAddress));
    }
    let mut raw = [0; REQUEST_SIZE];
    k.copy_from_user(addr, &mut raw);
    let req = match DiskRequest::decode(&raw) {
        Ok(req) => req,
        Err(e) => return ret(frame, Err(e.into())),
    };
    if !k.config().is_user_range(req.buffer, SECTOR_SIZE as u32) {
        return ret(frame, Err(SyscallError::BadAddress));
    }
    match k.do_disk_operation(&req) {
        Ok(()) => ret(frame, Ok(0)),
        // Restarted once the disk is free.
        Err(DiskError::Busy) => {}
        Err(e) => ret(frame, Err(e.into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use abyss::dev::st::sim::SimSt;

    #[test]
    fn numbering() {
        assert_eq!(Syscall::Exit.vector(), 33);
        assert_eq!(Syscall::DiskOperation.vector(), 41);
        assert_eq!(Syscall::from_vector(36), Some(Syscall::Read));
        assert_eq!(Syscall::from_vector(38), None);
        assert_eq!(Syscall::from_vector(5), None);
        assert_eq!(u8::from(Syscall::Yield), 7);
    }

    #[test]
    fn error_codes_are_negative_and_distinct() {
        let all = [
            SyscallError::UnknownSyscall,
            SyscallError::BadAddress,
            SyscallError::TableFull,
            SyscallError::NoSuchProgram,
            SyscallError::BadRequest,
            SyscallError::DiskFailed,
        ];
        for (i, a) in all.iter().enumerate() {
            assert!(a.code() < 0);
            assert!(all[i + 1..].iter().all(|b| b.code() != a.code()));
        }
        assert_eq!(SyscallError::from(ProcessError::TableFull), SyscallError::TableFull);
    }

    #[test]
    fn install_covers_every_reserved_trap() {
        let mut table = VectorTable::<Kernel<'static, SimSt>>::new();
        install(&mut table);
        for n in 1..=LAST_SYSCALL {
            assert!(matches!(table.get(vector::TRAP_BASE + n), Handler::Trap(_)));
        }
        assert!(matches!(table.get(vector::TRAP_BASE), Handler::Unhandled));
        assert!(matches!(table.get(vector::TRAP_BASE + LAST_SYSCALL + 1), Handler::Unhandled));
    }
}
