//! The narrow boundary where we issue raw `ptrace(2)` and `waitpid(2)` calls.
//!
//! Everything above this module deals in typed errors. Nothing below it is allowed to
//! leak an `errno`.

use std::fmt;

use libc::c_void;
use nix::errno::Errno;
use nix::sys::wait::WaitPidFlag;
use tracing::trace;

use crate::error::{Error, Result};
use crate::Pid;

#[cfg(any(target_os = "android", target_env = "musl"))]
type RawRequest = libc::c_int;

#[cfg(not(any(target_os = "android", target_env = "musl")))]
type RawRequest = libc::c_uint;

/// Suspend the tracee's seccomp filters. Not modeled by `nix`'s `Options`.
///
/// Defined in `include/uapi/linux/ptrace.h`.
pub const PTRACE_O_SUSPEND_SECCOMP: libc::c_int = 1 << 21;

/// A `ptrace(2)` request, with discriminants equal to the kernel ABI values.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[repr(u32)]
pub enum Request {
    TraceMe = 0,
    PeekText = 1,
    PeekData = 2,
    PeekUser = 3,
    PokeText = 4,
    PokeData = 5,
    PokeUser = 6,
    Cont = 7,
    Kill = 8,
    SingleStep = 9,
    GetRegs = 12,
    SetRegs = 13,
    GetFpRegs = 14,
    SetFpRegs = 15,
    Attach = 16,
    Detach = 17,
    Syscall = 24,
    SetOptions = 0x4200,
    GetEventMsg = 0x4201,
    GetSigInfo = 0x4202,
    SetSigInfo = 0x4203,
    GetRegSet = 0x4204,
    SetRegSet = 0x4205,
    Seize = 0x4206,
    Interrupt = 0x4207,
    Listen = 0x4208,
    PeekSigInfo = 0x4209,
    GetSigMask = 0x420a,
    SetSigMask = 0x420b,
    SeccompGetFilter = 0x420c,
    SeccompGetMetadata = 0x420d,
    GetSyscallInfo = 0x420e,
}

impl Request {
    pub fn name(self) -> &'static str {
        use Request::*;

        match self {
            TraceMe => "PTRACE_TRACEME",
            PeekText => "PTRACE_PEEKTEXT",
            PeekData => "PTRACE_PEEKDATA",
            PeekUser => "PTRACE_PEEKUSER",
            PokeText => "PTRACE_POKETEXT",
            PokeData => "PTRACE_POKEDATA",
            PokeUser => "PTRACE_POKEUSER",
            Cont => "PTRACE_CONT",
            Kill => "PTRACE_KILL",
            SingleStep => "PTRACE_SINGLESTEP",
            GetRegs => "PTRACE_GETREGS",
            SetRegs => "PTRACE_SETREGS",
            GetFpRegs => "PTRACE_GETFPREGS",
            SetFpRegs => "PTRACE_SETFPREGS",
            Attach => "PTRACE_ATTACH",
            Detach => "PTRACE_DETACH",
            Syscall => "PTRACE_SYSCALL",
            SetOptions => "PTRACE_SETOPTIONS",
            GetEventMsg => "PTRACE_GETEVENTMSG",
            GetSigInfo => "PTRACE_GETSIGINFO",
            SetSigInfo => "PTRACE_SETSIGINFO",
            GetRegSet => "PTRACE_GETREGSET",
            SetRegSet => "PTRACE_SETREGSET",
            Seize => "PTRACE_SEIZE",
            Interrupt => "PTRACE_INTERRUPT",
            Listen => "PTRACE_LISTEN",
            PeekSigInfo => "PTRACE_PEEKSIGINFO",
            GetSigMask => "PTRACE_GETSIGMASK",
            SetSigMask => "PTRACE_SETSIGMASK",
            SeccompGetFilter => "PTRACE_SECCOMP_GET_FILTER",
            SeccompGetMetadata => "PTRACE_SECCOMP_GET_METADATA",
            GetSyscallInfo => "PTRACE_GET_SYSCALL_INFO",
        }
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The kernel call that produced an error.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Call {
    Ptrace(Request),
    Wait,
}

impl fmt::Display for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Call::Ptrace(request) => write!(f, "ptrace({request})"),
            Call::Wait => f.write_str("waitpid"),
        }
    }
}

/// Issue a single `ptrace(2)` request.
///
/// `errno` is cleared first, since peek requests can legitimately return `-1`. A `-1`
/// result is only a failure if `errno` was set by the call.
///
/// # Safety
///
/// For requests which read or write tracer memory (e.g. `PTRACE_GETREGS`), `addr` or
/// `data` must point to a live buffer sized for `request`, as in `ptrace(2)`.
pub unsafe fn control(request: Request, pid: Pid, addr: u64, data: u64) -> Result<i64> {
    Errno::clear();

    let res = libc::ptrace(
        request as RawRequest,
        pid.as_raw(),
        addr as usize as *mut c_void,
        data as usize as *mut c_void,
    );

    if res == -1 {
        let errno = Errno::last();

        if errno as i32 != 0 {
            trace!(pid = pid.as_raw(), %request, %errno, "ptrace request failed");
            return Err(Error::from_errno(Call::Ptrace(request), pid, errno));
        }
    }

    Ok(res as i64)
}

/// Wait for a state change in `pid`, or in any child if `pid` is `-1`.
///
/// Returns the pid that changed state with its raw status word. With `WNOHANG`, a
/// returned pid of `0` means nothing changed. An `EINTR` is retried, never returned.
pub fn wait(pid: Pid, flags: WaitPidFlag) -> Result<(Pid, i32)> {
    let mut status: libc::c_int = 0;

    loop {
        // SAFETY: `status` outlives the call.
        let res = unsafe { libc::waitpid(pid.as_raw(), &mut status, flags.bits()) };

        match Errno::result(res) {
            Ok(changed) => return Ok((Pid::from_raw(changed), status)),
            Err(Errno::EINTR) => {
                trace!(pid = pid.as_raw(), "waitpid interrupted, retrying");
                continue;
            },
            Err(errno) => return Err(Error::from_errno(Call::Wait, pid, errno)),
        }
    }
}
