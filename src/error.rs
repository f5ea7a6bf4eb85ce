use std::io;

use nix::errno::Errno;

use crate::arch::Arch;
use crate::sys::Call;
use crate::Pid;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Permission denied: {call} on pid = {pid}")]
    PermissionDenied { call: Call, pid: Pid },

    #[error("No such process: {call} on pid = {pid}")]
    NoSuchProcess { call: Call, pid: Pid },

    #[error("Tracee busy: {call} on pid = {pid}")]
    Busy { call: Call, pid: Pid },

    #[error("Invalid argument: {call} on pid = {pid}")]
    InvalidArgument { call: Call, pid: Pid },

    #[error("Control request failed: {call} on pid = {pid}, errno = {errno}")]
    Control { call: Call, pid: Pid, errno: Errno },

    #[error("Operation `{operation}` is not supported on {arch}")]
    UnsupportedArchitecture { arch: Arch, operation: &'static str },

    #[error("Unexpected tracee state for pid = {pid}: {reason}")]
    ProtocolViolation { pid: Pid, reason: String },

    #[error("No breakpoint is currently hit by pid = {pid}")]
    NoBreakpointHit { pid: Pid },

    #[error("Invalid input: {0}")]
    Input(String),

    #[error("Input/output error")]
    IO(#[from] io::Error),

    #[error("OS error")]
    OS(#[from] nix::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Translate an `errno` observed after `call` into the error taxonomy.
    pub(crate) fn from_errno(call: Call, pid: Pid, errno: Errno) -> Self {
        match errno {
            Errno::EPERM => Error::PermissionDenied { call, pid },
            Errno::ESRCH => Error::NoSuchProcess { call, pid },
            Errno::EBUSY => Error::Busy { call, pid },
            Errno::EINVAL => Error::InvalidArgument { call, pid },
            errno => Error::Control { call, pid, errno },
        }
    }

    /// True if the error means the tracee no longer exists (or is no longer stopped
    /// for us), so any further requests against it will also fail.
    pub fn tracee_died(&self) -> bool {
        matches!(self, Error::NoSuchProcess { .. })
    }
}

macro_rules! internal_error {
    ($msg: expr) => {
        return Err($crate::error::Error::Internal($msg.into()))
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sys::Request;

    #[test]
    fn test_errno_taxonomy() {
        let call = Call::Ptrace(Request::PeekData);
        let pid = Pid::from_raw(1);

        assert!(matches!(Error::from_errno(call, pid, Errno::EPERM), Error::PermissionDenied { .. }));
        assert!(matches!(Error::from_errno(call, pid, Errno::EBUSY), Error::Busy { .. }));
        assert!(matches!(Error::from_errno(call, pid, Errno::EINVAL), Error::InvalidArgument { .. }));

        let died = Error::from_errno(call, pid, Errno::ESRCH);
        assert!(died.tracee_died());

        match Error::from_errno(call, pid, Errno::EIO) {
            Error::Control { call: c, errno, .. } => {
                assert_eq!(c, call);
                assert_eq!(errno, Errno::EIO);
            },
            err => panic!("unexpected error: {err}"),
        }
    }
}
