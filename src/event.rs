//! Classification of `waitpid(2)` results into tracee stops.

use std::convert::TryFrom;
use std::fmt;

use crate::status;
use crate::{Pid, Signal};

/// Sub-event codes delivered in `status[31:16]` of a ptrace-event-stop.
pub const EVENT_FORK: i32 = 1;
pub const EVENT_VFORK: i32 = 2;
pub const EVENT_CLONE: i32 = 3;
pub const EVENT_EXEC: i32 = 4;
pub const EVENT_VFORK_DONE: i32 = 5;
pub const EVENT_EXIT: i32 = 6;
pub const EVENT_SECCOMP: i32 = 7;
pub const EVENT_STOP: i32 = 128;

/// Stop signal of a syscall-stop, when `PTRACE_O_TRACESYSGOOD` is set.
const SYSCALL_TRAP: i32 = libc::SIGTRAP | 0x80;

/// A single state change reported by `waitpid(2)`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Event {
    pub pid: Pid,
    pub status: i32,
}

impl Event {
    pub fn new(pid: Pid, status: i32) -> Self {
        Self { pid, status }
    }

    pub fn is_exited(&self) -> bool {
        status::exited(self.status)
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.is_exited().then(|| status::exit_code(self.status))
    }

    pub fn is_signaled(&self) -> bool {
        status::signaled(self.status)
    }

    pub fn term_signal(&self) -> Option<i32> {
        self.is_signaled().then(|| status::term_signal(self.status))
    }

    pub fn core_dumped(&self) -> bool {
        status::core_dumped(self.status)
    }

    /// True if the tracee has terminated, by exit or by signal.
    pub fn is_terminated(&self) -> bool {
        self.is_exited() || self.is_signaled()
    }

    pub fn is_stopped(&self) -> bool {
        status::stopped(self.status)
    }

    pub fn stop_signal(&self) -> Option<i32> {
        self.is_stopped().then(|| status::stop_signal(self.status))
    }

    pub fn is_continued(&self) -> bool {
        status::continued(self.status)
    }

    /// A syscall-enter-stop or syscall-exit-stop. The two are indistinguishable here.
    pub fn is_syscall_stop(&self) -> bool {
        self.stop_signal() == Some(SYSCALL_TRAP)
    }

    /// The ptrace event code in `status[31:16]`, zero if this is not a ptrace-event-stop.
    pub fn event_code(&self) -> i32 {
        (self.status >> 16) & 0xffff
    }

    fn is_event(&self, code: i32) -> bool {
        self.is_stopped() && self.event_code() == code
    }

    pub fn is_fork(&self) -> bool {
        self.is_event(EVENT_FORK)
    }

    pub fn is_vfork(&self) -> bool {
        self.is_event(EVENT_VFORK)
    }

    pub fn is_clone(&self) -> bool {
        self.is_event(EVENT_CLONE)
    }

    pub fn is_exec(&self) -> bool {
        self.is_event(EVENT_EXEC)
    }

    pub fn is_vfork_done(&self) -> bool {
        self.is_event(EVENT_VFORK_DONE)
    }

    pub fn is_exit(&self) -> bool {
        self.is_event(EVENT_EXIT)
    }

    pub fn is_seccomp(&self) -> bool {
        self.is_event(EVENT_SECCOMP)
    }

    /// A group-stop or `PTRACE_INTERRUPT` stop of a seized tracee.
    pub fn is_event_stop(&self) -> bool {
        self.is_event(EVENT_STOP)
    }

    /// A new traced task was created by `fork()`, `vfork()`, or `clone()`.
    pub fn is_fork_like(&self) -> bool {
        self.is_fork() || self.is_vfork() || self.is_clone()
    }

    /// A stop that delivers a signal to the tracee, as opposed to a syscall-stop or
    /// ptrace-event-stop. Restarting the tracee should usually pass the signal on.
    pub fn delivered_signal(&self) -> Option<Signal> {
        if !self.is_stopped() || self.is_syscall_stop() || self.event_code() != 0 {
            return None;
        }

        self.stop_signal().and_then(|sig| Signal::try_from(sig).ok())
    }
}

fn signal_name(sig: i32) -> String {
    Signal::try_from(sig)
        .map(|s| s.as_str().to_owned())
        .unwrap_or_else(|_| format!("signal {sig}"))
}

fn event_name(code: i32) -> &'static str {
    match code {
        EVENT_FORK => "fork",
        EVENT_VFORK => "vfork",
        EVENT_CLONE => "clone",
        EVENT_EXEC => "exec",
        EVENT_VFORK_DONE => "vfork-done",
        EVENT_EXIT => "exit",
        EVENT_SECCOMP => "seccomp",
        EVENT_STOP => "stop",
        _ => "unknown",
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pid = self.pid;

        if let Some(code) = self.exit_code() {
            write!(f, "pid {pid}: exited with code {code}")
        } else if let Some(sig) = self.term_signal() {
            let core = if self.core_dumped() { " (core dumped)" } else { "" };
            write!(f, "pid {pid}: killed by {}{core}", signal_name(sig))
        } else if self.is_continued() {
            write!(f, "pid {pid}: continued")
        } else if self.is_syscall_stop() {
            write!(f, "pid {pid}: syscall-stop")
        } else if self.is_stopped() && self.event_code() != 0 {
            let code = self.event_code();
            write!(f, "pid {pid}: ptrace-event-stop ({}, {code})", event_name(code))
        } else {
            let sig = status::stop_signal(self.status);
            write!(f, "pid {pid}: stopped by {}", signal_name(sig))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stop(sig: i32, code: i32) -> Event {
        Event::new(Pid::from_raw(10), (code << 16) | (sig << 8) | 0x7f)
    }

    #[test]
    fn test_syscall_stop() {
        let evt = stop(libc::SIGTRAP | 0x80, 0);
        assert!(evt.is_stopped());
        assert!(evt.is_syscall_stop());
        assert_eq!(evt.event_code(), 0);
        assert_eq!(evt.delivered_signal(), None);

        let plain = stop(libc::SIGTRAP, 0);
        assert!(!plain.is_syscall_stop());
        assert_eq!(plain.delivered_signal(), Some(Signal::SIGTRAP));
    }

    #[test]
    fn test_ptrace_events() {
        assert!(stop(libc::SIGTRAP, EVENT_FORK).is_fork());
        assert!(stop(libc::SIGTRAP, EVENT_VFORK).is_vfork());
        assert!(stop(libc::SIGTRAP, EVENT_CLONE).is_clone());
        assert!(stop(libc::SIGTRAP, EVENT_EXEC).is_exec());
        assert!(stop(libc::SIGTRAP, EVENT_VFORK_DONE).is_vfork_done());
        assert!(stop(libc::SIGTRAP, EVENT_EXIT).is_exit());
        assert!(stop(libc::SIGTRAP, EVENT_SECCOMP).is_seccomp());
        assert!(stop(libc::SIGSTOP, EVENT_STOP).is_event_stop());

        for code in [EVENT_FORK, EVENT_VFORK, EVENT_CLONE] {
            assert!(stop(libc::SIGTRAP, code).is_fork_like());
        }
        for code in [EVENT_EXEC, EVENT_VFORK_DONE, EVENT_EXIT, EVENT_SECCOMP] {
            let evt = stop(libc::SIGTRAP, code);
            assert!(!evt.is_fork_like());
            assert_eq!(evt.delivered_signal(), None);
        }
    }

    #[test]
    fn test_terminations() {
        let pid = Pid::from_raw(7);

        let exited = Event::new(pid, 42 << 8);
        assert!(exited.is_exited());
        assert!(exited.is_terminated());
        assert_eq!(exited.exit_code(), Some(42));
        assert_eq!(exited.to_string(), "pid 7: exited with code 42");

        let killed = Event::new(pid, libc::SIGSEGV | 0x80);
        assert!(killed.is_signaled());
        assert!(killed.core_dumped());
        assert_eq!(killed.term_signal(), Some(libc::SIGSEGV));
        assert_eq!(killed.to_string(), "pid 7: killed by SIGSEGV (core dumped)");
        assert!(!killed.is_fork_like());
    }

    #[test]
    fn test_summary() {
        assert_eq!(stop(libc::SIGTRAP | 0x80, 0).to_string(), "pid 10: syscall-stop");
        assert_eq!(stop(libc::SIGTRAP, EVENT_CLONE).to_string(), "pid 10: ptrace-event-stop (clone, 3)");
        assert_eq!(stop(libc::SIGCHLD, 0).to_string(), "pid 10: stopped by SIGCHLD");
        assert_eq!(Event::new(Pid::from_raw(10), 0xffff).to_string(), "pid 10: continued");
    }
}
