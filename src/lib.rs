//! Control and inspection of Linux processes via `ptrace(2)`.
//!
//! A [`Tracee`] is spawned, attached, or seized, then stopped and resumed with
//! chainable requests. Its registers are decoded per [`Arch`], its memory is read and
//! written at byte granularity, and its syscalls are decoded and rendered. The loops in
//! [`trace`] follow a process and its descendants, pairing each syscall's entry and
//! exit.

#[macro_use]
pub mod error;

pub mod arch;
pub mod breakpoint;
pub mod event;
pub mod maps;
pub mod memory;
pub mod regs;
pub mod seccomp;
pub mod status;
pub mod sys;
pub mod syscall;
pub mod trace;
pub mod tracee;

pub use nix::sys::ptrace::Options;
pub use nix::sys::wait::WaitPidFlag;
pub use nix::unistd::Pid;

/// POSIX signal.
pub use nix::sys::signal::Signal;

pub use arch::Arch;
pub use breakpoint::Breakpoint;
pub use error::{Error, Result};
pub use event::Event;
pub use regs::Registers;
pub use syscall::{SyscallInfo, SyscallTable};
pub use trace::{trace_descendants, trace_syscalls, Phase, SeccompEvent, SyscallEvent, TraceConfig, TraceEvent};
pub use tracee::{Siginfo, Tracee};
