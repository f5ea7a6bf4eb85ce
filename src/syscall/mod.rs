//! Syscall ABI metadata, and rendering of observed calls in a trace-style format.

use std::borrow::Cow;

pub mod errno;
pub mod flags;
pub mod render;
pub mod table;

pub use render::{render_enter, render_exit, render_call};
pub use table::SyscallTable;

/// The semantic type of a syscall argument, which selects how it is rendered.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ArgType {
    Int,
    Pointer,
    Buffer,
    /// Pointer to a NUL-terminated string.
    Str,
    Flags,
    /// File mode bits, rendered in octal.
    Mode,
    Fd,
    Pid,
    Size,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Arg {
    pub name: &'static str,
    pub ty: ArgType,
}

/// Static description of one syscall on one architecture.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SyscallInfo {
    pub number: u64,
    pub name: Cow<'static, str>,
    pub args: &'static [Arg],
}

impl SyscallInfo {
    /// Placeholder for a syscall number missing from the table.
    pub fn unknown(number: u64) -> Self {
        Self {
            number,
            name: Cow::Owned(format!("syscall_{number}")),
            args: &[],
        }
    }

    pub fn arg_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.args.iter().map(|a| a.name)
    }

    pub fn arg_types(&self) -> impl Iterator<Item = ArgType> + '_ {
        self.args.iter().map(|a| a.ty)
    }
}
