//! Trace-style rendering of a single syscall, e.g. `openat(-100, "/etc/passwd", O_RDONLY) = 3`.

use super::errno::render_return;
use super::{flags, ArgType, SyscallInfo};
use crate::memory::{Memory, WordIo};

/// Longest string argument rendered before truncating with `...`.
pub const MAX_STRING: usize = 256;

const NULL: &str = "NULL";

/// Render `name(arg, ...)` from raw argument register values.
pub fn render_call<W: WordIo>(info: &SyscallInfo, args: &[u64], memory: &Memory<W>) -> String {
    let rendered: Vec<String> = info
        .args
        .iter()
        .zip(args)
        .map(|(arg, &value)| render_arg(info, arg.name, arg.ty, value, memory))
        .collect();

    format!("{}({})", info.name, rendered.join(", "))
}

/// Render a call that has entered but not yet returned.
pub fn render_enter<W: WordIo>(info: &SyscallInfo, args: &[u64], memory: &Memory<W>) -> String {
    format!("{} ...", render_call(info, args, memory))
}

/// Render a completed call with its return value.
pub fn render_exit<W: WordIo>(info: &SyscallInfo, args: &[u64], ret: i64, memory: &Memory<W>) -> String {
    format!("{} = {}", render_call(info, args, memory), render_return(ret))
}

fn pointer(value: u64) -> String {
    if value == 0 {
        NULL.into()
    } else {
        format!("{value:#x}")
    }
}

fn render_arg<W: WordIo>(info: &SyscallInfo, name: &str, ty: ArgType, value: u64, memory: &Memory<W>) -> String {
    match ty {
        ArgType::Str => string(value, memory),
        ArgType::Pointer | ArgType::Buffer => pointer(value),
        ArgType::Flags => flags::decode(&info.name, name, value).unwrap_or_else(|| format!("{value:#x}")),
        ArgType::Mode => {
            if value == 0 {
                "0".into()
            } else {
                format!("0{value:o}")
            }
        },
        ArgType::Int => (value as i64).to_string(),
        ArgType::Fd | ArgType::Pid => (value as i32).to_string(),
        ArgType::Size => value.to_string(),
    }
}

// Falls back to the raw pointer if the string can't be read.
fn string<W: WordIo>(addr: u64, memory: &Memory<W>) -> String {
    if addr == 0 {
        return NULL.into();
    }

    match memory.read_string(addr, MAX_STRING + 1) {
        Ok(mut data) => {
            let truncated = data.len() > MAX_STRING;
            data.truncate(MAX_STRING);

            let mut quoted = quote(&data);
            if truncated {
                quoted.push_str("...");
            }
            quoted
        },
        Err(_) => pointer(addr),
    }
}

/// Quote `data` as a C string literal, escaping anything not printable ASCII.
fn quote(data: &[u8]) -> String {
    let mut quoted = String::with_capacity(data.len() + 2);
    quoted.push('"');

    for &c in data {
        match c {
            b'\n' => quoted.push_str("\\n"),
            b'\r' => quoted.push_str("\\r"),
            b'\t' => quoted.push_str("\\t"),
            b'\\' => quoted.push_str("\\\\"),
            b'"' => quoted.push_str("\\\""),
            b' '..=b'~' => quoted.push(c as char),
            _ => quoted.push_str(&format!("\\x{c:02x}")),
        }
    }

    quoted.push('"');
    quoted
}
