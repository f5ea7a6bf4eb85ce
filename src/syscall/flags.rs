//! Symbolic rendering of bit-flag syscall arguments.
//!
//! Bit values come from `libc` for the host. A tracee is always traced by a tracer of
//! the same architecture, so host values are also the tracee's values.

use std::convert::TryFrom;

use crate::Signal;

type FlagTable = &'static [(u64, &'static str)];

macro_rules! flags {
    ($($flag: ident),* $(,)?) => {
        &[$((libc::$flag as u32 as u64, stringify!($flag))),*]
    };
}

// Multi-bit flags (`O_SYNC`, `O_TMPFILE`) precede the single bits they contain.
const OPEN_FLAGS: FlagTable = flags![
    O_CREAT, O_EXCL, O_NOCTTY, O_TRUNC, O_APPEND, O_NONBLOCK, O_SYNC, O_DSYNC, O_ASYNC,
    O_DIRECT, O_LARGEFILE, O_TMPFILE, O_DIRECTORY, O_NOFOLLOW, O_NOATIME, O_CLOEXEC,
    O_PATH,
];

const OPEN_ACCESS_MODES: FlagTable = flags![O_RDONLY, O_WRONLY, O_RDWR];

const PROT_FLAGS: FlagTable = flags![PROT_READ, PROT_WRITE, PROT_EXEC];

/// Mask of the mapping type in the `mmap()` flags.
const MAP_TYPE: u64 = 0x0f;

const MAP_TYPES: FlagTable = flags![MAP_SHARED, MAP_PRIVATE, MAP_SHARED_VALIDATE];

const MAP_FLAGS: FlagTable = flags![
    MAP_FIXED, MAP_ANONYMOUS, MAP_GROWSDOWN, MAP_DENYWRITE, MAP_EXECUTABLE, MAP_LOCKED,
    MAP_NORESERVE, MAP_POPULATE, MAP_NONBLOCK, MAP_STACK, MAP_HUGETLB,
    MAP_FIXED_NOREPLACE,
];

/// Mask of the exit signal in the `clone()` flags.
const CSIGNAL: u64 = 0xff;

const CLONE_FLAGS: FlagTable = flags![
    CLONE_VM, CLONE_FS, CLONE_FILES, CLONE_SIGHAND, CLONE_PIDFD, CLONE_PTRACE, CLONE_VFORK,
    CLONE_PARENT, CLONE_THREAD, CLONE_NEWNS, CLONE_SYSVSEM, CLONE_SETTLS,
    CLONE_PARENT_SETTID, CLONE_CHILD_CLEARTID, CLONE_DETACHED, CLONE_UNTRACED,
    CLONE_CHILD_SETTID, CLONE_NEWCGROUP, CLONE_NEWUTS, CLONE_NEWIPC, CLONE_NEWUSER,
    CLONE_NEWPID, CLONE_NEWNET, CLONE_IO,
];

const WAIT4_OPTIONS: FlagTable = flags![WNOHANG, WUNTRACED, WCONTINUED, __WNOTHREAD, __WALL, __WCLONE];

const WAITID_OPTIONS: FlagTable = flags![
    WNOHANG, WSTOPPED, WEXITED, WCONTINUED, WNOWAIT, __WNOTHREAD, __WALL, __WCLONE,
];

/// Render `value` symbolically if the `(syscall, arg)` pair is a known flag argument.
pub fn decode(syscall: &str, arg: &str, value: u64) -> Option<String> {
    let rendered = match (syscall, arg) {
        ("open" | "openat", "flags") => open_flags(value),
        ("mmap" | "mprotect", "prot") => prot_flags(value),
        ("mmap", "flags") => mmap_flags(value),
        ("clone", "flags") => clone_flags(value),
        ("wait4", "options") => bits(value, WAIT4_OPTIONS, vec![]),
        ("waitid", "options") => bits(value, WAITID_OPTIONS, vec![]),
        _ => return None,
    };

    Some(rendered)
}

/// Append the names of every flag fully set in `value`, then any residual bits in hex.
fn bits(value: u64, table: FlagTable, mut names: Vec<String>) -> String {
    let rest = take_names(value, table, &mut names);
    finish(names, rest)
}

fn take_names(value: u64, table: FlagTable, names: &mut Vec<String>) -> u64 {
    let mut rest = value;

    for &(bit, name) in table {
        if bit != 0 && rest & bit == bit {
            names.push(name.to_owned());
            rest &= !bit;
        }
    }

    rest
}

fn finish(mut names: Vec<String>, rest: u64) -> String {
    if rest != 0 {
        names.push(format!("{rest:#x}"));
    }

    if names.is_empty() {
        "0".into()
    } else {
        names.join("|")
    }
}

fn exact(value: u64, table: FlagTable) -> String {
    table
        .iter()
        .find(|&&(v, _)| v == value)
        .map(|&(_, name)| name.to_owned())
        .unwrap_or_else(|| format!("{value:#x}"))
}

fn open_flags(value: u64) -> String {
    let accmode = libc::O_ACCMODE as u64;
    let names = vec![exact(value & accmode, OPEN_ACCESS_MODES)];
    bits(value & !accmode, OPEN_FLAGS, names)
}

fn prot_flags(value: u64) -> String {
    if value == 0 {
        return "PROT_NONE".into();
    }

    bits(value, PROT_FLAGS, vec![])
}

fn mmap_flags(value: u64) -> String {
    let names = vec![exact(value & MAP_TYPE, MAP_TYPES)];
    bits(value & !MAP_TYPE, MAP_FLAGS, names)
}

fn clone_flags(value: u64) -> String {
    let mut names = vec![];
    let rest = take_names(value & !CSIGNAL, CLONE_FLAGS, &mut names);

    if rest != 0 {
        names.push(format!("{rest:#x}"));
    }

    let sig = (value & CSIGNAL) as i32;
    if sig != 0 {
        let name = Signal::try_from(sig)
            .map(|s| s.as_str().to_owned())
            .unwrap_or_else(|_| sig.to_string());
        names.push(name);
    }

    finish(names, 0)
}
